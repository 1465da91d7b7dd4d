//! # seisflow_cli
//!
//! Part of the seisflow crate family.
//!
//! Command line front end for indexing waveform data and running the detection pipeline.
//!
//! ```bash
//! seisflow_cli -p config.yaml new     # write a template config
//! seisflow_cli -p config.yaml index   # build or check the index caches
//! seisflow_cli -p config.yaml run     # detect, pick and locate events
//! ```
//!
//! Library logs go to `./seisflow.log`, terminal output and progress bars to the console.
use clap::{Arg, ArgAction, Command};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use indicatif_log_bridge::LogWrapper;
use std::path::{Path, PathBuf};
use std::sync::{mpsc, Arc};

use libseisflow::config::Config;
use libseisflow::process::{create_subsets, intervals_for, process_subset};
use libseisflow::sample::{Sample, SampleType};
use libseisflow::waveform_handler::WaveformHandler;
use libseisflow::worker_status::{BarColor, WorkerStatus};

fn make_template_config(path: &Path) {
    let config = Config::default();
    match config.write_config_file(path) {
        Ok(()) => log::info!("Done."),
        Err(e) => log::error!("{e}"),
    }
}

fn init_library_logging(verbose: bool) {
    let file_sink = Arc::new(
        spdlog::sink::FileSink::builder()
            .path(PathBuf::from("./seisflow.log"))
            .truncate(true)
            .build()
            .expect("Could not create log file!"),
    );
    let level = if verbose {
        spdlog::Level::Debug
    } else {
        spdlog::Level::Info
    };
    let logger = Arc::new(
        spdlog::Logger::builder()
            .level_filter(spdlog::LevelFilter::MoreSevereEqual(level))
            .flush_level_filter(spdlog::LevelFilter::All)
            .sink(file_sink)
            .build()
            .expect("Could not create library logger!"),
    );
    spdlog::set_default_logger(logger);
}

/// Build (or validate) every index cache and report what was found
fn index<T: Sample>(config: &Config) {
    match WaveformHandler::<T>::from_config(config) {
        Ok(handler) => {
            log::info!(
                "Indexed {} files [{}] with {} channels.",
                handler.files().len(),
                human_bytes::human_bytes(handler.total_size() as f64),
                handler.channels().len()
            );
            for (start, end) in handler.time_ranges() {
                log::info!("Time range: {start} - {end}");
            }
            log::info!("Sampling rate: {} Hz", handler.sampling_rate());
            log::info!("Rebuilt {} cache(s).", handler.rebuild_count());
        }
        Err(e) => log::error!("Indexing failed: {e}"),
    }
}

fn bar_style(color: &BarColor) -> ProgressStyle {
    let color = match color {
        BarColor::CYAN => "cyan",
        BarColor::MAGENTA => "magenta",
        BarColor::RED => "red",
        BarColor::GREEN => "green",
    };
    ProgressStyle::with_template(&format!(
        "[worker {{prefix}}] {{bar:40.{color}/blue}} {{pos:>3}}% {{msg}}"
    ))
    .unwrap_or_else(|_| ProgressStyle::default_bar())
}

/// Shard the intervals across workers and drive one progress bar per worker
fn run<T: Sample>(config: Config, pb_manager: &MultiProgress) {
    if let Err(e) = config.validate() {
        log::error!("{e}");
        return;
    }
    // Caches are built once here so the workers only load them
    let handler = match WaveformHandler::<T>::from_config(&config) {
        Ok(h) => h,
        Err(e) => {
            log::error!("{e}");
            return;
        }
    };
    let intervals = intervals_for(&config, &handler);
    log::info!("Processing {} interval(s)...", intervals.len());
    let caches = handler.individual_caches();
    drop(handler);

    let (tx, rx) = mpsc::channel::<WorkerStatus>();
    let mut workers = Vec::new();
    let mut bars = Vec::new();
    for (idx, subset) in create_subsets(&config, &intervals).into_iter().enumerate() {
        // Dont make empty workers
        if subset.is_empty() {
            continue;
        }
        let bar = pb_manager.add(ProgressBar::new(100));
        bar.set_style(bar_style(&BarColor::default()));
        bar.set_prefix(format!("{idx}"));
        bars.push(bar);
        let conf = config.clone();
        let tx = tx.clone();
        let caches = caches.clone();
        workers.push(std::thread::spawn(move || {
            process_subset::<T>(conf, tx, idx, subset, caches)
        }));
    }
    drop(tx);

    // Ends once every worker dropped its sender
    for status in rx.iter() {
        if let Some(bar) = bars.get(status.worker_id) {
            bar.set_style(bar_style(&status.color));
            bar.set_position((status.progress * 100.0) as u64);
            bar.set_message(format!(
                "{} intervals, {} events",
                status.intervals_done, status.events_stored
            ));
        }
    }

    let mut total_events = 0;
    for worker in workers {
        match worker.join() {
            Ok(Ok(n)) => total_events += n,
            Ok(Err(e)) => log::error!("Processing failed with error: {e}"),
            Err(_) => log::error!("Failed to join processing worker!"),
        }
    }
    for bar in bars {
        bar.finish();
    }
    log::info!(
        "Found {} events, written to {}.",
        total_events,
        config.output_folder.to_string_lossy()
    );
}

fn main() {
    // Create a cli
    let matches = Command::new("seisflow_cli")
        .arg_required_else_help(true)
        .subcommand(Command::new("new").about("Make a template configuration yaml file"))
        .subcommand(Command::new("index").about("Build or validate the waveform index caches"))
        .subcommand(Command::new("run").about("Run the detection pipeline"))
        .arg(
            Arg::new("path")
                .short('p')
                .long("path")
                .required(true)
                .help("Path to the configuration file"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::SetTrue)
                .help("Log debug messages"),
        )
        .get_matches();

    let verbose = matches.get_flag("verbose");

    // Initialize feedback
    let logger = simplelog::TermLogger::new(
        if verbose {
            simplelog::LevelFilter::Debug
        } else {
            simplelog::LevelFilter::Info
        },
        simplelog::Config::default(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    );

    let pb_manager = MultiProgress::new();

    LogWrapper::new(pb_manager.clone(), logger)
        .try_init()
        .expect("Could not create logging/progress!");
    init_library_logging(verbose);

    // Parse the cli
    let config_path = PathBuf::from(matches.get_one::<String>("path").expect("We require args"));

    if let Some(("new", _)) = matches.subcommand() {
        log::info!(
            "Making a template config at {}...",
            config_path.to_string_lossy()
        );
        make_template_config(&config_path);
        return;
    }

    // Load our config
    log::info!("Loading config from {}...", config_path.to_string_lossy());
    let config = match Config::read_config_file(&config_path) {
        Ok(c) => c,
        Err(e) => {
            log::error!("{e}");
            return;
        }
    };
    log::info!("Config successfully loaded.");
    for folder in config.waveform_folders.iter() {
        log::info!("Waveform Path: {}", folder.to_string_lossy());
    }
    log::info!("Cache Path: {}", config.cache_folder.to_string_lossy());
    log::info!("Channel Map Path: {}", config.channel_map_path.to_string_lossy());
    log::info!(
        "Temporal Range: {} - {}",
        config.temporal_range.start_time,
        config.temporal_range.end_time
    );

    match (matches.subcommand(), config.sample_type) {
        (Some(("index", _)), SampleType::I16) => index::<i16>(&config),
        (Some(("index", _)), SampleType::I32) => index::<i32>(&config),
        (Some(("index", _)), SampleType::I64) => index::<i64>(&config),
        (Some(("index", _)), SampleType::F32) => index::<f32>(&config),
        (Some(("index", _)), SampleType::F64) => index::<f64>(&config),
        (Some(("run", _)), SampleType::I16) => run::<i16>(config, &pb_manager),
        (Some(("run", _)), SampleType::I32) => run::<i32>(config, &pb_manager),
        (Some(("run", _)), SampleType::I64) => run::<i64>(config, &pb_manager),
        (Some(("run", _)), SampleType::F32) => run::<f32>(config, &pb_manager),
        (Some(("run", _)), SampleType::F64) => run::<f64>(config, &pb_manager),
        _ => log::error!("Unknown command, see --help"),
    }

    log::info!("Done.");
}
