//! # seisflow
//!
//! seisflow indexes continuous multi-channel acoustic emission and seismic waveform data
//! and runs a detection, picking and location pipeline over it, turning raw samples into
//! a catalogue of located events.
//!
//! ## Installation
//!
//! Currently the only method of install is from source.
//!
//! ### Rust
//!
//! If you have not used Rust before, you will most likely need to install the Rust tool
//! chain. See the [Rust docs](https://www.rust-lang.org/tools/install) for installation
//! instructions.
//!
//! ### HDF5
//!
//! Waveform files are HDF5, so HDF5 must be installed before building. Typically this will
//! be installed using a package manager (homebrew, apt, etc), and the Rust libraries will
//! auto detect the location of the HDF install. If HDF5 lives in a custom location, write
//! the following snippet into the file `.cargo/config.toml` in the repository:
//!
//! ```toml
//! [env]
//! HDF5_DIR="/path/to/my/hdf5/install/"
//!
//! [build]
//! rustflags="-C link-args=-Wl,-rpath,/path/to/my/hdf5/install/lib"
//! ```
//!
//! ### Building & Install
//!
//! To build and install the CLI use `cargo install --path ./seisflow_cli` from the top
//! level of the repository.
//!
//! ## Waveform data
//!
//! Data files are named `<start>__<end>__<suffix>.h5` where both timestamps have the form
//! `YYYYMMDDTHHMMSS_ffffff` (UTC, microseconds). The time range of every file is taken
//! from its name without opening it. Inside, traces are stored as
//!
//! ```text
//! <start>__<end>__<suffix>.h5
//! Waveforms - version
//! |---- NET.STA
//! |    |---- NET.STA.LOC.CHA__<tag>(dset) - starttime (ns), sampling_rate (Hz)
//! ```
//!
//! ## Index caches
//!
//! For every data file a min/max envelope at `index_sampling_rate_hz` is written to the
//! cache folder. Bins are aligned to multiples of the index interval since the epoch, so
//! indices of neighbouring files merge bin for bin. A cache is reused as long as the source
//! file keeps its modification time and size and the index rate is unchanged; anything
//! else (including a damaged cache file) silently rebuilds it.
//!
//! ## Configuration
//!
//! A template configuration is written by `seisflow_cli new -p config.yaml`. The channel
//! map is a CSV file of `id,x,y,z[,gain]` lines in meters of a local Cartesian frame.
//!
//! ```yml
//! waveform_folders:
//! - data
//! cache_folder: cache
//! index_sampling_rate_hz: 1000
//! sample_type: f32
//! temporal_range:
//!   start_time: 2022-01-01T00:00:00Z
//!   end_time: 2022-01-02T00:00:00Z
//! channel_map_path: channels.csv
//! interval:
//!   length_s: 1.0
//!   overlap_s: 0.1
//! trigger:
//!   channels: []
//!   sta_s: 0.00005
//!   lta_s: 0.001
//!   thr_on: 4.0
//!   thr_off: 1.5
//!   thr_coincidence_sum: 6.0
//!   trigger_off_extension_s: 0.01
//!   max_trigger_length_s: 1000000.0
//!   delete_long_trigger: false
//! classifier:
//!   active_triggering_channel: null
//!   minimum_time_between_events_s: 0.0006
//!   max_spread_electronic_interference_s: 0.0025
//! picker:
//!   algorithm: sta_lta
//!   options:
//!     st_window: 70
//!     lt_window: 700
//!     thresholds: 10.0
//!   window_before_s: 0.001
//!   window_after_s: 0.004
//! locator:
//!   velocity:
//!     P: 4866.0
//!     S: 2800.0
//!   damping: 0.01
//! qc:
//!   max_time_uncertainty_s: 0.0005
//! output_folder: events
//! n_threads: 4
//! ```
//!
//! ## Output
//!
//! Every located event is written as one YAML file to `output_folder`, holding its picks,
//! origins with arrivals, and classification (`active`, `passive` or `electronic`).
pub mod cache_store;
pub mod channel_map;
pub mod characteristic;
pub mod classifier;
pub mod coincidence;
pub mod combined_cache;
pub mod config;
pub mod constants;
pub mod data_file;
pub mod error;
pub mod event;
pub mod file_handles;
pub mod hdf_writer;
pub mod indexer;
pub mod locator;
pub mod picker;
pub mod process;
pub mod sample;
pub mod store;
pub mod timestamp;
pub mod trace;
pub mod waveform_file;
pub mod waveform_handler;
pub mod worker_status;
