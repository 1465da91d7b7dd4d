use fxhash::FxHashMap;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::mpsc::Sender;

use super::cache_store::FileIndex;
use super::channel_map::ChannelMap;
use super::classifier::detect_events;
use super::config::Config;
use super::constants::MIN_PICKS_FOR_LOCATION;
use super::error::ProcessorError;
use super::locator::locate_in_homogeneous_background_medium;
use super::picker::{Picker, PickerRegistry};
use super::sample::Sample;
use super::store::{EventStore, YamlFolderStore};
use super::timestamp::Timestamp;
use super::waveform_handler::WaveformHandler;
use super::worker_status::{BarColor, WorkerStatus};

/// A processing window `[start, end]`
pub type Interval = (Timestamp, Timestamp);

/// What happened in one interval
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntervalSummary {
    pub candidates: usize,
    pub located: usize,
    pub rejected: usize,
}

/// Overlapping windows of `length_s` covering `[start, end)`, stepping by
/// `length_s - overlap_s`. Windows entirely outside `[data_start, data_end]` are skipped.
pub fn compute_intervals(
    start: Timestamp,
    end: Timestamp,
    data_start: Timestamp,
    data_end: Timestamp,
    length_s: f64,
    overlap_s: f64,
) -> Vec<Interval> {
    let mut intervals = Vec::new();
    if length_s <= overlap_s {
        return intervals;
    }
    let mut interval_start = start;
    while interval_start < end {
        let interval_end = interval_start.offset(length_s);
        if interval_start <= data_end && interval_end >= data_start {
            intervals.push((interval_start, interval_end));
        }
        interval_start = interval_end.offset(-overlap_s);
    }
    intervals
}

/// Everything a worker needs to run the pipeline over its intervals
pub struct Pipeline<'a, T: Sample> {
    pub config: &'a Config,
    pub channel_map: &'a ChannelMap,
    pub picker: Box<dyn Picker<T>>,
}

impl<'a, T: Sample> Pipeline<'a, T> {
    pub fn new(config: &'a Config, channel_map: &'a ChannelMap) -> Result<Self, ProcessorError> {
        let registry = PickerRegistry::<T>::with_defaults();
        let picker = registry.create(&config.picker.algorithm, &config.picker.options)?;
        Ok(Self {
            config,
            channel_map,
            picker,
        })
    }

    /// Trigger, classify, pick, locate and store the events of one interval
    pub fn process_interval(
        &self,
        handler: &mut WaveformHandler<T>,
        store: &mut dyn EventStore,
        interval: Interval,
    ) -> Result<IntervalSummary, ProcessorError> {
        let config = self.config;
        let data_start = handler.start_time();
        let data_end = handler.end_time();
        let start = interval.0.max(data_start);
        let end = interval.1.min(data_end);
        let mut summary = IntervalSummary::default();
        if end <= start {
            return Ok(summary);
        }

        let trigger_channels: Vec<String> = match config.trigger.trigger_channels() {
            Some(channels) => channels.to_vec(),
            None => handler.channels().to_vec(),
        };
        let stream = handler.get_waveforms(&trigger_channels, start, end)?;
        let detections = detect_events(
            &stream,
            None,
            &config.trigger.onset_options(),
            &config.trigger.coincidence_options(),
            &BTreeMap::new(),
            &config.classifier,
        )?;
        summary.candidates = detections.len();
        spdlog::info!(
            "Found {} event candidates in interval {}-{}.",
            detections.len(),
            start,
            end
        );

        let all_channels = handler.channels().to_vec();
        for detection in detections {
            let window_start = detection.time.offset(-config.picker.window_before_s).max(data_start);
            let window_end = detection.time.offset(config.picker.window_after_s).min(data_end);
            let window = handler.get_waveforms(&all_channels, window_start, window_end)?;

            let (picks, unmapped): (Vec<_>, Vec<_>) = self
                .picker
                .pick(&window)?
                .into_iter()
                .partition(|p| self.channel_map.get(&p.channel_id).is_some());
            for pick in unmapped.iter() {
                spdlog::warn!("No coordinates for picked channel {}, pick dropped.", pick.channel_id);
            }
            if picks.len() < MIN_PICKS_FOR_LOCATION {
                spdlog::debug!(
                    "Only {} picks for candidate at {}, not located.",
                    picks.len(),
                    detection.time
                );
                summary.rejected += 1;
                continue;
            }

            let mut event = locate_in_homogeneous_background_medium(
                picks,
                self.channel_map,
                &config.locator,
                Some(detection.classification),
            )?;
            event
                .comments
                .push(format!("Classification: {}", detection.classification));

            let uncertainty = event
                .preferred_origin()
                .map(|o| o.time_uncertainty_s)
                .unwrap_or(f64::INFINITY);
            if let Some(max) = config.qc.as_ref().and_then(|qc| qc.max_time_uncertainty_s) {
                if uncertainty > max {
                    spdlog::info!("Rejected event. Time error too large: {}", uncertainty);
                    summary.rejected += 1;
                    continue;
                }
            }
            store.add_event(event)?;
            summary.located += 1;
        }
        spdlog::info!(
            "Successfully located {} of {} event(s).",
            summary.located,
            summary.candidates
        );
        Ok(summary)
    }
}

/// Run the pipeline over a list of intervals, reporting progress after each one.
///
/// Per-file indices already built by the caller are passed in so workers never rebuild caches.
pub fn process_subset<T: Sample>(
    config: Config,
    tx: Sender<WorkerStatus>,
    worker_id: usize,
    subset: Vec<Interval>,
    caches: FxHashMap<PathBuf, FileIndex<T>>,
) -> Result<usize, ProcessorError> {
    let mut handler = WaveformHandler::<T>::with_existing_caches(
        &config.waveform_folders,
        &config.cache_folder,
        config.index_sampling_rate_hz,
        config.temporal_range.start_time,
        config.temporal_range.end_time,
        caches,
    )?;
    let channel_map = ChannelMap::new(&config.channel_map_path)?;
    let pipeline = Pipeline::<T>::new(&config, &channel_map)?;
    let mut store = YamlFolderStore::new(&config.output_folder)?;

    let n_intervals = subset.len();
    let mut events_stored = 0;
    tx.send(WorkerStatus::new(0.0, 0, 0, worker_id, BarColor::CYAN))?;
    for (idx, interval) in subset.into_iter().enumerate() {
        let summary = pipeline.process_interval(&mut handler, &mut store, interval)?;
        events_stored += summary.located;
        tx.send(WorkerStatus::new(
            (idx + 1) as f32 / n_intervals as f32,
            idx + 1,
            events_stored,
            worker_id,
            BarColor::CYAN,
        ))?;
    }
    spdlog::info!("Worker {} stored {} event(s).", worker_id, events_stored);
    Ok(events_stored)
}

/// The function to be called by a separate thread.
/// Processes every interval of the configured temporal range in one worker.
pub fn process<T: Sample>(
    config: Config,
    tx: Sender<WorkerStatus>,
    worker_id: usize,
) -> Result<usize, ProcessorError> {
    config.validate()?;
    let handler = WaveformHandler::<T>::from_config(&config)?;
    let intervals = intervals_for(&config, &handler);
    spdlog::info!("Processing {} interval(s)...", intervals.len());
    let caches = handler.individual_caches();
    process_subset(config, tx, worker_id, intervals, caches)
}

/// All intervals of the configured temporal range that the data covers
pub fn intervals_for<T: Sample>(config: &Config, handler: &WaveformHandler<T>) -> Vec<Interval> {
    compute_intervals(
        config.temporal_range.start_time,
        config.temporal_range.end_time,
        handler.start_time(),
        handler.end_time(),
        config.interval.length_s,
        config.interval.overlap_s,
    )
}

/// Divide the intervals in to a set of subsets (per thread/worker)
pub fn create_subsets(config: &Config, intervals: &[Interval]) -> Vec<Vec<Interval>> {
    let mut subsets: Vec<Vec<Interval>> = vec![Vec::new(); config.n_threads.max(1)];
    let n_subsets = subsets.len();

    for (idx, interval) in intervals.iter().enumerate() {
        subsets[idx % n_subsets].push(*interval)
    }

    subsets
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(seconds: f64) -> Timestamp {
        Timestamp::from_seconds(seconds)
    }

    #[test]
    fn test_compute_intervals() {
        let intervals = compute_intervals(t(0.0), t(10.0), t(0.0), t(10.0), 4.0, 1.0);
        assert_eq!(
            intervals,
            vec![(t(0.0), t(4.0)), (t(3.0), t(7.0)), (t(6.0), t(10.0)), (t(9.0), t(13.0))]
        );
    }

    #[test]
    fn test_intervals_outside_data_are_skipped() {
        let intervals = compute_intervals(t(0.0), t(10.0), t(4.5), t(6.0), 2.0, 0.0);
        assert_eq!(intervals, vec![(t(4.0), t(6.0)), (t(6.0), t(8.0))]);
        assert!(compute_intervals(t(0.0), t(10.0), t(0.0), t(10.0), 1.0, 1.0).is_empty());
    }

    #[test]
    fn test_create_subsets() {
        let mut config = Config::default();
        config.n_threads = 3;
        let intervals: Vec<Interval> = (0..7).map(|i| (t(i as f64), t(i as f64 + 1.0))).collect();
        let subsets = create_subsets(&config, &intervals);
        assert_eq!(subsets.len(), 3);
        assert_eq!(subsets[0].len(), 3);
        assert_eq!(subsets[1].len(), 2);
        assert_eq!(subsets[2], vec![intervals[2], intervals[5]]);
    }
}
