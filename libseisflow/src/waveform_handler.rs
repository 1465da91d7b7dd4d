use fxhash::FxHashMap;
use ndarray::ArrayView1;
use std::path::{Path, PathBuf};

use super::cache_store::{CacheStore, FileIndex};
use super::combined_cache::CombinedIndex;
use super::config::Config;
use super::constants::{DURATION_TOLERANCE, GAP_TOLERANCE, MAX_OPEN_FILES};
use super::data_file::{scan_folders, DataFileDescriptor};
use super::error::WaveformHandlerError;
use super::file_handles::FileHandleCache;
use super::indexer::sample_interval_ns;
use super::sample::Sample;
use super::timestamp::Timestamp;
use super::trace::{Stream, Trace};

/// Result of a [`WaveformHandler::get_samples`] query.
///
/// When `is_max_resolution` is false the values are interleaved `min, max`
/// pairs of consecutive sample chunks and `times` repeats each chunk time twice.
#[derive(Debug, Clone, PartialEq)]
pub struct WaveformData<T: Sample> {
    pub times: Vec<f64>,
    pub values: Vec<T>,
    pub start_time: f64,
    pub end_time: f64,
    pub npts: usize,
    pub delta: f64,
    pub is_max_resolution: bool,
}

/// Logical view over all waveform files of a project.
///
/// Construction scans the folders, checks the files tile one continuous time
/// range and builds (or loads) every per-file index into a combined overview.
/// Full resolution queries read the files through a bounded pool of open handles.
#[derive(Debug)]
pub struct WaveformHandler<T: Sample> {
    files: Vec<DataFileDescriptor>,
    file_indices: Vec<FileIndex<T>>,
    time_ranges: Vec<(Timestamp, Timestamp)>,
    total_size: u64,
    index: CombinedIndex<T>,
    handles: FileHandleCache,
    rebuild_count: usize,
}

impl<T: Sample> WaveformHandler<T> {
    pub fn new(
        waveform_folders: &[PathBuf],
        cache_folder: &Path,
        index_sampling_rate_hz: u32,
        start_time: Timestamp,
        end_time: Timestamp,
    ) -> Result<Self, WaveformHandlerError> {
        Self::with_existing_caches(
            waveform_folders,
            cache_folder,
            index_sampling_rate_hz,
            start_time,
            end_time,
            FxHashMap::default(),
        )
    }

    /// Same as [`Self::new`], but files found in `existing_caches` are not looked up in the cache store
    pub fn with_existing_caches(
        waveform_folders: &[PathBuf],
        cache_folder: &Path,
        index_sampling_rate_hz: u32,
        start_time: Timestamp,
        end_time: Timestamp,
        mut existing_caches: FxHashMap<PathBuf, FileIndex<T>>,
    ) -> Result<Self, WaveformHandlerError> {
        spdlog::info!("Opening {} waveform folder(s)...", waveform_folders.len());
        let files = scan_folders(waveform_folders, start_time, end_time)?;
        if files.is_empty() {
            return Err(WaveformHandlerError::NoDataFiles(waveform_folders.to_vec()));
        }
        let total_size: u64 = files.iter().map(|f| f.size).sum();
        spdlog::info!(
            "Found {} waveform files [{} in total].",
            files.len(),
            human_bytes::human_bytes(total_size as f64)
        );

        let time_ranges = find_time_ranges(&files)?;

        let mut store = CacheStore::new(cache_folder, index_sampling_rate_hz)?;
        let mut file_indices = Vec::with_capacity(files.len());
        for file in files.iter() {
            let file_index = match existing_caches.remove(&file.path) {
                Some(cached) => cached,
                None => store.get_or_build(file)?,
            };
            file_indices.push(file_index);
        }
        let index = CombinedIndex::combine(&file_indices)?;

        Ok(Self {
            files,
            file_indices,
            time_ranges,
            total_size,
            index,
            handles: FileHandleCache::new(MAX_OPEN_FILES),
            rebuild_count: store.rebuild_count(),
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, WaveformHandlerError> {
        Self::new(
            &config.waveform_folders,
            &config.cache_folder,
            config.index_sampling_rate_hz,
            config.temporal_range.start_time,
            config.temporal_range.end_time,
        )
    }

    /// Time of the first sample
    pub fn start_time(&self) -> Timestamp {
        self.time_ranges
            .iter()
            .map(|r| r.0)
            .min()
            .unwrap_or_default()
    }

    /// Time of the last sample
    pub fn end_time(&self) -> Timestamp {
        self.time_ranges
            .iter()
            .map(|r| r.1)
            .max()
            .unwrap_or_default()
    }

    pub fn channels(&self) -> &[String] {
        self.index.channels()
    }

    pub fn sampling_rate(&self) -> f64 {
        self.index.data_sampling_rate_hz()
    }

    pub fn dt(&self) -> f64 {
        1.0 / self.sampling_rate()
    }

    pub fn time_ranges(&self) -> &[(Timestamp, Timestamp)] {
        &self.time_ranges
    }

    /// Total size of all data files in bytes
    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    pub fn files(&self) -> &[DataFileDescriptor] {
        &self.files
    }

    /// Per-file indices, keyed by path, for reuse by another handler
    pub fn individual_caches(&self) -> FxHashMap<PathBuf, FileIndex<T>> {
        self.files
            .iter()
            .zip(self.file_indices.iter())
            .map(|(f, i)| (f.path.clone(), i.clone()))
            .collect()
    }

    /// Number of per-file indices computed from source files while constructing this handler
    pub fn rebuild_count(&self) -> usize {
        self.rebuild_count
    }

    /// Overview of a channel: bin times (seconds) and interleaved min/max values, both of the same length
    pub fn get_binned_envelope(
        &self,
        channel_id: &str,
    ) -> Result<(&[f64], ArrayView1<T>), WaveformHandlerError> {
        let envelope = self
            .index
            .envelope(channel_id)
            .ok_or(WaveformHandlerError::UnknownChannel(channel_id.to_string()))?;
        Ok((self.index.times(), envelope))
    }

    /// Full resolution samples of a channel within `[start, end]`, merged across files
    pub fn get_trace(
        &mut self,
        channel_id: &str,
        start: Timestamp,
        end: Timestamp,
    ) -> Result<Trace<T>, WaveformHandlerError> {
        if self.index.channel_index(channel_id).is_none() {
            return Err(WaveformHandlerError::UnknownChannel(channel_id.to_string()));
        }
        let no_data = || WaveformHandlerError::NoData(channel_id.to_string(), start, end);

        let mut pieces: Vec<Trace<T>> = Vec::new();
        for (file, file_index) in self.files.iter().zip(self.file_indices.iter()) {
            if !file.overlaps(start, end)
                || file_index.channels.binary_search_by(|c| c.as_str().cmp(channel_id)).is_err()
            {
                continue;
            }
            let trace: Trace<T> = self.handles.get(&file.path)?.read_channel(channel_id)?;
            if let Some(piece) = trace.trimmed(start, end) {
                pieces.push(piece);
            }
        }
        if pieces.is_empty() {
            return Err(no_data());
        }
        merge_pieces(channel_id, pieces)?.ok_or_else(no_data)
    }

    /// Samples of a channel within `[start, end]`.
    ///
    /// With more than `max_points` samples, chunks of `npts / max_points` samples are
    /// reduced to min/max pairs, the largest factor that still leaves more than
    /// `max_points` chunks. A factor of one keeps full resolution.
    pub fn get_samples(
        &mut self,
        channel_id: &str,
        start: Timestamp,
        end: Timestamp,
        max_points: usize,
    ) -> Result<WaveformData<T>, WaveformHandlerError> {
        let trace = self.get_trace(channel_id, start, end)?;
        let npts = trace.npts();
        let factor = if max_points == 0 { 1 } else { npts / max_points };
        if npts > max_points && factor > 1 {
            let mut values = Vec::with_capacity(2 * (npts / factor + 1));
            for chunk in trace.data.chunks(factor) {
                let (min, max) = min_max(chunk);
                values.push(min);
                values.push(max);
            }
            let n_chunks = values.len() / 2;
            let new_dt = trace.delta() * factor as f64;
            let new_start = trace.start_time.seconds() + new_dt * 0.5;
            let new_end = new_start + (n_chunks as f64 - 1.0) * new_dt;
            let times = (0..n_chunks)
                .flat_map(|i| {
                    let t = new_start + i as f64 * new_dt;
                    [t, t]
                })
                .collect();
            return Ok(WaveformData {
                times,
                values,
                start_time: new_start,
                end_time: new_end,
                npts: n_chunks,
                delta: new_dt,
                is_max_resolution: false,
            });
        }

        Ok(WaveformData {
            times: trace.times(),
            start_time: trace.start_time.seconds(),
            end_time: trace.end_time().seconds(),
            npts,
            delta: trace.delta(),
            values: trace.data,
            is_max_resolution: true,
        })
    }

    /// Full resolution traces of several channels for the same window
    pub fn get_waveforms(
        &mut self,
        channel_ids: &[String],
        start: Timestamp,
        end: Timestamp,
    ) -> Result<Stream<T>, WaveformHandlerError> {
        channel_ids
            .iter()
            .map(|id| self.get_trace(id, start, end))
            .collect()
    }
}

/// Group files into continuous time ranges. Only a single range is supported.
fn find_time_ranges(
    files: &[DataFileDescriptor],
) -> Result<Vec<(Timestamp, Timestamp)>, WaveformHandlerError> {
    let mean_duration = files.iter().map(|f| f.duration()).sum::<f64>() / files.len() as f64;
    if let Some(odd) = files
        .iter()
        .find(|f| (f.duration() - mean_duration).abs() > DURATION_TOLERANCE * mean_duration)
    {
        return Err(WaveformHandlerError::UnequalDurations(
            odd.path.clone(),
            odd.duration(),
            mean_duration,
        ));
    }

    let mut ranges: Vec<(Timestamp, Timestamp)> = Vec::new();
    for file in files.iter() {
        match ranges.last_mut() {
            Some(last) if file.start_time <= last.1.offset(GAP_TOLERANCE * mean_duration) => {
                if file.end_time > last.1 {
                    last.1 = file.end_time;
                }
            }
            _ => ranges.push((file.start_time, file.end_time)),
        }
    }

    spdlog::info!("Found {} time range(s) with waveform data.", ranges.len());
    for (start, end) in ranges.iter() {
        spdlog::info!(
            "Time range: {start}-{end} [Duration: {:.1} seconds]",
            end.seconds_since(*start)
        );
    }
    if ranges.len() != 1 {
        return Err(WaveformHandlerError::MultipleTimeRanges(ranges.len()));
    }
    Ok(ranges)
}

/// Join trimmed pieces of one channel into a single trace.
///
/// Samples of a later piece that overlap the already merged data are dropped.
/// Pieces must share one sampling rate and must not leave a gap.
fn merge_pieces<T: Sample>(
    channel_id: &str,
    mut pieces: Vec<Trace<T>>,
) -> Result<Option<Trace<T>>, WaveformHandlerError> {
    pieces.sort_by_key(|p| p.start_time);
    let mut iter = pieces.into_iter();
    let Some(mut merged) = iter.next() else {
        return Ok(None);
    };
    let dt_ns = sample_interval_ns(merged.sampling_rate_hz);
    for piece in iter {
        if piece.sampling_rate_hz != merged.sampling_rate_hz {
            return Err(WaveformHandlerError::InconsistentSamplingRate(
                channel_id.to_string(),
                merged.sampling_rate_hz,
                piece.sampling_rate_hz,
            ));
        }
        let offset_ns = piece.start_time.nanos() - merged.start_time.nanos();
        let position = ((offset_ns as f64) / dt_ns as f64).round() as usize;
        if position > merged.npts() {
            return Err(WaveformHandlerError::DataGap(
                channel_id.to_string(),
                merged.end_time(),
                piece.start_time,
            ));
        }
        let skip = merged.npts() - position;
        if skip < piece.npts() {
            merged.data.extend_from_slice(&piece.data[skip..]);
        }
    }
    Ok(Some(merged))
}

fn min_max<T: Sample>(chunk: &[T]) -> (T, T) {
    let mut min = chunk[0];
    let mut max = chunk[0];
    for &value in chunk.iter().skip(1) {
        if value < min {
            min = value;
        }
        if value > max {
            max = value;
        }
    }
    (min, max)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn piece(start_ns: i64, data: Vec<i32>) -> Trace<i32> {
        Trace::new("XB.01.00.001", Timestamp::from_nanos(start_ns), 10.0, data)
    }

    #[test]
    fn test_merge_adjacent_and_overlapping() {
        let merged = merge_pieces(
            "XB.01.00.001",
            vec![piece(300_000_000, vec![4, 5, 6]), piece(0, vec![1, 2, 3])],
        )
        .unwrap()
        .unwrap();
        assert_eq!(merged.data, vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(merged.start_time.nanos(), 0);

        let merged = merge_pieces(
            "XB.01.00.001",
            vec![piece(0, vec![1, 2, 3]), piece(200_000_000, vec![9, 4, 5])],
        )
        .unwrap()
        .unwrap();
        assert_eq!(merged.data, vec![1, 2, 3, 4, 5]);

        // Fully contained
        let merged = merge_pieces(
            "XB.01.00.001",
            vec![piece(0, vec![1, 2, 3]), piece(100_000_000, vec![9])],
        )
        .unwrap()
        .unwrap();
        assert_eq!(merged.data, vec![1, 2, 3]);
    }

    #[test]
    fn test_merge_rejects_gaps_and_rate_changes() {
        let result = merge_pieces(
            "XB.01.00.001",
            vec![piece(0, vec![1, 2, 3]), piece(500_000_000, vec![4])],
        );
        assert!(matches!(result, Err(WaveformHandlerError::DataGap(_, _, _))));

        let mut other = piece(300_000_000, vec![4]);
        other.sampling_rate_hz = 20.0;
        let result = merge_pieces("XB.01.00.001", vec![piece(0, vec![1, 2, 3]), other]);
        assert!(matches!(
            result,
            Err(WaveformHandlerError::InconsistentSamplingRate(_, _, _))
        ));
    }

    #[test]
    fn test_min_max() {
        assert_eq!(min_max(&[3.0f32, -1.0, 7.5, 2.0]), (-1.0, 7.5));
        assert_eq!(min_max(&[4i16]), (4, 4));
    }
}
