use bitvec::prelude::*;
use ndarray::{Array2, ArrayView1};

use super::cache_store::FileIndex;
use super::error::CacheError;
use super::indexer::index_interval_ns;
use super::sample::Sample;
use super::timestamp::Timestamp;

/// Union of every per-file index on one global bin grid.
///
/// `data` holds one row per channel of interleaved `min, max` pairs. Where
/// several files cover the same bin the mins and maxes are combined; bins no
/// file covers are left at `T::default()` and flagged in the has-data mask.
/// Rebuilt from scratch whenever the file list changes.
#[derive(Debug, Clone)]
pub struct CombinedIndex<T: Sample> {
    start_time: Timestamp,
    dt_ns: i64,
    data_sampling_rate_hz: f64,
    channels: Vec<String>,
    data: Array2<T>,
    has_data: BitVec,
    times: Vec<f64>,
}

impl<T: Sample> CombinedIndex<T> {
    pub fn combine(indices: &[FileIndex<T>]) -> Result<Self, CacheError> {
        let first = indices.first().ok_or(CacheError::NoCaches)?;
        let dt_ns = index_interval_ns(first.index_sampling_rate_hz)?;
        let data_sampling_rate_hz = first.data_sampling_rate_hz;

        let mut start_time = first.start_time;
        let mut end_time = first.end_time()?;
        let mut channels: Vec<String> = Vec::new();
        for index in indices.iter() {
            if index.index_sampling_rate_hz != first.index_sampling_rate_hz {
                return Err(CacheError::MismatchedIndexRate(
                    first.index_sampling_rate_hz,
                    index.index_sampling_rate_hz,
                ));
            }
            if index.data_sampling_rate_hz != data_sampling_rate_hz {
                return Err(CacheError::MismatchedSamplingRate(
                    data_sampling_rate_hz,
                    index.data_sampling_rate_hz,
                ));
            }
            start_time = start_time.min(index.start_time);
            end_time = end_time.max(index.end_time()?);
            channels.extend(index.channels.iter().cloned());
        }
        channels.sort();
        channels.dedup();

        let n_bins = ((end_time.nanos() - start_time.nanos()) / dt_ns) as usize + 1;
        let mut data = Array2::<T>::default((channels.len(), 2 * n_bins));
        let mut has_data = bitvec![0; channels.len() * n_bins];

        for index in indices.iter() {
            // Starts are aligned to the grid so this division is exact
            let offset = ((index.start_time.nanos() - start_time.nanos()) / dt_ns) as usize;
            for (row, channel) in index.channels.iter().enumerate() {
                let global_row = channels
                    .binary_search(channel)
                    .map_err(|_| CacheError::Corrupt(channel.clone()))?;
                for bin in 0..index.n_bins() {
                    let global_bin = offset + bin;
                    let min = index.data[[row, 2 * bin]];
                    let max = index.data[[row, 2 * bin + 1]];
                    let flag = global_row * n_bins + global_bin;
                    if has_data[flag] {
                        if min < data[[global_row, 2 * global_bin]] {
                            data[[global_row, 2 * global_bin]] = min;
                        }
                        if max > data[[global_row, 2 * global_bin + 1]] {
                            data[[global_row, 2 * global_bin + 1]] = max;
                        }
                    } else {
                        data[[global_row, 2 * global_bin]] = min;
                        data[[global_row, 2 * global_bin + 1]] = max;
                        has_data.set(flag, true);
                    }
                }
            }
        }

        let times = (0..n_bins)
            .flat_map(|bin| {
                let t = start_time.offset_nanos(bin as i64 * dt_ns).seconds();
                [t, t]
            })
            .collect();

        Ok(Self {
            start_time,
            dt_ns,
            data_sampling_rate_hz,
            channels,
            data,
            has_data,
            times,
        })
    }

    pub fn start_time(&self) -> Timestamp {
        self.start_time
    }

    /// Start of the last bin
    pub fn end_time(&self) -> Timestamp {
        self.start_time
            .offset_nanos((self.n_bins() as i64 - 1) * self.dt_ns)
    }

    pub fn dt_ns(&self) -> i64 {
        self.dt_ns
    }

    pub fn n_bins(&self) -> usize {
        self.data.ncols() / 2
    }

    pub fn data_sampling_rate_hz(&self) -> f64 {
        self.data_sampling_rate_hz
    }

    pub fn channels(&self) -> &[String] {
        &self.channels
    }

    pub fn channel_index(&self, channel_id: &str) -> Option<usize> {
        self.channels
            .binary_search_by(|c| c.as_str().cmp(channel_id))
            .ok()
    }

    /// Bin timestamps in seconds, each repeated twice to match the interleaving of [`Self::envelope`]
    pub fn times(&self) -> &[f64] {
        &self.times
    }

    /// Interleaved min/max row of one channel
    pub fn envelope(&self, channel_id: &str) -> Option<ArrayView1<T>> {
        self.channel_index(channel_id).map(|row| self.data.row(row))
    }

    /// Whether any file covers the given bin for the channel
    pub fn has_data(&self, channel_id: &str, bin: usize) -> bool {
        match self.channel_index(channel_id) {
            Some(row) if bin < self.n_bins() => self.has_data[row * self.n_bins() + bin],
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file_index(start_s: f64, channels: &[&str], rows: Vec<Vec<i32>>) -> FileIndex<i32> {
        let n_cols = rows[0].len();
        FileIndex {
            start_time: Timestamp::from_seconds(start_s),
            index_sampling_rate_hz: 2,
            data_sampling_rate_hz: 100.0,
            channels: channels.iter().map(|c| c.to_string()).collect(),
            data: Array2::from_shape_vec((rows.len(), n_cols), rows.concat()).unwrap(),
        }
    }

    #[test]
    fn test_combine_disjoint_channels_and_gaps() {
        let a = file_index(10.0, &["A"], vec![vec![-1, 1, -2, 2]]);
        let b = file_index(11.5, &["B"], vec![vec![-3, 3]]);
        let combined = CombinedIndex::combine(&[b, a]).unwrap();

        assert_eq!(combined.start_time(), Timestamp::from_seconds(10.0));
        assert_eq!(combined.end_time(), Timestamp::from_seconds(11.5));
        assert_eq!(combined.n_bins(), 4);
        assert_eq!(combined.channels(), &["A".to_string(), "B".to_string()]);
        assert_eq!(
            combined.times(),
            &[10.0, 10.0, 10.5, 10.5, 11.0, 11.0, 11.5, 11.5]
        );
        assert_eq!(
            combined.envelope("A").unwrap().to_vec(),
            vec![-1, 1, -2, 2, 0, 0, 0, 0]
        );
        assert_eq!(
            combined.envelope("B").unwrap().to_vec(),
            vec![0, 0, 0, 0, 0, 0, -3, 3]
        );
        assert!(combined.has_data("A", 1));
        assert!(!combined.has_data("A", 2));
        assert!(!combined.has_data("B", 0));
        assert!(combined.has_data("B", 3));
        assert!(combined.envelope("C").is_none());
    }

    #[test]
    fn test_overlapping_bins_merge() {
        let a = file_index(10.0, &["A"], vec![vec![-1, 1, -2, 2]]);
        let b = file_index(10.5, &["A"], vec![vec![-5, 0, 4, 6]]);
        let combined = CombinedIndex::combine(&[a, b]).unwrap();
        assert_eq!(
            combined.envelope("A").unwrap().to_vec(),
            vec![-1, 1, -5, 2, 4, 6]
        );
    }

    #[test]
    fn test_mismatched_rates_fail() {
        let a = file_index(10.0, &["A"], vec![vec![-1, 1]]);
        let mut b = file_index(10.5, &["A"], vec![vec![-1, 1]]);
        b.data_sampling_rate_hz = 200.0;
        assert!(matches!(
            CombinedIndex::combine(&[a.clone(), b]),
            Err(CacheError::MismatchedSamplingRate(_, _))
        ));

        let mut c = file_index(10.5, &["A"], vec![vec![-1, 1]]);
        c.index_sampling_rate_hz = 4;
        assert!(matches!(
            CombinedIndex::combine(&[a, c]),
            Err(CacheError::MismatchedIndexRate(2, 4))
        ));
        assert!(matches!(
            CombinedIndex::<i32>::combine(&[]),
            Err(CacheError::NoCaches)
        ));
    }
}
