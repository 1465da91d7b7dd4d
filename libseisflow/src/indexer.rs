use super::constants::NANOS_PER_SECOND;
use super::error::IndexError;
use super::sample::Sample;
use super::timestamp::Timestamp;

/// Min/max envelope of one continuous trace at a fixed index sampling rate.
///
/// Bin `k` covers `(start_time + k * dt, start_time + (k + 1) * dt]` where
/// `dt = 1 / index_sampling_rate_hz`. The start time is aligned to wall-clock
/// multiples of `dt`, so envelopes of different files line up bin for bin.
#[derive(Debug, Clone, PartialEq)]
pub struct EnvelopeIndex<T: Sample> {
    pub start_time: Timestamp,
    pub data_sampling_rate_hz: f64,
    pub index_sampling_rate_hz: u32,
    pub min_values: Vec<T>,
    pub max_values: Vec<T>,
}

impl<T: Sample> EnvelopeIndex<T> {
    pub fn len(&self) -> usize {
        self.min_values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.min_values.is_empty()
    }
}

/// Width of one index bin in nanoseconds.
///
/// The rate has to divide a second into a whole number of nanoseconds, otherwise
/// bin boundaries would drift against wall-clock time.
pub fn index_interval_ns(index_sampling_rate_hz: u32) -> Result<i64, IndexError> {
    if index_sampling_rate_hz == 0 {
        return Err(IndexError::ZeroRate);
    }
    let rate = index_sampling_rate_hz as i64;
    if NANOS_PER_SECOND % rate != 0 {
        return Err(IndexError::NonIntegerInterval(index_sampling_rate_hz));
    }
    Ok(NANOS_PER_SECOND / rate)
}

/// Sample spacing of the data in nanoseconds
pub fn sample_interval_ns(sampling_rate_hz: f64) -> i64 {
    (NANOS_PER_SECOND as f64 / sampling_rate_hz).round() as i64
}

/// Latest bin boundary at or before `time`
pub fn align_to_interval(time: Timestamp, interval_ns: i64) -> Timestamp {
    // Whole seconds first, then whole intervals inside that second
    let full_second = time.nanos().div_euclid(NANOS_PER_SECOND) * NANOS_PER_SECOND;
    let into_second = time.nanos() - full_second;
    Timestamp::from_nanos(full_second + (into_second / interval_ns) * interval_ns)
}

/// Compute the envelope of a trace in a single pass.
///
/// A sample exactly on a bin end stays in that bin; the next bin opens only once
/// a sample lies strictly beyond the current end. The first sample always lands
/// in bin 0.
pub fn index_trace<T: Sample>(
    data: &[T],
    start_time: Timestamp,
    sampling_rate_hz: f64,
    index_sampling_rate_hz: u32,
) -> Result<EnvelopeIndex<T>, IndexError> {
    let index_dt_ns = index_interval_ns(index_sampling_rate_hz)?;
    if sampling_rate_hz.is_nan() || sampling_rate_hz <= 0.0 {
        return Err(IndexError::BadSamplingRate(sampling_rate_hz));
    }
    let first = *data.first().ok_or(IndexError::EmptyTrace)?;
    let dt_ns = sample_interval_ns(sampling_rate_hz);

    let bin_start = align_to_interval(start_time, index_dt_ns);
    let mut bin_end = bin_start.nanos() + index_dt_ns;

    let expected_bins = ((data.len() as i64 - 1) * dt_ns / index_dt_ns + 2) as usize;
    let mut min_values = Vec::with_capacity(expected_bins);
    let mut max_values = Vec::with_capacity(expected_bins);

    let mut current_min = first;
    let mut current_max = first;
    let mut sample_time = start_time.nanos();
    for &value in data {
        if sample_time > bin_end {
            min_values.push(current_min);
            max_values.push(current_max);
            bin_end += index_dt_ns;
            current_min = value;
            current_max = value;
        }
        if value > current_max {
            current_max = value;
        }
        if value < current_min {
            current_min = value;
        }
        sample_time += dt_ns;
    }
    min_values.push(current_min);
    max_values.push(current_max);

    Ok(EnvelopeIndex {
        start_time: bin_start,
        data_sampling_rate_hz: sampling_rate_hz,
        index_sampling_rate_hz,
        min_values,
        max_values,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seconds(s: f64) -> Timestamp {
        Timestamp::from_seconds(s)
    }

    #[test]
    fn test_index_trace() {
        let data = [1.0f32, 2.0, 0.5, 0.5, 1.0, 3.0, 4.0];

        let out = index_trace(&data, seconds(5.25), 4.0, 2).unwrap();
        assert_eq!(out.index_sampling_rate_hz, 2);
        assert_eq!(out.start_time.nanos(), 5_000_000_000);
        assert_eq!(out.max_values, vec![2.0, 0.5, 3.0, 4.0]);
        assert_eq!(out.min_values, vec![1.0, 0.5, 1.0, 4.0]);

        let out = index_trace(&data, seconds(5.25), 4.0, 1).unwrap();
        assert_eq!(out.start_time.nanos(), 5_000_000_000);
        assert_eq!(out.max_values, vec![2.0, 4.0]);
        assert_eq!(out.min_values, vec![0.5, 1.0]);
    }

    #[test]
    fn test_first_sample_on_boundary() {
        let data = [1.0f32, 2.0, 7.0, 0.5, 1.0, 3.0, 4.0];

        let out = index_trace(&data, seconds(5.0), 4.0, 2).unwrap();
        assert_eq!(out.start_time.nanos(), 5_000_000_000);
        assert_eq!(out.max_values, vec![7.0, 1.0, 4.0]);
        assert_eq!(out.min_values, vec![1.0, 0.5, 3.0]);

        let out = index_trace(&data, seconds(5.0), 4.0, 1).unwrap();
        assert_eq!(out.max_values, vec![7.0, 4.0]);
        assert_eq!(out.min_values, vec![0.5, 3.0]);

        // Samples off the boundaries
        let out = index_trace(&data, seconds(5.15), 4.0, 2).unwrap();
        assert_eq!(out.start_time.nanos(), 5_000_000_000);
        assert_eq!(out.max_values, vec![2.0, 7.0, 3.0, 4.0]);
        assert_eq!(out.min_values, vec![1.0, 0.5, 1.0, 4.0]);

        // A single sample in the first bin
        let out = index_trace(&data, seconds(5.9), 4.0, 2).unwrap();
        assert_eq!(out.start_time.nanos(), 5_500_000_000);
        assert_eq!(out.max_values, vec![1.0, 7.0, 1.0, 4.0]);
        assert_eq!(out.min_values, vec![1.0, 2.0, 0.5, 3.0]);
    }

    #[test]
    fn test_long_trace_alignment() {
        let data: Vec<f64> = (0..2_000_001).map(|i| i as f64 * 50.0).collect();
        let start = Timestamp::from_nanos(1_486_646_534_999_997_696);
        let out = index_trace(&data, start, 200_000.0, 100).unwrap();
        assert_eq!(out.start_time.nanos(), 1_486_646_534_990_000_000);
        assert_eq!(out.data_sampling_rate_hz, 200_000.0);
        assert_eq!(out.len(), 1001);
        assert_eq!(out.max_values.len(), 1001);
    }

    #[test]
    fn test_integer_types_are_preserved() {
        let data = [-1i16, 2, 0, 0, 1, 3, 40];
        let out: EnvelopeIndex<i16> = index_trace(&data, seconds(5.25), 4.0, 2).unwrap();
        assert_eq!(out.max_values, vec![2i16, 0, 3, 40]);
        assert_eq!(out.min_values, vec![-1i16, 0, 1, 40]);

        let data = [-1i64, 2, 0, 0, 1, 3, 40];
        let out = index_trace(&data, seconds(5.25), 4.0, 2).unwrap();
        assert_eq!(out.max_values, vec![2i64, 0, 3, 40]);
        assert_eq!(out.min_values, vec![-1i64, 0, 1, 40]);
    }

    #[test]
    fn test_envelope_bounds_every_sample() {
        let data: Vec<i32> = (0..997).map(|i| ((i * 7919) % 263) as i32 - 131).collect();
        let start = Timestamp::from_nanos(12_345_678_901);
        let rate = 1000.0;
        let out = index_trace(&data, start, rate, 50).unwrap();
        let index_dt = index_interval_ns(50).unwrap();
        let dt = sample_interval_ns(rate);

        let mut attained_min = vec![false; out.len()];
        let mut attained_max = vec![false; out.len()];
        for (i, value) in data.iter().enumerate() {
            let t = start.nanos() + i as i64 * dt;
            // (start, end] bins with the first sample pinned to bin 0
            let bin = if i == 0 {
                0
            } else {
                ((t - out.start_time.nanos() - 1) / index_dt) as usize
            };
            assert!(out.min_values[bin] <= *value && *value <= out.max_values[bin]);
            attained_min[bin] |= out.min_values[bin] == *value;
            attained_max[bin] |= out.max_values[bin] == *value;
        }
        assert!(attained_min.iter().all(|x| *x));
        assert!(attained_max.iter().all(|x| *x));
    }

    #[test]
    fn test_bad_rates() {
        let data = [1.0f64, 2.0];
        assert!(matches!(
            index_trace(&data, seconds(0.0), 4.0, 3),
            Err(IndexError::NonIntegerInterval(3))
        ));
        assert!(matches!(
            index_trace(&data, seconds(0.0), 4.0, 0),
            Err(IndexError::ZeroRate)
        ));
        assert!(matches!(
            index_trace::<f64>(&[], seconds(0.0), 4.0, 2),
            Err(IndexError::EmptyTrace)
        ));
    }
}
