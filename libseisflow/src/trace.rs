use super::indexer::sample_interval_ns;
use super::sample::Sample;
use super::timestamp::Timestamp;

/// A continuous, evenly sampled series for one channel
#[derive(Debug, Clone, PartialEq)]
pub struct Trace<T: Sample> {
    pub channel_id: String,
    pub start_time: Timestamp,
    pub sampling_rate_hz: f64,
    pub data: Vec<T>,
}

/// Several traces covering (roughly) the same window
pub type Stream<T> = Vec<Trace<T>>;

impl<T: Sample> Trace<T> {
    pub fn new(channel_id: &str, start_time: Timestamp, sampling_rate_hz: f64, data: Vec<T>) -> Self {
        Self {
            channel_id: channel_id.to_string(),
            start_time,
            sampling_rate_hz,
            data,
        }
    }

    pub fn npts(&self) -> usize {
        self.data.len()
    }

    pub fn dt_ns(&self) -> i64 {
        sample_interval_ns(self.sampling_rate_hz)
    }

    pub fn delta(&self) -> f64 {
        1.0 / self.sampling_rate_hz
    }

    /// Time of the last sample
    pub fn end_time(&self) -> Timestamp {
        let n = self.data.len().max(1) as i64 - 1;
        self.start_time.offset_nanos(n * self.dt_ns())
    }

    pub fn time_of(&self, index: usize) -> Timestamp {
        self.start_time.offset_nanos(index as i64 * self.dt_ns())
    }

    /// Absolute sample times in seconds
    pub fn times(&self) -> Vec<f64> {
        (0..self.data.len()).map(|i| self.time_of(i).seconds()).collect()
    }

    /// Station part (`NET.STA`) of the channel id
    pub fn station(&self) -> &str {
        station_of(&self.channel_id)
    }

    /// Keep only the samples with times in `[start, end]`. Returns `None` if no sample is left.
    pub fn trimmed(&self, start: Timestamp, end: Timestamp) -> Option<Self> {
        if self.data.is_empty() || end < start {
            return None;
        }
        let dt = self.dt_ns();
        let first = if start <= self.start_time {
            0
        } else {
            let offset = start.nanos() - self.start_time.nanos();
            ((offset + dt - 1) / dt) as usize
        };
        if end < self.start_time {
            return None;
        }
        let last = (((end.nanos() - self.start_time.nanos()) / dt) as usize).min(self.data.len() - 1);
        if first > last {
            return None;
        }
        Some(Self {
            channel_id: self.channel_id.clone(),
            start_time: self.time_of(first),
            sampling_rate_hz: self.sampling_rate_hz,
            data: self.data[first..=last].to_vec(),
        })
    }

    /// Float copy of the trace for the characteristic functions
    pub fn to_f64(&self) -> Trace<f64> {
        Trace {
            channel_id: self.channel_id.clone(),
            start_time: self.start_time,
            sampling_rate_hz: self.sampling_rate_hz,
            data: self.data.iter().map(|v| v.to_f64()).collect(),
        }
    }
}

/// `NET.STA.LOC.CHA` -> `NET.STA`
pub fn station_of(channel_id: &str) -> &str {
    match channel_id.match_indices('.').nth(1) {
        Some((idx, _)) => &channel_id[..idx],
        None => channel_id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trim_inclusive() {
        let tr = Trace::new("XB.01.00.001", Timestamp::from_seconds(10.0), 10.0, (0..100).collect::<Vec<i32>>());
        let cut = tr
            .trimmed(Timestamp::from_seconds(10.25), Timestamp::from_seconds(11.0))
            .unwrap();
        assert_eq!(cut.start_time, Timestamp::from_seconds(10.3));
        assert_eq!(cut.data.first(), Some(&3));
        assert_eq!(cut.data.last(), Some(&10));
        assert!(tr
            .trimmed(Timestamp::from_seconds(30.0), Timestamp::from_seconds(31.0))
            .is_none());
    }

    #[test]
    fn test_station_of() {
        assert_eq!(station_of("XB.01.00.001"), "XB.01");
        assert_eq!(station_of("XB"), "XB");
    }
}
