use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use super::error::TriggerError;
use super::sample::Sample;
use super::timestamp::Timestamp;
use super::trace::Stream;

/// One threshold for every channel, or one per channel in stream order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Threshold {
    Scalar(f64),
    PerChannel(Vec<f64>),
}

impl Threshold {
    pub fn value(&self, idx: usize) -> Result<f64, TriggerError> {
        match self {
            Self::Scalar(v) => Ok(*v),
            Self::PerChannel(values) => values
                .get(idx)
                .copied()
                .ok_or(TriggerError::ThresholdLength(values.len(), idx + 1)),
        }
    }
}

/// Settings of the single channel STA/LTA trigger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OnsetOptions {
    /// Short term window in seconds
    pub sta_s: f64,
    /// Long term window in seconds
    pub lta_s: f64,
    pub thr_on: Threshold,
    pub thr_off: Threshold,
    pub max_trigger_length_s: f64,
    pub delete_long_trigger: bool,
    /// Channels matching any of these substrings are thresholded on their raw data
    pub active_channels: Vec<String>,
}

impl Default for OnsetOptions {
    fn default() -> Self {
        Self {
            sta_s: 0.00005,
            lta_s: 0.001,
            thr_on: Threshold::Scalar(4.0),
            thr_off: Threshold::Scalar(1.5),
            max_trigger_length_s: 1e6,
            delete_long_trigger: false,
            active_channels: Vec::new(),
        }
    }
}

/// A threshold crossing interval on one channel
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelTrigger {
    pub on: Timestamp,
    pub off: Timestamp,
    pub channel_id: String,
    /// Peak of the characteristic function within the interval
    pub peak: f64,
    /// Standard deviation of the characteristic function within the interval
    pub std: f64,
}

/// Recursive STA/LTA. The first `nlta` values are zeroed while the long term average settles.
pub fn recursive_sta_lta(data: &[f64], nsta: usize, nlta: usize) -> Result<Vec<f64>, TriggerError> {
    if nsta == 0 || nlta == 0 {
        return Err(TriggerError::BadWindow(nsta, nlta));
    }
    let csta = 1.0 / nsta as f64;
    let clta = 1.0 / nlta as f64;
    let mut sta = 0.0;
    let mut lta = 1e-99;
    let mut cf = vec![0.0; data.len()];
    for i in 1..data.len() {
        let squared = data[i] * data[i];
        sta = csta * squared + (1.0 - csta) * sta;
        lta = clta * squared + (1.0 - clta) * lta;
        cf[i] = sta / lta;
    }
    for value in cf.iter_mut().take(nlta) {
        *value = 0.0;
    }
    Ok(cf)
}

/// Sample index intervals where `cf` rises above `thr_on` until it falls back to `thr_off`.
///
/// Intervals longer than `max_len` samples are cut to `max_len`, or dropped if
/// `delete_long` is set.
pub fn trigger_onset(
    cf: &[f64],
    thr_on: f64,
    thr_off: f64,
    max_len: usize,
    delete_long: bool,
) -> Vec<(usize, usize)> {
    // Run starts above thr_on and run ends above thr_off
    let mut ons: VecDeque<i64> = VecDeque::new();
    let mut offs: VecDeque<i64> = VecDeque::from([-1]);
    let mut was_on = false;
    let mut was_off = false;
    for (i, &value) in cf.iter().enumerate() {
        let is_on = value > thr_on;
        if is_on && !was_on {
            ons.push_back(i as i64);
        }
        was_on = is_on;
        let is_off = value > thr_off;
        if !is_off && was_off {
            offs.push_back(i as i64 - 1);
        }
        was_off = is_off;
    }
    if was_off {
        offs.push_back(cf.len() as i64 - 1);
    }
    let Some(&last_on) = ons.back() else {
        return Vec::new();
    };
    if offs.back().is_some_and(|&off| last_on > off) {
        offs.push_back(cf.len() as i64 - 1);
    }

    let max_len = max_len as i64;
    let mut picks = Vec::new();
    while let (Some(&last_on), Some(&first_off)) = (ons.back(), offs.front()) {
        if last_on <= first_off {
            break;
        }
        while ons.front().is_some_and(|&on| offs.front().is_some_and(|&off| on <= off)) {
            ons.pop_front();
        }
        while offs.front().is_some_and(|&off| ons.front().is_some_and(|&on| off < on)) {
            offs.pop_front();
        }
        let (Some(&on), Some(&off)) = (ons.front(), offs.front()) else {
            break;
        };
        if off - on > max_len {
            if delete_long {
                ons.pop_front();
                continue;
            }
            offs.push_front(on + max_len);
            picks.push((on as usize, (on + max_len) as usize));
            continue;
        }
        picks.push((on as usize, off as usize));
    }
    picks
}

/// Run the single channel trigger over every trace of a stream.
///
/// `channels` restricts the triggering traces; traces not listed are skipped
/// with a warning. Returned triggers are sorted by `(on, off, channel)`.
pub fn single_channel_triggers<T: Sample>(
    stream: &Stream<T>,
    channels: Option<&[String]>,
    options: &OnsetOptions,
) -> Result<Vec<ChannelTrigger>, TriggerError> {
    let mut triggers = Vec::new();
    for (idx, trace) in stream.iter().enumerate() {
        if channels.is_some_and(|c| !c.contains(&trace.channel_id)) {
            spdlog::warn!(
                "Trace {} is not in the trigger channel list and was disregarded.",
                trace.channel_id
            );
            continue;
        }
        let data: Vec<f64> = trace.data.iter().map(|v| v.to_f64()).collect();
        let is_active = options
            .active_channels
            .iter()
            .any(|a| trace.channel_id.contains(a.as_str()));
        let cf = if is_active {
            data
        } else {
            let nsta = (options.sta_s * trace.sampling_rate_hz) as usize;
            let nlta = (options.lta_s * trace.sampling_rate_hz) as usize;
            recursive_sta_lta(&data, nsta, nlta)?
        };

        let max_len = (options.max_trigger_length_s * trace.sampling_rate_hz + 0.5) as usize;
        let intervals = trigger_onset(
            &cf,
            options.thr_on.value(idx)?,
            options.thr_off.value(idx)?,
            max_len,
            options.delete_long_trigger,
        );
        for (on, off) in intervals {
            let (peak, std) = if off > on {
                peak_and_std(&cf[on..off])
            } else {
                (cf[on], 0.0)
            };
            triggers.push(ChannelTrigger {
                on: trace.start_time.offset(on as f64 / trace.sampling_rate_hz),
                off: trace.start_time.offset(off as f64 / trace.sampling_rate_hz),
                channel_id: trace.channel_id.clone(),
                peak,
                std,
            });
        }
    }
    triggers.sort_by(|a, b| {
        a.on.cmp(&b.on)
            .then(a.off.cmp(&b.off))
            .then(a.channel_id.cmp(&b.channel_id))
    });
    Ok(triggers)
}

fn peak_and_std(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    let peak = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n;
    (peak, variance.sqrt())
}

#[cfg(test)]
mod tests {
    use super::super::trace::Trace;
    use super::*;

    #[test]
    fn test_recursive_sta_lta() {
        let mut data = vec![1.0; 200];
        for value in data.iter_mut().skip(150).take(10) {
            *value = 20.0;
        }
        let cf = recursive_sta_lta(&data, 5, 50).unwrap();
        assert_eq!(cf.len(), 200);
        assert!(cf[..50].iter().all(|v| *v == 0.0));
        // Steady input gives a ratio close to one
        assert!((cf[140] - 1.0).abs() < 0.1);
        assert!(cf[155] > 5.0);
        assert!(recursive_sta_lta(&data, 0, 50).is_err());
    }

    #[test]
    fn test_trigger_onset() {
        let cf = [0.0, 0.0, 5.0, 6.0, 3.0, 2.0, 0.5, 0.0, 4.5, 1.0, 0.0];
        assert_eq!(trigger_onset(&cf, 4.0, 1.5, 100, false), vec![(2, 5), (8, 8)]);

        // Still on at the end
        let cf = [0.0, 5.0, 5.0, 5.0];
        assert_eq!(trigger_onset(&cf, 4.0, 1.5, 100, false), vec![(1, 3)]);

        assert!(trigger_onset(&[0.0, 1.0, 2.0], 4.0, 1.5, 100, false).is_empty());
    }

    #[test]
    fn test_trigger_onset_max_length() {
        let cf = [0.0, 5.0, 5.0, 5.0, 5.0, 5.0, 0.0, 0.0, 5.0, 0.0];
        assert_eq!(trigger_onset(&cf, 4.0, 1.5, 2, false), vec![(1, 3), (8, 8)]);
        assert_eq!(trigger_onset(&cf, 4.0, 1.5, 2, true), vec![(8, 8)]);
    }

    #[test]
    fn test_single_channel_triggers() {
        let start = Timestamp::from_seconds(10.0);
        let mut quiet = vec![0.0f32; 100];
        quiet[40] = 9.0;
        quiet[41] = 9.0;
        let passive = Trace::new("XB.01.00.001", start, 100.0, quiet.clone());
        let active = Trace::new("XB.99.00.001", start, 100.0, quiet);
        let options = OnsetOptions {
            sta_s: 0.02,
            lta_s: 0.2,
            thr_on: Threshold::Scalar(4.0),
            thr_off: Threshold::Scalar(1.5),
            active_channels: vec![String::from("XB.99")],
            ..Default::default()
        };

        let triggers = single_channel_triggers(&vec![passive.clone(), active], None, &options).unwrap();
        assert_eq!(triggers.len(), 2);
        // Raw data of the active channel crosses exactly at the spike
        let active_trigger = triggers.iter().find(|t| t.channel_id == "XB.99.00.001").unwrap();
        assert_eq!(active_trigger.on, start.offset(0.40));
        assert_eq!(active_trigger.off, start.offset(0.41));
        assert_eq!(active_trigger.peak, 9.0);

        let only = vec![String::from("XB.01.00.001")];
        let triggers =
            single_channel_triggers(&vec![passive.clone(), passive], Some(only.as_slice()), &options).unwrap();
        assert_eq!(triggers.len(), 2);

        let per_channel = OnsetOptions {
            thr_on: Threshold::PerChannel(vec![4.0]),
            ..options
        };
        let two = vec![
            Trace::new("XB.01.00.001", start, 100.0, vec![0.0f32; 10]),
            Trace::new("XB.02.00.001", start, 100.0, vec![0.0f32; 10]),
        ];
        assert!(matches!(
            single_channel_triggers(&two, None, &per_channel),
            Err(TriggerError::ThresholdLength(1, 2))
        ));
    }
}
