use bit_set::BitSet;
use fxhash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::characteristic::ChannelTrigger;
use super::sample::Sample;
use super::timestamp::Timestamp;
use super::trace::{Stream, Trace};

const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.7;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SimilarityThreshold {
    Scalar(f64),
    PerStation(BTreeMap<String, f64>),
}

impl Default for SimilarityThreshold {
    fn default() -> Self {
        Self::Scalar(DEFAULT_SIMILARITY_THRESHOLD)
    }
}

impl SimilarityThreshold {
    pub fn for_station(&self, station: &str) -> f64 {
        match self {
            Self::Scalar(v) => *v,
            Self::PerStation(map) => map
                .get(station)
                .copied()
                .unwrap_or(DEFAULT_SIMILARITY_THRESHOLD),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoincidenceOptions {
    /// Minimum weighted channel count of a candidate
    pub thr_coincidence_sum: f64,
    /// Slack after a candidate's off time in which further triggers still join it
    pub trigger_off_extension_s: f64,
    /// Channel weights in the coincidence sum. Unlisted channels weigh 1.
    #[serde(default)]
    pub weights: BTreeMap<String, f64>,
    #[serde(default)]
    pub similarity_threshold: SimilarityThreshold,
}

impl Default for CoincidenceOptions {
    fn default() -> Self {
        Self {
            thr_coincidence_sum: 6.0,
            trigger_off_extension_s: 0.01,
            weights: BTreeMap::new(),
            similarity_threshold: SimilarityThreshold::default(),
        }
    }
}

impl CoincidenceOptions {
    pub fn weight(&self, channel_id: &str) -> f64 {
        self.weights.get(channel_id).copied().unwrap_or(1.0)
    }
}

/// A multi-channel detection built from overlapping single channel triggers
#[derive(Debug, Clone, PartialEq)]
pub struct CoincidenceEvent {
    /// On time of the earliest trigger
    pub time: Timestamp,
    /// On time of every contributing trigger, in the order they joined
    pub times: Vec<Timestamp>,
    pub stations: Vec<String>,
    pub trace_ids: Vec<String>,
    pub coincidence_sum: f64,
    pub similarity: BTreeMap<String, f64>,
    pub duration_s: f64,
    pub cft_peaks: Vec<f64>,
    pub cft_stds: Vec<f64>,
    pub cft_peak_wmean: f64,
    pub cft_std_wmean: f64,
}

/// Station code (second field) of a channel id
fn station_code(channel_id: &str) -> &str {
    channel_id.split('.').nth(1).unwrap_or(channel_id)
}

/// Merge time sorted single channel triggers into coincidence events.
///
/// Each unclaimed trigger seeds a candidate which absorbs, in ascending on
/// time, every later trigger starting no later than the candidate's off time
/// plus the extension. Absorbing extends the off time, so chains of pairwise
/// overlaps end up in one event. A channel joins a candidate at most once.
/// Candidates below the sum threshold survive only on template similarity, and
/// a candidate ending no later than the previously emitted one is dropped.
/// Triggers of an emitted event are never reused.
///
/// `templates` maps station codes to template streams compared against `stream`.
pub fn coincidence_trigger<T: Sample>(
    triggers: &[ChannelTrigger],
    stream: &Stream<T>,
    templates: &BTreeMap<String, Vec<Stream<T>>>,
    options: &CoincidenceOptions,
) -> Vec<CoincidenceEvent> {
    let mut channel_numbers: FxHashMap<&str, usize> = FxHashMap::default();
    for trigger in triggers.iter() {
        let next = channel_numbers.len();
        channel_numbers.entry(trigger.channel_id.as_str()).or_insert(next);
    }
    let extension_ns = (options.trigger_off_extension_s * 1e9).round() as i64;

    let mut claimed = BitSet::with_capacity(triggers.len());
    let mut events: Vec<CoincidenceEvent> = Vec::new();
    let mut last_off: Option<Timestamp> = None;

    for (seed_idx, seed) in triggers.iter().enumerate() {
        if claimed.contains(seed_idx) {
            continue;
        }
        let mut members = vec![seed_idx];
        let mut present = BitSet::new();
        present.insert(channel_numbers[seed.channel_id.as_str()]);
        let mut off = seed.off;
        let mut similarity: BTreeMap<String, f64> = BTreeMap::new();
        add_similarity(&mut similarity, seed, seed.on, stream, templates);

        for (idx, trigger) in triggers.iter().enumerate().skip(seed_idx + 1) {
            if claimed.contains(idx) {
                continue;
            }
            if present.contains(channel_numbers[trigger.channel_id.as_str()]) {
                continue;
            }
            if trigger.on > off.offset_nanos(extension_ns) {
                break;
            }
            present.insert(channel_numbers[trigger.channel_id.as_str()]);
            members.push(idx);
            off = off.max(trigger.off);
            add_similarity(&mut similarity, trigger, seed.on, stream, templates);
        }

        let coincidence_sum: f64 = members
            .iter()
            .map(|&m| options.weight(&triggers[m].channel_id))
            .sum();
        if coincidence_sum < options.thr_coincidence_sum
            && !similarity
                .iter()
                .any(|(sta, val)| *val > options.similarity_threshold.for_station(sta))
        {
            continue;
        }
        // Sub-interval of the previous event, judged by the off time only
        if last_off.is_some_and(|l| off <= l) {
            continue;
        }

        for &m in members.iter() {
            claimed.insert(m);
        }
        last_off = Some(off);
        events.push(build_event(triggers, &members, off, coincidence_sum, similarity, options));
    }
    events
}

fn add_similarity<T: Sample>(
    similarity: &mut BTreeMap<String, f64>,
    trigger: &ChannelTrigger,
    time: Timestamp,
    stream: &Stream<T>,
    templates: &BTreeMap<String, Vec<Stream<T>>>,
) {
    let station = station_code(&trigger.channel_id);
    if let Some(station_templates) = templates.get(station) {
        if !station_templates.is_empty() {
            similarity.insert(
                station.to_string(),
                templates_max_similarity(stream, time, station_templates),
            );
        }
    }
}

fn build_event(
    triggers: &[ChannelTrigger],
    members: &[usize],
    off: Timestamp,
    coincidence_sum: f64,
    similarity: BTreeMap<String, f64>,
    options: &CoincidenceOptions,
) -> CoincidenceEvent {
    let contributing: Vec<&ChannelTrigger> = members.iter().map(|&m| &triggers[m]).collect();
    let weights: Vec<f64> = contributing
        .iter()
        .map(|t| options.weight(&t.channel_id))
        .collect();
    let weight_sum: f64 = weights.iter().sum();
    let weighted_mean = |values: &[f64]| {
        values.iter().zip(weights.iter()).map(|(v, w)| v * w).sum::<f64>() / weight_sum
    };
    let cft_peaks: Vec<f64> = contributing.iter().map(|t| t.peak).collect();
    let cft_stds: Vec<f64> = contributing.iter().map(|t| t.std).collect();
    let time = contributing[0].on;

    CoincidenceEvent {
        time,
        times: contributing.iter().map(|t| t.on).collect(),
        stations: contributing
            .iter()
            .map(|t| station_code(&t.channel_id).to_string())
            .collect(),
        trace_ids: contributing.iter().map(|t| t.channel_id.clone()).collect(),
        coincidence_sum,
        similarity,
        duration_s: off.seconds_since(time),
        cft_peak_wmean: weighted_mean(&cft_peaks),
        cft_std_wmean: weighted_mean(&cft_stds),
        cft_peaks,
        cft_stds,
    }
}

/// Best match of any template against the stream around `time`.
///
/// Per template the normalized cross-correlation maximum is averaged over the
/// channels the template shares with the stream; the result is the highest of
/// these averages, or 0 if no template shares a channel.
pub fn templates_max_similarity<T: Sample>(
    stream: &Stream<T>,
    time: Timestamp,
    templates: &[Stream<T>],
) -> f64 {
    let mut best: Option<f64> = None;
    for template in templates.iter() {
        let values: Vec<f64> = template
            .iter()
            .filter_map(|tmpl| {
                stream
                    .iter()
                    .find(|tr| tr.channel_id == tmpl.channel_id)
                    .map(|tr| trace_max_correlation(tr, tmpl, time))
            })
            .collect();
        if values.is_empty() {
            continue;
        }
        let mean = values.iter().sum::<f64>() / values.len() as f64;
        best = Some(best.map_or(mean, |b| b.max(mean)));
    }
    best.unwrap_or(0.0)
}

/// Slide the template over the trace from half a template length before `time`
/// to one and a half after it
fn trace_max_correlation<T: Sample>(trace: &Trace<T>, template: &Trace<T>, time: Timestamp) -> f64 {
    let n = template.npts();
    if n == 0 || trace.npts() < n {
        return 0.0;
    }
    let center = (time.seconds_since(trace.start_time) * trace.sampling_rate_hz).round() as i64;
    let first = (center - n as i64 / 2).max(0) as usize;
    let last = ((center + n as i64 + n as i64 / 2) as usize).min(trace.npts() - n);
    let pattern: Vec<f64> = template.data.iter().map(|v| v.to_f64()).collect();
    let data: Vec<f64> = trace.data.iter().map(|v| v.to_f64()).collect();

    (first..=last.max(first))
        .filter(|&lag| lag + n <= data.len())
        .map(|lag| normalized_correlation(&data[lag..lag + n], &pattern))
        .fold(0.0, f64::max)
}

fn normalized_correlation(a: &[f64], b: &[f64]) -> f64 {
    let n = a.len() as f64;
    let mean_a = a.iter().sum::<f64>() / n;
    let mean_b = b.iter().sum::<f64>() / n;
    let mut cross = 0.0;
    let mut norm_a = 0.0;
    let mut norm_b = 0.0;
    for (x, y) in a.iter().zip(b.iter()) {
        cross += (x - mean_a) * (y - mean_b);
        norm_a += (x - mean_a) * (x - mean_a);
        norm_b += (y - mean_b) * (y - mean_b);
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    cross / (norm_a * norm_b).sqrt()
}
