use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Display;

use super::characteristic::{single_channel_triggers, OnsetOptions};
use super::coincidence::{coincidence_trigger, CoincidenceEvent, CoincidenceOptions};
use super::error::TriggerError;
use super::sample::Sample;
use super::timestamp::Timestamp;
use super::trace::Stream;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Classification {
    Active,
    Passive,
    Electronic,
}

impl Display for Classification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Passive => write!(f, "passive"),
            Self::Electronic => write!(f, "electronic"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifierOptions {
    /// Events this channel triggered on are active
    pub active_triggering_channel: Option<String>,
    pub minimum_time_between_events_s: f64,
    /// Events whose triggers all fall within this spread are electronic noise
    pub max_spread_electronic_interference_s: f64,
}

impl Default for ClassifierOptions {
    fn default() -> Self {
        Self {
            active_triggering_channel: None,
            minimum_time_between_events_s: 0.0006,
            max_spread_electronic_interference_s: 0.0025,
        }
    }
}

/// A deduplicated and classified detection
#[derive(Debug, Clone, PartialEq)]
pub struct DetectedEvent {
    pub time: Timestamp,
    pub triggered_channels: Vec<String>,
    pub classification: Classification,
}

/// Drop candidates too close to the previous accepted one and label the rest
pub fn classify_events(candidates: &[CoincidenceEvent], options: &ClassifierOptions) -> Vec<DetectedEvent> {
    let mut events: Vec<DetectedEvent> = Vec::new();
    for candidate in candidates.iter() {
        let first = candidate.times.iter().min().copied().unwrap_or(candidate.time);
        let last = candidate.times.iter().max().copied().unwrap_or(candidate.time);
        if events.last().is_some_and(|prev| {
            prev.time.seconds_since(first).abs() < options.minimum_time_between_events_s
        }) {
            spdlog::debug!("Dropped candidate at {first}, too close to the previous event.");
            continue;
        }

        let classification = if options
            .active_triggering_channel
            .as_ref()
            .is_some_and(|active| candidate.trace_ids.contains(active))
        {
            Classification::Active
        } else if candidate.trace_ids.len() == 1 {
            Classification::Passive
        } else if last.seconds_since(first) < options.max_spread_electronic_interference_s {
            Classification::Electronic
        } else {
            Classification::Passive
        };

        events.push(DetectedEvent {
            time: first,
            triggered_channels: candidate.trace_ids.clone(),
            classification,
        });
    }
    events
}

/// Single channel triggers, coincidence and classification over one stream
pub fn detect_events<T: Sample>(
    stream: &Stream<T>,
    channels: Option<&[String]>,
    onset: &OnsetOptions,
    coincidence: &CoincidenceOptions,
    templates: &BTreeMap<String, Vec<Stream<T>>>,
    classifier: &ClassifierOptions,
) -> Result<Vec<DetectedEvent>, TriggerError> {
    let triggers = single_channel_triggers(stream, channels, onset)?;
    let candidates = coincidence_trigger(&triggers, stream, templates, coincidence);
    Ok(classify_events(&candidates, classifier))
}
