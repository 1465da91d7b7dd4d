use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::str::FromStr;

use super::classifier::Classification;
use super::error::LocationError;
use super::timestamp::Timestamp;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Phase {
    P,
    S,
}

impl Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::P => write!(f, "P"),
            Self::S => write!(f, "S"),
        }
    }
}

impl FromStr for Phase {
    type Err = LocationError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "P" | "p" => Ok(Self::P),
            "S" | "s" => Ok(Self::S),
            _ => Err(LocationError::UnknownPhase(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvaluationMode {
    #[default]
    Automatic,
    Manual,
}

/// An arrival time on one channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pick {
    pub resource_id: String,
    pub channel_id: String,
    pub phase_hint: Option<Phase>,
    pub time: Timestamp,
    pub evaluation_mode: EvaluationMode,
    pub method_id: String,
}

impl Pick {
    pub fn new(channel_id: &str, phase_hint: Option<Phase>, time: Timestamp, method_id: &str) -> Self {
        Self {
            resource_id: format!("pick/{}", uuid::Uuid::new_v4()),
            channel_id: channel_id.to_string(),
            phase_hint,
            time,
            evaluation_mode: EvaluationMode::Automatic,
            method_id: method_id.to_string(),
        }
    }
}

/// A pick as used by one origin
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Arrival {
    pub resource_id: String,
    pub pick_id: String,
    pub phase: Phase,
    pub time_residual_s: f64,
    pub distance_m: f64,
    pub earth_model_id: String,
}

/// Hypocenter and origin time in the local Cartesian frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Origin {
    pub resource_id: String,
    pub time: Timestamp,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    /// RMS of the travel time residuals in seconds
    pub time_uncertainty_s: f64,
    pub method_id: String,
    pub earth_model_id: String,
    pub depth_type: String,
    pub time_fixed: bool,
    pub epicenter_fixed: bool,
    pub arrivals: Vec<Arrival>,
}

/// A located event. Relocations append origins; existing origins are never changed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub resource_id: String,
    pub picks: Vec<Pick>,
    pub origins: Vec<Origin>,
    pub preferred_origin_id: Option<String>,
    pub classification: Option<Classification>,
    pub comments: Vec<String>,
}

impl Event {
    pub fn new(picks: Vec<Pick>, classification: Option<Classification>) -> Self {
        Self {
            resource_id: format!("event/{}", uuid::Uuid::new_v4()),
            picks,
            origins: Vec::new(),
            preferred_origin_id: None,
            classification,
            comments: Vec::new(),
        }
    }

    /// Append an origin and make it the preferred one
    pub fn add_origin(&mut self, origin: Origin) {
        self.preferred_origin_id = Some(origin.resource_id.clone());
        self.origins.push(origin);
    }

    pub fn preferred_origin(&self) -> Option<&Origin> {
        let id = self.preferred_origin_id.as_ref()?;
        self.origins.iter().find(|o| &o.resource_id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn origin(id: &str, x: f64) -> Origin {
        Origin {
            resource_id: id.to_string(),
            time: Timestamp::from_seconds(1.0),
            x,
            y: 0.0,
            z: 0.0,
            time_uncertainty_s: 0.0,
            method_id: String::new(),
            earth_model_id: String::new(),
            depth_type: String::new(),
            time_fixed: false,
            epicenter_fixed: false,
            arrivals: Vec::new(),
        }
    }

    #[test]
    fn test_relocation_appends() {
        let mut event = Event::new(Vec::new(), Some(Classification::Passive));
        assert!(event.resource_id.starts_with("event/"));
        assert!(event.preferred_origin().is_none());

        event.add_origin(origin("origin/1", 1.0));
        event.add_origin(origin("origin/2", 2.0));
        assert_eq!(event.origins.len(), 2);
        assert_eq!(event.origins[0].x, 1.0);
        assert_eq!(event.preferred_origin().unwrap().x, 2.0);
    }

    #[test]
    fn test_phase_parsing() {
        assert_eq!("P".parse::<Phase>().unwrap(), Phase::P);
        assert_eq!("s".parse::<Phase>().unwrap(), Phase::S);
        assert!("Pn".parse::<Phase>().is_err());
        assert!(Phase::P < Phase::S);
    }
}
