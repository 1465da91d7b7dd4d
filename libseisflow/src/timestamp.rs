use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt::Display;
use std::str::FromStr;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use super::constants::NANOS_PER_SECOND;
use super::error::TimestampError;

/// A point in time, stored as integer nanoseconds since the Unix epoch.
///
/// All bin arithmetic of the waveform index happens on these integers so no
/// rounding error accumulates over long data sets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(i64);

impl Timestamp {
    pub const fn from_nanos(nanos: i64) -> Self {
        Self(nanos)
    }

    pub fn from_seconds(seconds: f64) -> Self {
        Self((seconds * NANOS_PER_SECOND as f64).round() as i64)
    }

    pub fn from_datetime(datetime: OffsetDateTime) -> Self {
        Self(datetime.unix_timestamp_nanos() as i64)
    }

    pub fn nanos(&self) -> i64 {
        self.0
    }

    /// Seconds since the epoch as a float. Loses precision below ~100 ns for current dates.
    pub fn seconds(&self) -> f64 {
        self.0 as f64 / NANOS_PER_SECOND as f64
    }

    /// Shift by a (possibly negative) number of seconds
    pub fn offset(&self, seconds: f64) -> Self {
        Self(self.0 + (seconds * NANOS_PER_SECOND as f64).round() as i64)
    }

    pub fn offset_nanos(&self, nanos: i64) -> Self {
        Self(self.0 + nanos)
    }

    /// Difference `self - other` in seconds
    pub fn seconds_since(&self, other: Timestamp) -> f64 {
        (self.0 - other.0) as f64 / NANOS_PER_SECOND as f64
    }

    pub fn to_datetime(&self) -> Result<OffsetDateTime, TimestampError> {
        Ok(OffsetDateTime::from_unix_timestamp_nanos(self.0 as i128)?)
    }
}

impl FromStr for Timestamp {
    type Err = TimestampError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from_datetime(OffsetDateTime::parse(s, &Rfc3339)?))
    }
}

impl Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.to_datetime().ok().and_then(|dt| dt.format(&Rfc3339).ok()) {
            Some(s) => write!(f, "{s}"),
            None => write!(f, "{}ns", self.0),
        }
    }
}

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Timestamp::from_str(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rfc3339_round_trip() {
        let ts: Timestamp = "2021-01-02T03:04:05.123456Z".parse().unwrap();
        assert_eq!(ts.nanos(), 1_609_556_645_123_456_000);
        assert_eq!(ts.to_string(), "2021-01-02T03:04:05.123456Z");
    }

    #[test]
    fn test_offsets() {
        let ts = Timestamp::from_nanos(5_000_000_000);
        assert_eq!(ts.offset(0.25).nanos(), 5_250_000_000);
        assert_eq!(ts.offset(-0.5).nanos(), 4_500_000_000);
        assert!((ts.offset(1.5).seconds_since(ts) - 1.5).abs() < 1e-12);
    }
}
