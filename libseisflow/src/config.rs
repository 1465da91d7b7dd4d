use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use super::characteristic::{OnsetOptions, Threshold};
use super::classifier::ClassifierOptions;
use super::coincidence::{CoincidenceOptions, SimilarityThreshold};
use super::error::ConfigError;
use super::indexer::index_interval_ns;
use super::locator::LocatorOptions;
use super::sample::SampleType;
use super::timestamp::Timestamp;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemporalRange {
    pub start_time: Timestamp,
    pub end_time: Timestamp,
}

/// Length and overlap of the processing windows, in seconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntervalConfig {
    pub length_s: f64,
    pub overlap_s: f64,
}

/// Single channel trigger and coincidence settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerConfig {
    /// Channels used for triggering. Empty means every channel.
    #[serde(default)]
    pub channels: Vec<String>,
    pub sta_s: f64,
    pub lta_s: f64,
    pub thr_on: Threshold,
    pub thr_off: Threshold,
    pub thr_coincidence_sum: f64,
    pub trigger_off_extension_s: f64,
    pub max_trigger_length_s: f64,
    pub delete_long_trigger: bool,
    #[serde(default)]
    pub active_channels: Vec<String>,
    #[serde(default)]
    pub weights: BTreeMap<String, f64>,
    #[serde(default)]
    pub similarity_threshold: SimilarityThreshold,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        let onset = OnsetOptions::default();
        let coincidence = CoincidenceOptions::default();
        Self {
            channels: Vec::new(),
            sta_s: onset.sta_s,
            lta_s: onset.lta_s,
            thr_on: onset.thr_on,
            thr_off: onset.thr_off,
            thr_coincidence_sum: coincidence.thr_coincidence_sum,
            trigger_off_extension_s: coincidence.trigger_off_extension_s,
            max_trigger_length_s: onset.max_trigger_length_s,
            delete_long_trigger: onset.delete_long_trigger,
            active_channels: onset.active_channels,
            weights: coincidence.weights,
            similarity_threshold: coincidence.similarity_threshold,
        }
    }
}

impl TriggerConfig {
    pub fn onset_options(&self) -> OnsetOptions {
        OnsetOptions {
            sta_s: self.sta_s,
            lta_s: self.lta_s,
            thr_on: self.thr_on.clone(),
            thr_off: self.thr_off.clone(),
            max_trigger_length_s: self.max_trigger_length_s,
            delete_long_trigger: self.delete_long_trigger,
            active_channels: self.active_channels.clone(),
        }
    }

    pub fn coincidence_options(&self) -> CoincidenceOptions {
        CoincidenceOptions {
            thr_coincidence_sum: self.thr_coincidence_sum,
            trigger_off_extension_s: self.trigger_off_extension_s,
            weights: self.weights.clone(),
            similarity_threshold: self.similarity_threshold.clone(),
        }
    }

    /// None when every channel triggers
    pub fn trigger_channels(&self) -> Option<&[String]> {
        if self.channels.is_empty() {
            None
        } else {
            Some(self.channels.as_slice())
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PickerConfig {
    pub algorithm: String,
    /// Passed untouched to the picker named by `algorithm`
    #[serde(default)]
    pub options: serde_yaml::Value,
    /// Picking window around each detection, in seconds
    pub window_before_s: f64,
    pub window_after_s: f64,
}

impl Default for PickerConfig {
    fn default() -> Self {
        let mut options = serde_yaml::Mapping::new();
        options.insert("st_window".into(), 70.into());
        options.insert("lt_window".into(), 700.into());
        options.insert("thresholds".into(), 10.0.into());
        Self {
            algorithm: String::from("sta_lta"),
            options: serde_yaml::Value::Mapping(options),
            window_before_s: 0.001,
            window_after_s: 0.004,
        }
    }
}

/// Located events whose origin RMS exceeds the limit are rejected
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityControl {
    pub max_time_uncertainty_s: Option<f64>,
}

/// Structure representing the application configuration. Contains pathing and processing parameters
/// Configs are seralizable and deserializable to YAML using serde and serde_yaml
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub waveform_folders: Vec<PathBuf>,
    pub cache_folder: PathBuf,
    pub index_sampling_rate_hz: u32,
    #[serde(default)]
    pub sample_type: SampleType,
    pub temporal_range: TemporalRange,
    pub channel_map_path: PathBuf,
    pub interval: IntervalConfig,
    pub trigger: TriggerConfig,
    pub classifier: ClassifierOptions,
    pub picker: PickerConfig,
    pub locator: LocatorOptions,
    #[serde(default)]
    pub qc: Option<QualityControl>,
    pub output_folder: PathBuf,
    pub n_threads: usize,
}

impl Default for Config {
    /// Generate a template Config. Paths are placeholders
    fn default() -> Self {
        Self {
            waveform_folders: vec![PathBuf::from("None")],
            cache_folder: PathBuf::from("None"),
            index_sampling_rate_hz: 1000,
            sample_type: SampleType::default(),
            temporal_range: TemporalRange {
                start_time: Timestamp::from_seconds(0.0),
                end_time: Timestamp::from_seconds(86400.0),
            },
            channel_map_path: PathBuf::from("None"),
            interval: IntervalConfig {
                length_s: 1.0,
                overlap_s: 0.1,
            },
            trigger: TriggerConfig::default(),
            classifier: ClassifierOptions::default(),
            picker: PickerConfig::default(),
            locator: LocatorOptions::default(),
            qc: None,
            output_folder: PathBuf::from("None"),
            n_threads: 1,
        }
    }
}

impl Config {
    /// Read the configuration in a YAML file
    /// Returns a Config if successful
    pub fn read_config_file(config_path: &Path) -> Result<Self, ConfigError> {
        if !config_path.exists() {
            return Err(ConfigError::BadFilePath(config_path.to_path_buf()));
        }

        let yaml_str = std::fs::read_to_string(config_path)?;

        Ok(serde_yaml::from_str::<Self>(&yaml_str)?)
    }

    /// Write the configuration to a YAML file
    pub fn write_config_file(&self, config_path: &Path) -> Result<(), ConfigError> {
        let yaml_str = serde_yaml::to_string(self)?;
        std::fs::write(config_path, yaml_str)?;
        Ok(())
    }

    pub fn is_n_threads_valid(&self) -> bool {
        self.n_threads >= 1
    }

    /// Check every setting that can be checked without touching the data
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.is_n_threads_valid() {
            return Err(ConfigError::BadThreadCount(self.n_threads));
        }
        index_interval_ns(self.index_sampling_rate_hz)?;
        if self.temporal_range.end_time <= self.temporal_range.start_time {
            return Err(ConfigError::BadTemporalRange(
                self.temporal_range.start_time,
                self.temporal_range.end_time,
            ));
        }
        if !(self.interval.length_s > 0.0)
            || self.interval.overlap_s < 0.0
            || self.interval.overlap_s >= self.interval.length_s
        {
            return Err(ConfigError::BadInterval(
                self.interval.length_s,
                self.interval.overlap_s,
            ));
        }
        if self.trigger.sta_s <= 0.0 || self.trigger.lta_s <= self.trigger.sta_s {
            return Err(ConfigError::BadTriggerWindows(
                self.trigger.sta_s,
                self.trigger.lta_s,
            ));
        }
        if let (Threshold::PerChannel(on), Threshold::PerChannel(off)) =
            (&self.trigger.thr_on, &self.trigger.thr_off)
        {
            if on.len() != off.len() {
                return Err(ConfigError::ThresholdLengths(on.len(), off.len()));
            }
        }
        if let Some(bad) = self
            .trigger
            .channels
            .iter()
            .find(|c| !self.trigger.weights.is_empty() && !self.trigger.weights.contains_key(*c))
        {
            return Err(ConfigError::MissingWeight(bad.clone()));
        }
        self.locator.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::locator::{AnisotropicParams, AnisotropyModel, VelocityModel};
    use super::*;

    #[test]
    fn test_template_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        let config = Config::default();
        config.write_config_file(&path).unwrap();
        let read = Config::read_config_file(&path).unwrap();
        assert_eq!(read, config);
        assert!(read.validate().is_ok());
        assert!(matches!(
            Config::read_config_file(&dir.path().join("missing.yaml")),
            Err(ConfigError::BadFilePath(_))
        ));
    }

    #[test]
    fn test_per_phase_locator_section() {
        let yaml = "velocity:\n  P: 3500.0\n  S: 2500.0\nanisotropy:\n  P: {inc: 0.1, azi: 0.2, delta: 0.05, epsilon: 0.02}\ndamping: 0.7\n";
        let locator: LocatorOptions = serde_yaml::from_str(yaml).unwrap();
        assert!(matches!(locator.velocity, VelocityModel::PerPhase(ref m) if m.len() == 2));
        assert!(matches!(locator.anisotropy, Some(AnisotropyModel::PerPhase(_))));

        let mut config = Config::default();
        config.locator = locator;
        assert!(matches!(config.validate(), Err(ConfigError::Location(_))));

        config.locator.anisotropy = Some(AnisotropyModel::Single(AnisotropicParams {
            inc: 0.0,
            azi: 0.0,
            delta: 0.0,
            epsilon: 0.0,
        }));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation() {
        let mut config = Config::default();
        config.n_threads = 0;
        assert!(matches!(config.validate(), Err(ConfigError::BadThreadCount(0))));

        let mut config = Config::default();
        config.index_sampling_rate_hz = 7;
        assert!(matches!(config.validate(), Err(ConfigError::Index(_))));

        let mut config = Config::default();
        config.interval.overlap_s = 2.0;
        assert!(matches!(config.validate(), Err(ConfigError::BadInterval(_, _))));

        let mut config = Config::default();
        config.trigger.channels = vec![String::from("A.B..C"), String::from("A.D..C")];
        config.trigger.weights.insert(String::from("A.B..C"), 2.0);
        assert!(matches!(config.validate(), Err(ConfigError::MissingWeight(_))));

        let mut config = Config::default();
        config.trigger.thr_on = Threshold::PerChannel(vec![4.0, 4.0]);
        config.trigger.thr_off = Threshold::PerChannel(vec![1.5]);
        assert!(matches!(config.validate(), Err(ConfigError::ThresholdLengths(2, 1))));
    }
}
