use fxhash::FxHashMap;
use serde::{Deserialize, Serialize};

use super::characteristic::{recursive_sta_lta, trigger_onset, Threshold};
use super::error::PickerError;
use super::event::{Phase, Pick};
use super::sample::Sample;
use super::trace::Stream;

/// Produces phase picks from a window of waveforms around a detected event
pub trait Picker<T: Sample>: Send + Sync {
    fn name(&self) -> &str;
    fn pick(&self, stream: &Stream<T>) -> Result<Vec<Pick>, PickerError>;
}

type PickerFactory<T> = fn(&serde_yaml::Value) -> Result<Box<dyn Picker<T>>, PickerError>;

/// Pickers keyed by algorithm name, built from free-form options
pub struct PickerRegistry<T: Sample> {
    factories: FxHashMap<String, PickerFactory<T>>,
}

impl<T: Sample> Default for PickerRegistry<T> {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl<T: Sample> PickerRegistry<T> {
    pub fn empty() -> Self {
        Self {
            factories: FxHashMap::default(),
        }
    }

    /// Registry holding every picker shipped with the library
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register(StaLtaPicker::NAME, |options| {
            let picker: Box<dyn Picker<T>> = Box::new(StaLtaPicker::from_options(options)?);
            Ok(picker)
        });
        registry
    }

    pub fn register(&mut self, name: &str, factory: PickerFactory<T>) {
        self.factories.insert(name.to_string(), factory);
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn create(&self, name: &str, options: &serde_yaml::Value) -> Result<Box<dyn Picker<T>>, PickerError> {
        let factory = self
            .factories
            .get(name)
            .ok_or(PickerError::UnknownAlgorithm(name.to_string()))?;
        factory(options)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaLtaOptions {
    /// Short term window in samples
    pub st_window: usize,
    /// Long term window in samples
    pub lt_window: usize,
    /// Trigger threshold, used for both on and off
    pub thresholds: Threshold,
}

impl Default for StaLtaOptions {
    fn default() -> Self {
        Self {
            st_window: 70,
            lt_window: 700,
            thresholds: Threshold::Scalar(10.0),
        }
    }
}

/// Recursive STA/LTA picker. One P pick per trace at the first trigger,
/// refined by linear interpolation of the characteristic function.
#[derive(Debug, Clone)]
pub struct StaLtaPicker {
    options: StaLtaOptions,
}

impl StaLtaPicker {
    pub const NAME: &'static str = "sta_lta";
    const METHOD_ID: &'static str = "recursive_sta_lta";

    pub fn new(options: StaLtaOptions) -> Self {
        Self { options }
    }

    pub fn from_options(options: &serde_yaml::Value) -> Result<Self, PickerError> {
        if options.is_null() {
            return Ok(Self::new(StaLtaOptions::default()));
        }
        Ok(Self::new(serde_yaml::from_value(options.clone())?))
    }
}

impl<T: Sample> Picker<T> for StaLtaPicker {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn pick(&self, stream: &Stream<T>) -> Result<Vec<Pick>, PickerError> {
        let Some(first) = stream.first() else {
            return Ok(Vec::new());
        };
        let sampling_rate = first.sampling_rate_hz;
        if let Some(other) = stream.iter().find(|t| t.sampling_rate_hz != sampling_rate) {
            return Err(PickerError::VaryingSamplingRates(
                sampling_rate,
                other.sampling_rate_hz,
            ));
        }

        let mut picks = Vec::new();
        for (idx, trace) in stream.iter().enumerate() {
            if trace.data.is_empty() {
                continue;
            }
            let mut data: Vec<f64> = trace.data.iter().map(|v| v.to_f64()).collect();
            detrend_constant(&mut data);
            let cf = recursive_sta_lta(&data, self.options.st_window, self.options.lt_window)?;
            let threshold = self.options.thresholds.value(idx)?;
            let triggers = trigger_onset(&cf, threshold, threshold, cf.len(), false);
            if let Some((on, _)) = triggers.first() {
                let time = trace
                    .start_time
                    .offset(adjust_pick_time(*on, &cf) / sampling_rate);
                picks.push(Pick::new(&trace.channel_id, Some(Phase::P), time, Self::METHOD_ID));
            }
        }
        spdlog::debug!("{} picked {} of {} traces", Self::NAME, picks.len(), stream.len());
        Ok(picks)
    }
}

fn detrend_constant(data: &mut [f64]) {
    let mean = data.iter().sum::<f64>() / data.len() as f64;
    data.iter_mut().for_each(|v| *v -= mean);
}

/// Zero crossing of the line through the samples two to the left and two to
/// the right of `sample_idx`. Falls back to `sample_idx` if that line is flat.
pub fn adjust_pick_time(sample_idx: usize, cf: &[f64]) -> f64 {
    let x1 = sample_idx.saturating_sub(2);
    let x2 = (sample_idx + 2).min(cf.len().saturating_sub(1));
    let y1 = cf[x1];
    let y2 = cf[x2];
    if y1 == y2 {
        return sample_idx as f64;
    }
    (x2 as f64 * y1 - x1 as f64 * y2) / (y1 - y2)
}

#[cfg(test)]
mod tests {
    use super::super::timestamp::Timestamp;
    use super::super::trace::Trace;
    use super::*;

    fn noisy_trace(id: &str, onset: usize) -> Trace<f32> {
        // Small deterministic background, strong signal from `onset`
        let data = (0..2000)
            .map(|i| {
                let background = ((i * 7919) % 13) as f32 / 13.0 - 0.5;
                if i >= onset {
                    background + 50.0 * ((i - onset) as f32 * 0.7).sin()
                } else {
                    background
                }
            })
            .collect();
        Trace::new(id, Timestamp::from_seconds(100.0), 200_000.0, data)
    }

    #[test]
    fn test_adjust_pick_time() {
        let cf = [0.0, 1.0, 2.0, 3.0, 4.0, 5.0];
        // Zero of the line through (1, 1) and (5, 5)
        assert!((adjust_pick_time(3, &cf) - 0.0).abs() < 1e-12);
        let flat = [2.0; 6];
        assert_eq!(adjust_pick_time(3, &flat), 3.0);
        // Clamped at both ends
        assert!((adjust_pick_time(0, &cf) - 0.0).abs() < 1e-12);
        assert!((adjust_pick_time(5, &cf) - 0.0).abs() < 1e-12);
    }

    #[test]
    fn test_sta_lta_picks_onsets() {
        let stream = vec![
            noisy_trace("GRM.001.001.001", 1000),
            noisy_trace("GRM.001.002.001", 1200),
            noisy_trace("GRM.001.003.001", 2500),
        ];
        let registry = PickerRegistry::<f32>::with_defaults();
        let options: serde_yaml::Value =
            serde_yaml::from_str("st_window: 10\nlt_window: 200\nthresholds: 5.0").unwrap();
        let picker = registry.create("sta_lta", &options).unwrap();
        assert_eq!(picker.name(), "sta_lta");

        let picks = picker.pick(&stream).unwrap();
        assert_eq!(picks.len(), 2);
        assert_eq!(picks[0].channel_id, "GRM.001.001.001");
        assert_eq!(picks[0].phase_hint, Some(Phase::P));
        assert_eq!(picks[0].method_id, "recursive_sta_lta");
        let dt = 1.0 / 200_000.0;
        let first = picks[0].time.seconds_since(Timestamp::from_seconds(100.0));
        let second = picks[1].time.seconds_since(Timestamp::from_seconds(100.0));
        assert!((first - 1000.0 * dt).abs() < 10.0 * dt, "first pick at {first}");
        assert!((second - 1200.0 * dt).abs() < 10.0 * dt, "second pick at {second}");
    }

    #[test]
    fn test_registry_errors() {
        let registry = PickerRegistry::<f32>::with_defaults();
        assert_eq!(registry.names(), vec![String::from("sta_lta")]);
        assert!(matches!(
            registry.create("aic", &serde_yaml::Value::Null),
            Err(PickerError::UnknownAlgorithm(_))
        ));
        let bad: serde_yaml::Value = serde_yaml::from_str("st_window: ten").unwrap();
        assert!(matches!(
            registry.create("sta_lta", &bad),
            Err(PickerError::BadOptions(_))
        ));
    }

    #[test]
    fn test_varying_sampling_rates() {
        let mut other = noisy_trace("GRM.001.002.001", 1000);
        other.sampling_rate_hz = 100_000.0;
        let stream = vec![noisy_trace("GRM.001.001.001", 1000), other];
        let picker = StaLtaPicker::new(StaLtaOptions::default());
        assert!(matches!(
            Picker::<f32>::pick(&picker, &stream),
            Err(PickerError::VaryingSamplingRates(_, _))
        ));
    }
}
