use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use super::channel_map::ChannelMap;
use super::classifier::Classification;
use super::constants::{
    INITIAL_GUESS_OFFSET, LOCATOR_STEP_TOLERANCE, MAX_LOCATOR_ITERATIONS, MIN_PICKS_FOR_LOCATION,
};
use super::error::LocationError;
use super::event::{Arrival, Event, Origin, Phase, Pick};

const METHOD_ID: &str = "method/travel_time/homogeneous_model";
const ORIGIN_ID_PREFIX: &str = "origin/travel_time/homogeneous_model";

/// Velocity in m/s, either one for all picks or one per phase
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VelocityModel {
    Scalar(f64),
    PerPhase(BTreeMap<Phase, f64>),
}

/// Thomsen style weak anisotropy. `inc` and `azi` (radians) orient the symmetry axis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AnisotropicParams {
    pub inc: f64,
    pub azi: f64,
    pub delta: f64,
    pub epsilon: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnisotropyModel {
    Single(AnisotropicParams),
    PerPhase(BTreeMap<Phase, AnisotropicParams>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocatorOptions {
    pub velocity: VelocityModel,
    #[serde(default)]
    pub anisotropy: Option<AnisotropyModel>,
    /// Tikhonov damping of the normal equations
    pub damping: f64,
}

impl Default for LocatorOptions {
    fn default() -> Self {
        Self {
            velocity: VelocityModel::Scalar(5000.0),
            anisotropy: None,
            damping: 0.01,
        }
    }
}

/// Velocity and anisotropy to use for every phase present in a pick set
struct PhaseModel {
    velocity: BTreeMap<Phase, f64>,
    anisotropy: Option<BTreeMap<Phase, AnisotropicParams>>,
}

impl LocatorOptions {
    /// Check the model is usable at all, independent of any picks
    pub fn validate(&self) -> Result<(), LocationError> {
        let velocities: Vec<f64> = match &self.velocity {
            VelocityModel::Scalar(v) => vec![*v],
            VelocityModel::PerPhase(map) => map.values().copied().collect(),
        };
        if velocities.is_empty() || velocities.iter().any(|v| !(v.is_finite() && *v > 0.0)) {
            return Err(LocationError::BadVelocity);
        }
        if let (VelocityModel::PerPhase(v), Some(AnisotropyModel::PerPhase(a))) =
            (&self.velocity, &self.anisotropy)
        {
            if let Some(phase) = v.keys().find(|p| !a.contains_key(p)) {
                return Err(LocationError::PartialAnisotropy(*phase));
            }
        }
        Ok(())
    }

    fn resolve(&self, phases: &BTreeSet<Phase>) -> Result<PhaseModel, LocationError> {
        let velocity = match &self.velocity {
            VelocityModel::Scalar(v) => {
                if phases.len() > 1 {
                    return Err(LocationError::ScalarVelocityMultiplePhases);
                }
                phases.iter().map(|p| (*p, *v)).collect()
            }
            VelocityModel::PerPhase(map) => {
                let mut velocity = BTreeMap::new();
                for phase in phases.iter() {
                    let v = map.get(phase).ok_or(LocationError::MissingVelocity(*phase))?;
                    velocity.insert(*phase, *v);
                }
                velocity
            }
        };
        let anisotropy = match &self.anisotropy {
            None => None,
            Some(AnisotropyModel::Single(params)) => {
                if phases.len() > 1 {
                    return Err(LocationError::ScalarAnisotropyMultiplePhases);
                }
                Some(phases.iter().map(|p| (*p, *params)).collect())
            }
            Some(AnisotropyModel::PerPhase(map)) => {
                let mut anisotropy = BTreeMap::new();
                for phase in phases.iter() {
                    let params = map.get(phase).ok_or(LocationError::PartialAnisotropy(*phase))?;
                    anisotropy.insert(*phase, *params);
                }
                Some(anisotropy)
            }
        };
        Ok(PhaseModel {
            velocity,
            anisotropy,
        })
    }

    /// `earth_model/homogeneous/<isotropic|anisotropic>/velocity=P_3500__S_2500`
    fn earth_model_id(&self, phases: &BTreeSet<Phase>) -> String {
        let velocity = match &self.velocity {
            VelocityModel::Scalar(v) => phases
                .iter()
                .map(|p| format!("{p}_{}", v.round() as i64))
                .collect::<Vec<_>>()
                .join("__"),
            VelocityModel::PerPhase(map) => map
                .iter()
                .map(|(p, v)| format!("{p}_{}", v.round() as i64))
                .collect::<Vec<_>>()
                .join("__"),
        };
        let kind = if self.anisotropy.is_some() {
            "anisotropic"
        } else {
            "isotropic"
        };
        format!("earth_model/homogeneous/{kind}/velocity={velocity}")
    }
}

/// Velocity along the ray from source to receiver under weak anisotropy
pub fn anisotropic_velocity(
    velocity: f64,
    params: &AnisotropicParams,
    source: [f64; 3],
    receiver: [f64; 3],
) -> f64 {
    let dx = receiver[0] - source[0];
    let dy = receiver[1] - source[1];
    let dz = receiver[2] - source[2];
    let azi = dx.atan2(dy);
    let inc = dz.atan2(dx.hypot(dy));
    let cos_theta = inc.cos() * azi.cos() * params.inc.cos() * params.azi.cos()
        + inc.cos() * azi.sin() * params.inc.cos() * params.azi.sin()
        + inc.sin() * params.inc.sin();
    let theta = cos_theta.clamp(-1.0, 1.0).acos();
    let (sin, cos) = theta.sin_cos();
    velocity * (1.0 + params.delta * sin.powi(2) * cos.powi(2) + params.epsilon * sin.powi(4))
}

fn distance(a: [f64; 3], b: [f64; 3]) -> f64 {
    ((a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2) + (a[2] - b[2]).powi(2)).sqrt()
}

/// Invert picks for a hypocenter and origin time in a homogeneous medium.
///
/// Damped Gauss-Newton on `(x, y, z, t0)` with times in milliseconds relative
/// to the earliest pick. Stops after a fixed number of iterations or once the
/// model update is tiny. Non-convergence is not an error: inspect
/// `time_uncertainty_s` (the residual RMS) of the returned origin.
///
/// The hypocenter is expressed in the frame of the channel map coordinates.
/// No projection to geographic coordinates is applied.
pub fn locate(picks: &[Pick], channels: &ChannelMap, options: &LocatorOptions) -> Result<Origin, LocationError> {
    if picks.len() < MIN_PICKS_FOR_LOCATION {
        return Err(LocationError::TooFewPicks(picks.len()));
    }
    let mut phases_used: Vec<Phase> = Vec::with_capacity(picks.len());
    let mut receivers: Vec<[f64; 3]> = Vec::with_capacity(picks.len());
    for pick in picks.iter() {
        phases_used.push(
            pick.phase_hint
                .ok_or(LocationError::MissingPhaseHint(pick.channel_id.clone()))?,
        );
        receivers.push(
            channels
                .coordinates(&pick.channel_id)
                .ok_or(LocationError::UnknownChannel(pick.channel_id.clone()))?,
        );
    }
    let phases: BTreeSet<Phase> = phases_used.iter().copied().collect();
    let model = options.resolve(&phases)?;

    let n = picks.len();
    let reference = picks
        .iter()
        .map(|p| p.time)
        .min()
        .ok_or(LocationError::TooFewPicks(0))?;
    let t_relative: Vec<f64> = picks
        .iter()
        .map(|p| (p.time.nanos() - reference.nanos()) as f64 / 1e6)
        .collect();
    // m/ms
    let base_velocity: Vec<f64> = phases_used
        .iter()
        .map(|p| model.velocity[p] / 1000.0)
        .collect();

    let (earliest, t_min) = t_relative
        .iter()
        .copied()
        .enumerate()
        .fold((0, f64::INFINITY), |best, (i, t)| if t < best.1 { (i, t) } else { best });
    let mut loc = receivers[earliest].map(|c| c + INITIAL_GUESS_OFFSET);
    let mut t0 = t_min;

    let mut velocity = base_velocity.clone();
    let mut residuals = Array1::<f64>::zeros(n);
    let mut rms = 0.0;
    let mut jacobian = Array2::<f64>::zeros((n, 4));
    let regularization = Array2::<f64>::eye(4) * options.damping.powi(2);
    let mut step_norm = f64::INFINITY;
    let mut iterations = 0;

    while iterations < MAX_LOCATOR_ITERATIONS && step_norm > LOCATOR_STEP_TOLERANCE {
        iterations += 1;
        if let Some(anisotropy) = &model.anisotropy {
            for i in 0..n {
                velocity[i] =
                    anisotropic_velocity(base_velocity[i], &anisotropy[&phases_used[i]], loc, receivers[i]);
            }
        }
        for i in 0..n {
            let dist = distance(loc, receivers[i]);
            residuals[i] = t_relative[i] - (dist / velocity[i] + t0);
            for j in 0..3 {
                jacobian[[i, j]] = -(receivers[i][j] - loc[j]) / (velocity[i] * dist);
            }
            jacobian[[i, 3]] = 1.0;
        }
        rms = residuals.dot(&residuals).sqrt() / n as f64;

        let normal = jacobian.t().dot(&jacobian) + &regularization;
        let rhs = jacobian.t().dot(&residuals);
        let step = solve(normal, rhs).ok_or(LocationError::SingularSystem)?;
        for j in 0..3 {
            loc[j] += step[j];
        }
        t0 += step[3];
        step_norm = step.dot(&step).sqrt();
    }
    spdlog::debug!(
        "Location {:.2} {:.2} {:.2}; {} iterations, rms {:.3} ms",
        loc[0],
        loc[1],
        loc[2],
        iterations,
        rms
    );

    let earth_model_id = options.earth_model_id(&phases);
    let resource_id = format!("{ORIGIN_ID_PREFIX}/{}", uuid::Uuid::new_v4());
    let arrivals = picks
        .iter()
        .enumerate()
        .map(|(i, pick)| Arrival {
            resource_id: format!("arrival/{i}/{resource_id}"),
            pick_id: pick.resource_id.clone(),
            phase: phases_used[i],
            time_residual_s: residuals[i] / 1000.0,
            distance_m: distance(loc, receivers[i]),
            earth_model_id: earth_model_id.clone(),
        })
        .collect();

    Ok(Origin {
        resource_id,
        time: reference.offset(t0 / 1000.0),
        x: loc[0],
        y: loc[1],
        z: loc[2],
        time_uncertainty_s: rms / 1000.0,
        method_id: METHOD_ID.to_string(),
        earth_model_id,
        depth_type: String::from("from location"),
        time_fixed: false,
        epicenter_fixed: false,
        arrivals,
    })
}

/// Locate and wrap the result in a new event
pub fn locate_in_homogeneous_background_medium(
    picks: Vec<Pick>,
    channels: &ChannelMap,
    options: &LocatorOptions,
    classification: Option<Classification>,
) -> Result<Event, LocationError> {
    let origin = locate(&picks, channels, options)?;
    let mut event = Event::new(picks, classification);
    event.add_origin(origin);
    Ok(event)
}

/// Locate an event again from its picks, appending the new origin
pub fn relocate(event: &mut Event, channels: &ChannelMap, options: &LocatorOptions) -> Result<(), LocationError> {
    let origin = locate(&event.picks, channels, options)?;
    event.add_origin(origin);
    Ok(())
}

/// Gaussian elimination with partial pivoting. None if the system is singular.
fn solve(mut a: Array2<f64>, mut b: Array1<f64>) -> Option<Array1<f64>> {
    let n = b.len();
    for col in 0..n {
        let pivot = (col..n).max_by(|&i, &j| a[[i, col]].abs().total_cmp(&a[[j, col]].abs()))?;
        if a[[pivot, col]] == 0.0 || !a[[pivot, col]].is_finite() {
            return None;
        }
        if pivot != col {
            for k in 0..n {
                a.swap([col, k], [pivot, k]);
            }
            b.swap(col, pivot);
        }
        for row in (col + 1)..n {
            let factor = a[[row, col]] / a[[col, col]];
            for k in col..n {
                a[[row, k]] -= factor * a[[col, k]];
            }
            b[row] -= factor * b[col];
        }
    }
    let mut x = Array1::<f64>::zeros(n);
    for row in (0..n).rev() {
        let mut sum = b[row];
        for k in (row + 1)..n {
            sum -= a[[row, k]] * x[k];
        }
        x[row] = sum / a[[row, row]];
    }
    Some(x)
}

#[cfg(test)]
mod tests {
    use super::super::channel_map::Channel;
    use super::super::timestamp::Timestamp;
    use super::*;

    fn receivers() -> ChannelMap {
        let corners = [
            ("GRM.001.002.001", [100.0, 100.0, 100.0]),
            ("GRM.001.003.001", [-100.0, -100.0, -100.0]),
            ("GRM.001.004.001", [-100.0, 100.0, -100.0]),
            ("GRM.001.005.001", [-100.0, -100.0, 100.0]),
            ("GRM.001.006.001", [100.0, -100.0, -100.0]),
            ("GRM.001.007.001", [-100.0, 100.0, 100.0]),
            ("GRM.001.018.001", [100.0, -100.0, 100.0]),
            ("GRM.001.019.001", [100.0, 100.0, -100.0]),
        ];
        ChannelMap::from_channels(corners.iter().map(|(id, c)| Channel {
            id: id.to_string(),
            coordinates: *c,
            gain: None,
        }))
    }

    fn synthetic_picks(
        channels: &ChannelMap,
        origin_time: Timestamp,
        source: [f64; 3],
        phase: Phase,
        velocity: f64,
        anisotropy: Option<&AnisotropicParams>,
    ) -> Vec<Pick> {
        channels
            .ids()
            .iter()
            .map(|id| {
                let receiver = channels.coordinates(id).unwrap();
                let v = match anisotropy {
                    Some(params) => anisotropic_velocity(velocity, params, source, receiver),
                    None => velocity,
                };
                let travel_time = distance(source, receiver) / v;
                Pick::new(id, Some(phase), origin_time.offset(travel_time), "synthetic")
            })
            .collect()
    }

    const SOURCE: [f64; 3] = [3.0, -7.0, 2.3];

    fn origin_time() -> Timestamp {
        "2021-01-02T03:04:05.123456Z".parse().unwrap()
    }

    fn assert_recovered(origin: &Origin, location_tolerance: f64, time_tolerance: f64) {
        assert!((origin.x - SOURCE[0]).abs() < location_tolerance, "x = {}", origin.x);
        assert!((origin.y - SOURCE[1]).abs() < location_tolerance, "y = {}", origin.y);
        assert!((origin.z - SOURCE[2]).abs() < location_tolerance, "z = {}", origin.z);
        assert!(origin.time.seconds_since(origin_time()).abs() < time_tolerance);
    }

    #[test]
    fn test_isotropic_round_trip() {
        let channels = receivers();
        let picks = synthetic_picks(&channels, origin_time(), SOURCE, Phase::P, 3500.0, None);
        let options = LocatorOptions {
            velocity: VelocityModel::Scalar(3500.0),
            anisotropy: None,
            damping: 0.7,
        };
        let event =
            locate_in_homogeneous_background_medium(picks.clone(), &channels, &options, None).unwrap();
        assert!(event.resource_id.starts_with("event/"));
        assert_eq!(event.origins.len(), 1);
        let origin = event.preferred_origin().unwrap();
        assert_recovered(origin, 1e-3, 1e-6);
        assert!(!origin.time_fixed);
        assert!(!origin.epicenter_fixed);
        assert_eq!(origin.depth_type, "from location");
        assert_eq!(origin.method_id, "method/travel_time/homogeneous_model");
        assert!(origin
            .resource_id
            .starts_with("origin/travel_time/homogeneous_model/"));
        assert_eq!(origin.arrivals.len(), 8);
        for (pick, arrival) in picks.iter().zip(origin.arrivals.iter()) {
            assert_eq!(arrival.pick_id, pick.resource_id);
            assert_eq!(arrival.phase, Phase::P);
            assert_eq!(
                arrival.earth_model_id,
                "earth_model/homogeneous/isotropic/velocity=P_3500"
            );
            assert!(arrival.time_residual_s.abs() < 1e-6);
            assert!(arrival.distance_m > 100.0);
        }
    }

    #[test]
    fn test_origin_follows_channel_frame() {
        let shift = [600_000.0, 200_000.0, 1_500.0];
        let local = receivers();
        let shifted = ChannelMap::from_channels(local.ids().iter().map(|id| Channel {
            id: id.clone(),
            coordinates: {
                let c = local.coordinates(id).unwrap();
                [c[0] + shift[0], c[1] + shift[1], c[2] + shift[2]]
            },
            gain: None,
        }));
        let source = [SOURCE[0] + shift[0], SOURCE[1] + shift[1], SOURCE[2] + shift[2]];
        let picks = synthetic_picks(&shifted, origin_time(), source, Phase::P, 3500.0, None);
        let options = LocatorOptions {
            velocity: VelocityModel::Scalar(3500.0),
            anisotropy: None,
            damping: 0.7,
        };
        let origin = locate(&picks, &shifted, &options).unwrap();
        assert!((origin.x - source[0]).abs() < 1e-2, "x = {}", origin.x);
        assert!((origin.y - source[1]).abs() < 1e-2, "y = {}", origin.y);
        assert!((origin.z - source[2]).abs() < 1e-2, "z = {}", origin.z);
    }

    #[test]
    fn test_anisotropic_round_trip() {
        let channels = receivers();
        let params = AnisotropicParams {
            inc: 0.3,
            azi: 0.5,
            delta: 0.05,
            epsilon: 0.02,
        };
        let picks = synthetic_picks(&channels, origin_time(), SOURCE, Phase::P, 3500.0, Some(&params));
        let options = LocatorOptions {
            velocity: VelocityModel::Scalar(3500.0),
            anisotropy: Some(AnisotropyModel::Single(params)),
            damping: 0.7,
        };
        let origin = locate(&picks, &channels, &options).unwrap();
        assert_recovered(&origin, 1e-3, 1e-6);
        assert_eq!(
            origin.earth_model_id,
            "earth_model/homogeneous/anisotropic/velocity=P_3500"
        );
    }

    #[test]
    fn test_joint_p_and_s() {
        let channels = receivers();
        let mut picks = synthetic_picks(&channels, origin_time(), SOURCE, Phase::P, 3500.0, None);
        picks.extend(synthetic_picks(&channels, origin_time(), SOURCE, Phase::S, 2500.0, None));
        let velocity = VelocityModel::PerPhase(BTreeMap::from([(Phase::P, 3500.0), (Phase::S, 2500.0)]));
        let options = LocatorOptions {
            velocity,
            anisotropy: None,
            damping: 0.7,
        };
        let origin = locate(&picks, &channels, &options).unwrap();
        assert_recovered(&origin, 1e-3, 1e-6);
        assert_eq!(origin.arrivals.len(), 16);
        assert_eq!(
            origin.earth_model_id,
            "earth_model/homogeneous/isotropic/velocity=P_3500__S_2500"
        );

        // Only S picks still report the full velocity model
        let s_only: Vec<Pick> = picks.iter().filter(|p| p.phase_hint == Some(Phase::S)).cloned().collect();
        let origin = locate(&s_only, &channels, &options).unwrap();
        assert_recovered(&origin, 1e-3, 1e-6);
        assert_eq!(
            origin.earth_model_id,
            "earth_model/homogeneous/isotropic/velocity=P_3500__S_2500"
        );
    }

    #[test]
    fn test_validation_errors() {
        let channels = receivers();
        let mut picks = synthetic_picks(&channels, origin_time(), SOURCE, Phase::P, 3500.0, None);
        let scalar = LocatorOptions {
            velocity: VelocityModel::Scalar(3500.0),
            anisotropy: None,
            damping: 0.7,
        };
        assert!(matches!(
            locate(&picks[..2], &channels, &scalar),
            Err(LocationError::TooFewPicks(2))
        ));

        picks[3].phase_hint = Some(Phase::S);
        assert!(matches!(
            locate(&picks, &channels, &scalar),
            Err(LocationError::ScalarVelocityMultiplePhases)
        ));

        let p_only = LocatorOptions {
            velocity: VelocityModel::PerPhase(BTreeMap::from([(Phase::P, 3500.0)])),
            ..scalar.clone()
        };
        assert!(matches!(
            locate(&picks, &channels, &p_only),
            Err(LocationError::MissingVelocity(Phase::S))
        ));

        let partial = LocatorOptions {
            velocity: VelocityModel::PerPhase(BTreeMap::from([(Phase::P, 3500.0), (Phase::S, 2500.0)])),
            anisotropy: Some(AnisotropyModel::PerPhase(BTreeMap::from([(
                Phase::P,
                AnisotropicParams {
                    inc: 0.0,
                    azi: 0.0,
                    delta: 0.0,
                    epsilon: 0.0,
                },
            )]))),
            damping: 0.7,
        };
        assert!(matches!(
            locate(&picks, &channels, &partial),
            Err(LocationError::PartialAnisotropy(Phase::S))
        ));
        assert!(matches!(partial.validate(), Err(LocationError::PartialAnisotropy(Phase::S))));

        picks[3].phase_hint = None;
        assert!(matches!(
            locate(&picks, &channels, &scalar),
            Err(LocationError::MissingPhaseHint(_))
        ));

        picks[3].phase_hint = Some(Phase::P);
        picks[4].channel_id = String::from("XX.999.000.001");
        assert!(matches!(
            locate(&picks, &channels, &scalar),
            Err(LocationError::UnknownChannel(_))
        ));
    }

    #[test]
    fn test_relocation_appends_origin() {
        let channels = receivers();
        let picks = synthetic_picks(&channels, origin_time(), SOURCE, Phase::P, 3500.0, None);
        let options = LocatorOptions {
            velocity: VelocityModel::Scalar(3500.0),
            anisotropy: None,
            damping: 0.7,
        };
        let mut event = locate_in_homogeneous_background_medium(picks, &channels, &options, None).unwrap();
        let first_id = event.origins[0].resource_id.clone();
        relocate(&mut event, &channels, &options).unwrap();
        assert_eq!(event.origins.len(), 2);
        assert_eq!(event.origins[0].resource_id, first_id);
        assert_eq!(event.preferred_origin_id.as_ref(), Some(&event.origins[1].resource_id));
    }

    #[test]
    fn test_solve() {
        let a = Array2::from_shape_vec((2, 2), vec![0.0, 2.0, 3.0, 1.0]).unwrap();
        let b = Array1::from(vec![4.0, 5.0]);
        let x = solve(a, b).unwrap();
        assert!((x[0] - 1.0).abs() < 1e-12);
        assert!((x[1] - 2.0).abs() < 1e-12);

        let singular = Array2::from_shape_vec((2, 2), vec![1.0, 2.0, 2.0, 4.0]).unwrap();
        assert!(solve(singular, Array1::from(vec![1.0, 2.0])).is_none());
    }
}
