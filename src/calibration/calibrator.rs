// src/calibration/calibrator.rs
//
// Offline threshold discovery from corpus-wide signal distributions.
//
//   speed     : 3 components (stopped / slow / cruising)
//               boundary 0 → stop_speed, boundary 1 → pull_over_speed
//   |steering|: 3 components (straight / turning / U-turn)
//               boundary 0 → lane_change_steering, boundary 1 → u_turn_steering,
//               turn_steering blended between lane_change and the turning mean
//   |yaw rate|: 2 components, boundary 0 → yaw_rate
//
// Boundary i = mean_i + σ_mult × std_i over mean-sorted components. The
// multipliers, component counts and turn blend are policy, not constants.

use super::mixture::{FitOptions, GaussianComponent, GaussianMixture};
use crate::config::ThresholdSet;
use crate::error::{Result, ScenarioError};
use crate::signals::ChannelStore;
use crate::types::SignalPayload;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SignalPolicy {
    pub components: usize,
    pub sigma_multiplier: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationPolicy {
    pub seed: u64,
    /// EM restarts per signal.
    pub n_init: usize,
    pub max_iter: usize,
    pub tolerance: f64,
    pub reg_covar: f64,
    pub histogram_bins: usize,
    pub speed: SignalPolicy,
    pub steering: SignalPolicy,
    pub yaw_rate: SignalPolicy,
    /// Position of turn_steering between lane_change_steering (0.0) and the
    /// turning component's mean (1.0).
    pub turn_blend: f64,
    /// Copied into the calibrated set; not fitted.
    pub turn_signal_on: f64,
}

impl Default for CalibrationPolicy {
    fn default() -> Self {
        Self {
            seed: 42,
            n_init: 10,
            max_iter: 100,
            tolerance: 1e-3,
            reg_covar: 1e-6,
            histogram_bins: 100,
            speed: SignalPolicy {
                components: 3,
                sigma_multiplier: 3.0,
            },
            steering: SignalPolicy {
                components: 3,
                sigma_multiplier: 3.0,
            },
            yaw_rate: SignalPolicy {
                components: 2,
                sigma_multiplier: 3.0,
            },
            turn_blend: 0.5,
            turn_signal_on: 0.5,
        }
    }
}

impl CalibrationPolicy {
    pub fn fit_options(&self) -> FitOptions {
        FitOptions {
            seed: self.seed,
            n_init: self.n_init,
            max_iter: self.max_iter,
            tolerance: self.tolerance,
            reg_covar: self.reg_covar,
        }
    }
}

// ============================================================================
// CORPUS
// ============================================================================

/// Raw, unsynchronised observations pooled over every scene of a corpus.
#[derive(Debug, Clone, Default)]
pub struct CorpusObservations {
    pub speeds: Vec<f64>,
    /// |steering angle|
    pub steerings: Vec<f64>,
    /// |yaw rate|
    pub yaw_rates: Vec<f64>,
}

impl CorpusObservations {
    pub fn collect<'a>(stores: impl IntoIterator<Item = &'a ChannelStore>) -> Self {
        let mut corpus = Self::default();
        for store in stores {
            corpus.add_scene(store);
        }
        corpus
    }

    pub fn add_scene(&mut self, store: &ChannelStore) {
        for channel in store.channels() {
            for sample in channel.samples() {
                match &sample.payload {
                    SignalPayload::Pose {
                        vel, rotation_rate, ..
                    } => {
                        self.speeds.push(vel[0].hypot(vel[1]));
                        self.yaw_rates.push(rotation_rate[2].abs());
                    }
                    SignalPayload::Steering { value } => self.steerings.push(value.abs()),
                    _ => {}
                }
            }
        }
    }
}

// ============================================================================
// DIAGNOSTICS
// ============================================================================

/// Fixed-width histogram over [min, max] of the observations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Histogram {
    /// `counts.len() + 1` bin edges.
    pub edges: Vec<f64>,
    pub counts: Vec<u64>,
}

impl Histogram {
    pub fn build(data: &[f64], bins: usize) -> Self {
        let bins = bins.max(1);
        let (min, max) = data
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &x| (lo.min(x), hi.max(x)));
        if data.is_empty() || min == max {
            return Self {
                edges: vec![min, max],
                counts: vec![data.len() as u64],
            };
        }

        let width = (max - min) / bins as f64;
        let edges = (0..=bins).map(|i| min + i as f64 * width).collect();
        let mut counts = vec![0u64; bins];
        for &x in data {
            let idx = (((x - min) / width) as usize).min(bins - 1);
            counts[idx] += 1;
        }
        Self { edges, counts }
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }
}

/// Fitted mixture of one signal, for human inspection / plotting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MixtureDiagnostics {
    pub signal: String,
    pub observations: usize,
    pub sigma_multiplier: f64,
    pub components: Vec<GaussianComponent>,
    pub boundaries: Vec<f64>,
    pub mean_log_likelihood: f64,
    pub iterations: usize,
    pub histogram: Histogram,
}

#[derive(Debug, Clone)]
pub struct CalibrationOutcome {
    pub thresholds: ThresholdSet,
    pub diagnostics: Vec<MixtureDiagnostics>,
}

// ============================================================================
// CALIBRATOR
// ============================================================================

pub struct Calibrator {
    policy: CalibrationPolicy,
}

impl Calibrator {
    pub fn new(policy: CalibrationPolicy) -> Self {
        Self { policy }
    }

    /// Fit one signal and derive its `k − 1` boundaries. Fails if the fit
    /// yields fewer than `needed` boundaries.
    pub fn fit_signal(
        &self,
        signal: &str,
        data: &[f64],
        policy: SignalPolicy,
        needed: usize,
    ) -> Result<(GaussianMixture, MixtureDiagnostics)> {
        if policy.components < needed + 1 {
            return Err(ScenarioError::calibration(
                signal,
                format!(
                    "{} components give {} boundaries, {} needed",
                    policy.components,
                    policy.components.saturating_sub(1),
                    needed
                ),
            ));
        }
        if !(policy.sigma_multiplier.is_finite() && policy.sigma_multiplier > 0.0) {
            return Err(ScenarioError::calibration(
                signal,
                format!("sigma multiplier must be positive, got {}", policy.sigma_multiplier),
            ));
        }

        let mixture =
            GaussianMixture::fit(signal, data, policy.components, &self.policy.fit_options())?;
        let boundaries = mixture.boundaries(policy.sigma_multiplier);
        if boundaries.len() < needed {
            return Err(ScenarioError::calibration(
                signal,
                format!("fit produced {} boundaries, {} needed", boundaries.len(), needed),
            ));
        }

        info!(
            "🔧 [{}] {} obs | means={:?} | boundaries={:?} | iters={}",
            signal,
            data.len(),
            mixture.means(),
            boundaries,
            mixture.iterations()
        );
        for (i, c) in mixture.components().iter().enumerate() {
            debug!(
                "   [{}] component {}: μ={:.4} σ={:.4} w={:.3}",
                signal,
                i,
                c.mean,
                c.std_dev(),
                c.weight
            );
        }

        let diagnostics = MixtureDiagnostics {
            signal: signal.to_string(),
            observations: data.len(),
            sigma_multiplier: policy.sigma_multiplier,
            components: mixture.components().to_vec(),
            boundaries,
            mean_log_likelihood: mixture.mean_log_likelihood(),
            iterations: mixture.iterations(),
            histogram: Histogram::build(data, self.policy.histogram_bins),
        };
        Ok((mixture, diagnostics))
    }

    /// Fit every signal and assemble a validated ThresholdSet.
    pub fn calibrate(&self, corpus: &CorpusObservations) -> Result<CalibrationOutcome> {
        let p = &self.policy;
        if !(0.0..=1.0).contains(&p.turn_blend) {
            return Err(ScenarioError::calibration(
                "steering",
                format!("turn blend must lie in [0, 1], got {}", p.turn_blend),
            ));
        }

        info!(
            "📊 Calibrating from {} speed, {} steering, {} yaw-rate observations",
            corpus.speeds.len(),
            corpus.steerings.len(),
            corpus.yaw_rates.len()
        );

        let (_, speed) = self.fit_signal("speed", &corpus.speeds, p.speed, 2)?;
        let (steer_mix, steering) = self.fit_signal("steering", &corpus.steerings, p.steering, 2)?;
        let (_, yaw) = self.fit_signal("yaw_rate", &corpus.yaw_rates, p.yaw_rate, 1)?;

        let lane_change = steering.boundaries[0];
        let u_turn = steering.boundaries[1];
        let turning_mean = steer_mix.components()[1].mean;
        let turn = lane_change + p.turn_blend * (turning_mean - lane_change);

        let thresholds = ThresholdSet::new(
            speed.boundaries[0],
            speed.boundaries[1],
            lane_change,
            turn,
            u_turn,
            yaw.boundaries[0],
            p.turn_signal_on,
        )?;

        info!(
            "✓ Calibrated: stop={:.3} pull_over={:.3} lane_change={:.3} turn={:.3} u_turn={:.3} yaw={:.3}",
            thresholds.stop_speed(),
            thresholds.pull_over_speed(),
            thresholds.lane_change_steering(),
            thresholds.turn_steering(),
            thresholds.u_turn_steering(),
            thresholds.yaw_rate()
        );

        Ok(CalibrationOutcome {
            thresholds,
            diagnostics: vec![speed, steering, yaw],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::normal_samples as normal;
    use crate::types::Sample;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn corpus() -> CorpusObservations {
        let mut rng = StdRng::seed_from_u64(2024);

        let mut speeds = normal(&mut rng, 0.05, 0.05, 800);
        speeds.extend(normal(&mut rng, 4.0, 1.0, 600));
        speeds.extend(normal(&mut rng, 14.0, 2.0, 1200));

        let mut steerings = normal(&mut rng, 0.02, 0.02, 1500);
        steerings.extend(normal(&mut rng, 1.5, 0.3, 400));
        steerings.extend(normal(&mut rng, 7.0, 0.5, 100));

        let mut yaw_rates = normal(&mut rng, 0.01, 0.01, 1500);
        yaw_rates.extend(normal(&mut rng, 0.3, 0.05, 400));

        CorpusObservations {
            speeds: speeds.into_iter().map(f64::abs).collect(),
            steerings: steerings.into_iter().map(f64::abs).collect(),
            yaw_rates: yaw_rates.into_iter().map(f64::abs).collect(),
        }
    }

    #[test]
    fn test_calibration_assigns_boundaries() {
        let outcome = Calibrator::new(CalibrationPolicy::default())
            .calibrate(&corpus())
            .unwrap();
        let t = outcome.thresholds;

        // Stopped cluster ends well below the slow cluster
        assert!(t.stop_speed() > 0.05 && t.stop_speed() < 1.0, "stop {}", t.stop_speed());
        // Slow cluster upper edge ≈ 4 + 3σ
        assert!((t.pull_over_speed() - 7.0).abs() < 1.5, "pull_over {}", t.pull_over_speed());
        assert!(t.lane_change_steering() < t.turn_steering());
        assert!(t.turn_steering() < t.u_turn_steering());
        assert!((t.u_turn_steering() - 2.4).abs() < 0.4, "u_turn {}", t.u_turn_steering());
        assert!(t.yaw_rate() > 0.0 && t.yaw_rate() < 0.2, "yaw {}", t.yaw_rate());
        assert_eq!(t.turn_signal_on(), 0.5);

        let speed = &outcome.diagnostics[0];
        let means: Vec<f64> = speed.components.iter().map(|c| c.mean).collect();
        assert!(means[0] < 0.2, "speed means {:?}", means);
        assert!((means[1] - 4.0).abs() < 0.3, "speed means {:?}", means);
        assert!((means[2] - 14.0).abs() < 0.3, "speed means {:?}", means);

        let steering = &outcome.diagnostics[1];
        assert_eq!(steering.signal, "steering");
        assert!((steering.components[2].mean - 7.0).abs() < 0.3);
        let expected_turn = steering.boundaries[0]
            + 0.5 * (steering.components[1].mean - steering.boundaries[0]);
        assert_eq!(t.turn_steering(), expected_turn);
        assert_eq!(steering.histogram.counts.len(), 100);
        assert_eq!(steering.histogram.total(), 2000);
    }

    #[test]
    fn test_calibration_is_reproducible() {
        let data = corpus();
        let calibrator = Calibrator::new(CalibrationPolicy::default());
        let a = calibrator.calibrate(&data).unwrap();
        let b = calibrator.calibrate(&data).unwrap();
        assert_eq!(a.thresholds, b.thresholds);
        for (x, y) in a.diagnostics.iter().zip(&b.diagnostics) {
            assert_eq!(x.boundaries, y.boundaries);
        }
    }

    #[test]
    fn test_constant_signal_fails_with_signal_name() {
        let mut data = corpus();
        data.yaw_rates = vec![0.0; 1000];
        match Calibrator::new(CalibrationPolicy::default()).calibrate(&data) {
            Err(ScenarioError::Calibration { signal, .. }) => assert_eq!(signal, "yaw_rate"),
            other => panic!("expected calibration error, got {:?}", other.map(|o| o.thresholds)),
        }
    }

    #[test]
    fn test_empty_corpus_fails() {
        let err = Calibrator::new(CalibrationPolicy::default())
            .calibrate(&CorpusObservations::default())
            .unwrap_err();
        assert!(matches!(err, ScenarioError::Calibration { ref signal, .. } if signal == "speed"));
    }

    #[test]
    fn test_too_few_components_for_assignment() {
        let policy = CalibrationPolicy {
            speed: SignalPolicy {
                components: 2,
                sigma_multiplier: 3.0,
            },
            ..CalibrationPolicy::default()
        };
        let err = Calibrator::new(policy).calibrate(&corpus()).unwrap_err();
        assert!(err.to_string().contains("2 needed"));
    }

    #[test]
    fn test_sigma_multiplier_is_policy() {
        let data = corpus();
        let narrow = CalibrationPolicy {
            yaw_rate: SignalPolicy {
                components: 2,
                sigma_multiplier: 2.0,
            },
            ..CalibrationPolicy::default()
        };
        let a = Calibrator::new(CalibrationPolicy::default()).calibrate(&data).unwrap();
        let b = Calibrator::new(narrow).calibrate(&data).unwrap();
        assert!(b.thresholds.yaw_rate() < a.thresholds.yaw_rate());
        assert_eq!(a.thresholds.stop_speed(), b.thresholds.stop_speed());
    }

    #[test]
    fn test_corpus_collects_raw_samples() {
        let mut store = ChannelStore::new();
        store
            .insert(
                "pose",
                vec![
                    Sample::new(
                        0,
                        SignalPayload::Pose {
                            vel: [3.0, 4.0, 0.0],
                            rotation_rate: [0.0, 0.0, -0.2],
                            accel: None,
                        },
                    ),
                    Sample::new(
                        20_000,
                        SignalPayload::Pose {
                            vel: [0.0, 0.0, 0.0],
                            rotation_rate: [0.0, 0.0, 0.1],
                            accel: None,
                        },
                    ),
                ],
            )
            .unwrap();
        store
            .insert(
                "steeranglefeedback",
                vec![Sample::new(5, SignalPayload::Steering { value: -0.7 })],
            )
            .unwrap();

        let corpus = CorpusObservations::collect([&store, &store]);
        assert_eq!(corpus.speeds, vec![5.0, 0.0, 5.0, 0.0]);
        assert_eq!(corpus.yaw_rates, vec![0.2, 0.1, 0.2, 0.1]);
        assert_eq!(corpus.steerings, vec![0.7, 0.7]);
    }

    #[test]
    fn test_histogram_edges_and_counts() {
        let h = Histogram::build(&[0.0, 0.5, 1.0, 1.0, 2.0], 4);
        assert_eq!(h.edges, vec![0.0, 0.5, 1.0, 1.5, 2.0]);
        assert_eq!(h.counts, vec![1, 1, 2, 1]);
        assert_eq!(h.total(), 5);
    }
}
