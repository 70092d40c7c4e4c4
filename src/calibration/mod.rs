// src/calibration/mod.rs
//
// Offline threshold calibration.
//
//   ChannelStores → CorpusObservations → GaussianMixture per signal
//       → boundaries → ThresholdSet (+ MixtureDiagnostics)

pub mod calibrator;
pub mod mixture;

pub use calibrator::{
    CalibrationOutcome, CalibrationPolicy, Calibrator, CorpusObservations, Histogram,
    MixtureDiagnostics, SignalPolicy,
};
pub use mixture::{FitOptions, GaussianComponent, GaussianMixture};

/// Normally distributed test observations.
#[cfg(test)]
pub(crate) fn normal_samples(
    rng: &mut rand::rngs::StdRng,
    mean: f64,
    std_dev: f64,
    n: usize,
) -> Vec<f64> {
    use rand_distr::{Distribution, Normal};

    let normal = Normal::new(mean, std_dev).unwrap();
    normal.sample_iter(rng).take(n).collect()
}
