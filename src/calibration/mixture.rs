// src/calibration/mixture.rs
//
// 1-D Gaussian mixture fitted with EM.
//
// Every fit runs `n_init` EM passes from different starting points and keeps
// the one with the highest log-likelihood. The first start places the centres
// on evenly spaced quantiles; the others are k-means++ seedings drawn from one
// StdRng seeded with `seed`. Each start is refined by Lloyd iterations before
// EM, so a given (data, k, options) always yields the same fit.
// The E-step works in log space; the M-step adds `reg_covar` to every
// variance. A start that fails to converge within `max_iter` is discarded;
// if none converges the fit is an error.

use crate::error::{Result, ScenarioError};
use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use tracing::debug;

const LLOYD_ITERATIONS: usize = 30;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FitOptions {
    pub seed: u64,
    /// Number of EM restarts; the best log-likelihood wins.
    pub n_init: usize,
    pub max_iter: usize,
    /// Convergence threshold on the change in mean per-sample log-likelihood.
    pub tolerance: f64,
    /// Added to each component variance.
    pub reg_covar: f64,
}

impl Default for FitOptions {
    fn default() -> Self {
        Self {
            seed: 42,
            n_init: 10,
            max_iter: 100,
            tolerance: 1e-3,
            reg_covar: 1e-6,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GaussianComponent {
    pub mean: f64,
    pub variance: f64,
    pub weight: f64,
}

impl GaussianComponent {
    pub fn std_dev(&self) -> f64 {
        self.variance.sqrt()
    }

    fn log_pdf(&self, x: f64) -> f64 {
        -0.5 * ((2.0 * PI * self.variance).ln() + (x - self.mean).powi(2) / self.variance)
    }

    /// Weighted density at `x`.
    pub fn density(&self, x: f64) -> f64 {
        self.weight * self.log_pdf(x).exp()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GaussianMixture {
    /// Sorted by ascending mean.
    components: Vec<GaussianComponent>,
    mean_log_likelihood: f64,
    iterations: usize,
}

impl GaussianMixture {
    /// Fit `k` components to `data`. `signal` only labels errors.
    pub fn fit(signal: &str, data: &[f64], k: usize, options: &FitOptions) -> Result<Self> {
        validate(signal, data, k)?;
        if options.n_init == 0 {
            return Err(ScenarioError::calibration(
                signal,
                "at least one initialisation is required",
            ));
        }

        let mut rng = StdRng::seed_from_u64(options.seed);
        let mut best: Option<Self> = None;
        let mut last_error = None;

        for start in 0..options.n_init {
            let centers = if start == 0 {
                quantile_centers(data, k)
            } else {
                kmeans_pp_centers(signal, data, k, &mut rng)?
            };
            let components = lloyd(data, centers, options.reg_covar);

            match run_em(signal, data, components, options) {
                Ok(fit) => {
                    debug!(
                        "   [{}] start {}: ll={:.5} iters={}",
                        signal, start, fit.mean_log_likelihood, fit.iterations
                    );
                    if best
                        .as_ref()
                        .map_or(true, |b| fit.mean_log_likelihood > b.mean_log_likelihood)
                    {
                        best = Some(fit);
                    }
                }
                Err(e) => last_error = Some(e),
            }
        }

        match (best, last_error) {
            (Some(fit), _) => Ok(fit),
            (None, Some(e)) => Err(e),
            (None, None) => Err(ScenarioError::calibration(signal, "no initialisation was run")),
        }
    }

    pub fn components(&self) -> &[GaussianComponent] {
        &self.components
    }

    pub fn means(&self) -> Vec<f64> {
        self.components.iter().map(|c| c.mean).collect()
    }

    pub fn mean_log_likelihood(&self) -> f64 {
        self.mean_log_likelihood
    }

    pub fn iterations(&self) -> usize {
        self.iterations
    }

    pub fn density(&self, x: f64) -> f64 {
        self.components.iter().map(|c| c.density(x)).sum()
    }

    /// `k − 1` boundaries: `mean_i + sigma_multiplier × std_i` for every
    /// component but the highest.
    pub fn boundaries(&self, sigma_multiplier: f64) -> Vec<f64> {
        let k = self.components.len();
        self.components[..k.saturating_sub(1)]
            .iter()
            .map(|c| c.mean + sigma_multiplier * c.std_dev())
            .collect()
    }
}

/// One EM pass from the given starting components.
fn run_em(
    signal: &str,
    data: &[f64],
    mut components: Vec<GaussianComponent>,
    options: &FitOptions,
) -> Result<GaussianMixture> {
    let n = data.len();
    let k = components.len();
    let mut resp = vec![0.0; n * k];
    let mut previous = f64::NEG_INFINITY;
    let mut converged = None;

    for iter in 1..=options.max_iter {
        let ll = e_step(data, &components, &mut resp);
        m_step(data, &resp, &mut components, options.reg_covar);

        if components
            .iter()
            .any(|c| !(c.mean.is_finite() && c.variance.is_finite() && c.weight.is_finite()))
        {
            return Err(ScenarioError::calibration(
                signal,
                format!("mixture parameters became non-finite at iteration {iter}"),
            ));
        }

        if (ll - previous).abs() < options.tolerance {
            converged = Some(iter);
            break;
        }
        previous = ll;
    }

    let iterations = converged.ok_or_else(|| {
        ScenarioError::calibration(
            signal,
            format!(
                "EM did not converge within {} iterations (tolerance {})",
                options.max_iter, options.tolerance
            ),
        )
    })?;

    let mean_log_likelihood = e_step(data, &components, &mut resp);
    if !mean_log_likelihood.is_finite() {
        return Err(ScenarioError::calibration(signal, "log-likelihood is not finite"));
    }
    components.sort_by(|a, b| a.mean.total_cmp(&b.mean));

    Ok(GaussianMixture {
        components,
        mean_log_likelihood,
        iterations,
    })
}

fn validate(signal: &str, data: &[f64], k: usize) -> Result<()> {
    let fail = |reason: String| Err(ScenarioError::calibration(signal, reason));

    if k == 0 {
        return fail("mixture needs at least one component".to_string());
    }
    if data.is_empty() {
        return fail("no observations".to_string());
    }
    if let Some(bad) = data.iter().find(|x| !x.is_finite()) {
        return fail(format!("non-finite observation {bad}"));
    }
    if data.len() < k {
        return fail(format!("{} observations for {} components", data.len(), k));
    }

    let (min, max) = data
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &x| (lo.min(x), hi.max(x)));
    if min == max {
        return fail(format!("all {} observations equal {} (zero variance)", data.len(), min));
    }
    // Squared distances and variances must stay finite
    let spread = max - min;
    if !(spread * spread * data.len() as f64).is_finite() {
        return fail(format!("observation range {min}..{max} is too wide to fit"));
    }

    let mut sorted = data.to_vec();
    sorted.sort_by(f64::total_cmp);
    sorted.dedup();
    if sorted.len() < k {
        return fail(format!(
            "{} distinct observations for {} components",
            sorted.len(),
            k
        ));
    }
    Ok(())
}

/// Centres on the (2j + 1) / 2k quantiles.
fn quantile_centers(data: &[f64], k: usize) -> Vec<f64> {
    let mut sorted = data.to_vec();
    sorted.sort_by(f64::total_cmp);
    let n = sorted.len();
    (0..k)
        .map(|j| sorted[((2 * j + 1) * n / (2 * k)).min(n - 1)])
        .collect()
}

/// k-means++ seeding.
fn kmeans_pp_centers(signal: &str, data: &[f64], k: usize, rng: &mut StdRng) -> Result<Vec<f64>> {
    let mut centers = Vec::with_capacity(k);
    centers.push(data[rng.gen_range(0..data.len())]);
    while centers.len() < k {
        let d2: Vec<f64> = data
            .iter()
            .map(|&x| {
                centers
                    .iter()
                    .map(|c| (x - c).powi(2))
                    .fold(f64::INFINITY, f64::min)
            })
            .collect();
        let dist = WeightedIndex::new(&d2).map_err(|e| {
            ScenarioError::calibration(
                signal,
                format!("k-means++ seeding found {} of {} centres: {}", centers.len(), k, e),
            )
        })?;
        centers.push(data[dist.sample(rng)]);
    }
    Ok(centers)
}

/// Lloyd refinement of `centers`, then per-cluster moments.
fn lloyd(data: &[f64], mut centers: Vec<f64>, reg_covar: f64) -> Vec<GaussianComponent> {
    let n = data.len();
    let mut assignments = vec![usize::MAX; n];
    for _ in 0..LLOYD_ITERATIONS {
        let mut changed = false;
        for (i, &x) in data.iter().enumerate() {
            let nearest = nearest_center(&centers, x);
            if assignments[i] != nearest {
                assignments[i] = nearest;
                changed = true;
            }
        }
        if !changed {
            break;
        }
        for (j, center) in centers.iter_mut().enumerate() {
            let (sum, count) = data
                .iter()
                .zip(&assignments)
                .filter(|(_, a)| **a == j)
                .fold((0.0, 0usize), |(s, c), (&x, _)| (s + x, c + 1));
            if count > 0 {
                *center = sum / count as f64;
            }
        }
    }

    let overall_mean = data.iter().sum::<f64>() / n as f64;
    let overall_var = data.iter().map(|x| (x - overall_mean).powi(2)).sum::<f64>() / n as f64;

    centers
        .iter()
        .enumerate()
        .map(|(j, &mean)| {
            let members: Vec<f64> = data
                .iter()
                .zip(&assignments)
                .filter(|(_, a)| **a == j)
                .map(|(&x, _)| x)
                .collect();
            if members.is_empty() {
                return GaussianComponent {
                    mean,
                    variance: overall_var + reg_covar,
                    weight: 1.0 / n as f64,
                };
            }
            let m = members.iter().sum::<f64>() / members.len() as f64;
            let var = members.iter().map(|x| (x - m).powi(2)).sum::<f64>() / members.len() as f64;
            GaussianComponent {
                mean: m,
                variance: var + reg_covar,
                weight: members.len() as f64 / n as f64,
            }
        })
        .collect()
}

fn nearest_center(centers: &[f64], x: f64) -> usize {
    centers
        .iter()
        .enumerate()
        .min_by(|a, b| (x - a.1).abs().total_cmp(&(x - b.1).abs()))
        .map(|(j, _)| j)
        .unwrap_or(0)
}

/// Fills `resp` (row-major n × k) with posteriors and returns the mean
/// per-sample log-likelihood.
fn e_step(data: &[f64], components: &[GaussianComponent], resp: &mut [f64]) -> f64 {
    let k = components.len();
    let mut total = 0.0;
    for (i, &x) in data.iter().enumerate() {
        let row = &mut resp[i * k..(i + 1) * k];
        for (r, c) in row.iter_mut().zip(components) {
            *r = c.weight.ln() + c.log_pdf(x);
        }
        let max = row.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let lse = max + row.iter().map(|lp| (lp - max).exp()).sum::<f64>().ln();
        for r in row.iter_mut() {
            *r = (*r - lse).exp();
        }
        total += lse;
    }
    total / data.len() as f64
}

fn m_step(data: &[f64], resp: &[f64], components: &mut [GaussianComponent], reg_covar: f64) {
    let k = components.len();
    let n = data.len() as f64;
    for (j, c) in components.iter_mut().enumerate() {
        let column = || resp.iter().skip(j).step_by(k);
        let nk = column().sum::<f64>() + 10.0 * f64::EPSILON;
        let mean = column().zip(data).map(|(r, x)| r * x).sum::<f64>() / nk;
        let var = column()
            .zip(data)
            .map(|(r, x)| r * (x - mean).powi(2))
            .sum::<f64>()
            / nk;
        c.weight = nk / n;
        c.mean = mean;
        c.variance = var + reg_covar;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::normal_samples as normal;

    fn two_clusters() -> Vec<f64> {
        let mut rng = StdRng::seed_from_u64(7);
        let mut data = normal(&mut rng, 0.0, 0.1, 600);
        data.extend(normal(&mut rng, 10.0, 1.0, 400));
        data
    }

    #[test]
    fn test_recovers_two_clusters() {
        let gmm = GaussianMixture::fit("speed", &two_clusters(), 2, &FitOptions::default()).unwrap();
        let c = gmm.components();
        assert_eq!(c.len(), 2);
        assert!(c[0].mean < c[1].mean, "components sorted by mean");
        assert!(c[0].mean.abs() < 0.05, "low mean {}", c[0].mean);
        assert!((c[1].mean - 10.0).abs() < 0.3, "high mean {}", c[1].mean);
        assert!((c[0].std_dev() - 0.1).abs() < 0.02);
        assert!((c[0].weight - 0.6).abs() < 0.02);
        let weight_sum: f64 = c.iter().map(|c| c.weight).sum();
        assert!((weight_sum - 1.0).abs() < 1e-9);
        assert!(gmm.iterations() >= 1);
    }

    #[test]
    fn test_boundaries_use_lower_components() {
        let gmm = GaussianMixture::fit("speed", &two_clusters(), 2, &FitOptions::default()).unwrap();
        let b = gmm.boundaries(3.0);
        assert_eq!(b.len(), 1);
        let c = gmm.components()[0];
        assert_eq!(b[0], c.mean + 3.0 * c.std_dev());
        assert!((b[0] - 0.3).abs() < 0.08, "boundary {}", b[0]);
    }

    #[test]
    fn test_same_seed_same_fit() {
        let data = two_clusters();
        let options = FitOptions::default();
        let a = GaussianMixture::fit("speed", &data, 2, &options).unwrap();
        let b = GaussianMixture::fit("speed", &data, 2, &options).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.boundaries(2.5), b.boundaries(2.5));
    }

    #[test]
    fn test_identical_values_rejected() {
        let data = vec![3.0; 500];
        match GaussianMixture::fit("steering", &data, 2, &FitOptions::default()) {
            Err(ScenarioError::Calibration { signal, reason }) => {
                assert_eq!(signal, "steering");
                assert!(reason.contains("zero variance"));
            }
            other => panic!("expected calibration error, got {:?}", other),
        }
    }

    #[test]
    fn test_degenerate_inputs_rejected() {
        let opts = FitOptions::default();
        assert!(GaussianMixture::fit("s", &[], 2, &opts).is_err());
        assert!(GaussianMixture::fit("s", &[1.0, 2.0], 3, &opts).is_err());
        assert!(GaussianMixture::fit("s", &[1.0, 2.0, f64::NAN], 2, &opts).is_err());
        assert!(GaussianMixture::fit("s", &[1.0, 1.0, 2.0, 2.0], 3, &opts).is_err());
        assert!(GaussianMixture::fit("s", &[1.0, 2.0], 0, &opts).is_err());
    }

    #[test]
    fn test_non_convergence_is_error() {
        let opts = FitOptions {
            max_iter: 1,
            ..FitOptions::default()
        };
        let err = GaussianMixture::fit("yaw_rate", &two_clusters(), 2, &opts).unwrap_err();
        assert!(err.to_string().contains("did not converge"));
    }

    #[test]
    fn test_three_clusters_with_unequal_spread() {
        // Tight stopped cluster, slow traffic, wide cruising cluster
        let mut rng = StdRng::seed_from_u64(2024);
        let mut data = normal(&mut rng, 0.05, 0.05, 800);
        data.extend(normal(&mut rng, 4.0, 1.0, 600));
        data.extend(normal(&mut rng, 14.0, 2.0, 1200));
        let data: Vec<f64> = data.into_iter().map(f64::abs).collect();

        let gmm = GaussianMixture::fit("speed", &data, 3, &FitOptions::default()).unwrap();
        let means = gmm.means();
        assert!(means[0] < 0.2, "means {:?}", means);
        assert!((means[1] - 4.0).abs() < 0.3, "means {:?}", means);
        assert!((means[2] - 14.0).abs() < 0.3, "means {:?}", means);

        // A single start can settle in a worse optimum, never a better one
        let single = FitOptions {
            n_init: 1,
            ..FitOptions::default()
        };
        let one = GaussianMixture::fit("speed", &data, 3, &single).unwrap();
        assert!(gmm.mean_log_likelihood() >= one.mean_log_likelihood());
    }

    #[test]
    fn test_zero_restarts_rejected() {
        let opts = FitOptions {
            n_init: 0,
            ..FitOptions::default()
        };
        assert!(GaussianMixture::fit("speed", &two_clusters(), 2, &opts).is_err());
    }

    #[test]
    fn test_overflowing_range_is_error() {
        let data = [0.0, 1.0, 2.0, 1e160, 2e160, 3e160];
        match GaussianMixture::fit("speed", &data, 2, &FitOptions::default()) {
            Err(ScenarioError::Calibration { signal, reason }) => {
                assert_eq!(signal, "speed");
                assert!(reason.contains("too wide"), "{}", reason);
            }
            other => panic!("expected calibration error, got {:?}", other),
        }
    }

    #[test]
    fn test_density_integrates_to_one() {
        let gmm = GaussianMixture::fit("speed", &two_clusters(), 2, &FitOptions::default()).unwrap();
        let (lo, hi, steps) = (-5.0, 20.0, 50_000);
        let dx = (hi - lo) / steps as f64;
        let area: f64 = (0..steps).map(|i| gmm.density(lo + (i as f64 + 0.5) * dx) * dx).sum();
        assert!((area - 1.0).abs() < 1e-3, "area {}", area);
    }
}
