//! Poisson pseudo-data generation for binned counts.
//!
//! Sampling is deterministic: one seed gives one data set, independent of the
//! thread that draws it.

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, LogNormal, Poisson};

/// Draw one Poisson observation per bin around `expected`.
///
/// Non-positive or non-finite expectations yield 0 (Poisson(0) is
/// deterministically 0).
pub fn poisson_from_expected(expected: &[f64], seed: u64) -> Vec<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    sample_bins(expected, &mut rng)
}

/// Like [`poisson_from_expected`], with the background scaled by one lognormal
/// factor of relative width `rel_uncertainty` per data set.
///
/// `expected = mu * signal + factor * background`.
pub fn poisson_with_smeared_background(
    signal: &[f64],
    background: &[f64],
    mu: f64,
    rel_uncertainty: f64,
    seed: u64,
) -> Vec<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    let factor = lognormal_factor(rel_uncertainty, &mut rng);
    let expected: Vec<f64> =
        signal.iter().zip(background).map(|(&s, &b)| mu * s + factor * b).collect();
    sample_bins(&expected, &mut rng)
}

/// Deterministic Asimov data: the expectations themselves.
pub fn asimov(signal: &[f64], background: &[f64], mu: f64) -> Vec<f64> {
    signal.iter().zip(background).map(|(&s, &b)| mu * s + b).collect()
}

fn sample_bins(expected: &[f64], rng: &mut StdRng) -> Vec<f64> {
    expected
        .iter()
        .map(|&lam| {
            if !lam.is_finite() || lam <= 0.0 {
                return 0.0;
            }
            match Poisson::new(lam) {
                Ok(pois) => pois.sample(rng),
                Err(_) => 0.0,
            }
        })
        .collect()
}

// Unit-median lognormal: sigma = sqrt(ln(1 + r^2)).
fn lognormal_factor(rel_uncertainty: f64, rng: &mut StdRng) -> f64 {
    if !(rel_uncertainty.is_finite() && rel_uncertainty > 0.0) {
        return 1.0;
    }
    let sigma = (1.0 + rel_uncertainty * rel_uncertainty).ln().sqrt();
    match LogNormal::new(0.0, sigma) {
        Ok(d) => d.sample(rng),
        Err(_) => 1.0,
    }
}
