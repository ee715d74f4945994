//! Binned counting experiment.
//!
//! `n_i ~ Poisson(mu * s_i + b_i)` with known signal and background yields.
//! The model has no nuisance parameters apart from an optional relative
//! background uncertainty, which only the hybrid calculator uses (as a
//! lognormal prior smearing the background of each toy).
//!
//! This is a self-contained implementation of every collaborator trait
//! (`PointEvaluator`, `InitialFit`, `DataSampler`) used by the CLI and by tests.
//!
//! Test statistics follow one convention: larger values are less compatible
//! with the signal+background hypothesis, so CLs+b and CLb are right-tail
//! probabilities of the toy ensembles.

use crate::stats::{binomial_error, normal_cdf, quantile_sorted, sorted_finite, tail_prob_sorted};
use crate::strategy::{CalculatorKind, Sidedness, Strategy, TestStatistic};
use crate::toys;
use hti_core::{
    DataSampler, Error, InitialFit, NSIGMA_ORDER, PoiEstimate, PointEvaluator, PointTest, Result,
    safe_cls,
};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Seed offset separating the s+b ensemble from the b-only ensemble.
const SEED_OFFSET_NULL: u64 = 1_000_000_000;
const MLE_MAX_ITER: usize = 200;
const MLE_RTOL: f64 = 1e-12;

/// Observed (or pseudo-) counts, one per bin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CountingData {
    /// Counts per bin.
    pub observed: Vec<f64>,
}

impl CountingData {
    /// Wrap per-bin counts.
    pub fn new(observed: Vec<f64>) -> Self {
        Self { observed }
    }

    /// Total number of events.
    pub fn total(&self) -> f64 {
        self.observed.iter().sum()
    }
}

/// Counting experiment with a signal strength `mu` as parameter of interest.
#[derive(Debug, Clone)]
pub struct CountingExperiment {
    signal: Vec<f64>,
    background: Vec<f64>,
    poi_bounds: (f64, f64),
    background_rel_uncertainty: Option<f64>,
    strategy: Strategy,
    seed: u64,
    keep_distributions: bool,
}

impl CountingExperiment {
    /// Build an experiment from per-bin signal and background yields.
    ///
    /// Yields must be finite, signal non-negative with a positive total,
    /// background strictly positive. The POI range defaults to `[0, 10]`.
    pub fn new(signal: Vec<f64>, background: Vec<f64>, strategy: Strategy) -> Result<Self> {
        if signal.is_empty() {
            return Err(Error::InvalidConfig("counting model needs at least one bin".to_string()));
        }
        if signal.len() != background.len() {
            return Err(Error::InvalidConfig(format!(
                "signal/background length mismatch: {} vs {}",
                signal.len(),
                background.len()
            )));
        }
        if let Some(s) = signal.iter().find(|s| !(s.is_finite() && **s >= 0.0)) {
            return Err(Error::InvalidConfig(format!("signal yields must be >= 0, got {s}")));
        }
        if let Some(b) = background.iter().find(|b| !(b.is_finite() && **b > 0.0)) {
            return Err(Error::InvalidConfig(format!("background yields must be > 0, got {b}")));
        }
        if signal.iter().sum::<f64>() <= 0.0 {
            return Err(Error::InvalidConfig("total signal yield must be > 0".to_string()));
        }
        Ok(Self {
            signal,
            background,
            poi_bounds: (0.0, 10.0),
            background_rel_uncertainty: None,
            strategy,
            seed: 0,
            keep_distributions: true,
        })
    }

    /// Restrict the POI to `[lo, hi]` (`0 <= lo < hi`).
    pub fn with_poi_bounds(mut self, lo: f64, hi: f64) -> Result<Self> {
        if !(lo.is_finite() && hi.is_finite() && lo >= 0.0 && hi > lo) {
            return Err(Error::InvalidConfig(format!("invalid POI bounds [{lo}, {hi}]")));
        }
        self.poi_bounds = (lo, hi);
        Ok(self)
    }

    /// Relative background uncertainty used by the hybrid calculator.
    pub fn with_background_uncertainty(mut self, rel: f64) -> Result<Self> {
        if !(rel.is_finite() && rel >= 0.0) {
            return Err(Error::InvalidConfig(format!(
                "background uncertainty must be >= 0, got {rel}"
            )));
        }
        self.background_rel_uncertainty = Some(rel);
        Ok(self)
    }

    /// Base seed of the toy ensembles.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Keep (or drop) the toy test-statistic samples in each [`PointTest`].
    pub fn with_distributions(mut self, keep: bool) -> Self {
        self.keep_distributions = keep;
        self
    }

    /// Signal yields.
    pub fn signal(&self) -> &[f64] {
        &self.signal
    }

    /// Background yields.
    pub fn background(&self) -> &[f64] {
        &self.background
    }

    /// Resolved strategy.
    pub fn strategy(&self) -> &Strategy {
        &self.strategy
    }

    /// Sampler of background-only pseudo-data for this model.
    pub fn background_sampler(&self) -> BackgroundOnlySampler {
        BackgroundOnlySampler { background: self.background.clone() }
    }

    fn check_data(&self, data: &CountingData) -> std::result::Result<(), String> {
        if data.observed.len() != self.signal.len() {
            return Err(format!(
                "expected {} bins, got {}",
                self.signal.len(),
                data.observed.len()
            ));
        }
        if let Some(n) = data.observed.iter().find(|n| !(n.is_finite() && **n >= 0.0)) {
            return Err(format!("counts must be >= 0, got {n}"));
        }
        Ok(())
    }

    fn expected_counts(&self, mu: f64) -> Vec<f64> {
        toys::asimov(&self.signal, &self.background, mu)
    }

    /// Negative log-likelihood without the `ln n!` constant.
    fn nll(&self, mu: f64, n: &[f64]) -> f64 {
        let mut acc = 0.0;
        for ((&s, &b), &k) in self.signal.iter().zip(&self.background).zip(n) {
            let lam = mu * s + b;
            if lam <= 0.0 {
                return f64::INFINITY;
            }
            acc += lam - k * lam.ln();
        }
        acc
    }

    /// d nll / d mu; non-decreasing in mu.
    fn score(&self, mu: f64, n: &[f64]) -> f64 {
        self.signal
            .iter()
            .zip(&self.background)
            .zip(n)
            .map(|((&s, &b), &k)| s - k * s / (mu * s + b))
            .sum()
    }

    /// Bounded maximum-likelihood estimate of `mu`.
    fn mu_hat(&self, n: &[f64]) -> f64 {
        let (lo, hi) = self.poi_bounds;
        if self.score(lo, n) >= 0.0 {
            return lo;
        }
        if self.score(hi, n) <= 0.0 {
            return hi;
        }
        let (mut a, mut b) = (lo, hi);
        for _ in 0..MLE_MAX_ITER {
            let mid = 0.5 * (a + b);
            if self.score(mid, n) > 0.0 {
                b = mid;
            } else {
                a = mid;
            }
            if (b - a) <= MLE_RTOL * b.abs().max(1.0) {
                break;
            }
        }
        0.5 * (a + b)
    }

    /// Observed Fisher information, falling back to the expected one when the
    /// data carry no information (e.g. all counts zero).
    fn fisher_information(&self, mu: f64, n: &[f64]) -> f64 {
        let mut observed = 0.0;
        let mut expected = 0.0;
        for ((&s, &b), &k) in self.signal.iter().zip(&self.background).zip(n) {
            let lam = mu * s + b;
            observed += k * s * s / (lam * lam);
            expected += s * s / lam;
        }
        if observed > 0.0 { observed } else { expected }
    }

    fn profile_likelihood(&self, mu: f64, n: &[f64], sidedness: Sidedness) -> f64 {
        let mu_hat = self.mu_hat(n);
        let q = (2.0 * (self.nll(mu, n) - self.nll(mu_hat, n))).max(0.0);
        match sidedness {
            Sidedness::TwoSided => q,
            Sidedness::OneSided => {
                if mu_hat > mu {
                    0.0
                } else {
                    q
                }
            }
            Sidedness::Signed => {
                if mu_hat > mu {
                    -q
                } else {
                    q
                }
            }
        }
    }

    /// Test statistic at `mu` for counts `n`.
    ///
    /// Without nuisance parameters the Tevatron ratio of profiled likelihoods
    /// reduces to the simple likelihood ratio, with or without MLE subtraction.
    pub fn test_statistic(&self, mu: f64, n: &[f64]) -> f64 {
        match self.strategy.test_statistic {
            TestStatistic::Lep | TestStatistic::Tevatron { .. } => {
                2.0 * (self.nll(mu, n) - self.nll(0.0, n))
            }
            TestStatistic::ProfileLikelihood { sidedness } => {
                self.profile_likelihood(mu, n, sidedness)
            }
            TestStatistic::MaxLikelihoodEstimate => -self.mu_hat(n),
            TestStatistic::NumEvents => -n.iter().sum::<f64>(),
        }
    }

    /// Test statistic of `n_toys` toys generated at `mu_gen`, tested at `mu_test`.
    ///
    /// Returns the sorted finite values and the number of failed toys.
    fn ensemble(&self, mu_gen: f64, mu_test: f64, n_toys: usize, seed: u64) -> (Vec<f64>, usize) {
        let smear = match self.strategy.calculator {
            CalculatorKind::Hybrid { .. } => self.background_rel_uncertainty.unwrap_or(0.0),
            _ => 0.0,
        };
        let expected = self.expected_counts(mu_gen);

        let values: Vec<f64> = (0..n_toys)
            .into_par_iter()
            .with_min_len(16)
            .map(|toy_idx| {
                let toy_seed = seed.wrapping_add(toy_idx as u64);
                let toy = if smear > 0.0 {
                    toys::poisson_with_smeared_background(
                        &self.signal,
                        &self.background,
                        mu_gen,
                        smear,
                        toy_seed,
                    )
                } else {
                    toys::poisson_from_expected(&expected, toy_seed)
                };
                self.test_statistic(mu_test, &toy)
            })
            .collect();

        let n_error = values.iter().filter(|v| !v.is_finite()).count();
        (sorted_finite(values), n_error)
    }

    fn evaluate_toys(&self, mu: f64, data: &CountingData) -> Result<PointTest> {
        let t_obs = self.test_statistic(mu, &data.observed);
        if !t_obs.is_finite() {
            return Err(Error::EvaluationFailed {
                poi: mu,
                reason: format!("non-finite observed test statistic {t_obs}"),
            });
        }

        let (null, n_error_null) = self.ensemble(
            mu,
            mu,
            self.strategy.n_toys_null(),
            self.seed.wrapping_add(SEED_OFFSET_NULL),
        );
        let (alt, n_error_alt) = self.ensemble(0.0, mu, self.strategy.n_toys_alt(), self.seed);
        if n_error_null + n_error_alt > 0 {
            log::debug!(
                "mu={mu}: dropped {n_error_null} s+b toys and {n_error_alt} b-only toys with non-finite test statistic"
            );
        }
        if null.is_empty() || alt.is_empty() {
            return Err(Error::EvaluationFailed {
                poi: mu,
                reason: format!(
                    "all toys failed: sb_valid={} b_valid={}",
                    null.len(),
                    alt.len()
                ),
            });
        }

        let clsb = tail_prob_sorted(&null, t_obs);
        let clb = tail_prob_sorted(&alt, t_obs);
        let expected = expected_cls_from_ensembles(&null, &alt);

        let mut test = PointTest::new(clsb, clb)
            .with_errors(binomial_error(clsb, null.len()), binomial_error(clb, alt.len()))
            .with_test_statistic(t_obs)
            .with_expected_cls(expected);
        if self.keep_distributions {
            test = test.with_distributions(null, alt);
        }
        Ok(test)
    }

    fn evaluate_asymptotic(&self, mu: f64, data: &CountingData) -> Result<PointTest> {
        let sidedness = match self.strategy.test_statistic {
            TestStatistic::ProfileLikelihood { sidedness: Sidedness::OneSided } => Sidedness::OneSided,
            _ => Sidedness::TwoSided,
        };

        let q = self.profile_likelihood(mu, &data.observed, sidedness);
        // Background-only Asimov data.
        let asimov = self.expected_counts(0.0);
        let q_a = self.profile_likelihood(mu, &asimov, sidedness);
        if !(q.is_finite() && q_a.is_finite()) {
            return Err(Error::EvaluationFailed {
                poi: mu,
                reason: format!("non-finite asymptotic test statistic q={q} q_A={q_a}"),
            });
        }

        let sqrtq = q.sqrt();
        let sqrtq_a = q_a.sqrt();
        let (clsb, clb) = match sidedness {
            Sidedness::OneSided => {
                let teststat = if sqrtq <= sqrtq_a {
                    sqrtq - sqrtq_a
                } else {
                    (q - q_a) / (2.0 * sqrtq_a.max(1e-16))
                };
                (normal_cdf(-(teststat + sqrtq_a)), normal_cdf(-teststat))
            }
            _ => (
                2.0 * normal_cdf(-sqrtq),
                normal_cdf(sqrtq_a - sqrtq) + normal_cdf(-sqrtq - sqrtq_a),
            ),
        };

        Ok(PointTest::new(clsb.clamp(0.0, 1.0), clb.clamp(0.0, 1.0))
            .with_test_statistic(q)
            .with_expected_cls(expected_cls_band_from_sqrtq_a(sqrtq_a)))
    }
}

/// Expected CLs at [`NSIGMA_ORDER`] from the b-only ensemble: each b-only toy is
/// treated as observed data, and the CLs values are read off at the normal quantiles.
fn expected_cls_from_ensembles(null_sorted: &[f64], alt_sorted: &[f64]) -> [f64; 5] {
    let mut cls_vals: Vec<f64> = alt_sorted
        .iter()
        .map(|&t| safe_cls(tail_prob_sorted(null_sorted, t), tail_prob_sorted(alt_sorted, t)))
        .collect();
    cls_vals.sort_by(f64::total_cmp);

    let mut expected = [0.0; 5];
    for (i, t) in NSIGMA_ORDER.into_iter().enumerate() {
        expected[i] = quantile_sorted(&cls_vals, normal_cdf(-t));
    }
    expected
}

/// Expected CLs band for a given Asimov `sqrt(q_mu,A)`, ordered by [`NSIGMA_ORDER`].
pub fn expected_cls_band_from_sqrtq_a(sqrtq_a: f64) -> [f64; 5] {
    let mut out = [0.0; 5];
    for (i, t) in NSIGMA_ORDER.into_iter().enumerate() {
        let clsb = normal_cdf(-(t + sqrtq_a));
        let clb = normal_cdf(-t);
        out[i] = safe_cls(clsb, clb);
    }
    out
}

impl PointEvaluator for CountingExperiment {
    type Data = CountingData;

    fn evaluate(&self, poi: f64, data: &CountingData) -> Result<PointTest> {
        if !poi.is_finite() {
            return Err(Error::EvaluationFailed { poi, reason: "non-finite POI".to_string() });
        }
        self.check_data(data).map_err(|reason| Error::EvaluationFailed { poi, reason })?;
        match self.strategy.calculator {
            CalculatorKind::Frequentist { .. } | CalculatorKind::Hybrid { .. } => {
                self.evaluate_toys(poi, data)
            }
            CalculatorKind::Asymptotic { .. } => self.evaluate_asymptotic(poi, data),
        }
    }

    fn poi_bounds(&self) -> (f64, f64) {
        self.poi_bounds
    }

    fn name(&self) -> &str {
        self.strategy.calculator.name()
    }
}

impl InitialFit for CountingExperiment {
    type Data = CountingData;

    fn fit(&self, data: &CountingData) -> Result<PoiEstimate> {
        self.check_data(data).map_err(Error::FitFailed)?;
        let best_fit = self.mu_hat(&data.observed);
        let info = self.fisher_information(best_fit, &data.observed);
        if !(info.is_finite() && info > 0.0) {
            return Err(Error::FitFailed(format!("singular Fisher information at mu={best_fit}")));
        }
        Ok(PoiEstimate { best_fit, std_error: 1.0 / info.sqrt() })
    }
}

/// Poisson pseudo-data around the background expectation.
#[derive(Debug, Clone)]
pub struct BackgroundOnlySampler {
    background: Vec<f64>,
}

impl DataSampler for BackgroundOnlySampler {
    type Data = CountingData;

    fn sample(&self, seed: u64) -> Result<CountingData> {
        Ok(CountingData::new(toys::poisson_from_expected(&self.background, seed)))
    }
}
