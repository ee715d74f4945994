//! Expected-limit rebuilding from background-only pseudo-experiments.
//!
//! Each trial draws one background-only data set, scans it with the observed
//! scan configuration and records the one-sided upper limit. Trials are
//! independent: trial `i` is seeded with `seed + i`, so the distribution does
//! not depend on the number of worker threads.

use crate::config::{FailurePolicy, RebuildConfig, ScanConfig};
use crate::limits::extract_limits;
use crate::scan::scan;
use crate::stats::{normal_cdf, quantile_sorted, sorted_finite};
use hti_core::{DataSampler, Error, ExpectedBand, PointEvaluator, Result};
use rayon::prelude::*;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Sorted upper limits of the valid trials, with trial bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExpectedLimitDistribution {
    limits: Vec<f64>,
    n_trials: usize,
    n_failed: usize,
    n_invalid: usize,
    n_cancelled: usize,
}

impl ExpectedLimitDistribution {
    /// Distribution over a set of limits (non-finite values are dropped).
    pub fn from_limits(limits: impl IntoIterator<Item = f64>) -> Result<Self> {
        let limits = sorted_finite(limits);
        if limits.is_empty() {
            return Err(Error::Computation("no valid limits".to_string()));
        }
        let n_trials = limits.len();
        Ok(Self { limits, n_trials, n_failed: 0, n_invalid: 0, n_cancelled: 0 })
    }

    /// Limits, ascending.
    pub fn limits(&self) -> &[f64] {
        &self.limits
    }

    /// Number of recorded limits.
    pub fn len(&self) -> usize {
        self.limits.len()
    }

    /// Always false for a constructed distribution.
    pub fn is_empty(&self) -> bool {
        self.limits.is_empty()
    }

    /// Trials requested.
    pub fn n_trials(&self) -> usize {
        self.n_trials
    }

    /// Trials that failed and were discarded.
    pub fn n_failed(&self) -> usize {
        self.n_failed
    }

    /// Trials whose scan did not bracket the crossing.
    pub fn n_invalid(&self) -> usize {
        self.n_invalid
    }

    /// Trials never started because of the timeout.
    pub fn n_cancelled(&self) -> usize {
        self.n_cancelled
    }

    /// Empirical quantile with linear-interpolated rank (`idx = q * (n - 1)`).
    pub fn quantile(&self, q: f64) -> Result<f64> {
        if !(0.0..=1.0).contains(&q) {
            return Err(Error::InvalidConfig(format!("quantile must be in [0,1], got {q}")));
        }
        Ok(quantile_sorted(&self.limits, q))
    }

    /// Median expected limit.
    pub fn median(&self) -> Result<f64> {
        self.quantile(0.5)
    }

    /// Median with ±1σ and ±2σ bands at the normal quantiles.
    pub fn band(&self) -> Result<ExpectedBand> {
        Ok(ExpectedBand {
            minus2: self.quantile(normal_cdf(-2.0))?,
            minus1: self.quantile(normal_cdf(-1.0))?,
            median: self.quantile(0.5)?,
            plus1: self.quantile(normal_cdf(1.0))?,
            plus2: self.quantile(normal_cdf(2.0))?,
        })
    }
}

enum TrialOutcome {
    Limit(f64),
    Invalid,
    Failed(Error),
    Cancelled,
}

/// Rebuild the expected upper-limit distribution.
///
/// `scan_config` must not need a best-fit estimate: pass the observed scan's
/// resolved window. Under [`FailurePolicy::Abort`] the first failing trial (by
/// index) is returned as [`Error::TrialFailed`] and no further trials start.
pub fn rebuild<E, S>(
    evaluator: &E,
    sampler: &S,
    scan_config: &ScanConfig,
    config: &RebuildConfig,
) -> Result<ExpectedLimitDistribution>
where
    E: PointEvaluator,
    S: DataSampler<Data = E::Data>,
{
    config.validate()?;
    scan_config.validate()?;
    if scan_config.requires_best_fit() {
        return Err(Error::InvalidConfig(
            "rebuild needs an explicit scan window (resolve it on the observed data first)"
                .to_string(),
        ));
    }

    let start = Instant::now();
    let deadline = config
        .timeout_secs
        .and_then(|s| Duration::try_from_secs_f64(s).ok())
        .and_then(|d| start.checked_add(d));
    let stop = AtomicBool::new(false);

    let run_trial = |trial: usize| -> TrialOutcome {
        if stop.load(Ordering::Relaxed) || deadline.is_some_and(|d| Instant::now() >= d) {
            return TrialOutcome::Cancelled;
        }
        let seed = config.seed.wrapping_add(trial as u64);
        let upper = sampler
            .sample(seed)
            .and_then(|data| scan(evaluator, &data, scan_config, None))
            .and_then(|result| extract_limits(&result, scan_config.confidence_level, false))
            .map(|interval| interval.upper);
        match upper {
            Ok(limit) if limit.is_valid => TrialOutcome::Limit(limit.value),
            Ok(_) => TrialOutcome::Invalid,
            Err(e) => {
                if config.failure_policy == FailurePolicy::Abort {
                    stop.store(true, Ordering::Relaxed);
                }
                TrialOutcome::Failed(e)
            }
        }
    };

    let run_all = || -> Vec<TrialOutcome> { (0..config.trials).into_par_iter().map(&run_trial).collect() };
    let outcomes = if config.threads > 0 {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.threads)
            .build()
            .map_err(|e| Error::Computation(format!("failed to create thread pool: {e}")))?;
        pool.install(run_all)
    } else {
        run_all()
    };

    let mut limits = Vec::with_capacity(outcomes.len());
    let (mut n_failed, mut n_invalid, mut n_cancelled) = (0usize, 0usize, 0usize);
    for (trial, outcome) in outcomes.into_iter().enumerate() {
        match outcome {
            TrialOutcome::Limit(v) => limits.push(v),
            TrialOutcome::Invalid => n_invalid += 1,
            TrialOutcome::Cancelled => n_cancelled += 1,
            TrialOutcome::Failed(e) => match config.failure_policy {
                FailurePolicy::Abort => {
                    return Err(Error::TrialFailed { trial, source: Box::new(e) });
                }
                FailurePolicy::Skip => {
                    log::warn!("rebuild trial {trial} discarded: {e}");
                    n_failed += 1;
                }
            },
        }
    }

    log::info!(
        "rebuild: {} valid limits from {} trials (failed={n_failed} invalid={n_invalid} cancelled={n_cancelled}) in {:.2}s",
        limits.len(),
        config.trials,
        start.elapsed().as_secs_f64()
    );
    if n_cancelled > 0 {
        log::warn!("rebuild timed out: {n_cancelled} trials not started");
    }

    let limits = sorted_finite(limits);
    if limits.is_empty() {
        return Err(Error::Computation(format!(
            "no valid limit in {} trials (failed={n_failed} invalid={n_invalid} cancelled={n_cancelled})",
            config.trials
        )));
    }
    Ok(ExpectedLimitDistribution { limits, n_trials: config.trials, n_failed, n_invalid, n_cancelled })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use hti_core::PointTest;

    /// CLs+b falls linearly from 1 at 0 to 0 at `data`.
    struct Linear;

    impl PointEvaluator for Linear {
        type Data = f64;

        fn evaluate(&self, poi: f64, end: &f64) -> Result<PointTest> {
            Ok(PointTest::new((1.0 - poi / end).clamp(0.0, 1.0), 1.0))
        }

        fn poi_bounds(&self) -> (f64, f64) {
            (0.0, 10.0)
        }

        fn name(&self) -> &str {
            "Linear"
        }
    }

    /// End point `5 + seed % 10`; fails for seeds divisible by `fail_every`.
    struct Sampler {
        fail_every: Option<u64>,
        end: Option<f64>,
    }

    impl DataSampler for Sampler {
        type Data = f64;

        fn sample(&self, seed: u64) -> Result<f64> {
            if let Some(k) = self.fail_every {
                if seed % k == 0 {
                    return Err(Error::Computation(format!("sampler failed for seed {seed}")));
                }
            }
            Ok(self.end.unwrap_or(5.0 + (seed % 10) as f64))
        }
    }

    fn grid() -> ScanConfig {
        ScanConfig::fixed(41, 0.0, 20.0).with_cls(false)
    }

    #[test]
    fn quantiles_use_linear_rank() {
        let d = ExpectedLimitDistribution::from_limits((1..=100).map(f64::from)).unwrap();
        assert_relative_eq!(d.median().unwrap(), 50.5, epsilon = 1e-12);
        assert_relative_eq!(d.quantile(0.16).unwrap(), 16.84, epsilon = 1e-9);
        assert_relative_eq!(d.quantile(0.84).unwrap(), 84.16, epsilon = 1e-9);
        assert!(matches!(d.quantile(1.5), Err(Error::InvalidConfig(_))));
        let band = d.band().unwrap();
        assert!(band.minus2 < band.minus1 && band.minus1 < band.median);
        assert!(band.median < band.plus1 && band.plus1 < band.plus2);
        assert!(ExpectedLimitDistribution::from_limits(Vec::new()).is_err());
    }

    #[test]
    fn rejects_bad_configs() {
        let s = Sampler { fail_every: None, end: None };
        let zero = RebuildConfig { trials: 0, ..RebuildConfig::default() };
        assert!(matches!(rebuild(&Linear, &s, &grid(), &zero), Err(Error::InvalidConfig(_))));

        let inverted = ScanConfig::fixed(5, 1.0, 0.0);
        let cfg = RebuildConfig { trials: 3, ..RebuildConfig::default() };
        assert!(matches!(rebuild(&Linear, &s, &inverted, &cfg), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn distribution_is_independent_of_thread_count() {
        let s = Sampler { fail_every: None, end: None };
        let one = RebuildConfig { trials: 20, seed: 0, threads: 1, ..RebuildConfig::default() };
        let four = RebuildConfig { threads: 4, ..one.clone() };
        let a = rebuild(&Linear, &s, &grid(), &one).unwrap();
        let b = rebuild(&Linear, &s, &grid(), &four).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 20);
        // Limit of trial with end point e is 0.95 e.
        assert_relative_eq!(a.limits()[0], 0.95 * 5.0, epsilon = 1e-9);
        assert_relative_eq!(a.limits()[19], 0.95 * 14.0, epsilon = 1e-9);
    }

    #[test]
    fn skip_policy_counts_failed_trials() {
        let s = Sampler { fail_every: Some(3), end: None };
        let cfg = RebuildConfig { trials: 9, seed: 0, ..RebuildConfig::default() };
        let d = rebuild(&Linear, &s, &grid(), &cfg).unwrap();
        assert_eq!(d.n_failed(), 3);
        assert_eq!(d.len(), 6);
        assert_eq!(d.n_trials(), 9);
    }

    #[test]
    fn abort_policy_reports_first_failing_trial() {
        let s = Sampler { fail_every: Some(3), end: None };
        let cfg = RebuildConfig {
            trials: 9,
            seed: 1,
            threads: 1,
            failure_policy: FailurePolicy::Abort,
            ..RebuildConfig::default()
        };
        match rebuild(&Linear, &s, &grid(), &cfg) {
            Err(Error::TrialFailed { trial, .. }) => assert_eq!(trial, 2),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn invalid_limits_are_counted_not_recorded() {
        // End point beyond the grid: p never reaches alpha.
        let s = Sampler { fail_every: None, end: Some(1000.0) };
        let cfg = RebuildConfig { trials: 4, ..RebuildConfig::default() };
        match rebuild(&Linear, &s, &grid(), &cfg) {
            Err(Error::Computation(msg)) => assert!(msg.contains("invalid=4"), "msg={msg}"),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn timeout_cancels_pending_trials() {
        let s = Sampler { fail_every: None, end: None };
        let cfg = RebuildConfig { trials: 8, timeout_secs: Some(1e-9), ..RebuildConfig::default() };
        match rebuild(&Linear, &s, &grid(), &cfg) {
            Err(Error::Computation(msg)) => assert!(msg.contains("cancelled=8"), "msg={msg}"),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }
}
