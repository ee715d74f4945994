//! Collaborator traits for hypothesis-test inversion
//!
//! The scan driver and the rebuilder only see these traits: the statistical
//! model behind them (likelihoods, toy generation, fits) is opaque. All traits
//! are `Send + Sync` so one evaluator can be shared read-only by a worker pool.

use crate::Result;
use crate::types::{PoiEstimate, PointTest};

/// Hypothesis test at a single value of the parameter of interest.
pub trait PointEvaluator: Send + Sync {
    /// Data set the test runs against (observed or pseudo-data).
    type Data: Send + Sync;

    /// Test the hypothesis `poi` against `data`.
    fn evaluate(&self, poi: f64, data: &Self::Data) -> Result<PointTest>;

    /// Natural range of the parameter of interest (min, max).
    fn poi_bounds(&self) -> (f64, f64);

    /// Evaluator name (e.g., "Frequentist", "Asymptotic")
    fn name(&self) -> &str;
}

/// Unconditional fit producing a best-fit POI estimate.
pub trait InitialFit: Send + Sync {
    /// Data set the fit runs against.
    type Data: Send + Sync;

    /// Fit `data`; fails with [`crate::Error::FitFailed`].
    fn fit(&self, data: &Self::Data) -> Result<PoiEstimate>;
}

/// Generator of background-only pseudo-data.
pub trait DataSampler: Send + Sync {
    /// Generated data set type.
    type Data: Send + Sync;

    /// Draw one pseudo-data set. Sampling is deterministic for a given `seed`.
    fn sample(&self, seed: u64) -> Result<Self::Data>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    struct FlatEvaluator;

    impl PointEvaluator for FlatEvaluator {
        type Data = ();

        fn evaluate(&self, poi: f64, _data: &()) -> Result<PointTest> {
            if poi < 0.0 {
                return Err(Error::EvaluationFailed {
                    poi,
                    reason: "negative".to_string(),
                });
            }
            Ok(PointTest::new(0.5, 1.0))
        }

        fn poi_bounds(&self) -> (f64, f64) {
            (0.0, 1.0)
        }

        fn name(&self) -> &str {
            "Flat"
        }
    }

    #[test]
    fn test_flat_evaluator() {
        let ev = FlatEvaluator;
        assert_eq!(ev.name(), "Flat");
        assert_eq!(ev.evaluate(0.3, &()).unwrap().null_p_value, 0.5);
        assert!(ev.evaluate(-1.0, &()).is_err());
    }
}
