//! Error types for hypothesis-test inversion

use thiserror::Error;

/// Workspace error type
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Malformed scan bounds, point counts, trial counts or strategy codes.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The evaluator could not produce a result at a scan point.
    #[error("Evaluation failed at poi={poi}: {reason}")]
    EvaluationFailed {
        /// Scanned POI value.
        poi: f64,
        /// Evaluator message.
        reason: String,
    },

    /// Initial best-fit estimate unavailable.
    #[error("Initial fit failed: {0}")]
    FitFailed(String),

    /// A rebuild trial failed (only surfaced under the abort policy).
    #[error("Rebuild trial {trial} failed: {source}")]
    TrialFailed {
        /// Trial index.
        trial: usize,
        /// Underlying failure.
        #[source]
        source: Box<Error>,
    },

    /// Computation error
    #[error("Computation error: {0}")]
    Computation(String),
}

impl Error {
    /// Wrap an arbitrary failure as an evaluation failure at `poi`.
    ///
    /// Evaluation failures that already carry a POI are returned unchanged.
    pub fn at_point(self, poi: f64) -> Self {
        match self {
            e @ Error::EvaluationFailed { .. } => e,
            other => Error::EvaluationFailed { poi, reason: other.to_string() },
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn at_point_wraps_foreign_errors() {
        let e = Error::Computation("fit diverged".to_string()).at_point(2.5);
        match e {
            Error::EvaluationFailed { poi, reason } => {
                assert_eq!(poi, 2.5);
                assert!(reason.contains("fit diverged"), "reason={reason}");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn at_point_keeps_existing_point() {
        let e = Error::EvaluationFailed { poi: 1.0, reason: "bad".to_string() }.at_point(7.0);
        assert!(matches!(e, Error::EvaluationFailed { poi, .. } if poi == 1.0));
    }

    #[test]
    fn trial_failure_displays_source() {
        let e = Error::TrialFailed {
            trial: 3,
            source: Box::new(Error::InvalidConfig("points must be >= 1".to_string())),
        };
        let msg = e.to_string();
        assert!(msg.contains("trial 3"), "msg={msg}");
        assert!(msg.contains("points must be >= 1"), "msg={msg}");
    }
}
