//! # hti-core
//!
//! Core types for hypothesis-test inversion.
//!
//! This crate defines:
//! - the error type shared by every crate in the workspace
//! - the collaborator traits (point evaluator, initial fit, data sampler)
//! - the plain records produced by a scan (points, results, limits)
//!
//! Inference logic (`hti-inference`) depends on the traits here, never on a
//! concrete statistical model.

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Error types.
pub mod error;
/// Collaborator traits.
pub mod traits;
/// Scan records and limit estimates.
pub mod types;

pub use error::{Error, Result};
pub use traits::{DataSampler, InitialFit, PointEvaluator};
pub use types::{
    ExpectedBand, Interval, LimitEstimate, NSIGMA_ORDER, PoiEstimate, PointTest, ScanMode,
    ScanPoint, ScanResult, safe_cls,
};

/// Workspace version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
