//! # hti-viz
//!
//! Plot-friendly artifacts for hypothesis-test inversion.
//!
//! The crate renders nothing itself: it emits JSON-ready structures (flat
//! arrays instead of nested objects) that a plotting front end consumes.

#![warn(missing_docs)]
#![warn(clippy::all)]

/// p-value curve artifacts (observed and expected bands).
pub mod cls;

/// Test-statistic distribution artifacts (per scan point).
pub mod teststat;

pub use cls::{PValueCurveArtifact, PValueCurvePoint};
pub use teststat::{Histogram, TestStatDistributionArtifact};
