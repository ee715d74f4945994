//! # hti-inference
//!
//! Hypothesis-test inversion on top of the `hti-core` collaborator traits.
//!
//! This crate provides:
//! - the scan driver (fixed grid and automatic bisection)
//! - limit extraction by crossing interpolation
//! - the expected-limit rebuilder (background-only trials on a worker pool)
//! - calculator / test-statistic strategies
//! - a binned counting experiment implementing every collaborator trait
//!
//! ## Architecture
//!
//! The driver, extractor and rebuilder depend only on `PointEvaluator`,
//! `InitialFit` and `DataSampler`. The counting experiment is one
//! implementation among others.

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Scan and rebuild configuration records.
pub mod config;
/// Binned counting experiment (evaluator, initial fit, background sampler).
pub mod counting;
/// Limit extraction from a scan.
pub mod limits;
/// Expected-limit rebuilding from background-only trials.
pub mod rebuild;
/// Scan driver.
pub mod scan;
/// Small numerical helpers (normal CDF, tail probabilities, quantiles).
pub mod stats;
/// Calculator and test-statistic strategies.
pub mod strategy;
/// Poisson toy generation.
pub mod toys;

pub use config::{FailurePolicy, RebuildConfig, ScanConfig};
pub use counting::{BackgroundOnlySampler, CountingData, CountingExperiment};
pub use limits::{expected_limits_from_bands, extract_limits};
pub use rebuild::{ExpectedLimitDistribution, rebuild};
pub use scan::{fixed_grid, resolve_window, scan, scan_with_fit};
pub use strategy::{CalculatorKind, InitialFitPolicy, Sidedness, Strategy, TestStatistic};
