//! Test-statistic distributions at each scan point (toy-based calculators only).

use hti_core::{ScanPoint, ScanResult};
use serde::{Deserialize, Serialize};

/// Fixed-width histogram.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Histogram {
    /// `counts.len() + 1` bin edges, ascending.
    pub bin_edges: Vec<f64>,
    /// Entries per bin.
    pub counts: Vec<f64>,
}

impl Histogram {
    fn fill(samples: &[f64], lo: f64, hi: f64, n_bins: usize) -> Self {
        let width = (hi - lo) / n_bins as f64;
        let bin_edges = (0..=n_bins).map(|i| lo + width * i as f64).collect();
        let mut counts = vec![0.0; n_bins];
        for &v in samples.iter().filter(|v| v.is_finite()) {
            let idx = (((v - lo) / width) as usize).min(n_bins - 1);
            counts[idx] += 1.0;
        }
        Self { bin_edges, counts }
    }

    /// Total number of entries.
    pub fn entries(&self) -> f64 {
        self.counts.iter().sum()
    }
}

/// Toy distributions of the test statistic under both hypotheses at one POI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestStatDistributionArtifact {
    /// Tested POI value.
    pub mu: f64,
    /// Observed test statistic.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed: Option<f64>,
    /// Signal+background (null) toys.
    pub null: Histogram,
    /// Background-only (alternate) toys.
    pub alt: Histogram,
    /// Draw with a logarithmic y axis.
    pub log_y: bool,
}

impl TestStatDistributionArtifact {
    /// Histogram the toy samples of one scan point; `None` without samples.
    pub fn from_point(point: &ScanPoint, n_bins: usize) -> Option<Self> {
        let test = &point.test;
        if test.null_distribution.is_empty() && test.alt_distribution.is_empty() {
            return None;
        }
        let n_bins = n_bins.max(1);

        let finite = test
            .null_distribution
            .iter()
            .chain(&test.alt_distribution)
            .chain(test.test_statistic.as_ref())
            .copied()
            .filter(|v| v.is_finite());
        let (mut lo, mut hi) = finite.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
            (lo.min(v), hi.max(v))
        });
        if !(lo.is_finite() && hi.is_finite()) {
            return None;
        }
        if hi <= lo {
            lo -= 0.5;
            hi += 0.5;
        }

        Some(Self {
            mu: point.poi,
            observed: test.test_statistic,
            null: Histogram::fill(&test.null_distribution, lo, hi, n_bins),
            alt: Histogram::fill(&test.alt_distribution, lo, hi, n_bins),
            log_y: true,
        })
    }

    /// One artifact per scan point that carries toy samples.
    pub fn from_scan(result: &ScanResult, n_bins: usize) -> Vec<Self> {
        result.points().iter().filter_map(|p| Self::from_point(p, n_bins)).collect()
    }
}
