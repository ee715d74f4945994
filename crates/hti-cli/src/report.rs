//! Text summary, JSON snapshot and plot artifacts of an upper-limit run.

use anyhow::Result;
use hti_core::{ExpectedBand, Interval, PoiEstimate, ScanResult};
use hti_inference::{ExpectedLimitDistribution, Strategy};
use hti_viz::{PValueCurveArtifact, TestStatDistributionArtifact};
use serde::Serialize;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

/// Expected limits rebuilt from background-only trials.
#[derive(Debug, Clone, Serialize)]
pub struct RebuildSummary {
    pub band: ExpectedBand,
    pub distribution: ExpectedLimitDistribution,
}

/// Everything an upper-limit run produced.
#[derive(Debug, Clone, Serialize)]
pub struct LimitReport {
    pub tool: &'static str,
    pub version: &'static str,
    pub input: String,
    pub result_tag: String,
    pub strategy: Strategy,
    pub confidence_level: f64,
    pub two_sided: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub best_fit: Option<PoiEstimate>,
    pub interval: Interval,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_from_bands: Option<ExpectedBand>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rebuild: Option<RebuildSummary>,
    pub scan: ScanResult,
}

impl LimitReport {
    /// Human-readable summary, one fact per line.
    pub fn summary_text(&self) -> String {
        let mut s = String::new();
        let _ = writeln!(
            s,
            "{} scan with {} points in [{}, {}] ({})",
            self.strategy.calculator.name(),
            self.scan.len(),
            self.scan.window().0,
            self.scan.window().1,
            self.scan.mode().tag()
        );
        if let Some(fit) = &self.best_fit {
            let _ = writeln!(s, "best fit: {} +/- {}", fit.best_fit, fit.std_error);
        }
        if !self.scan.skipped().is_empty() {
            let _ = writeln!(s, "skipped points: {:?}", self.scan.skipped());
        }

        let cl = self.confidence_level;
        if self.two_sided {
            let lo = &self.interval.lower;
            if lo.is_valid {
                let _ = writeln!(s, "The computed lower limit is: {} +/- {}", lo.value, lo.error);
            } else {
                let _ = writeln!(s, "no lower limit found at CL {cl}");
            }
        }
        let up = &self.interval.upper;
        if up.is_valid {
            let _ = writeln!(s, "The computed upper limit is: {} +/- {}", up.value, up.error);
        } else {
            let _ = writeln!(
                s,
                "upper limit not bracketed at CL {cl}; scan boundary {} reported",
                up.value
            );
        }

        if let Some(band) = &self.expected_from_bands {
            let _ = writeln!(s, "Expected upper limits, using the B (alternate) model:");
            write_band(&mut s, band);
        }
        if let Some(rb) = &self.rebuild {
            let d = &rb.distribution;
            let _ = writeln!(
                s,
                "Expected upper limits from {} background-only trials ({} failed, {} invalid, {} cancelled):",
                d.n_trials(),
                d.n_failed(),
                d.n_invalid(),
                d.n_cancelled()
            );
            write_band(&mut s, &rb.band);
        }
        s
    }
}

fn write_band(s: &mut String, band: &ExpectedBand) {
    let _ = writeln!(s, " expected limit (median) {}", band.median);
    let _ = writeln!(s, " expected limit (-1 sig) {}", band.minus1);
    let _ = writeln!(s, " expected limit (+1 sig) {}", band.plus1);
    let _ = writeln!(s, " expected limit (-2 sig) {}", band.minus2);
    let _ = writeln!(s, " expected limit (+2 sig) {}", band.plus2);
}

/// `<result tag>_<input stem>.json` in the current directory.
pub fn default_result_path(result_tag: &str, input: &Path) -> PathBuf {
    let stem = input.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
    if stem.is_empty() {
        PathBuf::from(format!("{result_tag}.json"))
    } else {
        PathBuf::from(format!("{result_tag}_{stem}.json"))
    }
}

pub fn write_json_pretty<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    std::fs::write(path, serde_json::to_string_pretty(value)?)?;
    Ok(())
}

/// Write the p-value curve and, for toy-based scans, the per-point
/// test-statistic distributions. Returns the files written.
pub fn write_artifacts(
    dir: &Path,
    result: &ScanResult,
    two_sided: bool,
    n_bins: usize,
) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(dir)?;
    let mut written = Vec::new();

    let curve = PValueCurveArtifact::from_scan(result, two_sided)?;
    let path = dir.join("pvalue_curve.json");
    write_json_pretty(&path, &curve)?;
    written.push(path);

    for (i, dist) in TestStatDistributionArtifact::from_scan(result, n_bins).iter().enumerate() {
        let path = dir.join(format!("teststat_{i:03}.json"));
        write_json_pretty(&path, dist)?;
        written.push(path);
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hti_core::{LimitEstimate, PointTest, ScanMode, ScanPoint};

    fn report(two_sided: bool, with_samples: bool) -> LimitReport {
        let points = [0.0, 1.0, 2.0]
            .iter()
            .map(|&x| {
                let mut t = PointTest::new(0.3 - 0.12 * x, 1.0);
                if with_samples {
                    t = t.with_distributions(vec![0.0, 1.0, 2.0], vec![0.5, 3.0]);
                }
                ScanPoint::new(x, t)
            })
            .collect();
        let scan = ScanResult::new(points, 0.95, true, ScanMode::Fixed, (0.0, 2.0), vec![]).unwrap();
        LimitReport {
            tool: "hti",
            version: "test",
            input: "cfg.yaml".to_string(),
            result_tag: "Asym_CLs_grid_ts3".to_string(),
            strategy: Strategy::from_codes(2, 3, 0).unwrap(),
            confidence_level: 0.95,
            two_sided,
            best_fit: None,
            interval: Interval {
                lower: LimitEstimate::invalid(0.0),
                upper: LimitEstimate::valid(2.0833, 0.01),
            },
            expected_from_bands: None,
            rebuild: None,
            scan,
        }
    }

    #[test]
    fn summary_mentions_limits() {
        let text = report(false, false).summary_text();
        assert!(text.contains("The computed upper limit is: 2.0833 +/- 0.01"));
        assert!(text.contains("3 points"));
        assert!(!text.contains("lower limit"));

        let text = report(true, false).summary_text();
        assert!(text.contains("no lower limit found"));
    }

    #[test]
    fn default_path_uses_tag_and_stem() {
        let p = default_result_path("Freq_CLs_grid_ts3", Path::new("/tmp/analysis.yaml"));
        assert_eq!(p, PathBuf::from("Freq_CLs_grid_ts3_analysis.json"));
    }

    #[test]
    fn artifacts_skip_distributions_without_samples() {
        let dir = std::env::temp_dir().join(format!("hti_report_{}", std::process::id()));
        let files = write_artifacts(&dir, &report(false, false).scan, false, 10).unwrap();
        assert_eq!(files.len(), 1);

        let dir2 = dir.join("toys");
        let files = write_artifacts(&dir2, &report(false, true).scan, false, 10).unwrap();
        assert_eq!(files.len(), 4);
        assert!(files[3].ends_with("teststat_002.json"));
        let _ = std::fs::remove_dir_all(&dir);
    }
}
