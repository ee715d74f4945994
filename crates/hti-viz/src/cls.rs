use hti_core::{ExpectedBand, Interval, NSIGMA_ORDER, Result, ScanResult};
use hti_inference::{expected_limits_from_bands, extract_limits};
use serde::{Deserialize, Serialize};

/// Single point in a p-value curve artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PValueCurvePoint {
    /// Tested POI value.
    pub mu: f64,
    /// Observed CLs+b.
    pub clsb: f64,
    /// Observed CLb.
    pub clb: f64,
    /// Observed CLs.
    pub cls: f64,
    /// Expected CLs at `nsigma_order=[2,1,0,-1,-2]`, when the evaluator reports it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected: Option<[f64; 5]>,
}

/// Plot-friendly artifact for the inverted p-value curve and its Brazil band.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PValueCurveArtifact {
    /// Threshold `1 - confidence_level`.
    pub alpha: f64,
    /// Whether the limits invert CLs (otherwise CLs+b).
    pub use_cls: bool,
    /// Canonical ordering of expected curves.
    pub nsigma_order: [f64; 5],
    /// Per-point curve values.
    pub points: Vec<PValueCurvePoint>,
    /// Scan x-values (same as `points[*].mu`).
    pub mu_values: Vec<f64>,
    /// Observed CLs+b aligned with `mu_values`.
    pub clsb_obs: Vec<f64>,
    /// Observed CLb aligned with `mu_values`.
    pub clb_obs: Vec<f64>,
    /// Observed CLs aligned with `mu_values`.
    pub cls_obs: Vec<f64>,
    /// Expected CLs aligned with `mu_values`, grouped by `nsigma_order`.
    ///
    /// Empty unless every point carries an expected band.
    pub cls_exp: Vec<Vec<f64>>,
    /// Observed interval.
    pub interval: Interval,
    /// Expected upper limits from the per-point bands.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_limits: Option<ExpectedBand>,
}

impl PValueCurveArtifact {
    /// Build the artifact from a finished scan.
    pub fn from_scan(result: &ScanResult, two_sided: bool) -> Result<Self> {
        let cl = result.confidence_level();
        let interval = extract_limits(result, cl, two_sided)?;
        let expected_limits = expected_limits_from_bands(result, cl);

        let n = result.len();
        let mut points = Vec::with_capacity(n);
        let mut mu_values = Vec::with_capacity(n);
        let mut clsb_obs = Vec::with_capacity(n);
        let mut clb_obs = Vec::with_capacity(n);
        let mut cls_obs = Vec::with_capacity(n);

        for p in result.points() {
            points.push(PValueCurvePoint {
                mu: p.poi,
                clsb: p.clsb(),
                clb: p.clb(),
                cls: p.cls(),
                expected: p.test.expected_cls,
            });
            mu_values.push(p.poi);
            clsb_obs.push(p.clsb());
            clb_obs.push(p.clb());
            cls_obs.push(p.cls());
        }

        let cls_exp = if result.has_expected_bands() {
            (0..5)
                .map(|i| {
                    result.points().iter().filter_map(|p| p.test.expected_cls.map(|b| b[i])).collect()
                })
                .collect()
        } else {
            Vec::new()
        };

        Ok(Self {
            alpha: 1.0 - cl,
            use_cls: result.use_cls(),
            nsigma_order: NSIGMA_ORDER,
            points,
            mu_values,
            clsb_obs,
            clb_obs,
            cls_obs,
            cls_exp,
            interval,
            expected_limits,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use hti_core::{PointTest, ScanMode, ScanPoint};

    fn result(with_bands: bool) -> ScanResult {
        let points = [0.0_f64, 1.0, 2.0, 3.0]
            .iter()
            .map(|&x| {
                let clsb = (0.5 - 0.2 * x).max(0.0);
                let mut t = PointTest::new(clsb, 0.5);
                if with_bands {
                    t = t.with_expected_cls([0.8 - 0.3 * x; 5].map(|v: f64| v.max(0.0)));
                }
                ScanPoint::new(x, t)
            })
            .collect();
        ScanResult::new(points, 0.95, true, ScanMode::Fixed, (0.0, 3.0), vec![]).unwrap()
    }

    #[test]
    fn arrays_are_aligned() {
        let a = PValueCurveArtifact::from_scan(&result(true), false).unwrap();
        assert_eq!(a.mu_values, vec![0.0, 1.0, 2.0, 3.0]);
        assert_eq!(a.cls_obs.len(), 4);
        assert_eq!(a.cls_exp.len(), 5);
        assert!(a.cls_exp.iter().all(|c| c.len() == 4));
        assert_relative_eq!(a.cls_obs[1], 0.6, epsilon = 1e-12);
        assert_relative_eq!(a.alpha, 0.05, epsilon = 1e-12);
        assert!(a.interval.upper.is_valid);
        assert!(a.expected_limits.is_some());
    }

    #[test]
    fn no_bands_gives_empty_expected_arrays() {
        let a = PValueCurveArtifact::from_scan(&result(false), false).unwrap();
        assert!(a.cls_exp.is_empty());
        assert!(a.expected_limits.is_none());
        let json = serde_json::to_string(&a).unwrap();
        assert!(!json.contains("expected_limits"));
    }
}
