//! Scan records and limit estimates

use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Canonical expected-set ordering in `-muhat/sigma` space.
///
/// Index 0 is the `+2` shift (smallest expected CLs), index 4 the `-2` shift.
pub const NSIGMA_ORDER: [f64; 5] = [2.0, 1.0, 0.0, -1.0, -2.0];

const CLB_MIN: f64 = 1e-300;

/// CLs = CLs+b / CLb, robust against CLb underflow in the far tails.
#[inline]
pub fn safe_cls(clsb: f64, clb: f64) -> f64 {
    if !(clsb.is_finite() && clb.is_finite()) {
        return 0.0;
    }
    if clb <= CLB_MIN {
        return if clsb <= CLB_MIN { 0.0 } else { 1.0 };
    }
    (clsb / clb).clamp(0.0, 1.0)
}

/// Hypothesis-test outcome at one POI value, as produced by an evaluator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointTest {
    /// p-value of the signal+background (null) hypothesis, CLs+b.
    pub null_p_value: f64,
    /// p-value of the background-only (alternate) hypothesis, CLb.
    pub alt_p_value: f64,
    /// Statistical error on `null_p_value` (toy-based calculators).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub null_p_error: Option<f64>,
    /// Statistical error on `alt_p_value` (toy-based calculators).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alt_p_error: Option<f64>,
    /// Observed test statistic.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_statistic: Option<f64>,
    /// Expected CLs at `NSIGMA_ORDER`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_cls: Option<[f64; 5]>,
    /// Test-statistic samples under the null hypothesis.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub null_distribution: Vec<f64>,
    /// Test-statistic samples under the alternate hypothesis.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub alt_distribution: Vec<f64>,
}

impl PointTest {
    /// Create a bare (CLs+b, CLb) pair.
    pub fn new(null_p_value: f64, alt_p_value: f64) -> Self {
        Self {
            null_p_value,
            alt_p_value,
            null_p_error: None,
            alt_p_error: None,
            test_statistic: None,
            expected_cls: None,
            null_distribution: Vec::new(),
            alt_distribution: Vec::new(),
        }
    }

    /// Attach p-value errors.
    pub fn with_errors(mut self, null_p_error: f64, alt_p_error: f64) -> Self {
        self.null_p_error = Some(null_p_error);
        self.alt_p_error = Some(alt_p_error);
        self
    }

    /// Attach the observed test statistic.
    pub fn with_test_statistic(mut self, t: f64) -> Self {
        self.test_statistic = Some(t);
        self
    }

    /// Attach the expected CLs band (ordered by [`NSIGMA_ORDER`]).
    pub fn with_expected_cls(mut self, band: [f64; 5]) -> Self {
        self.expected_cls = Some(band);
        self
    }

    /// Attach the toy samples of the test statistic.
    pub fn with_distributions(mut self, null: Vec<f64>, alt: Vec<f64>) -> Self {
        self.null_distribution = null;
        self.alt_distribution = alt;
        self
    }

    /// Check that both p-values are finite probabilities.
    pub fn validate(&self) -> Result<()> {
        for (name, p) in [("null_p_value", self.null_p_value), ("alt_p_value", self.alt_p_value)] {
            if !p.is_finite() || !(0.0..=1.0).contains(&p) {
                return Err(Error::Computation(format!("{name} must be in [0,1], got {p}")));
            }
        }
        Ok(())
    }
}

/// One evaluated point of a scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanPoint {
    /// Tested POI value.
    pub poi: f64,
    /// Evaluator outcome.
    #[serde(flatten)]
    pub test: PointTest,
}

impl ScanPoint {
    /// Record the outcome of a test at `poi`.
    pub fn new(poi: f64, test: PointTest) -> Self {
        Self { poi, test }
    }

    /// CLs+b.
    pub fn clsb(&self) -> f64 {
        self.test.null_p_value
    }

    /// CLb.
    pub fn clb(&self) -> f64 {
        self.test.alt_p_value
    }

    /// CLs.
    pub fn cls(&self) -> f64 {
        safe_cls(self.clsb(), self.clb())
    }

    /// The p-value used for inversion: CLs or CLs+b.
    pub fn p_value(&self, use_cls: bool) -> f64 {
        if use_cls { self.cls() } else { self.clsb() }
    }

    /// Error on [`Self::p_value`], when the evaluator reported p-value errors.
    ///
    /// The CLs error follows from ratio error propagation.
    pub fn p_value_error(&self, use_cls: bool) -> Option<f64> {
        let e_sb = self.test.null_p_error?;
        if !use_cls {
            return Some(e_sb);
        }
        let e_b = self.test.alt_p_error?;
        let (clsb, clb) = (self.clsb(), self.clb());
        if clb <= CLB_MIN {
            return None;
        }
        if clsb <= CLB_MIN {
            return Some(e_sb / clb);
        }
        let cls = self.cls();
        Some(cls * ((e_sb / clsb).powi(2) + (e_b / clb).powi(2)).sqrt())
    }
}

/// How the scanned POI values were chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanMode {
    /// Evenly spaced grid over a window.
    Fixed,
    /// Adaptive bisection toward the confidence-level crossing.
    Automatic,
}

impl ScanMode {
    /// Map a point count to a mode: negative counts request an automatic scan.
    pub fn from_points(points: i64) -> Self {
        if points < 0 { ScanMode::Automatic } else { ScanMode::Fixed }
    }

    /// Short tag used in result file names.
    pub fn tag(self) -> &'static str {
        match self {
            ScanMode::Fixed => "grid",
            ScanMode::Automatic => "auto",
        }
    }
}

#[derive(Deserialize)]
struct ScanResultRecord {
    points: Vec<ScanPoint>,
    confidence_level: f64,
    use_cls: bool,
    mode: ScanMode,
    window: (f64, f64),
    #[serde(default)]
    skipped: Vec<f64>,
}

impl TryFrom<ScanResultRecord> for ScanResult {
    type Error = Error;

    fn try_from(r: ScanResultRecord) -> Result<Self> {
        ScanResult::new(r.points, r.confidence_level, r.use_cls, r.mode, r.window, r.skipped)
    }
}

/// Ordered set of scan points plus scan metadata.
///
/// Points are sorted by POI (ascending) on construction; a repeated POI keeps
/// its first evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ScanResultRecord")]
pub struct ScanResult {
    points: Vec<ScanPoint>,
    confidence_level: f64,
    use_cls: bool,
    mode: ScanMode,
    window: (f64, f64),
    skipped: Vec<f64>,
}

impl ScanResult {
    /// Build a scan result.
    pub fn new(
        mut points: Vec<ScanPoint>,
        confidence_level: f64,
        use_cls: bool,
        mode: ScanMode,
        window: (f64, f64),
        mut skipped: Vec<f64>,
    ) -> Result<Self> {
        if !(confidence_level > 0.0 && confidence_level < 1.0) {
            return Err(Error::InvalidConfig(format!(
                "confidence_level must be in (0,1), got {confidence_level}"
            )));
        }
        if let Some(p) = points.iter().find(|p| !p.poi.is_finite()) {
            return Err(Error::InvalidConfig(format!("non-finite scan point: {}", p.poi)));
        }
        points.sort_by(|a, b| a.poi.total_cmp(&b.poi));
        points.dedup_by(|later, earlier| later.poi == earlier.poi);
        skipped.sort_by(f64::total_cmp);
        Ok(Self { points, confidence_level, use_cls, mode, window, skipped })
    }

    /// Scan points, ascending in POI.
    pub fn points(&self) -> &[ScanPoint] {
        &self.points
    }

    /// Number of recorded points.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Whether no point was recorded.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Target confidence level.
    pub fn confidence_level(&self) -> f64 {
        self.confidence_level
    }

    /// Whether inversion uses CLs (otherwise CLs+b).
    pub fn use_cls(&self) -> bool {
        self.use_cls
    }

    /// Scan mode.
    pub fn mode(&self) -> ScanMode {
        self.mode
    }

    /// Resolved scan window (min, max).
    pub fn window(&self) -> (f64, f64) {
        self.window
    }

    /// POI values skipped after an evaluation failure.
    pub fn skipped(&self) -> &[f64] {
        &self.skipped
    }

    /// Scanned POI values.
    pub fn poi_values(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.poi).collect()
    }

    /// Inversion p-values aligned with [`Self::poi_values`].
    pub fn p_values(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.p_value(self.use_cls)).collect()
    }

    /// Whether every point carries an expected CLs band.
    pub fn has_expected_bands(&self) -> bool {
        !self.points.is_empty() && self.points.iter().all(|p| p.test.expected_cls.is_some())
    }
}

/// One limit with its estimated error.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LimitEstimate {
    /// Limit value (domain boundary when invalid).
    pub value: f64,
    /// Estimated error.
    pub error: f64,
    /// Whether a crossing was found.
    pub is_valid: bool,
}

impl LimitEstimate {
    /// A bracketed limit.
    pub fn valid(value: f64, error: f64) -> Self {
        Self { value, error, is_valid: true }
    }

    /// A limit that could not be bracketed; `value` is the boundary reported instead.
    pub fn invalid(value: f64) -> Self {
        Self { value, error: 0.0, is_valid: false }
    }
}

/// Lower and upper limit of an inverted test.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Interval {
    /// Lower limit (`is_valid = false` for one-sided intervals).
    pub lower: LimitEstimate,
    /// Upper limit.
    pub upper: LimitEstimate,
}

/// Best-fit POI with its standard error.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PoiEstimate {
    /// Best-fit value.
    pub best_fit: f64,
    /// Standard error.
    pub std_error: f64,
}

/// Expected upper limits: median with ±1σ and ±2σ bands.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExpectedBand {
    /// −2σ expected limit.
    pub minus2: f64,
    /// −1σ expected limit.
    pub minus1: f64,
    /// Median expected limit.
    pub median: f64,
    /// +1σ expected limit.
    pub plus1: f64,
    /// +2σ expected limit.
    pub plus2: f64,
}

impl ExpectedBand {
    /// Build from limits ordered by [`NSIGMA_ORDER`].
    ///
    /// The `+2` shift gives the smallest expected CLs, hence the −2σ limit.
    pub fn from_nsigma_order(limits: [f64; 5]) -> Self {
        Self {
            minus2: limits[0],
            minus1: limits[1],
            median: limits[2],
            plus1: limits[3],
            plus2: limits[4],
        }
    }

    /// Limits ordered from −2σ to +2σ.
    pub fn to_array(&self) -> [f64; 5] {
        [self.minus2, self.minus1, self.median, self.plus1, self.plus2]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn point(poi: f64, clsb: f64, clb: f64) -> ScanPoint {
        ScanPoint::new(poi, PointTest::new(clsb, clb))
    }

    #[test]
    fn test_safe_cls_underflow_is_finite() {
        assert_eq!(safe_cls(0.0, 0.0), 0.0);
        assert_eq!(safe_cls(0.1, 0.0), 1.0);
        assert_eq!(safe_cls(f64::NAN, 0.5), 0.0);
        assert_relative_eq!(safe_cls(0.02, 0.4), 0.05);
    }

    #[test]
    fn scan_result_sorts_and_dedups() {
        let r = ScanResult::new(
            vec![point(2.0, 0.1, 0.5), point(0.0, 0.9, 0.9), point(2.0, 0.7, 0.7)],
            0.95,
            true,
            ScanMode::Fixed,
            (0.0, 2.0),
            vec![],
        )
        .unwrap();
        assert_eq!(r.poi_values(), vec![0.0, 2.0]);
        // First evaluation of the repeated POI wins.
        assert_relative_eq!(r.points()[1].clsb(), 0.1);
    }

    #[test]
    fn scan_result_rejects_bad_confidence_level() {
        for cl in [0.0, 1.0, -0.3, f64::NAN] {
            let r = ScanResult::new(vec![], cl, true, ScanMode::Fixed, (0.0, 1.0), vec![]);
            assert!(matches!(r, Err(Error::InvalidConfig(_))), "cl={cl}");
        }
    }

    #[test]
    fn p_value_switches_between_cls_and_clsb() {
        let p = point(1.0, 0.02, 0.5);
        assert_relative_eq!(p.p_value(true), 0.04);
        assert_relative_eq!(p.p_value(false), 0.02);
    }

    #[test]
    fn cls_error_propagates_both_terms() {
        let p = ScanPoint::new(1.0, PointTest::new(0.02, 0.5).with_errors(0.002, 0.05));
        let e = p.p_value_error(true).unwrap();
        let expected = 0.04 * (0.1f64.powi(2) + 0.1f64.powi(2)).sqrt();
        assert_relative_eq!(e, expected, epsilon = 1e-15);
        assert_relative_eq!(p.p_value_error(false).unwrap(), 0.002);
        assert!(point(1.0, 0.02, 0.5).p_value_error(true).is_none());
    }

    #[test]
    fn scan_result_json_roundtrip_restores_order() {
        let json = r#"{
            "points": [
                {"poi": 3.0, "null_p_value": 0.01, "alt_p_value": 0.5},
                {"poi": 1.0, "null_p_value": 0.40, "alt_p_value": 0.5}
            ],
            "confidence_level": 0.95,
            "use_cls": false,
            "mode": "automatic",
            "window": [0.0, 3.0]
        }"#;
        let r: ScanResult = serde_json::from_str(json).unwrap();
        assert_eq!(r.poi_values(), vec![1.0, 3.0]);
        assert_eq!(r.mode(), ScanMode::Automatic);
        assert!(!r.use_cls());
    }

    #[test]
    fn expected_band_maps_nsigma_order() {
        let b = ExpectedBand::from_nsigma_order([1.0, 2.0, 3.0, 4.0, 5.0]);
        assert_eq!(b.minus2, 1.0);
        assert_eq!(b.median, 3.0);
        assert_eq!(b.plus2, 5.0);
        assert_eq!(b.to_array(), [1.0, 2.0, 3.0, 4.0, 5.0]);
    }

    #[test]
    fn negative_point_count_means_automatic() {
        assert_eq!(ScanMode::from_points(-1), ScanMode::Automatic);
        assert_eq!(ScanMode::from_points(0), ScanMode::Fixed);
        assert_eq!(ScanMode::from_points(4), ScanMode::Fixed);
    }

    #[test]
    fn point_test_validate_rejects_out_of_range() {
        assert!(PointTest::new(0.3, 0.9).validate().is_ok());
        assert!(PointTest::new(1.3, 0.9).validate().is_err());
        assert!(PointTest::new(0.3, f64::NAN).validate().is_err());
    }
}
