//! Limit extraction from a finished scan.
//!
//! Limits are the POI values where the inversion p-value crosses
//! `alpha = 1 - confidence_level`, located by linear interpolation between the
//! two scan points that bracket the crossing. Extraction is a pure function of
//! the scan result.

use hti_core::{Error, ExpectedBand, Interval, LimitEstimate, Result, ScanPoint, ScanResult};

/// Relative gap below which a lower limit is considered collapsed onto the upper one.
const COLLAPSE_RTOL: f64 = 1e-4;

/// Extract the upper (and, for two-sided intervals, lower) limit.
///
/// The upper limit is the first crossing from above to below `alpha` in
/// ascending POI; the lower limit is the last crossing from below to above
/// before it. A limit without a crossing is reported invalid at the scan
/// boundary: the last POI when the scan ends above `alpha`, the first POI
/// otherwise.
pub fn extract_limits(result: &ScanResult, confidence_level: f64, two_sided: bool) -> Result<Interval> {
    if !(confidence_level > 0.0 && confidence_level < 1.0) {
        return Err(Error::InvalidConfig(format!(
            "confidence_level must be in (0,1), got {confidence_level}"
        )));
    }
    if result.is_empty() {
        return Err(Error::InvalidConfig("cannot extract limits from an empty scan".to_string()));
    }

    let alpha = 1.0 - confidence_level;
    let use_cls = result.use_cls();
    let points = result.points();
    let ps = result.p_values();
    let n = points.len();

    let upper_idx = (0..n.saturating_sub(1)).find(|&i| ps[i] >= alpha && ps[i + 1] < alpha);
    let upper = match upper_idx {
        Some(i) => crossing(&points[i], &points[i + 1], ps[i], ps[i + 1], alpha, use_cls),
        None if ps[n - 1] == alpha => LimitEstimate::valid(points[n - 1].poi, 0.0),
        None if ps[n - 1] >= alpha => LimitEstimate::invalid(points[n - 1].poi),
        None => LimitEstimate::invalid(points[0].poi),
    };
    if !upper.is_valid {
        log::warn!(
            "no crossing of alpha={alpha} in {n} scan points; upper limit set to boundary {}",
            upper.value
        );
    }

    if !two_sided {
        return Ok(Interval { lower: LimitEstimate::invalid(0.0), upper });
    }

    // Lower crossing must come before the upper bracket.
    let search_end = upper_idx.map_or(n, |i| i + 1);
    let lower_idx = (0..search_end.saturating_sub(1)).rev().find(|&i| ps[i] < alpha && ps[i + 1] >= alpha);
    let mut lower = match lower_idx {
        Some(i) => crossing(&points[i], &points[i + 1], ps[i], ps[i + 1], alpha, use_cls),
        None => LimitEstimate::invalid(points[0].poi),
    };

    if lower.is_valid
        && (!(lower.value < upper.value * (1.0 - COLLAPSE_RTOL)) || lower.value == 0.0)
    {
        log::debug!(
            "lower limit {} collapses onto upper limit {}; suppressed",
            lower.value,
            upper.value
        );
        lower = LimitEstimate::invalid(lower.value);
    }

    Ok(Interval { lower, upper })
}

/// Interpolated crossing between two bracketing points, with its error.
fn crossing(a: &ScanPoint, b: &ScanPoint, pa: f64, pb: f64, alpha: f64, use_cls: bool) -> LimitEstimate {
    if pa == alpha {
        return LimitEstimate::valid(a.poi, 0.0);
    }
    if pb == alpha {
        return LimitEstimate::valid(b.poi, 0.0);
    }
    let t = (alpha - pa) / (pb - pa);
    let value = a.poi + t * (b.poi - a.poi);

    let error = match (a.p_value_error(use_cls), b.p_value_error(use_cls)) {
        (Some(ea), Some(eb)) => {
            let sigma_p = (1.0 - t) * ea + t * eb;
            let slope = (pb - pa) / (b.poi - a.poi);
            sigma_p / slope.abs()
        }
        _ => 0.5 * (b.poi - a.poi),
    };
    LimitEstimate::valid(value, error)
}

/// Expected upper limits from the per-point expected CLs bands.
///
/// Returns `None` unless every scan point carries a band. Each band is
/// interpolated independently and clamped to the scan range.
pub fn expected_limits_from_bands(result: &ScanResult, confidence_level: f64) -> Option<ExpectedBand> {
    if !result.has_expected_bands() || result.len() < 2 {
        return None;
    }
    let alpha = 1.0 - confidence_level;
    let xs = result.poi_values();

    let mut limits = [0.0; 5];
    for (j, limit) in limits.iter_mut().enumerate() {
        let ys: Vec<f64> =
            result.points().iter().map(|p| p.test.expected_cls.map_or(f64::NAN, |b| b[j])).collect();
        *limit = interp_limit(alpha, &xs, &ys);
    }
    Some(ExpectedBand::from_nsigma_order(limits))
}

/// First crossing of `alpha` by linear interpolation; clamps to the scan ends
/// when `alpha` lies outside the curve's range.
fn interp_limit(alpha: f64, xs: &[f64], ys: &[f64]) -> f64 {
    let n = xs.len();
    let decreasing = ys[0] >= ys[n - 1];
    if decreasing {
        if alpha >= ys[0] {
            return xs[0];
        }
        if alpha <= ys[n - 1] {
            return xs[n - 1];
        }
    } else {
        if alpha <= ys[0] {
            return xs[0];
        }
        if alpha >= ys[n - 1] {
            return xs[n - 1];
        }
    }

    for i in 0..(n - 1) {
        let (y0, y1) = (ys[i], ys[i + 1]);
        if y0 == alpha {
            return xs[i];
        }
        let brackets = if decreasing { y0 > alpha && y1 <= alpha } else { y0 < alpha && y1 >= alpha };
        if brackets && y1 != y0 {
            let t = (alpha - y0) / (y1 - y0);
            return xs[i] + t * (xs[i + 1] - xs[i]);
        }
    }

    // Non-monotonic band: fall back to the end closest to alpha.
    log::warn!("expected band does not bracket alpha={alpha}; using closest scan point");
    let mut best_i = 0usize;
    let mut best_d = (ys[0] - alpha).abs();
    for (i, y) in ys.iter().enumerate().skip(1) {
        let d = (y - alpha).abs();
        if d < best_d {
            best_d = d;
            best_i = i;
        }
    }
    xs[best_i]
}
