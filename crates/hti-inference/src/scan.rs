//! Scan driver: evaluate the hypothesis test over a set of POI values.
//!
//! Fixed mode evaluates an evenly spaced inclusive grid. Automatic mode
//! brackets the crossing of `alpha = 1 - confidence_level` by doubling the
//! upper end, then bisects toward it. Scans are sequential; parallelism lives
//! inside evaluators and across rebuild trials.

use crate::config::{FailurePolicy, ScanConfig};
use hti_core::{
    Error, InitialFit, PoiEstimate, PointEvaluator, Result, ScanMode, ScanPoint, ScanResult,
};

const MAX_EXPANSIONS: usize = 50;

/// Inclusive, evenly spaced grid of `n` values over `[min, max]`.
///
/// The end points are exact; `n = 1` gives `[min]`.
pub fn fixed_grid(n: usize, min: f64, max: f64) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![min],
        _ => {
            let step = (max - min) / (n - 1) as f64;
            (0..n).map(|i| if i == n - 1 { max } else { min + step * i as f64 }).collect()
        }
    }
}

/// Resolve the fixed-scan window.
///
/// An inverted window (`poi_min > poi_max`) becomes
/// `[floor(best_fit), floor(best_fit + 4 * std_error)]`, as does a collapsed
/// window scanned with more than one point. Automatic scans take their range
/// from the evaluator, so the configured window is returned unchanged.
pub fn resolve_window(config: &ScanConfig, best_fit: Option<PoiEstimate>) -> Result<(f64, f64)> {
    let configured = (config.poi_min, config.poi_max);
    if !config.requires_best_fit() {
        return Ok(configured);
    }

    let est = match best_fit {
        Some(est) => est,
        None if config.poi_min > config.poi_max => {
            return Err(Error::FitFailed(format!(
                "scan window [{}, {}] is inverted and no best-fit estimate is available",
                config.poi_min, config.poi_max
            )));
        }
        None => {
            return Err(Error::InvalidConfig(format!(
                "scan window collapses to {} for {} points and no best-fit estimate is available",
                config.poi_min, config.points
            )));
        }
    };

    let lo = est.best_fit.floor();
    let hi = (est.best_fit + 4.0 * est.std_error).floor();
    if !(lo.is_finite() && hi.is_finite()) || (config.points > 1 && hi <= lo) {
        return Err(Error::InvalidConfig(format!(
            "derived scan window [{lo}, {hi}] is degenerate (best fit {} +/- {})",
            est.best_fit, est.std_error
        )));
    }
    log::info!("scan window derived from best fit {} +/- {}: [{lo}, {hi}]", est.best_fit, est.std_error);
    Ok((lo, hi))
}

/// Evaluates points and applies the failure policy.
struct Recorder<'a, E: PointEvaluator> {
    evaluator: &'a E,
    data: &'a E::Data,
    policy: FailurePolicy,
    use_cls: bool,
    points: Vec<ScanPoint>,
    skipped: Vec<f64>,
}

impl<'a, E: PointEvaluator> Recorder<'a, E> {
    fn new(evaluator: &'a E, data: &'a E::Data, config: &ScanConfig) -> Self {
        Self {
            evaluator,
            data,
            policy: config.failure_policy,
            use_cls: config.use_cls,
            points: Vec::new(),
            skipped: Vec::new(),
        }
    }

    /// Inversion p-value at `poi`, or `None` when the point was skipped.
    fn eval(&mut self, poi: f64) -> Result<Option<f64>> {
        let outcome = self
            .evaluator
            .evaluate(poi, self.data)
            .and_then(|test| test.validate().map(|_| test))
            .map_err(|e| e.at_point(poi));

        match outcome {
            Ok(test) => {
                let point = ScanPoint::new(poi, test);
                let p = point.p_value(self.use_cls);
                log::debug!(
                    "{}: poi={poi} clsb={} clb={} p={p}",
                    self.evaluator.name(),
                    point.clsb(),
                    point.clb()
                );
                self.points.push(point);
                Ok(Some(p))
            }
            Err(e) => match self.policy {
                FailurePolicy::Abort => Err(e),
                FailurePolicy::Skip => {
                    log::warn!("skipping scan point: {e}");
                    self.skipped.push(poi);
                    Ok(None)
                }
            },
        }
    }

    fn finish(self, config: &ScanConfig, window: (f64, f64)) -> Result<ScanResult> {
        ScanResult::new(
            self.points,
            config.confidence_level,
            config.use_cls,
            config.mode,
            window,
            self.skipped,
        )
    }
}

/// Run a scan over `data`.
///
/// `best_fit` is only consulted when a fixed scan has to derive its window.
pub fn scan<E: PointEvaluator>(
    evaluator: &E,
    data: &E::Data,
    config: &ScanConfig,
    best_fit: Option<PoiEstimate>,
) -> Result<ScanResult> {
    config.validate()?;
    match config.mode {
        ScanMode::Fixed => scan_fixed(evaluator, data, config, best_fit),
        ScanMode::Automatic => scan_automatic(evaluator, data, config),
    }
}

/// Run a scan, fitting `data` first when the window must be derived from the best fit.
pub fn scan_with_fit<E, F>(
    evaluator: &E,
    fitter: &F,
    data: &E::Data,
    config: &ScanConfig,
) -> Result<ScanResult>
where
    E: PointEvaluator,
    F: InitialFit<Data = E::Data>,
{
    let best_fit = if config.requires_best_fit() { Some(fitter.fit(data)?) } else { None };
    scan(evaluator, data, config, best_fit)
}

fn scan_fixed<E: PointEvaluator>(
    evaluator: &E,
    data: &E::Data,
    config: &ScanConfig,
    best_fit: Option<PoiEstimate>,
) -> Result<ScanResult> {
    let window = resolve_window(config, best_fit)?;
    let grid = fixed_grid(config.points, window.0, window.1);
    log::debug!("fixed scan: {} points over [{}, {}]", grid.len(), window.0, window.1);

    let mut rec = Recorder::new(evaluator, data, config);
    for poi in grid {
        rec.eval(poi)?;
    }
    rec.finish(config, window)
}

fn scan_automatic<E: PointEvaluator>(
    evaluator: &E,
    data: &E::Data,
    config: &ScanConfig,
) -> Result<ScanResult> {
    let alpha = config.alpha();
    let (natural_lo, natural_hi) = evaluator.poi_bounds();
    let mut lo = natural_lo.max(0.0);
    let mut hi = config.max_poi.unwrap_or(natural_hi);
    if !(lo.is_finite() && hi.is_finite() && hi > lo) {
        return Err(Error::InvalidConfig(format!("invalid automatic scan bracket [{lo}, {hi}]")));
    }
    let start = lo;
    let mut rec = Recorder::new(evaluator, data, config);

    match rec.eval(lo)? {
        None => {
            log::warn!("automatic scan: lower bracket {lo} failed; limit cannot be bracketed");
            return rec.finish(config, (start, hi));
        }
        Some(p) if p < alpha => {
            log::warn!("automatic scan: p-value {p} at lower bracket {lo} is already below {alpha}");
            return rec.finish(config, (start, hi));
        }
        Some(_) => {}
    }

    let mut p_hi = rec.eval(hi)?;
    let mut expand = 0usize;
    loop {
        match p_hi {
            None => {
                log::warn!("automatic scan: upper bracket {hi} failed; limit cannot be bracketed");
                return rec.finish(config, (start, hi));
            }
            Some(p) if p <= alpha => break,
            Some(p) => {
                if expand >= MAX_EXPANSIONS {
                    log::warn!(
                        "automatic scan: p-value {p} at {hi} still above {alpha} after {expand} expansions"
                    );
                    return rec.finish(config, (start, hi));
                }
                lo = hi;
                hi *= 2.0;
                p_hi = rec.eval(hi)?;
                expand += 1;
            }
        }
    }
    let window = (start, hi);

    for _ in 0..config.max_iter {
        let mid = 0.5 * (lo + hi);
        match rec.eval(mid)? {
            None => {
                log::warn!("automatic scan: bisection stopped at failed point {mid}");
                break;
            }
            Some(p) if p > alpha => lo = mid,
            Some(_) => hi = mid,
        }

        let denom = hi.abs().max(1.0);
        if ((hi - lo).abs() / denom) < config.rtol {
            break;
        }
    }

    rec.finish(config, window)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hti_core::PointTest;

    /// CLs+b falls linearly from 1 at 0 to 0 at `end`; CLb = 1.
    struct Linear {
        end: f64,
        bounds: (f64, f64),
        fail_at: Vec<f64>,
    }

    impl Linear {
        fn new(end: f64) -> Self {
            Self { end, bounds: (0.0, 4.0), fail_at: Vec::new() }
        }
    }

    impl PointEvaluator for Linear {
        type Data = ();

        fn evaluate(&self, poi: f64, _data: &()) -> Result<PointTest> {
            if self.fail_at.contains(&poi) {
                return Err(Error::Computation("fit diverged".to_string()));
            }
            Ok(PointTest::new((1.0 - poi / self.end).clamp(0.0, 1.0), 1.0))
        }

        fn poi_bounds(&self) -> (f64, f64) {
            self.bounds
        }

        fn name(&self) -> &str {
            "Linear"
        }
    }

    struct FixedFit(PoiEstimate);

    impl InitialFit for FixedFit {
        type Data = ();

        fn fit(&self, _data: &()) -> Result<PoiEstimate> {
            Ok(self.0)
        }
    }

    #[test]
    fn grid_is_inclusive_with_exact_ends() {
        let g = fixed_grid(4, 0.0, 1000.0);
        assert_eq!(g.len(), 4);
        assert_eq!(g[0], 0.0);
        assert_eq!(g[3], 1000.0);
        assert!((g[1] - 1000.0 / 3.0).abs() < 1e-9);
        assert_eq!(fixed_grid(1, 2.0, 5.0), vec![2.0]);
        assert!(fixed_grid(0, 2.0, 5.0).is_empty());
    }

    #[test]
    fn fixed_scan_records_every_point() {
        let r = scan(&Linear::new(10.0), &(), &ScanConfig::fixed(5, 0.0, 8.0), None).unwrap();
        assert_eq!(r.poi_values(), vec![0.0, 2.0, 4.0, 6.0, 8.0]);
        assert_eq!(r.window(), (0.0, 8.0));
        assert!(r.skipped().is_empty());
    }

    #[test]
    fn inverted_window_needs_best_fit() {
        let cfg = ScanConfig::fixed(5, 1.0, 0.0);
        let err = scan(&Linear::new(10.0), &(), &cfg, None).unwrap_err();
        assert!(matches!(err, Error::FitFailed(_)));

        let fit = FixedFit(PoiEstimate { best_fit: 2.3, std_error: 1.1 });
        let r = scan_with_fit(&Linear::new(10.0), &fit, &(), &cfg).unwrap();
        assert_eq!(r.window(), (2.0, 6.0));
        assert_eq!(r.len(), 5);
    }

    #[test]
    fn collapsed_window_without_fit_is_invalid() {
        let cfg = ScanConfig::fixed(3, 2.0, 2.0);
        let err = scan(&Linear::new(10.0), &(), &cfg, None).unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }

    #[test]
    fn degenerate_derived_window_is_invalid() {
        let cfg = ScanConfig::fixed(3, 1.0, 0.0);
        let est = PoiEstimate { best_fit: 0.2, std_error: 0.1 };
        assert!(matches!(resolve_window(&cfg, Some(est)), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn zero_points_is_invalid() {
        let err = scan(&Linear::new(10.0), &(), &ScanConfig::fixed(0, 0.0, 1.0), None).unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }

    #[test]
    fn abort_policy_surfaces_failing_point() {
        let mut ev = Linear::new(10.0);
        ev.fail_at = vec![4.0];
        let err = scan(&ev, &(), &ScanConfig::fixed(5, 0.0, 8.0), None).unwrap_err();
        assert!(matches!(err, Error::EvaluationFailed { poi, .. } if poi == 4.0));
    }

    #[test]
    fn skip_policy_records_skipped_points() {
        let mut ev = Linear::new(10.0);
        ev.fail_at = vec![4.0];
        let cfg = ScanConfig::fixed(5, 0.0, 8.0).with_failure_policy(FailurePolicy::Skip);
        let r = scan(&ev, &(), &cfg, None).unwrap();
        assert_eq!(r.poi_values(), vec![0.0, 2.0, 6.0, 8.0]);
        assert_eq!(r.skipped(), &[4.0]);
    }

    #[test]
    fn automatic_scan_expands_and_converges() {
        let cfg = ScanConfig::automatic();
        let r = scan(&Linear::new(9.5), &(), &cfg, None).unwrap();
        assert_eq!(r.mode(), ScanMode::Automatic);
        // 4 -> 8 -> 16 brackets the crossing at 9.5 * 0.95.
        let target = 9.5 * 0.95;
        assert!(r.points().iter().any(|p| (p.poi - target).abs() < 1e-3), "pois={:?}", r.poi_values());
        assert!(r.len() <= 2 + MAX_EXPANSIONS + cfg.max_iter);
        assert_eq!(r.window(), (0.0, 16.0));
    }

    #[test]
    fn automatic_scan_honors_max_poi() {
        let mut cfg = ScanConfig::automatic();
        cfg.max_poi = Some(20.0);
        let r = scan(&Linear::new(9.5), &(), &cfg, None).unwrap();
        assert!(r.poi_values().contains(&20.0));
        assert!(!r.poi_values().contains(&4.0));
    }

    #[test]
    fn automatic_scan_without_crossing_returns_points() {
        let r = scan(&Linear::new(f64::INFINITY), &(), &ScanConfig::automatic(), None).unwrap();
        assert_eq!(r.len(), 2 + MAX_EXPANSIONS);
    }

    #[test]
    fn automatic_scan_stops_at_failed_midpoint() {
        let mut ev = Linear::new(9.5);
        ev.fail_at = vec![12.0];
        let cfg = ScanConfig::automatic().with_failure_policy(FailurePolicy::Skip);
        let r = scan(&ev, &(), &cfg, None).unwrap();
        assert_eq!(r.skipped(), &[12.0]);
        assert_eq!(r.poi_values(), vec![0.0, 4.0, 8.0, 16.0]);
    }
}
