//! Scan and rebuild configuration.
//!
//! Both records are immutable once built and are passed explicitly to the
//! driver and the rebuilder.

use hti_core::{Error, Result, ScanMode};
use serde::{Deserialize, Serialize};

/// What to do when a single evaluation (or rebuild trial) fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Stop and return the error.
    Abort,
    /// Record the failure and continue.
    Skip,
}

/// Scan driver configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ScanConfigRecord")]
pub struct ScanConfig {
    /// Fixed grid or automatic bisection.
    pub mode: ScanMode,
    /// Grid size (fixed mode).
    pub points: usize,
    /// Lower end of the window. `poi_min > poi_max` derives the window from the best fit.
    pub poi_min: f64,
    /// Upper end of the window.
    pub poi_max: f64,
    /// Upper bracket override for automatic scans.
    pub max_poi: Option<f64>,
    /// Target confidence level, in (0, 1).
    pub confidence_level: f64,
    /// Invert CLs (otherwise CLs+b).
    pub use_cls: bool,
    /// Relative bisection tolerance (automatic mode).
    pub rtol: f64,
    /// Maximum bisection steps (automatic mode).
    pub max_iter: usize,
    /// Behavior on evaluation failure.
    pub failure_policy: FailurePolicy,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            mode: ScanMode::Fixed,
            points: 4,
            poi_min: 0.0,
            poi_max: 1000.0,
            max_poi: None,
            confidence_level: 0.95,
            use_cls: true,
            rtol: 1e-4,
            max_iter: 80,
            failure_policy: FailurePolicy::Abort,
        }
    }
}

impl ScanConfig {
    /// Fixed grid of `points` values over `[poi_min, poi_max]`.
    pub fn fixed(points: usize, poi_min: f64, poi_max: f64) -> Self {
        Self { mode: ScanMode::Fixed, points, poi_min, poi_max, ..Self::default() }
    }

    /// Automatic bisection scan.
    pub fn automatic() -> Self {
        Self { mode: ScanMode::Automatic, ..Self::default() }
    }

    /// Same configuration with another confidence level.
    pub fn with_confidence_level(mut self, confidence_level: f64) -> Self {
        self.confidence_level = confidence_level;
        self
    }

    /// Same configuration inverting CLs+b instead of CLs (or back).
    pub fn with_cls(mut self, use_cls: bool) -> Self {
        self.use_cls = use_cls;
        self
    }

    /// Same configuration with another failure policy.
    pub fn with_failure_policy(mut self, failure_policy: FailurePolicy) -> Self {
        self.failure_policy = failure_policy;
        self
    }

    /// Same configuration pinned to an explicit window.
    pub fn with_window(mut self, poi_min: f64, poi_max: f64) -> Self {
        self.poi_min = poi_min;
        self.poi_max = poi_max;
        self
    }

    /// Threshold `alpha = 1 - confidence_level`.
    pub fn alpha(&self) -> f64 {
        1.0 - self.confidence_level
    }

    /// Whether the window has to be derived from a best-fit estimate.
    pub fn requires_best_fit(&self) -> bool {
        self.mode == ScanMode::Fixed
            && (self.poi_min > self.poi_max || (self.poi_min == self.poi_max && self.points > 1))
    }

    /// Check the configuration for values the driver cannot work with.
    pub fn validate(&self) -> Result<()> {
        if !(self.confidence_level > 0.0 && self.confidence_level < 1.0) {
            return Err(Error::InvalidConfig(format!(
                "confidence_level must be in (0,1), got {}",
                self.confidence_level
            )));
        }
        if !self.poi_min.is_finite() || !self.poi_max.is_finite() {
            return Err(Error::InvalidConfig(format!(
                "scan window must be finite, got [{}, {}]",
                self.poi_min, self.poi_max
            )));
        }
        match self.mode {
            ScanMode::Fixed => {
                if self.points < 1 {
                    return Err(Error::InvalidConfig("points must be >= 1".to_string()));
                }
            }
            ScanMode::Automatic => {
                if !(self.rtol.is_finite() && self.rtol > 0.0) {
                    return Err(Error::InvalidConfig(format!("rtol must be > 0, got {}", self.rtol)));
                }
                if self.max_iter == 0 {
                    return Err(Error::InvalidConfig("max_iter must be >= 1".to_string()));
                }
                if let Some(m) = self.max_poi {
                    if !(m.is_finite() && m > 0.0) {
                        return Err(Error::InvalidConfig(format!("max_poi must be > 0, got {m}")));
                    }
                }
            }
        }
        Ok(())
    }
}

fn default_points() -> i64 {
    4
}
fn default_poi_max() -> f64 {
    1000.0
}
fn default_confidence_level() -> f64 {
    0.95
}
fn default_true() -> bool {
    true
}
fn default_rtol() -> f64 {
    1e-4
}
fn default_max_iter() -> usize {
    80
}
fn default_abort() -> FailurePolicy {
    FailurePolicy::Abort
}

// Config files may request an automatic scan with a negative point count.
#[derive(Deserialize)]
struct ScanConfigRecord {
    #[serde(default)]
    mode: Option<ScanMode>,
    #[serde(default = "default_points")]
    points: i64,
    #[serde(default)]
    poi_min: f64,
    #[serde(default = "default_poi_max")]
    poi_max: f64,
    #[serde(default)]
    max_poi: Option<f64>,
    #[serde(default = "default_confidence_level")]
    confidence_level: f64,
    #[serde(default = "default_true")]
    use_cls: bool,
    #[serde(default = "default_rtol")]
    rtol: f64,
    #[serde(default = "default_max_iter")]
    max_iter: usize,
    #[serde(default = "default_abort")]
    failure_policy: FailurePolicy,
}

impl TryFrom<ScanConfigRecord> for ScanConfig {
    type Error = Error;

    fn try_from(r: ScanConfigRecord) -> Result<Self> {
        let mode = r.mode.unwrap_or_else(|| ScanMode::from_points(r.points));
        let cfg = ScanConfig {
            mode,
            points: r.points.max(0) as usize,
            poi_min: r.poi_min,
            poi_max: r.poi_max,
            max_poi: r.max_poi,
            confidence_level: r.confidence_level,
            use_cls: r.use_cls,
            rtol: r.rtol,
            max_iter: r.max_iter,
            failure_policy: r.failure_policy,
        };
        cfg.validate()?;
        Ok(cfg)
    }
}

/// Expected-limit rebuild configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RebuildConfig {
    /// Number of background-only trials.
    pub trials: usize,
    /// Base seed; trial `i` uses `seed + i`.
    pub seed: u64,
    /// Worker threads (0 = rayon default).
    pub threads: usize,
    /// Stop dispatching new trials after this many seconds.
    pub timeout_secs: Option<f64>,
    /// Behavior on a failed trial.
    pub failure_policy: FailurePolicy,
}

impl Default for RebuildConfig {
    fn default() -> Self {
        Self { trials: 100, seed: 42, threads: 0, timeout_secs: None, failure_policy: FailurePolicy::Skip }
    }
}

impl RebuildConfig {
    /// Check trial count and timeout.
    pub fn validate(&self) -> Result<()> {
        if self.trials < 1 {
            return Err(Error::InvalidConfig("trials must be >= 1".to_string()));
        }
        if let Some(t) = self.timeout_secs {
            if !(t.is_finite() && t > 0.0) {
                return Err(Error::InvalidConfig(format!("timeout_secs must be > 0, got {t}")));
            }
        }
        Ok(())
    }
}
