//! Calculator and test-statistic strategies.
//!
//! Strategies are tagged variants resolved once when the analysis is set up.
//! Legacy integer codes (calculator 0–3, test statistic 0–6 and 11) are
//! accepted at the boundary through `from_code`.

use hti_core::{Error, Result, ScanMode};
use serde::{Deserialize, Serialize};

fn default_n_toys() -> usize {
    1000
}

fn default_toys_ratio() -> f64 {
    2.0
}

/// How p-values are computed at each scan point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CalculatorKind {
    /// Toy-based, nuisance parameters at their nominal values.
    Frequentist {
        /// Toys for the null (s+b) hypothesis.
        #[serde(default = "default_n_toys")]
        n_toys: usize,
        /// Ratio of null toys to alternate (b-only) toys.
        #[serde(default = "default_toys_ratio")]
        toys_ratio: f64,
    },
    /// Toy-based, nuisance parameters smeared from their prior.
    Hybrid {
        /// Toys for the null (s+b) hypothesis.
        #[serde(default = "default_n_toys")]
        n_toys: usize,
        /// Ratio of null toys to alternate (b-only) toys.
        #[serde(default = "default_toys_ratio")]
        toys_ratio: f64,
    },
    /// Asymptotic formulae with an Asimov data set.
    Asymptotic {
        /// Build the Asimov data from nominal instead of fitted parameters.
        #[serde(default)]
        nominal_asimov: bool,
    },
}

impl Default for CalculatorKind {
    fn default() -> Self {
        CalculatorKind::Frequentist { n_toys: default_n_toys(), toys_ratio: default_toys_ratio() }
    }
}

impl CalculatorKind {
    /// Resolve a legacy calculator code.
    ///
    /// 0 = frequentist, 1 = hybrid, 2 = asymptotic, 3 = asymptotic with nominal Asimov.
    pub fn from_code(code: i32, n_toys: usize) -> Result<Self> {
        let toys_ratio = default_toys_ratio();
        match code {
            0 => Ok(CalculatorKind::Frequentist { n_toys, toys_ratio }),
            1 => Ok(CalculatorKind::Hybrid { n_toys, toys_ratio }),
            2 => Ok(CalculatorKind::Asymptotic { nominal_asimov: false }),
            3 => Ok(CalculatorKind::Asymptotic { nominal_asimov: true }),
            other => Err(Error::InvalidConfig(format!(
                "calculator type {other} not supported (0 frequentist, 1 hybrid, 2 asymptotic, 3 asymptotic nominal)"
            ))),
        }
    }

    /// Human-readable calculator name.
    pub fn name(&self) -> &'static str {
        match self {
            CalculatorKind::Frequentist { .. } => "Frequentist",
            CalculatorKind::Hybrid { .. } => "Hybrid",
            CalculatorKind::Asymptotic { .. } => "Asymptotic",
        }
    }

    /// Whether the calculator throws toys.
    pub fn uses_toys(&self) -> bool {
        !matches!(self, CalculatorKind::Asymptotic { .. })
    }

    fn tag(&self) -> &'static str {
        match self {
            CalculatorKind::Frequentist { .. } => "Freq",
            CalculatorKind::Hybrid { .. } => "Hybr",
            CalculatorKind::Asymptotic { .. } => "Asym",
        }
    }
}

/// Sidedness of the profile-likelihood test statistic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sidedness {
    /// `q = 2 (nll(mu) - nll(mu_hat))`.
    TwoSided,
    /// `q = 0` when `mu_hat > mu`.
    #[default]
    OneSided,
    /// `q` negated when `mu_hat > mu`.
    Signed,
}

/// Test statistic evaluated on data and toys.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TestStatistic {
    /// Simple likelihood ratio of the s+b and b-only models.
    Lep,
    /// Ratio of profiled likelihoods.
    Tevatron {
        /// Subtract the unconditional minimum.
        #[serde(default)]
        subtract_mle: bool,
    },
    /// Profile likelihood ratio.
    ProfileLikelihood {
        /// One-sided, two-sided or signed.
        #[serde(default)]
        sidedness: Sidedness,
    },
    /// Maximum-likelihood estimate of the POI.
    MaxLikelihoodEstimate,
    /// Number of observed events.
    NumEvents,
}

impl Default for TestStatistic {
    fn default() -> Self {
        TestStatistic::ProfileLikelihood { sidedness: Sidedness::OneSided }
    }
}

impl TestStatistic {
    /// Resolve a legacy test-statistic code.
    ///
    /// 0 LEP, 1 Tevatron, 2 profile likelihood, 3 one-sided profile likelihood,
    /// 4 signed profile likelihood, 5 MLE, 6 number of events, 11 Tevatron with
    /// MLE subtraction.
    pub fn from_code(code: i32) -> Result<Self> {
        match code {
            0 => Ok(TestStatistic::Lep),
            1 => Ok(TestStatistic::Tevatron { subtract_mle: false }),
            11 => Ok(TestStatistic::Tevatron { subtract_mle: true }),
            2 => Ok(TestStatistic::ProfileLikelihood { sidedness: Sidedness::TwoSided }),
            3 => Ok(TestStatistic::ProfileLikelihood { sidedness: Sidedness::OneSided }),
            4 => Ok(TestStatistic::ProfileLikelihood { sidedness: Sidedness::Signed }),
            5 => Ok(TestStatistic::MaxLikelihoodEstimate),
            6 => Ok(TestStatistic::NumEvents),
            other => Err(Error::InvalidConfig(format!(
                "test statistic type {other} not supported (0-6, 11)"
            ))),
        }
    }

    /// Legacy code, used in result file names.
    pub fn code(&self) -> i32 {
        match self {
            TestStatistic::Lep => 0,
            TestStatistic::Tevatron { subtract_mle: false } => 1,
            TestStatistic::Tevatron { subtract_mle: true } => 11,
            TestStatistic::ProfileLikelihood { sidedness: Sidedness::TwoSided } => 2,
            TestStatistic::ProfileLikelihood { sidedness: Sidedness::OneSided } => 3,
            TestStatistic::ProfileLikelihood { sidedness: Sidedness::Signed } => 4,
            TestStatistic::MaxLikelihoodEstimate => 5,
            TestStatistic::NumEvents => 6,
        }
    }
}

/// When to run an initial fit on the observed data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitialFitPolicy {
    /// Fit unless the strategy makes the fit irrelevant.
    #[default]
    Auto,
    /// Never fit.
    Skip,
    /// Always fit.
    Always,
}

/// A resolved calculator + test-statistic pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Strategy {
    /// Calculator.
    pub calculator: CalculatorKind,
    /// Test statistic.
    pub test_statistic: TestStatistic,
}

impl Strategy {
    /// Resolve a calculator / test-statistic pair.
    ///
    /// The asymptotic calculator only supports the one- and two-sided profile
    /// likelihood; any other statistic falls back to the two-sided one.
    pub fn resolve(calculator: CalculatorKind, test_statistic: TestStatistic) -> Result<Self> {
        match calculator {
            CalculatorKind::Frequentist { n_toys, toys_ratio }
            | CalculatorKind::Hybrid { n_toys, toys_ratio } => {
                if n_toys == 0 {
                    return Err(Error::InvalidConfig("n_toys must be > 0".to_string()));
                }
                if !(toys_ratio.is_finite() && toys_ratio > 0.0) {
                    return Err(Error::InvalidConfig(format!(
                        "toys_ratio must be > 0, got {toys_ratio}"
                    )));
                }
            }
            CalculatorKind::Asymptotic { .. } => {}
        }

        let test_statistic = match (calculator, test_statistic) {
            (
                CalculatorKind::Asymptotic { .. },
                TestStatistic::ProfileLikelihood {
                    sidedness: Sidedness::OneSided | Sidedness::TwoSided,
                },
            ) => test_statistic,
            (CalculatorKind::Asymptotic { .. }, other) => {
                log::warn!(
                    "asymptotic calculator supports only the profile likelihood; using two-sided PL instead of {:?}",
                    other
                );
                TestStatistic::ProfileLikelihood { sidedness: Sidedness::TwoSided }
            }
            (_, ts) => ts,
        };

        Ok(Self { calculator, test_statistic })
    }

    /// Resolve from legacy integer codes.
    pub fn from_codes(calculator: i32, test_statistic: i32, n_toys: usize) -> Result<Self> {
        Self::resolve(
            CalculatorKind::from_code(calculator, n_toys)?,
            TestStatistic::from_code(test_statistic)?,
        )
    }

    /// Whether an initial fit to the observed data should run.
    ///
    /// By default the fit is skipped for the LEP statistic and for asymptotic
    /// calculators using nominal Asimov data.
    pub fn wants_initial_fit(&self, policy: InitialFitPolicy) -> bool {
        match policy {
            InitialFitPolicy::Skip => false,
            InitialFitPolicy::Always => true,
            InitialFitPolicy::Auto => {
                !matches!(self.test_statistic, TestStatistic::Lep)
                    && !matches!(self.calculator, CalculatorKind::Asymptotic { nominal_asimov: true })
            }
        }
    }

    /// Toys thrown under the null (s+b) hypothesis; 0 for asymptotics.
    pub fn n_toys_null(&self) -> usize {
        match self.calculator {
            CalculatorKind::Frequentist { n_toys, .. } | CalculatorKind::Hybrid { n_toys, .. } => {
                n_toys
            }
            CalculatorKind::Asymptotic { .. } => 0,
        }
    }

    /// Toys thrown under the alternate (b-only) hypothesis; 0 for asymptotics.
    pub fn n_toys_alt(&self) -> usize {
        match self.calculator {
            CalculatorKind::Frequentist { n_toys, toys_ratio }
            | CalculatorKind::Hybrid { n_toys, toys_ratio } => {
                ((n_toys as f64 / toys_ratio).round() as usize).max(1)
            }
            CalculatorKind::Asymptotic { .. } => 0,
        }
    }

    /// Default result-file stem, e.g. `Freq_CLs_grid_ts3`.
    pub fn result_tag(&self, use_cls: bool, mode: ScanMode) -> String {
        let limit_type = if use_cls { "CLs" } else { "CLs+b" };
        format!(
            "{}_{}_{}_ts{}",
            self.calculator.tag(),
            limit_type,
            mode.tag(),
            self.test_statistic.code()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_codes_roundtrip() {
        for code in [0, 1, 2, 3, 4, 5, 6, 11] {
            assert_eq!(TestStatistic::from_code(code).unwrap().code(), code);
        }
        assert!(TestStatistic::from_code(7).is_err());
        assert!(CalculatorKind::from_code(4, 100).is_err());
        assert!(matches!(
            CalculatorKind::from_code(3, 100).unwrap(),
            CalculatorKind::Asymptotic { nominal_asimov: true }
        ));
    }

    #[test]
    fn asymptotic_falls_back_to_two_sided_pl() {
        let s = Strategy::from_codes(2, 0, 0).unwrap();
        assert_eq!(
            s.test_statistic,
            TestStatistic::ProfileLikelihood { sidedness: Sidedness::TwoSided }
        );
        let s = Strategy::from_codes(2, 3, 0).unwrap();
        assert_eq!(
            s.test_statistic,
            TestStatistic::ProfileLikelihood { sidedness: Sidedness::OneSided }
        );
    }

    #[test]
    fn toy_counts_follow_ratio() {
        let s = Strategy::from_codes(0, 3, 1000).unwrap();
        assert_eq!(s.n_toys_null(), 1000);
        assert_eq!(s.n_toys_alt(), 500);
        let s = Strategy::from_codes(2, 3, 1000).unwrap();
        assert_eq!(s.n_toys_null(), 0);
        assert!(Strategy::from_codes(0, 3, 0).is_err());
    }

    #[test]
    fn initial_fit_defaults() {
        let lep = Strategy::from_codes(0, 0, 10).unwrap();
        assert!(!lep.wants_initial_fit(InitialFitPolicy::Auto));
        assert!(lep.wants_initial_fit(InitialFitPolicy::Always));

        let nominal = Strategy::from_codes(3, 3, 10).unwrap();
        assert!(!nominal.wants_initial_fit(InitialFitPolicy::Auto));

        let pl = Strategy::from_codes(0, 3, 10).unwrap();
        assert!(pl.wants_initial_fit(InitialFitPolicy::Auto));
        assert!(!pl.wants_initial_fit(InitialFitPolicy::Skip));
    }

    #[test]
    fn result_tag_matches_legacy_layout() {
        let s = Strategy::from_codes(0, 3, 10).unwrap();
        assert_eq!(s.result_tag(true, ScanMode::Fixed), "Freq_CLs_grid_ts3");
        let s = Strategy::from_codes(2, 2, 10).unwrap();
        assert_eq!(s.result_tag(false, ScanMode::Automatic), "Asym_CLs+b_auto_ts2");
    }

    #[test]
    fn strategy_deserializes_from_tagged_yaml_like_json() {
        let json = r#"{
            "calculator": {"type": "hybrid", "n_toys": 200},
            "test_statistic": {"type": "profile_likelihood", "sidedness": "signed"}
        }"#;
        let s: Strategy = serde_json::from_str(json).unwrap();
        assert_eq!(s.calculator, CalculatorKind::Hybrid { n_toys: 200, toys_ratio: 2.0 });
        assert_eq!(s.test_statistic.code(), 4);
    }
}
