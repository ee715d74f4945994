//! Analysis configuration (YAML, or JSON since YAML is a superset).
//!
//! One file drives the whole inversion: the counting model and its observed
//! data, the calculator / test-statistic strategy, the scan, the optional
//! expected-limit rebuild and the outputs.

use anyhow::Result;
use hti_inference::{
    CalculatorKind, CountingData, CountingExperiment, InitialFitPolicy, RebuildConfig, ScanConfig,
    Strategy, TestStatistic,
};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AnalysisConfig {
    pub model: ModelSection,
    #[serde(default)]
    pub calculator: CalculatorKind,
    #[serde(default)]
    pub test_statistic: TestStatistic,
    #[serde(default)]
    pub initial_fit: InitialFitPolicy,
    /// Base seed of the toy ensembles.
    #[serde(default)]
    pub seed: u64,
    #[serde(default)]
    pub scan: ScanConfig,
    #[serde(default)]
    pub two_sided: bool,
    /// Present = rebuild expected limits from background-only trials.
    #[serde(default)]
    pub rebuild: Option<RebuildConfig>,
    #[serde(default)]
    pub output: OutputSection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelSection {
    pub signal: Vec<f64>,
    pub background: Vec<f64>,
    pub observed: Vec<f64>,
    #[serde(default)]
    pub poi_bounds: Option<(f64, f64)>,
    /// Relative background uncertainty (hybrid calculator prior).
    #[serde(default)]
    pub background_uncertainty: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OutputSection {
    /// Result snapshot; defaults to `<result tag>_<config stem>.json`.
    pub result_file: Option<PathBuf>,
    /// Directory for plot artifacts (none = no artifacts).
    pub artifacts_dir: Option<PathBuf>,
    /// Histogram bins of the test-statistic artifacts.
    pub n_bins: usize,
}

impl Default for OutputSection {
    fn default() -> Self {
        Self { result_file: None, artifacts_dir: None, n_bins: 50 }
    }
}

pub fn read_analysis_config(path: &Path) -> Result<AnalysisConfig> {
    let bytes = std::fs::read(path)?;
    let cfg: AnalysisConfig = serde_yaml_ng::from_slice(&bytes)?;
    Ok(cfg)
}

impl AnalysisConfig {
    pub fn strategy(&self) -> hti_core::Result<Strategy> {
        Strategy::resolve(self.calculator, self.test_statistic)
    }

    pub fn experiment(&self, strategy: Strategy) -> hti_core::Result<CountingExperiment> {
        let m = &self.model;
        let mut exp = CountingExperiment::new(m.signal.clone(), m.background.clone(), strategy)?
            .with_seed(self.seed);
        if let Some((lo, hi)) = m.poi_bounds {
            exp = exp.with_poi_bounds(lo, hi)?;
        }
        if let Some(rel) = m.background_uncertainty {
            exp = exp.with_background_uncertainty(rel)?;
        }
        Ok(exp)
    }

    pub fn data(&self) -> CountingData {
        CountingData::new(self.model.observed.clone())
    }
}
