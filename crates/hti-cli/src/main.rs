//! hti CLI
//!
//! Hypothesis-test inversion on binned counting experiments.

mod config;
mod report;

use anyhow::{Result, bail};
use clap::{Parser, Subcommand};
use hti_core::{InitialFit, PoiEstimate, PointEvaluator, ScanMode, safe_cls};
use hti_inference::{
    CalculatorKind, ScanConfig, TestStatistic, expected_limits_from_bands, extract_limits,
    rebuild, scan,
};
use std::path::{Path, PathBuf};

use crate::config::{AnalysisConfig, read_analysis_config};
use crate::report::{LimitReport, RebuildSummary};

#[derive(Parser)]
#[command(name = "hti")]
#[command(about = "hti - hypothesis-test inversion for counting experiments")]
#[command(version)]
struct Cli {
    /// Log verbosity level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "warn")]
    log_level: tracing::Level,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Hypothesis test at a single POI value
    Hypotest {
        /// Analysis configuration (YAML or JSON)
        #[arg(short, long)]
        config: PathBuf,

        /// Tested POI value
        #[arg(long)]
        mu: f64,

        /// Output file for results (pretty JSON). Defaults to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Threads (0 = auto).
        #[arg(long, default_value = "0")]
        threads: usize,
    },

    /// Invert the hypothesis test into an upper limit (or two-sided interval)
    UpperLimit {
        /// Analysis configuration (YAML or JSON)
        #[arg(short, long)]
        config: PathBuf,

        /// Confidence level (overrides the config)
        #[arg(long)]
        cl: Option<f64>,

        /// Scan start (overrides the config)
        #[arg(long, allow_negative_numbers = true)]
        scan_start: Option<f64>,

        /// Scan stop (overrides the config)
        #[arg(long, allow_negative_numbers = true)]
        scan_stop: Option<f64>,

        /// Scan points; a negative count selects the automatic scan
        #[arg(long, allow_negative_numbers = true)]
        scan_points: Option<i64>,

        /// Automatic (bisection) scan
        #[arg(long)]
        auto: bool,

        /// Report a two-sided interval
        #[arg(long)]
        two_sided: bool,

        /// Invert CLs+b instead of CLs
        #[arg(long)]
        clsb: bool,

        /// Legacy calculator code (0 frequentist, 1 hybrid, 2 asymptotic, 3 asymptotic nominal)
        #[arg(long)]
        calculator_type: Option<i32>,

        /// Legacy test-statistic code (0-6, 11)
        #[arg(long)]
        test_stat_type: Option<i32>,

        /// Toys for the null hypothesis
        #[arg(long)]
        n_toys: Option<usize>,

        /// Base seed for the toy ensembles
        #[arg(long)]
        seed: Option<u64>,

        /// Rebuild expected limits from background-only trials
        #[arg(long)]
        rebuild: bool,

        /// Rebuild trials (implies --rebuild)
        #[arg(long)]
        trials: Option<usize>,

        /// Result snapshot (pretty JSON). Defaults to `<result tag>_<config stem>.json`.
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Directory for plot artifacts
        #[arg(long)]
        artifacts_dir: Option<PathBuf>,

        /// Threads (0 = auto).
        #[arg(long, default_value = "0")]
        threads: usize,
    },

    /// Print version information
    Version,
}

/// Command-line overrides applied on top of the analysis config.
#[derive(Default)]
struct Overrides {
    cl: Option<f64>,
    scan_start: Option<f64>,
    scan_stop: Option<f64>,
    scan_points: Option<i64>,
    auto: bool,
    two_sided: bool,
    clsb: bool,
    calculator_type: Option<i32>,
    test_stat_type: Option<i32>,
    n_toys: Option<usize>,
    seed: Option<u64>,
    rebuild: bool,
    trials: Option<usize>,
    artifacts_dir: Option<PathBuf>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(cli.log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Hypotest { config, mu, output, threads } => {
            cmd_hypotest(&config, mu, output.as_ref(), threads)
        }
        Commands::UpperLimit {
            config,
            cl,
            scan_start,
            scan_stop,
            scan_points,
            auto,
            two_sided,
            clsb,
            calculator_type,
            test_stat_type,
            n_toys,
            seed,
            rebuild,
            trials,
            output,
            artifacts_dir,
            threads,
        } => cmd_upper_limit(
            &config,
            Overrides {
                cl,
                scan_start,
                scan_stop,
                scan_points,
                auto,
                two_sided,
                clsb,
                calculator_type,
                test_stat_type,
                n_toys,
                seed,
                rebuild,
                trials,
                artifacts_dir,
            },
            output.as_ref(),
            threads,
        ),
        Commands::Version => {
            println!("hti {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn load_config(path: &Path, threads: usize) -> Result<AnalysisConfig> {
    if threads > 0 {
        // Best-effort; the global pool can only be set once.
        let _ = rayon::ThreadPoolBuilder::new().num_threads(threads).build_global();
    }
    tracing::info!(path = %path.display(), "loading analysis config");
    read_analysis_config(path)
}

fn toys_of(kind: CalculatorKind) -> Option<usize> {
    match kind {
        CalculatorKind::Frequentist { n_toys, .. } | CalculatorKind::Hybrid { n_toys, .. } => {
            Some(n_toys)
        }
        CalculatorKind::Asymptotic { .. } => None,
    }
}

fn with_toys(kind: CalculatorKind, n: usize) -> CalculatorKind {
    match kind {
        CalculatorKind::Frequentist { toys_ratio, .. } => {
            CalculatorKind::Frequentist { n_toys: n, toys_ratio }
        }
        CalculatorKind::Hybrid { toys_ratio, .. } => CalculatorKind::Hybrid { n_toys: n, toys_ratio },
        asym @ CalculatorKind::Asymptotic { .. } => asym,
    }
}

fn apply_overrides(cfg: &mut AnalysisConfig, ov: &Overrides) -> Result<()> {
    if let Some(code) = ov.calculator_type {
        let n = ov.n_toys.or(toys_of(cfg.calculator)).unwrap_or(1000);
        cfg.calculator = CalculatorKind::from_code(code, n)?;
    } else if let Some(n) = ov.n_toys {
        cfg.calculator = with_toys(cfg.calculator, n);
    }
    if let Some(code) = ov.test_stat_type {
        cfg.test_statistic = TestStatistic::from_code(code)?;
    }
    if let Some(seed) = ov.seed {
        cfg.seed = seed;
    }

    let scan = &mut cfg.scan;
    if let Some(cl) = ov.cl {
        scan.confidence_level = cl;
    }
    if ov.clsb {
        scan.use_cls = false;
    }
    if let Some(lo) = ov.scan_start {
        scan.poi_min = lo;
    }
    if let Some(hi) = ov.scan_stop {
        scan.poi_max = hi;
    }
    if let Some(points) = ov.scan_points {
        scan.mode = ScanMode::from_points(points);
        if points >= 0 {
            scan.points = points as usize;
        }
    }
    if ov.auto {
        scan.mode = ScanMode::Automatic;
    }
    if ov.two_sided {
        cfg.two_sided = true;
    }

    if ov.rebuild || ov.trials.is_some() {
        let rb = cfg.rebuild.get_or_insert_with(Default::default);
        if let Some(trials) = ov.trials {
            rb.trials = trials;
        }
    }
    if let Some(dir) = &ov.artifacts_dir {
        cfg.output.artifacts_dir = Some(dir.clone());
    }
    Ok(())
}

fn cmd_hypotest(
    config_path: &Path,
    mu: f64,
    output: Option<&PathBuf>,
    threads: usize,
) -> Result<()> {
    let cfg = load_config(config_path, threads)?;
    let strategy = cfg.strategy()?;
    let exp = cfg.experiment(strategy)?.with_distributions(false);
    let data = cfg.data();

    tracing::info!(mu, calculator = strategy.calculator.name(), "hypotest");
    let t = exp.evaluate(mu, &data)?;
    t.validate()?;

    let output_json = serde_json::json!({
        "mu": mu,
        "calculator": strategy.calculator.name(),
        "test_statistic_type": strategy.test_statistic.code(),
        "clsb": t.null_p_value,
        "clb": t.alt_p_value,
        "cls": safe_cls(t.null_p_value, t.alt_p_value),
        "clsb_error": t.null_p_error,
        "clb_error": t.alt_p_error,
        "test_statistic": t.test_statistic,
        "expected_cls": t.expected_cls,
    });
    write_json(output, output_json)
}

fn cmd_upper_limit(
    config_path: &Path,
    ov: Overrides,
    output: Option<&PathBuf>,
    threads: usize,
) -> Result<()> {
    let mut cfg = load_config(config_path, threads)?;
    apply_overrides(&mut cfg, &ov)?;
    cfg.scan.validate()?;

    let strategy = cfg.strategy()?;
    let exp = cfg.experiment(strategy)?;
    let data = cfg.data();
    let scan_cfg: ScanConfig = cfg.scan.clone();
    let cl = scan_cfg.confidence_level;

    let best_fit = initial_fit(&cfg, &exp, &data)?;

    let start = std::time::Instant::now();
    let result = scan(&exp, &data, &scan_cfg, best_fit)?;
    tracing::info!(
        points = result.len(),
        skipped = result.skipped().len(),
        wall_time_s = start.elapsed().as_secs_f64(),
        "scan finished"
    );

    let interval = extract_limits(&result, cl, cfg.two_sided)?;
    let expected_from_bands = expected_limits_from_bands(&result, cl);

    let rebuild_summary = match &cfg.rebuild {
        Some(rb_cfg) => {
            let (lo, hi) = result.window();
            let trial_scan = scan_cfg.clone().with_window(lo, hi);
            let trial_exp = exp.clone().with_distributions(false);
            let sampler = exp.background_sampler();
            tracing::info!(trials = rb_cfg.trials, seed = rb_cfg.seed, "rebuilding expected limits");
            let distribution = rebuild(&trial_exp, &sampler, &trial_scan, rb_cfg)?;
            let band = distribution.band()?;
            Some(RebuildSummary { band, distribution })
        }
        None => None,
    };

    let result_tag = strategy.result_tag(scan_cfg.use_cls, scan_cfg.mode);
    let report = LimitReport {
        tool: "hti",
        version: env!("CARGO_PKG_VERSION"),
        input: config_path.display().to_string(),
        result_tag,
        strategy,
        confidence_level: cl,
        two_sided: cfg.two_sided,
        best_fit,
        interval,
        expected_from_bands,
        rebuild: rebuild_summary,
        scan: result,
    };

    print!("{}", report.summary_text());

    let path = output
        .cloned()
        .or_else(|| cfg.output.result_file.clone())
        .unwrap_or_else(|| report::default_result_path(&report.result_tag, config_path));
    report::write_json_pretty(&path, &report)?;
    tracing::info!(path = %path.display(), "result written");

    if let Some(dir) = &cfg.output.artifacts_dir {
        let files =
            report::write_artifacts(dir, &report.scan, cfg.two_sided, cfg.output.n_bins)?;
        tracing::info!(dir = %dir.display(), files = files.len(), "artifacts written");
    }
    Ok(())
}

/// Fit the observed data when the strategy asks for it or the scan window
/// has to be derived from the best fit.
fn initial_fit<F: InitialFit>(
    cfg: &AnalysisConfig,
    fitter: &F,
    data: &F::Data,
) -> Result<Option<PoiEstimate>> {
    let needed = cfg.scan.requires_best_fit();
    let wanted = cfg.strategy()?.wants_initial_fit(cfg.initial_fit);
    if !(needed || wanted) {
        return Ok(None);
    }
    match fitter.fit(data) {
        Ok(est) => {
            tracing::info!(best_fit = est.best_fit, std_error = est.std_error, "initial fit");
            Ok(Some(est))
        }
        Err(e) if needed => bail!("scan window needs the best fit: {e}"),
        Err(e) => {
            tracing::warn!(error = %e, "initial fit failed; scanning the configured window");
            Ok(None)
        }
    }
}

fn write_json(output: Option<&PathBuf>, value: serde_json::Value) -> Result<()> {
    if let Some(path) = output {
        std::fs::write(path, serde_json::to_string_pretty(&value)?)?;
    } else {
        println!("{}", serde_json::to_string_pretty(&value)?);
    }
    Ok(())
}
