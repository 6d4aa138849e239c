//! modqa: quality loop for synthesizer DSP modules
//!
//! Usage:
//!   modqa verify <module>          - Build, render and measure one module
//!   modqa judge <module|file.json> - Severity-ranked issues and verdict
//!   modqa fix <module>             - Apply, preview or roll back template fixes
//!   modqa orchestrate <module>     - Verify, judge and fix until pass or budget
//!   modqa check <module>           - Named pass/fail checks
//!   modqa analyze <file.wav>       - Signal analysis of a rendered file
//!   modqa list-fixes               - Fix catalogue

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use mq_pipeline::verifier::QUALITY_PASS_SCORE;
use mq_pipeline::{
    AutoFixer, FixParams, FixType, Judge, JudgmentResult, ModuleCheckSuite, Orchestrator, PipelineConfig,
    Report, ReportFormat, Verdict, VerificationResult, Verifier, VerifyOptions,
};
use mq_signal::{AudioBuffer, DecodeSupport, QualityScorer, QualityThresholds};

#[derive(Parser)]
#[command(name = "modqa", version, about = "Quality loop for synthesizer DSP modules")]
struct Cli {
    /// Project root (contains src/modules and build/)
    #[arg(long, global = true)]
    project_root: Option<PathBuf>,

    /// Pipeline configuration file (JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Print JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build, render and measure a module
    Verify {
        /// Module name (omit with --all)
        module: Option<String>,

        /// Skip the quality render and signal analysis
        #[arg(long)]
        no_quality: bool,

        /// Skip the parameter sweep
        #[arg(long)]
        no_params: bool,

        /// Skip the embedding scorer
        #[arg(long)]
        no_ai: bool,

        /// Verify every module in the project
        #[arg(long)]
        all: bool,
    },
    /// Judge a module, or a saved verification result
    Judge {
        /// Module name or path to a VerificationResult JSON file
        target: String,
    },
    /// Apply, preview or roll back template fixes
    Fix {
        module: Option<String>,

        /// Fix type; defaults to the first auto-fix the judge suggests
        #[arg(long)]
        fix: Option<String>,

        /// List available fixes
        #[arg(long)]
        list: bool,

        /// Undo earlier fixes to this module
        #[arg(long)]
        rollback: bool,

        /// Show what would change without writing
        #[arg(long)]
        dry_run: bool,

        /// Gain factor for reduce_gain / smoothing factor for smooth_gate
        #[arg(long)]
        factor: Option<f64>,
    },
    /// Verify, judge and fix until the module passes
    Orchestrate {
        module: String,

        #[arg(long)]
        max_iterations: Option<usize>,

        /// One verify + judge pass, no fixes
        #[arg(long)]
        single: bool,

        /// Apply template fixes automatically
        #[arg(long)]
        auto: bool,
    },
    /// Run the per-module check suite
    Check { module: String },
    /// Analyze a rendered audio file
    Analyze {
        file: PathBuf,

        /// THD limit (%)
        #[arg(long)]
        thd_max: Option<f64>,

        /// Clipping limit (%)
        #[arg(long)]
        clipping_max: Option<f64>,

        /// Minimum harmonic-to-noise ratio (dB)
        #[arg(long)]
        hnr_min: Option<f64>,
    },
    /// List the fix catalogue
    ListFixes,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let format = if cli.json { ReportFormat::Json } else { ReportFormat::Text };
    let config = load_config(cli.config.as_deref(), cli.project_root)?;

    let passed = match cli.command {
        Commands::Verify {
            module,
            no_quality,
            no_params,
            no_ai,
            all,
        } => {
            let options = VerifyOptions {
                run_quality: !no_quality,
                run_params: !no_params,
                run_ai: !no_ai,
            };
            verify(&config, module, all, &options, format)?
        }
        Commands::Judge { target } => judge(&config, &target, format)?,
        Commands::Fix {
            module,
            fix,
            list,
            rollback,
            dry_run,
            factor,
        } => {
            if list {
                list_fixes(format)
            } else {
                let module = module.context("fix needs a module name")?;
                let params = FixParams {
                    factor,
                    ..Default::default()
                };
                run_fix(&config, &module, fix.as_deref(), rollback, dry_run, &params, format)?
            }
        }
        Commands::Orchestrate {
            module,
            max_iterations,
            single,
            auto,
        } => orchestrate(&config, &module, max_iterations, single, auto, format)?,
        Commands::Check { module } => check(&config, &module, format)?,
        Commands::Analyze {
            file,
            thd_max,
            clipping_max,
            hnr_min,
        } => {
            let mut thresholds = QualityThresholds::default();
            if let Some(v) = thd_max {
                thresholds = thresholds.with_thd_max(v);
            }
            if let Some(v) = clipping_max {
                thresholds = thresholds.with_clipping_max(v);
            }
            if let Some(v) = hnr_min {
                thresholds = thresholds.with_hnr_min(v);
            }
            analyze(&file, thresholds, format)?
        }
        Commands::ListFixes => list_fixes(format),
    };

    if !passed {
        std::process::exit(1);
    }
    Ok(())
}

fn load_config(path: Option<&Path>, project_root: Option<PathBuf>) -> Result<PipelineConfig> {
    let mut config = match path {
        Some(path) => PipelineConfig::load(path).with_context(|| format!("Failed to load {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    if let Some(root) = project_root {
        config = config.with_project_root(root);
    }
    config.validate().context("Invalid pipeline configuration")?;
    Ok(config)
}

fn verifier(config: &PipelineConfig) -> Result<Verifier> {
    Verifier::from_config(config).context("Failed to set up the verifier")
}

fn verify(
    config: &PipelineConfig,
    module: Option<String>,
    all: bool,
    options: &VerifyOptions,
    format: ReportFormat,
) -> Result<bool> {
    let verifier = verifier(config)?;

    if all {
        let modules = config
            .layout()
            .module_names()
            .with_context(|| format!("No modules under {}", config.project_root.display()))?;
        let results = verifier.verify_all(&modules, options)?;
        let passed = results.iter().all(|r| r.success);

        match format {
            ReportFormat::Json => println!("{}", serde_json::to_string_pretty(&results)?),
            ReportFormat::Text => {
                for result in &results {
                    println!("{}", result.to_text());
                }
                let ok = results.iter().filter(|r| r.success).count();
                println!("{}/{} modules passed", ok, results.len());
            }
        }
        return Ok(passed);
    }

    let Some(module) = module else {
        bail!("verify needs a module name or --all");
    };
    let result = verifier.verify(&module, options)?;
    println!("{}", result.generate(format));
    Ok(result.success)
}

fn judge(config: &PipelineConfig, target: &str, format: ReportFormat) -> Result<bool> {
    let path = Path::new(target);
    let verification: VerificationResult = if target.ends_with(".json") && path.is_file() {
        let text = std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", target))?;
        serde_json::from_str(&text).with_context(|| format!("{} is not a verification result", target))?
    } else {
        verifier(config)?.verify(target, &VerifyOptions::default())?
    };

    let judgment = Judge::for_module(&verification.config).judge(&verification);
    println!("{}", judgment.generate(format));
    Ok(judgment.verdict == Verdict::Pass)
}

/// First auto-fix the judge offers, priority issues first
fn suggested_fix(judgment: &JudgmentResult) -> Option<FixType> {
    judgment
        .priority_issues()
        .find_map(|i| i.auto_fix_type)
        .or_else(|| judgment.issues.iter().find_map(|i| i.auto_fix_type))
}

fn run_fix(
    config: &PipelineConfig,
    module: &str,
    fix: Option<&str>,
    rollback: bool,
    dry_run: bool,
    params: &FixParams,
    format: ReportFormat,
) -> Result<bool> {
    let mut fixer = AutoFixer::new(config.layout());

    if rollback {
        let found = fixer
            .recover_ledger(module)
            .with_context(|| format!("Failed to read backups for {}", module))?;
        let restored = found > 0 && fixer.rollback(module);
        let message = if found == 0 {
            format!("No backups found for {}", module)
        } else if restored {
            format!("Rolled back {} change(s) to {}", found, module)
        } else {
            format!("Rollback of {} failed", module)
        };
        match format {
            ReportFormat::Json => println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "module_name": module,
                    "success": restored,
                    "restored": if restored { found } else { 0 },
                    "message": message,
                }))?
            ),
            ReportFormat::Text => println!("{}", message),
        }
        return Ok(restored);
    }

    let fix = match fix {
        Some(name) => name.parse::<FixType>()?,
        None => {
            let verification = verifier(config)?.verify(module, &VerifyOptions::default())?;
            let judgment = Judge::for_module(&verification.config).judge(&verification);
            match suggested_fix(&judgment) {
                Some(fix) => fix,
                None => {
                    println!("{}: no auto-fixable issues ({})", module, judgment.verdict);
                    return Ok(judgment.verdict == Verdict::Pass);
                }
            }
        }
    };

    let result = if dry_run {
        fixer.dry_run(module, fix, params)?
    } else {
        fixer.apply_fix(module, fix, params)?
    };

    match format {
        ReportFormat::Json => println!("{}", result.to_json()),
        ReportFormat::Text => {
            println!("[{}] {}", if result.success { "OK" } else { "FAIL" }, result.message);
            if let Some(backup) = &result.backup_path {
                println!("Backup: {}", backup.display());
            }
        }
    }
    Ok(result.success)
}

fn orchestrate(
    config: &PipelineConfig,
    module: &str,
    max_iterations: Option<usize>,
    single: bool,
    auto: bool,
    format: ReportFormat,
) -> Result<bool> {
    let mut orchestrator = Orchestrator::new(verifier(config)?).with_auto_fix(auto);
    if let Some(n) = max_iterations {
        orchestrator = orchestrator.with_max_iterations(n);
    }

    if single {
        let (verification, judgment) = orchestrator.run_iteration(module)?;
        match format {
            ReportFormat::Json => println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "verification": verification,
                    "judgment": judgment,
                }))?
            ),
            ReportFormat::Text => {
                println!("{}", verification.to_text());
                println!("{}", judgment.to_text());
            }
        }
        return Ok(judgment.verdict == Verdict::Pass);
    }

    let session = orchestrator.run(module)?;
    println!("{}", session.generate(format));
    Ok(session.success)
}

fn check(config: &PipelineConfig, module: &str, format: ReportFormat) -> Result<bool> {
    let verifier = verifier(config)?;
    let suite = ModuleCheckSuite::new(verifier.renderer(), config.layout())
        .with_capabilities(*verifier.capabilities())
        .with_sample_rate(config.sample_rate)
        .with_quality_duration(config.quality_duration)
        .with_timeout(config.quality_timeout());

    let report = suite.run(module)?;
    println!("{}", report.generate(format));
    Ok(report.passed)
}

fn analyze(file: &Path, thresholds: QualityThresholds, format: ReportFormat) -> Result<bool> {
    let audio = AudioBuffer::load(file, &DecodeSupport::default())
        .with_context(|| format!("Failed to load {}", file.display()))?;
    let name = file
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| file.display().to_string());

    let report = QualityScorer::new(thresholds).score(&audio, &name);
    let score = report.overall_quality_score.round() as u32;

    match format {
        ReportFormat::Json => println!("{}", report.to_json()),
        ReportFormat::Text => {
            println!("{}", "=".repeat(60));
            println!("ANALYSIS: {} ({:.2}s @ {} Hz)", name, audio.duration(), audio.sample_rate());
            println!("{}", "=".repeat(60));
            if let Some(thd) = &report.thd {
                println!("THD: {:.2}% (fundamental {:.1} Hz)", thd.thd_percent, thd.fundamental_freq);
            }
            if let Some(aliasing) = &report.aliasing {
                println!("Aliasing: {:.1} dB", aliasing.alias_ratio_db);
            }
            if let Some(h) = &report.harmonics {
                println!("Character: {} (warmth {:.2})", h.character.as_str(), h.warmth_ratio);
            }
            if let Some(s) = &report.spectral {
                println!("Spectral entropy: {:.2}, HNR: {:.1} dB", s.spectral_entropy, s.harmonic_to_noise_ratio);
            }
            if let Some(env) = &report.envelope {
                if let Some(attack) = env.attack_time_ms {
                    println!("Attack: {:.0} ms", attack);
                }
            }
            println!("Quality Score: {}/100", score);
            for issue in &report.issues {
                println!("  - {}", issue);
            }
        }
    }
    Ok(score >= QUALITY_PASS_SCORE)
}

fn list_fixes(format: ReportFormat) -> bool {
    let fixes = AutoFixer::available_fixes();
    match format {
        ReportFormat::Json => println!(
            "{}",
            serde_json::to_string_pretty(&fixes).unwrap_or_else(|_| "[]".into())
        ),
        ReportFormat::Text => {
            println!("Available fixes:");
            for fix in &fixes {
                println!("  {:<16} [{}] {}", fix.name.as_str(), fix.target.as_str(), fix.description);
            }
        }
    }
    true
}
