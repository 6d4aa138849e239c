//! # mq-pipeline
//!
//! Measurement, judgment and remediation loop for synthesizer DSP modules.
//!
//! ## Features
//!
//! - **Verifier**: build, basic render, quality render, parameter sweep, AI scoring
//! - **Judge**: severity-ranked issues, score and verdict from one verification
//! - **AutoFixer**: template patches to DSP sources and test configs, with rollback
//! - **Orchestrator**: bounded verify -> judge -> fix iterations with history
//! - **Check Suite**: named per-module pass/fail checks
//!
//! External tools (renderer, build, embedding scorer) sit behind traits so the
//! whole loop can run against in-process fakes.
//!
//! ## Example
//!
//! ```rust,ignore
//! use mq_pipeline::{Judge, PipelineConfig, Verifier, VerifyOptions};
//!
//! let config = PipelineConfig::default().with_project_root("/path/to/project");
//! let verifier = Verifier::from_config(&config)?;
//!
//! let verification = verifier.verify("ChaosFlute", &VerifyOptions::default())?;
//! let judgment = Judge::for_module(&verification.config).judge(&verification);
//!
//! println!("{}: {} ({}/100)", judgment.module_name, judgment.verdict, judgment.overall_score);
//! ```

pub mod ai;
pub mod capabilities;
pub mod checks;
pub mod config;
pub mod fixer;
pub mod inference;
pub mod judge;
pub mod layout;
pub mod module_config;
pub mod orchestrator;
pub mod process;
pub mod renderer;
pub mod report;
pub mod sweep;
pub mod toolchain;
pub mod verifier;

pub use ai::{AiAnalysis, EmbeddingScorer, ScriptScorer};
pub use capabilities::Capabilities;
pub use checks::{CheckResult, ModuleCheckReport, ModuleCheckSuite};
pub use config::PipelineConfig;
pub use fixer::{AutoFixer, FixParams, FixResult, FixTarget, FixTemplate, FixType};
pub use inference::{InferenceLease, InferenceResource};
pub use judge::{classify_fix_type, Issue, Judge, JudgeThresholds, JudgmentResult, Severity, Verdict};
pub use layout::ProjectLayout;
pub use module_config::{ModuleConfig, ModuleType, SweepSettings, TestScenario};
pub use orchestrator::{
    DevelopmentSession, FixInstructions, IterationRecord, Orchestrator, SessionOutcome,
};
pub use renderer::{CliRenderer, ParamInfo, RenderMetrics, RenderOutcome, RenderRequest, Renderer};
pub use report::{Report, ReportFormat};
pub use sweep::{ParamRangeAnalysis, ParameterIssue, ParameterSweep, SweepPoint, SweepReport};
pub use toolchain::{BuildOutcome, Builder, CommandBuilder};
pub use verifier::{QualityMetrics, VerificationResult, Verifier, VerifyOptions};

use thiserror::Error;

/// Pipeline errors
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Render failed: {0}")]
    Render(String),

    #[error("Command timed out after {secs}s: {command}")]
    Timeout { command: String, secs: u64 },

    #[error("Failed to start {command}: {reason}")]
    Spawn { command: String, reason: String },

    #[error("Renderer not found (looked in: {0})")]
    RendererNotFound(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Module not found: {0}")]
    ModuleNotFound(String),

    #[error("Unknown fix type: {0}")]
    UnknownFix(String),

    #[error("Malformed tool output: {0}")]
    MalformedOutput(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),

    #[error("Signal analysis error: {0}")]
    Signal(#[from] mq_signal::SignalError),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
