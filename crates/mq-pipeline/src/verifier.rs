//! Module verification
//!
//! Build once, then per module: load its test config, take a short gated
//! render for levels, a longer render for signal analysis, sweep the
//! parameters and optionally ask the embedding scorer. Every stage past the
//! build degrades to a note on failure rather than aborting the run.

use crate::ai::{AiAnalysis, EmbeddingScorer, ScriptScorer};
use crate::capabilities::Capabilities;
use crate::config::PipelineConfig;
use crate::layout::ProjectLayout;
use crate::module_config::ModuleConfig;
use crate::renderer::{CliRenderer, RenderMetrics, RenderRequest, Renderer, GATE_ON};
use crate::sweep::{ParamRangeAnalysis, ParameterIssue, ParameterSweep};
use crate::toolchain::{BuildOutcome, Builder, CommandBuilder};
use crate::Result;
use mq_signal::{AudioBuffer, QualityReport, QualityScorer};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Quality score a module must reach to verify
pub const QUALITY_PASS_SCORE: u32 = 70;

// ============================================================================
// Results
// ============================================================================

/// Flattened signal analysis of the quality render
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityMetrics {
    /// 0-100
    pub overall_score: u32,

    pub thd_percent: f64,

    /// Detected fundamental (Hz)
    pub thd_fundamental: f64,

    pub aliasing_ratio_db: f64,

    /// Even/odd harmonic energy
    pub warmth_ratio: f64,

    pub harmonic_character: String,

    pub spectral_entropy: f64,

    pub hnr_db: f64,

    pub crest_factor: f64,

    pub dynamic_range_db: f64,

    pub attack_ms: Option<f64>,

    pub decay_ms: Option<f64>,

    pub release_ms: Option<f64>,

    pub peak_amplitude: f64,

    pub issues: Vec<String>,
}

impl Default for QualityMetrics {
    fn default() -> Self {
        Self {
            overall_score: 0,
            thd_percent: 0.0,
            thd_fundamental: 0.0,
            aliasing_ratio_db: -120.0,
            warmth_ratio: 1.0,
            harmonic_character: "neutral".into(),
            spectral_entropy: 0.0,
            hnr_db: 0.0,
            crest_factor: 0.0,
            dynamic_range_db: 0.0,
            attack_ms: None,
            decay_ms: None,
            release_ms: None,
            peak_amplitude: 0.0,
            issues: Vec::new(),
        }
    }
}

impl From<&QualityReport> for QualityMetrics {
    fn from(report: &QualityReport) -> Self {
        let mut metrics = Self {
            overall_score: report.overall_quality_score.clamp(0.0, 100.0).round() as u32,
            issues: report.issues.clone(),
            ..Default::default()
        };

        if let Some(thd) = &report.thd {
            metrics.thd_percent = thd.thd_percent;
            metrics.thd_fundamental = thd.fundamental_freq;
        }
        if let Some(aliasing) = &report.aliasing {
            metrics.aliasing_ratio_db = aliasing.alias_ratio_db;
        }
        if let Some(harmonics) = &report.harmonics {
            metrics.warmth_ratio = harmonics.warmth_ratio;
            metrics.harmonic_character = harmonics.character.as_str().to_string();
        }
        if let Some(spectral) = &report.spectral {
            metrics.spectral_entropy = spectral.spectral_entropy;
            metrics.hnr_db = spectral.harmonic_to_noise_ratio;
            metrics.crest_factor = spectral.crest_factor;
            metrics.dynamic_range_db = spectral.dynamic_range_db;
        }
        if let Some(envelope) = &report.envelope {
            metrics.attack_ms = envelope.attack_time_ms;
            metrics.decay_ms = envelope.decay_time_ms;
            metrics.release_ms = envelope.release_time_ms;
            metrics.peak_amplitude = envelope.peak_amplitude;
        }
        metrics
    }
}

/// Everything measured for one module
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerificationResult {
    pub module_name: String,

    /// Build ok, no clipping over the module limit, audible, quality >= 70
    pub success: bool,

    pub build_success: bool,

    pub build_error: String,

    /// Test config in effect
    pub config: ModuleConfig,

    /// Levels from the basic render
    pub render: RenderMetrics,

    pub quality: QualityMetrics,

    pub parameter_issues: Vec<ParameterIssue>,

    pub safe_params: Vec<String>,

    pub parameter_ranges: Vec<ParamRangeAnalysis>,

    /// Absent when the scorer was not run or failed
    pub ai: Option<AiAnalysis>,

    /// Stages that degraded and why
    pub notes: Vec<String>,

    /// RFC 3339
    pub timestamp: String,
}

impl Default for VerificationResult {
    fn default() -> Self {
        Self {
            module_name: String::new(),
            success: false,
            build_success: false,
            build_error: String::new(),
            config: ModuleConfig::default(),
            render: RenderMetrics::default(),
            quality: QualityMetrics::default(),
            parameter_issues: Vec::new(),
            safe_params: Vec::new(),
            parameter_ranges: Vec::new(),
            ai: None,
            notes: Vec::new(),
            timestamp: String::new(),
        }
    }
}

impl VerificationResult {
    fn new(module_name: &str) -> Self {
        Self {
            module_name: module_name.to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            ..Default::default()
        }
    }

    /// Built, clipping under the module's limit, audible, and a quality
    /// score of at least 70. An unmeasured quality score is 0.
    pub fn meets_gates(&self) -> bool {
        self.build_success
            && self.render.clipping_percent < self.config.verifier_clipping_limit()
            && !self.render.is_silent
            && self.quality.overall_score >= QUALITY_PASS_SCORE
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| "{}".into())
    }
}

/// Stages to run after the basic render
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerifyOptions {
    pub run_quality: bool,

    pub run_params: bool,

    pub run_ai: bool,
}

impl Default for VerifyOptions {
    fn default() -> Self {
        Self {
            run_quality: true,
            run_params: true,
            run_ai: true,
        }
    }
}

impl VerifyOptions {
    /// Basic render only
    pub fn basic() -> Self {
        Self {
            run_quality: false,
            run_params: false,
            run_ai: false,
        }
    }

    pub fn without_quality(mut self) -> Self {
        self.run_quality = false;
        self
    }

    pub fn without_params(mut self) -> Self {
        self.run_params = false;
        self
    }

    pub fn without_ai(mut self) -> Self {
        self.run_ai = false;
        self
    }
}

// ============================================================================
// Verifier
// ============================================================================

/// Runs verification against injected build, render and scoring backends
pub struct Verifier {
    config: PipelineConfig,

    layout: ProjectLayout,

    capabilities: Capabilities,

    builder: Box<dyn Builder>,

    renderer: Arc<dyn Renderer>,

    scorer: Option<Arc<dyn EmbeddingScorer>>,
}

impl Verifier {
    pub fn new(config: PipelineConfig, builder: Box<dyn Builder>, renderer: Arc<dyn Renderer>) -> Self {
        Self {
            layout: config.layout(),
            config,
            capabilities: Capabilities::default(),
            builder,
            renderer,
            scorer: None,
        }
    }

    /// External tools from the pipeline config
    pub fn from_config(config: &PipelineConfig) -> Result<Self> {
        let layout = config.layout();
        let renderer = match &config.renderer_path {
            Some(path) => CliRenderer::new(path),
            None => CliRenderer::from_candidates(layout.renderer_candidates()),
        }
        .with_working_dir(layout.root())
        .with_sample_rate(config.sample_rate);

        let builder = CommandBuilder::new(&config.build_command, layout.root(), config.build_timeout())?;

        let mut verifier = Self::new(config.clone(), Box::new(builder), Arc::new(renderer));
        if !config.ai_command.is_empty() {
            let scorer = ScriptScorer::new(&config.ai_command, config.ai_timeout())?.with_working_dir(layout.root());
            verifier = verifier.with_scorer(Arc::new(scorer));
        }
        Ok(verifier)
    }

    pub fn with_scorer(mut self, scorer: Arc<dyn EmbeddingScorer>) -> Self {
        self.scorer = Some(scorer);
        self
    }

    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn layout(&self) -> &ProjectLayout {
        &self.layout
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    pub fn renderer(&self) -> &dyn Renderer {
        self.renderer.as_ref()
    }

    pub fn build(&self) -> Result<BuildOutcome> {
        log::info!("Building project");
        let outcome = self.builder.build()?;
        if !outcome.success {
            log::warn!("Build failed");
        }
        Ok(outcome)
    }

    /// Load the module's test config, build, then verify it
    pub fn verify(&self, module: &str, options: &VerifyOptions) -> Result<VerificationResult> {
        let config = ModuleConfig::load(&self.layout, module);
        let build = self.build()?;
        self.verify_with_config(module, config, options, &build)
    }

    /// Build once, then verify every module in parallel.
    ///
    /// Scorer calls still serialize on the scorer's own lock.
    pub fn verify_all(&self, modules: &[String], options: &VerifyOptions) -> Result<Vec<VerificationResult>> {
        let build = self.build()?;
        let verify_one = |module: &String| self.verify_built(module, options, &build);
        if self.capabilities.parallel {
            modules.par_iter().map(verify_one).collect()
        } else {
            modules.iter().map(verify_one).collect()
        }
    }

    /// Verify against an existing build outcome
    pub fn verify_built(&self, module: &str, options: &VerifyOptions, build: &BuildOutcome) -> Result<VerificationResult> {
        self.verify_with_config(module, ModuleConfig::load(&self.layout, module), options, build)
    }

    fn verify_with_config(
        &self,
        module: &str,
        config: ModuleConfig,
        options: &VerifyOptions,
        build: &BuildOutcome,
    ) -> Result<VerificationResult> {
        let mut result = VerificationResult::new(module);
        result.config = config;
        result.build_success = build.success;
        if !build.success {
            result.build_error = build.error.clone();
            return Ok(result);
        }

        if result.config.skip_audio_tests {
            log::info!("{}: audio tests skipped ({})", module, result.config.skip_reason_or_default());
            result
                .notes
                .push(format!("Audio tests skipped: {}", result.config.skip_reason_or_default()));
            result.success = true;
            return Ok(result);
        }

        let scratch = tempfile::Builder::new().prefix("modqa-verify-").tempdir()?;

        result.render = self.basic_render(module, scratch.path(), &mut result.notes);

        let mut rendered_wav = None;
        let quality_checked = options.run_quality && self.capabilities.signal_analysis;
        if quality_checked {
            let (metrics, wav) = self.quality_render(module, &result.config, scratch.path());
            result.quality = metrics;
            rendered_wav = wav;
        }

        if options.run_params {
            self.sweep(module, &mut result);
        }

        if options.run_ai && self.capabilities.embedding_scorer {
            if let Some(scorer) = &self.scorer {
                let wav = match rendered_wav {
                    Some(wav) => Some(wav),
                    None => self.render_for_scoring(module, scratch.path()),
                };
                match wav.map(|w| scorer.score(&w)) {
                    Some(Ok(ai)) => result.ai = Some(ai),
                    Some(Err(e)) => {
                        log::warn!("{}: embedding scorer failed: {}", module, e);
                        result.notes.push(format!("AI analysis failed: {}", e));
                    }
                    None => result.notes.push("AI analysis skipped: no render to score".into()),
                }
            }
        }

        result.success = result.meets_gates();

        log::info!(
            "{}: {} (peak {:.3}, clipping {:.2}%, quality {})",
            module,
            if result.success { "verified" } else { "failed" },
            result.render.peak_amplitude,
            result.render.clipping_percent,
            result.quality.overall_score
        );
        Ok(result)
    }

    fn basic_render(&self, module: &str, scratch: &Path, notes: &mut Vec<String>) -> RenderMetrics {
        let request = RenderRequest::basic(module, scratch.join(format!("{}_basic.wav", module)))
            .with_duration(self.config.basic_duration)
            .with_sample_rate(self.config.sample_rate)
            .with_timeout(self.config.render_timeout());

        match self.renderer.measure(&request) {
            Ok(metrics) => metrics,
            Err(e) => {
                log::warn!("{}: basic render failed: {}", module, e);
                notes.push(format!("Failed to render audio: {}", e));
                RenderMetrics::failed()
            }
        }
    }

    /// Longer render of the first scenario, analyzed in-process
    fn quality_render(&self, module: &str, config: &ModuleConfig, scratch: &Path) -> (QualityMetrics, Option<PathBuf>) {
        let output = scratch.join(format!("{}_quality.wav", module));
        let mut request = RenderRequest::new(module, &output)
            .with_duration(self.config.quality_duration)
            .with_sample_rate(self.config.sample_rate)
            .with_timeout(self.config.quality_timeout());
        if let Some(scenario) = config.first_scenario() {
            request = request.with_scenario(&scenario.name);
            if let Some(duration) = scenario.duration {
                request = request.with_duration(duration);
            }
        }

        let failed = |issue: &str| QualityMetrics {
            issues: vec![issue.to_string()],
            ..Default::default()
        };

        match self.renderer.render(&request) {
            Ok(outcome) if outcome.success() => {}
            Ok(outcome) => {
                log::warn!("{}: quality render exited with {:?}", module, outcome.exit_code);
                return (failed("Failed to render audio"), None);
            }
            Err(e) => {
                log::warn!("{}: quality render failed: {}", module, e);
                return (failed("Failed to render audio"), None);
            }
        }

        let audio = match AudioBuffer::load(&output, &self.capabilities.decode) {
            Ok(audio) => audio,
            Err(e) => {
                log::warn!("{}: could not load quality render: {}", module, e);
                return (failed("Failed to load audio"), None);
            }
        };

        let report = QualityScorer::new(config.quality_thresholds.clone()).score(&audio, module);
        log::debug!("{}: quality {:.1}", module, report.overall_quality_score);
        (QualityMetrics::from(&report), Some(output))
    }

    fn sweep(&self, module: &str, result: &mut VerificationResult) {
        let sweep = ParameterSweep::new(self.renderer.as_ref())
            .with_duration(self.config.sweep_duration)
            .with_steps(self.config.sweep_steps)
            .with_sample_rate(self.config.sample_rate)
            .with_timeout(self.config.render_timeout())
            .with_parallel(self.capabilities.parallel && self.config.parallel_sweep);

        match sweep.run(module, &result.config) {
            Ok(report) => {
                result.parameter_issues = report.issues;
                result.safe_params = report.safe_params;
                result.parameter_ranges = report.analyses;
            }
            Err(e) => {
                log::warn!("{}: parameter sweep failed: {}", module, e);
                result.notes.push(format!("Parameter sweep failed: {}", e));
            }
        }
    }

    fn render_for_scoring(&self, module: &str, scratch: &Path) -> Option<PathBuf> {
        let output = scratch.join(format!("{}_ai.wav", module));
        let request = RenderRequest::new(module, &output)
            .with_duration(self.config.quality_duration)
            .with_sample_rate(self.config.sample_rate)
            .with_param("gate", GATE_ON)
            .with_timeout(self.config.render_timeout());
        match self.renderer.render(&request) {
            Ok(outcome) if outcome.success() => Some(output),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mq_signal::QualityThresholds;

    #[test]
    fn test_quality_metrics_defaults() {
        let metrics = QualityMetrics::default();
        assert_eq!(metrics.aliasing_ratio_db, -120.0);
        assert_eq!(metrics.warmth_ratio, 1.0);
        assert_eq!(metrics.harmonic_character, "neutral");
        assert!(metrics.attack_ms.is_none());
    }

    #[test]
    fn test_quality_metrics_from_empty_report() {
        let mut report = QualityReport::empty("Osc");
        report.overall_quality_score = 84.6;
        report.issues.push("Audio is silent".into());

        let metrics = QualityMetrics::from(&report);
        assert_eq!(metrics.overall_score, 85);
        assert_eq!(metrics.issues, vec!["Audio is silent".to_string()]);
        assert_eq!(metrics.thd_percent, 0.0);
    }

    #[test]
    fn test_success_gates() {
        let mut result = VerificationResult::new("Osc");
        result.build_success = true;
        result.render = RenderMetrics {
            peak_amplitude: 0.5,
            rms_level: 0.35,
            clipping_percent: 0.0,
            is_silent: false,
        };

        // Quality never measured
        assert_eq!(result.quality.overall_score, 0);
        assert!(!result.meets_gates());

        result.quality.overall_score = 69;
        assert!(!result.meets_gates());

        result.quality.overall_score = 70;
        assert!(result.meets_gates());

        result.render.clipping_percent = 1.0;
        assert!(!result.meets_gates());
        result.config.quality_thresholds = QualityThresholds::hot_signal();
        assert!(result.meets_gates());

        result.build_success = false;
        assert!(!result.meets_gates());
    }

    #[test]
    fn test_options() {
        let options = VerifyOptions::default().without_ai().without_params();
        assert!(options.run_quality);
        assert!(!options.run_params);
        assert!(!options.run_ai);
        assert_eq!(VerifyOptions::basic(), VerifyOptions::default().without_quality().without_params().without_ai());
    }

    #[test]
    fn test_result_json_shape() {
        let result = VerificationResult::new("Osc");
        let json: serde_json::Value = serde_json::from_str(&result.to_json()).unwrap();
        assert_eq!(json["module_name"], "Osc");
        assert!(json["ai"].is_null());
        assert!(json["render"]["peak_amplitude"].is_number());
        assert!(!result.timestamp.is_empty());
    }
}
