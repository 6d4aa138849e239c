//! Per-module pass/fail checks
//!
//! A lighter companion to the verifier: each check renders, measures one
//! thing and reports a named `CheckResult`. Analysis checks share one
//! quality render. Quiet audio and modules that skip audio tests pass as
//! skipped.

use crate::capabilities::Capabilities;
use crate::layout::ProjectLayout;
use crate::module_config::{ModuleConfig, ModuleType};
use crate::renderer::{RenderRequest, Renderer};
use crate::Result;
use mq_signal::config::HOT_SIGNAL_CLIPPING_PERCENT;
use mq_signal::{
    analyze_envelope, analyze_harmonics, compute_spectral_richness, detect_aliasing, measure_thd, AudioBuffer,
    AudioStats,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::Path;
use std::time::{Duration, Instant};

/// Largest acceptable |DC offset|
pub const DC_OFFSET_MAX: f64 = 0.01;

/// Silent-sample share above which output counts as nearly silent
pub const SILENCE_RATIO_MAX: f64 = 0.95;

/// Aliasing above this (dB relative to the fundamental) fails
pub const ALIASING_FAIL_DB: f64 = -50.0;

/// Below this RMS the analysis checks are skipped
const QUIET_RMS: f64 = 0.001;

/// One named check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    pub name: String,

    pub passed: bool,

    pub message: String,

    #[serde(default)]
    pub details: Value,
}

impl CheckResult {
    pub fn pass(name: &str, message: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            passed: true,
            message: message.into(),
            details: Value::Null,
        }
    }

    pub fn fail(name: &str, message: impl Into<String>) -> Self {
        Self {
            passed: false,
            ..Self::pass(name, message)
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }
}

/// All checks for one module
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleCheckReport {
    pub module_name: String,

    pub passed: bool,

    pub checks: Vec<CheckResult>,

    pub duration_ms: u64,
}

impl ModuleCheckReport {
    pub fn failed_checks(&self) -> impl Iterator<Item = &CheckResult> {
        self.checks.iter().filter(|c| !c.passed)
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| "{}".into())
    }
}

/// Runs the named checks against a renderer
pub struct ModuleCheckSuite<'a> {
    renderer: &'a dyn Renderer,

    layout: ProjectLayout,

    capabilities: Capabilities,

    /// Analysis render length (seconds)
    quality_duration: f64,

    sample_rate: u32,

    timeout: Duration,
}

impl<'a> ModuleCheckSuite<'a> {
    pub fn new(renderer: &'a dyn Renderer, layout: ProjectLayout) -> Self {
        Self {
            renderer,
            layout,
            capabilities: Capabilities::default(),
            quality_duration: 3.0,
            sample_rate: 48000,
            timeout: Duration::from_secs(60),
        }
    }

    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    pub fn with_quality_duration(mut self, seconds: f64) -> Self {
        self.quality_duration = seconds;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn run(&self, module: &str) -> Result<ModuleCheckReport> {
        let start = Instant::now();
        let config = ModuleConfig::load(&self.layout, module);
        let scratch = tempfile::Builder::new().prefix("modqa-check-").tempdir()?;

        let mut checks = vec![
            self.check_compilation(module),
            self.check_basic_render(module, scratch.path()),
            self.check_audio_stability(module, &config, scratch.path()),
        ];
        checks.extend(self.analysis_checks(module, &config, scratch.path()));

        let passed = checks.iter().all(|c| c.passed);
        for check in checks.iter().filter(|c| !c.passed) {
            log::warn!("{}: {} failed: {}", module, check.name, check.message);
        }
        Ok(ModuleCheckReport {
            module_name: module.to_string(),
            passed,
            checks,
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }

    fn render(&self, request: RenderRequest) -> std::result::Result<AudioBuffer, &'static str> {
        let output = request.output.clone();
        match self.renderer.render(&request.with_sample_rate(self.sample_rate)) {
            Ok(outcome) if outcome.success() => {}
            _ => return Err("Failed to render audio"),
        }
        AudioBuffer::load(&output, &self.capabilities.decode).map_err(|_| "Failed to load audio")
    }

    pub fn check_compilation(&self, module: &str) -> CheckResult {
        match self.renderer.list_params(module) {
            Ok(params) => CheckResult::pass("compilation", "Module compiles and loads correctly")
                .with_details(json!({ "params": params.len() })),
            Err(e) => CheckResult::fail("compilation", format!("Failed to load module: {}", e)),
        }
    }

    pub fn check_basic_render(&self, module: &str, scratch: &Path) -> CheckResult {
        const NAME: &str = "basic_render";
        let request = RenderRequest::new(module, scratch.join(format!("{}_basic.wav", module))).with_timeout(self.timeout);
        let audio = match self.render(request) {
            Ok(audio) => audio,
            Err(message) => return CheckResult::fail(NAME, message),
        };

        let stats = AudioStats::calculate(audio.samples());
        let details = json!({ "stats": stats });
        if stats.has_nan {
            return CheckResult::fail(NAME, "Audio contains NaN values").with_details(details);
        }
        if stats.has_inf {
            return CheckResult::fail(NAME, "Audio contains Inf values").with_details(details);
        }
        CheckResult::pass(NAME, "Basic render successful").with_details(details)
    }

    /// DC offset, clipping against the module's hot-signal policy, silence
    pub fn check_audio_stability(&self, module: &str, config: &ModuleConfig, scratch: &Path) -> CheckResult {
        const NAME: &str = "audio_stability";
        if config.skip_audio_tests {
            return CheckResult::pass(NAME, format!("Skipped ({})", config.skip_reason_or_default()));
        }

        let request =
            RenderRequest::new(module, scratch.join(format!("{}_stability.wav", module))).with_timeout(self.timeout);
        let audio = match self.render(request) {
            Ok(audio) => audio,
            Err(message) => return CheckResult::fail(NAME, message),
        };

        let stats = AudioStats::calculate(audio.samples());
        let clipping_limit = stability_clipping_limit(config);
        let mut issues = Vec::new();

        if stats.dc_offset.abs() > DC_OFFSET_MAX {
            issues.push(format!("High DC offset: {:.4}", stats.dc_offset));
        }
        let clipping_percent = stats.clipping_ratio * 100.0;
        if clipping_percent > clipping_limit {
            issues.push(format!(
                "Excessive clipping: {:.1}% (threshold: {:.1}%)",
                clipping_percent, clipping_limit
            ));
        }
        if stats.silence_ratio > SILENCE_RATIO_MAX {
            issues.push("Audio is nearly silent".to_string());
        }

        let details = json!({ "stats": stats, "clipping_limit_percent": clipping_limit });
        if issues.is_empty() {
            CheckResult::pass(NAME, "Audio is stable").with_details(details)
        } else {
            CheckResult::fail(NAME, issues.join("; ")).with_details(details)
        }
    }

    /// thd, aliasing, harmonic_character, spectral_richness, envelope
    pub fn analysis_checks(&self, module: &str, config: &ModuleConfig, scratch: &Path) -> Vec<CheckResult> {
        const NAMES: [&str; 5] = ["thd", "aliasing", "harmonic_character", "spectral_richness", "envelope"];
        let skip_all = |message: &str| -> Vec<CheckResult> { NAMES.iter().map(|n| CheckResult::pass(n, message)).collect() };

        if !self.capabilities.signal_analysis {
            return skip_all("Signal analysis not available (skipped)");
        }
        if config.skip_audio_tests {
            return skip_all(&format!("Skipped ({})", config.skip_reason_or_default()));
        }

        let request = RenderRequest::new(module, scratch.join(format!("{}_quality.wav", module)))
            .with_duration(self.quality_duration)
            .with_timeout(self.timeout);
        let audio = match self.render(request) {
            Ok(audio) => audio,
            Err(message) => {
                return vec![
                    CheckResult::fail("thd", message),
                    CheckResult::fail("aliasing", message),
                    CheckResult::pass("harmonic_character", format!("{} (skipped)", message)),
                    CheckResult::pass("spectral_richness", format!("{} (skipped)", message)),
                    CheckResult::pass("envelope", format!("{} (skipped)", message)),
                ];
            }
        };

        let rms = audio.rms();
        if rms < QUIET_RMS {
            return NAMES
                .iter()
                .map(|n| CheckResult::pass(n, "Audio too quiet (skipped)").with_details(json!({ "rms": rms })))
                .collect();
        }

        let samples = audio.samples();
        let sr = audio.sample_rate();
        vec![
            thd_check(samples, sr, config),
            aliasing_check(samples, sr),
            harmonic_check(samples, sr),
            spectral_check(samples, sr),
            envelope_check(samples, sr, config),
        ]
    }
}

/// 15 % for hot-signal modules, otherwise the configured limit
pub fn stability_clipping_limit(config: &ModuleConfig) -> f64 {
    if config.quality_thresholds.allow_hot_signal {
        HOT_SIGNAL_CLIPPING_PERCENT
    } else {
        config.quality_thresholds.clipping_max_percent
    }
}

fn thd_check(samples: &[f64], sr: u32, config: &ModuleConfig) -> CheckResult {
    let thd = measure_thd(samples, sr, None);
    let limit = config.quality_thresholds.thd_max_percent;
    let details = json!({
        "thd_percent": thd.thd_percent,
        "fundamental_freq": thd.fundamental_freq,
        "module_type": config.module_type,
    });
    if thd.thd_percent > limit {
        CheckResult::fail("thd", format!("High THD: {:.1}% (threshold: {}%)", thd.thd_percent, limit)).with_details(details)
    } else {
        CheckResult::pass("thd", format!("THD: {:.1}%", thd.thd_percent)).with_details(details)
    }
}

fn aliasing_check(samples: &[f64], sr: u32) -> CheckResult {
    let aliasing = detect_aliasing(samples, sr, None);
    let details = json!({
        "alias_ratio_db": aliasing.alias_ratio_db,
        "input_frequency": aliasing.input_frequency,
        "detected_aliases": aliasing.detected_aliases.len(),
    });
    if aliasing.exceeds(ALIASING_FAIL_DB) {
        CheckResult::fail("aliasing", format!("Aliasing detected: {:.1} dB", aliasing.alias_ratio_db)).with_details(details)
    } else {
        CheckResult::pass(
            "aliasing",
            format!("No significant aliasing ({:.1} dB)", aliasing.alias_ratio_db),
        )
        .with_details(details)
    }
}

fn harmonic_check(samples: &[f64], sr: u32) -> CheckResult {
    let h = analyze_harmonics(samples, sr, None);
    CheckResult::pass(
        "harmonic_character",
        format!("Character: {} (warmth: {:.2})", h.character.as_str(), h.warmth_ratio),
    )
    .with_details(json!({
        "character": h.character.as_str(),
        "warmth_ratio": h.warmth_ratio,
        "even_energy": h.even_harmonic_energy,
        "odd_energy": h.odd_harmonic_energy,
        "dominant_harmonics": h.dominant_harmonics.iter().take(3).collect::<Vec<_>>(),
    }))
}

fn spectral_check(samples: &[f64], sr: u32) -> CheckResult {
    let s = compute_spectral_richness(samples, sr);
    CheckResult::pass(
        "spectral_richness",
        format!(
            "Entropy: {:.2}, HNR: {:.0} dB",
            s.spectral_entropy, s.harmonic_to_noise_ratio
        ),
    )
    .with_details(json!(s))
}

fn envelope_check(samples: &[f64], sr: u32, config: &ModuleConfig) -> CheckResult {
    if config.module_type == ModuleType::Filter {
        return CheckResult::pass("envelope", "Filter module (skipped)");
    }

    let env = analyze_envelope(samples, sr);
    let mut parts = Vec::new();
    if let Some(attack) = env.attack_time_ms {
        parts.push(format!("Attack: {:.0}ms", attack));
    }
    if let Some(decay) = env.decay_time_ms {
        parts.push(format!("Decay: {:.0}ms", decay));
    }
    parts.push(format!("Onset: {:.3}", env.onset_strength));

    CheckResult::pass("envelope", parts.join(", ")).with_details(json!(env))
}

#[cfg(test)]
mod tests {
    use super::*;
    use mq_signal::QualityThresholds;

    #[test]
    fn test_stability_clipping_policy() {
        let plain = ModuleConfig::default().with_thresholds(QualityThresholds::default().with_clipping_max(2.0));
        assert_eq!(stability_clipping_limit(&plain), 2.0);

        // Hot modules get the fixed hot-signal limit, even below their own setting
        let hot = ModuleConfig::default()
            .with_thresholds(QualityThresholds::default().with_clipping_max(20.0).with_hot_signal(true));
        assert_eq!(stability_clipping_limit(&hot), HOT_SIGNAL_CLIPPING_PERCENT);
    }

    #[test]
    fn test_check_result_json() {
        let check = CheckResult::fail("thd", "High THD").with_details(json!({ "thd_percent": 22.0 }));
        let value: Value = serde_json::from_str(&serde_json::to_string(&check).unwrap()).unwrap();
        assert_eq!(value["name"], "thd");
        assert_eq!(value["passed"], false);
        assert_eq!(value["details"]["thd_percent"], 22.0);
    }
}
