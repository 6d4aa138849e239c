//! Per-module test configuration (`test_config.json`)

use crate::layout::ProjectLayout;
use mq_signal::QualityThresholds;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Broad module category, used to pick which checks apply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ModuleType {
    #[default]
    Instrument,
    Filter,
    Effect,
    Resonator,
    Utility,
}

impl ModuleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModuleType::Instrument => "instrument",
            ModuleType::Filter => "filter",
            ModuleType::Effect => "effect",
            ModuleType::Resonator => "resonator",
            ModuleType::Utility => "utility",
        }
    }
}

impl std::fmt::Display for ModuleType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Named render scenario (e.g. a drum hit pattern)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct TestScenario {
    pub name: String,

    /// Render length (seconds)
    pub duration: Option<f64>,

    /// Parameter overrides for this scenario
    pub parameters: BTreeMap<String, f64>,

    pub description: String,

    /// Parameter the renderer pulses to trigger the module
    pub trigger_param: Option<String>,
}

/// Parameter sweep settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepSettings {
    /// Parameters never swept for this module
    pub exclude: Vec<String>,

    /// Points per parameter; falls back to the pipeline default
    pub steps: Option<usize>,
}

impl Default for SweepSettings {
    fn default() -> Self {
        Self {
            exclude: Vec::new(),
            steps: None,
        }
    }
}

/// Test configuration for one module
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ModuleConfig {
    pub module_type: ModuleType,

    /// Utility modules with no meaningful audio output
    pub skip_audio_tests: bool,

    pub skip_reason: String,

    pub description: String,

    pub quality_thresholds: QualityThresholds,

    pub test_scenarios: Vec<TestScenario>,

    pub parameter_sweep: SweepSettings,
}

impl ModuleConfig {
    /// Load `test_config.json` for a module.
    ///
    /// A missing file yields defaults; an unreadable or malformed one yields
    /// defaults with a warning.
    pub fn load(layout: &ProjectLayout, module: &str) -> Self {
        Self::load_file(&layout.config_path(module))
    }

    pub fn load_file(path: &Path) -> Self {
        if !path.exists() {
            log::debug!("No test config at {}, using defaults", path.display());
            return Self::default();
        }

        let parsed = std::fs::read_to_string(path)
            .map_err(|e| e.to_string())
            .and_then(|text| serde_json::from_str::<Self>(&text).map_err(|e| e.to_string()));

        match parsed {
            Ok(config) => config,
            Err(e) => {
                log::warn!("Ignoring test config {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    pub fn first_scenario(&self) -> Option<&TestScenario> {
        self.test_scenarios.first()
    }

    /// Human-readable reason for skipping audio tests
    pub fn skip_reason_or_default(&self) -> &str {
        if self.skip_reason.is_empty() {
            "utility module"
        } else {
            &self.skip_reason
        }
    }

    /// Clipping limit the verifier applies: hot-signal modules get at least 15%
    pub fn verifier_clipping_limit(&self) -> f64 {
        let t = &self.quality_thresholds;
        if t.allow_hot_signal {
            t.clipping_max_percent.max(mq_signal::config::HOT_SIGNAL_CLIPPING_PERCENT)
        } else {
            t.clipping_max_percent
        }
    }

    pub fn with_module_type(mut self, module_type: ModuleType) -> Self {
        self.module_type = module_type;
        self
    }

    pub fn with_thresholds(mut self, thresholds: QualityThresholds) -> Self {
        self.quality_thresholds = thresholds;
        self
    }

    pub fn skipping_audio(mut self, reason: &str) -> Self {
        self.skip_audio_tests = true;
        self.skip_reason = reason.to_string();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = ModuleConfig::load(&ProjectLayout::new(dir.path()), "Nope");
        assert_eq!(config, ModuleConfig::default());
        assert_eq!(config.module_type, ModuleType::Instrument);
        assert_eq!(config.quality_thresholds.thd_max_percent, 15.0);
    }

    #[test]
    fn test_malformed_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test_config.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert_eq!(ModuleConfig::load_file(&path), ModuleConfig::default());
    }

    #[test]
    fn test_partial_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test_config.json");
        std::fs::write(
            &path,
            r#"{
                "module_type": "filter",
                "quality_thresholds": { "thd_max_percent": 40, "allow_hot_signal": true },
                "test_scenarios": [
                    { "name": "hits", "duration": 2.0, "parameters": { "decay": 0.3 }, "trigger_param": "trig" }
                ],
                "parameter_sweep": { "exclude": ["seed"] }
            }"#,
        )
        .unwrap();

        let config = ModuleConfig::load_file(&path);
        assert_eq!(config.module_type, ModuleType::Filter);
        assert_eq!(config.quality_thresholds.thd_max_percent, 40.0);
        assert_eq!(config.quality_thresholds.clipping_max_percent, 1.0);
        assert_eq!(config.first_scenario().unwrap().name, "hits");
        assert_eq!(config.test_scenarios[0].parameters["decay"], 0.3);
        assert_eq!(config.parameter_sweep.exclude, vec!["seed".to_string()]);
        assert!(config.parameter_sweep.steps.is_none());
    }

    #[test]
    fn test_verifier_clipping_limit() {
        let plain = ModuleConfig::default();
        assert_eq!(plain.verifier_clipping_limit(), 1.0);

        let hot = ModuleConfig::default().with_thresholds(QualityThresholds::default().with_hot_signal(true));
        assert_eq!(hot.verifier_clipping_limit(), 15.0);

        let hotter = ModuleConfig::default().with_thresholds(
            QualityThresholds::default().with_hot_signal(true).with_clipping_max(20.0),
        );
        assert_eq!(hotter.verifier_clipping_limit(), 20.0);
    }
}
