//! Tool-level pipeline configuration

use crate::layout::ProjectLayout;
use crate::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration for one pipeline run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Project root (contains `src/modules` and `build/`)
    pub project_root: PathBuf,

    /// Explicit renderer executable; otherwise the layout candidates are tried
    pub renderer_path: Option<PathBuf>,

    /// Build command, run from the project root
    pub build_command: Vec<String>,

    /// Render sample rate (Hz)
    pub sample_rate: u32,

    /// Basic render length (seconds)
    pub basic_duration: f64,

    /// Quality render length (seconds)
    pub quality_duration: f64,

    /// Per-point sweep render length (seconds)
    pub sweep_duration: f64,

    /// Default sweep points per parameter
    pub sweep_steps: usize,

    /// Orchestrator iteration budget
    pub max_iterations: usize,

    /// Build timeout (seconds)
    pub build_timeout_secs: u64,

    /// Basic and sweep render timeout (seconds)
    pub render_timeout_secs: u64,

    /// Quality render timeout (seconds)
    pub quality_timeout_secs: u64,

    /// Embedding scorer timeout (seconds)
    pub ai_timeout_secs: u64,

    /// Embedding scorer command (program then args; the WAV path is appended)
    pub ai_command: Vec<String>,

    /// Render sweep points in parallel
    pub parallel_sweep: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            project_root: PathBuf::from("."),
            renderer_path: None,
            build_command: vec!["just".into(), "build".into()],
            sample_rate: 48000,
            basic_duration: 2.0,
            quality_duration: 3.0,
            sweep_duration: 1.5,
            sweep_steps: 10,
            max_iterations: 10,
            build_timeout_secs: 180,
            render_timeout_secs: 30,
            quality_timeout_secs: 60,
            ai_timeout_secs: 120,
            ai_command: vec![
                "python3".into(),
                "test/ai_audio_analysis.py".into(),
                "--clap-only".into(),
                "--json".into(),
                "--file".into(),
            ],
            parallel_sweep: true,
        }
    }
}

impl PipelineConfig {
    /// Load from a JSON file; missing keys keep their defaults
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Quick settings for fast iteration: shorter renders, coarser sweep
    pub fn quick() -> Self {
        Self {
            quality_duration: 1.5,
            sweep_duration: 0.75,
            sweep_steps: 5,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(PipelineError::Config("sample_rate must be positive".into()));
        }
        if self.sweep_steps < 2 {
            return Err(PipelineError::Config("sweep_steps must be at least 2".into()));
        }
        if self.max_iterations == 0 {
            return Err(PipelineError::Config("max_iterations must be at least 1".into()));
        }
        if self.build_command.is_empty() {
            return Err(PipelineError::Config("build_command is empty".into()));
        }
        for (name, secs) in [
            ("basic_duration", self.basic_duration),
            ("quality_duration", self.quality_duration),
            ("sweep_duration", self.sweep_duration),
        ] {
            if !(secs > 0.0) {
                return Err(PipelineError::Config(format!("{} must be positive", name)));
            }
        }
        Ok(())
    }

    pub fn layout(&self) -> ProjectLayout {
        ProjectLayout::new(&self.project_root)
    }

    /// Explicit renderer path, or the first existing layout candidate
    pub fn resolve_renderer(&self) -> Result<PathBuf> {
        if let Some(path) = &self.renderer_path {
            return Ok(path.clone());
        }
        let layout = self.layout();
        layout.find_renderer().ok_or_else(|| {
            let tried: Vec<String> = layout
                .renderer_candidates()
                .iter()
                .map(|p| p.display().to_string())
                .collect();
            PipelineError::RendererNotFound(tried.join(", "))
        })
    }

    pub fn build_timeout(&self) -> Duration {
        Duration::from_secs(self.build_timeout_secs)
    }

    pub fn render_timeout(&self) -> Duration {
        Duration::from_secs(self.render_timeout_secs)
    }

    pub fn quality_timeout(&self) -> Duration {
        Duration::from_secs(self.quality_timeout_secs)
    }

    pub fn ai_timeout(&self) -> Duration {
        Duration::from_secs(self.ai_timeout_secs)
    }

    pub fn with_project_root<P: Into<PathBuf>>(mut self, root: P) -> Self {
        self.project_root = root.into();
        self
    }

    pub fn with_renderer<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.renderer_path = Some(path.into());
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_sweep_steps(mut self, steps: usize) -> Self {
        self.sweep_steps = steps;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.sample_rate, 48000);
        assert_eq!(config.build_command, vec!["just".to_string(), "build".to_string()]);
        assert_eq!(config.build_timeout(), Duration::from_secs(180));
        assert_eq!(config.max_iterations, 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_partial_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("modqa.json");
        std::fs::write(&path, r#"{ "sweep_steps": 4, "render_timeout_secs": 5 }"#).unwrap();

        let config = PipelineConfig::load(&path).unwrap();
        assert_eq!(config.sweep_steps, 4);
        assert_eq!(config.render_timeout(), Duration::from_secs(5));
        assert_eq!(config.quality_duration, 3.0);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(PipelineConfig::default().with_sweep_steps(1).validate().is_err());
        assert!(PipelineConfig::default().with_max_iterations(0).validate().is_err());

        let config = PipelineConfig {
            quality_duration: 0.0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(PipelineError::Config(_))));
    }

    #[test]
    fn test_resolve_renderer() {
        let dir = tempfile::tempdir().unwrap();
        let config = PipelineConfig::default().with_project_root(dir.path());
        assert!(matches!(config.resolve_renderer(), Err(PipelineError::RendererNotFound(_))));

        let explicit = config.clone().with_renderer("/opt/render");
        assert_eq!(explicit.resolve_renderer().unwrap(), PathBuf::from("/opt/render"));
    }
}
