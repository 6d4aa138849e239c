//! In-process stand-ins for the renderer, build step and embedding scorer.
//!
//! `FakeRenderer` reads the module's DSP source and renders a 440 Hz sine:
//! sources with a `hot_gain` stage and no `tanh` limiter clip hard, sources
//! marked `silent` render zeros, and a `drive` parameter above 0.8 clips too.

#![allow(dead_code)]

use mq_pipeline::{
    AiAnalysis, BuildOutcome, Builder, EmbeddingScorer, ParamInfo, PipelineConfig, PipelineError,
    ProjectLayout, RenderOutcome, RenderRequest, Renderer, Result,
};
use std::collections::HashMap;
use std::f64::consts::PI;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::TempDir;

pub const CLEAN_SOURCE: &str = "import(\"stdfaust.lib\");\nprocess = os.osc(440) * 0.5 : ma.tanh;\n";
pub const HOT_SOURCE: &str = "import(\"stdfaust.lib\");\nhot_gain = 6.0;\nprocess = os.osc(440) * hot_gain;\n";

// ============================================================================
// Project on disk
// ============================================================================

pub struct TestProject {
    pub dir: TempDir,
}

impl TestProject {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
        }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn layout(&self) -> ProjectLayout {
        ProjectLayout::new(self.root())
    }

    /// Short renders so the loop stays fast
    pub fn config(&self) -> PipelineConfig {
        PipelineConfig {
            project_root: self.root().to_path_buf(),
            basic_duration: 0.5,
            quality_duration: 1.0,
            sweep_duration: 0.25,
            sweep_steps: 5,
            ..Default::default()
        }
    }

    pub fn add_module(&self, name: &str, source: &str) -> PathBuf {
        let dir = self.layout().module_dir(name);
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(format!("{}.dsp", name.to_lowercase()));
        std::fs::write(&path, source).unwrap();
        path
    }

    pub fn write_config(&self, name: &str, json: &str) {
        std::fs::write(self.layout().config_path(name), json).unwrap();
    }

    pub fn source(&self, name: &str) -> String {
        let path = self.layout().module_dir(name).join(format!("{}.dsp", name.to_lowercase()));
        std::fs::read_to_string(path).unwrap()
    }

    /// Backup files left next to a module's sources
    pub fn backups(&self, name: &str) -> Vec<PathBuf> {
        std::fs::read_dir(self.layout().module_dir(name))
            .unwrap()
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.to_string_lossy().contains(".bak."))
            .collect()
    }
}

fn module_source(layout: &ProjectLayout, module: &str) -> Option<String> {
    let dir = layout.module_dir(module);
    let mut sources: Vec<PathBuf> = std::fs::read_dir(dir)
        .ok()?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|ext| ext == "dsp"))
        .collect();
    sources.sort();
    sources.first().and_then(|p| std::fs::read_to_string(p).ok())
}

// ============================================================================
// Renderer
// ============================================================================

pub struct FakeRenderer {
    layout: ProjectLayout,
    params: HashMap<String, Vec<ParamInfo>>,
    renders: AtomicUsize,
}

impl FakeRenderer {
    pub fn new(layout: ProjectLayout) -> Self {
        Self {
            layout,
            params: HashMap::new(),
            renders: AtomicUsize::new(0),
        }
    }

    pub fn with_param(mut self, module: &str, name: &str, min: f64, max: f64, init: f64) -> Self {
        let list = self.params.entry(module.to_string()).or_default();
        list.push(ParamInfo {
            index: list.len(),
            name: name.to_string(),
            path: format!("/{}/{}", module, name),
            min,
            max,
            init,
        });
        self
    }

    pub fn renders(&self) -> usize {
        self.renders.load(Ordering::SeqCst)
    }

    fn synthesize(source: &str, request: &RenderRequest, sample_rate: u32) -> Vec<f64> {
        let frames = (request.duration * sample_rate as f64) as usize;
        if source.contains("silent") {
            return vec![0.0; frames];
        }

        let driven = request.params.iter().any(|(name, value)| name == "drive" && *value > 0.8);
        let hot = (source.contains("hot_gain") && !source.contains("tanh")) || driven;
        let amplitude = if hot { 3.0 } else { 0.5 };

        (0..frames)
            .map(|i| {
                let x = amplitude * (2.0 * PI * 440.0 * i as f64 / sample_rate as f64).sin();
                x.clamp(-1.0, 1.0)
            })
            .collect()
    }
}

impl Renderer for FakeRenderer {
    fn render(&self, request: &RenderRequest) -> Result<RenderOutcome> {
        self.renders.fetch_add(1, Ordering::SeqCst);
        let Some(source) = module_source(&self.layout, &request.module) else {
            return Ok(RenderOutcome {
                exit_code: Some(1),
                stdout: String::new(),
                stderr: format!("Unknown module: {}", request.module),
                output: request.output.clone(),
            });
        };

        let sample_rate = request.sample_rate.unwrap_or(48000);
        let samples = Self::synthesize(&source, request, sample_rate);

        let spec = hound::WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let mut writer = hound::WavWriter::create(&request.output, spec)
            .map_err(|e| PipelineError::Render(e.to_string()))?;
        for &s in &samples {
            writer
                .write_sample(s as f32)
                .map_err(|e| PipelineError::Render(e.to_string()))?;
        }
        writer.finalize().map_err(|e| PipelineError::Render(e.to_string()))?;

        let peak = samples.iter().fold(0.0f64, |m, s| m.max(s.abs()));
        let rms = if samples.is_empty() {
            0.0
        } else {
            (samples.iter().map(|s| s * s).sum::<f64>() / samples.len() as f64).sqrt()
        };
        let clipped = samples.iter().filter(|s| s.abs() >= 0.99).count();
        let percent = if samples.is_empty() {
            0.0
        } else {
            clipped as f64 * 100.0 / samples.len() as f64
        };

        Ok(RenderOutcome {
            exit_code: Some(0),
            stdout: format!(
                "Rendering {}\nPeak amplitude: {:.6}\nRMS level: {:.6}\nClipped samples: {} ({:.2}%)\n",
                request.module, peak, rms, clipped, percent
            ),
            stderr: String::new(),
            output: request.output.clone(),
        })
    }

    fn list_params(&self, module: &str) -> Result<Vec<ParamInfo>> {
        if !self.layout.module_dir(module).is_dir() {
            return Err(PipelineError::ModuleNotFound(module.to_string()));
        }
        Ok(self.params.get(module).cloned().unwrap_or_default())
    }

    fn list_modules(&self) -> Result<Vec<String>> {
        Ok(self.layout.module_names()?)
    }
}

// ============================================================================
// Build step
// ============================================================================

/// Fails on `syntax_error`, or on a limiter in a source marked `limiter_breaks_build`
pub struct FakeBuilder {
    layout: ProjectLayout,
    builds: AtomicUsize,
}

impl FakeBuilder {
    pub fn new(layout: ProjectLayout) -> Self {
        Self {
            layout,
            builds: AtomicUsize::new(0),
        }
    }
}

impl Builder for FakeBuilder {
    fn build(&self) -> Result<BuildOutcome> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        for module in self.layout.module_names()? {
            let source = module_source(&self.layout, &module).unwrap_or_default();
            if source.contains("syntax_error") {
                return Ok(BuildOutcome::failed(format!("{}.dsp:3 : ERROR : syntax error", module)));
            }
            if source.contains("limiter_breaks_build") && source.contains("tanh") {
                return Ok(BuildOutcome::failed(format!("{}.dsp:4 : ERROR : undefined symbol : ma", module)));
            }
        }
        Ok(BuildOutcome::ok())
    }
}

// ============================================================================
// Embedding scorer
// ============================================================================

pub struct FakeScorer {
    analysis: Option<AiAnalysis>,
    calls: AtomicUsize,
}

impl FakeScorer {
    pub fn scoring(clap_score: u32, top_negative: Vec<(&str, f64)>) -> Self {
        Self {
            analysis: Some(AiAnalysis {
                clap_score,
                clap_positive_sim: 0.3,
                clap_negative_sim: 0.1,
                top_positive: vec![("warm analog synthesizer".into(), 0.31)],
                top_negative: top_negative.into_iter().map(|(d, s)| (d.to_string(), s)).collect(),
            }),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn broken() -> Self {
        Self {
            analysis: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl EmbeddingScorer for FakeScorer {
    fn score(&self, wav: &Path) -> Result<AiAnalysis> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        assert!(wav.is_file(), "scorer got a missing file: {}", wav.display());
        self.analysis
            .clone()
            .ok_or_else(|| PipelineError::MalformedOutput("model failed to load".into()))
    }
}
