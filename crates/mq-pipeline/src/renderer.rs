//! Renderer adapter
//!
//! The renderer is an external executable:
//!
//! ```text
//! <renderer> --module NAME --output PATH --duration SECONDS --sample-rate HZ
//!            [--param NAME=VALUE]... [--scenario NAME] [--no-auto-gate] [--showcase]
//! <renderer> --module NAME --list-params
//! <renderer> --list-modules
//! ```
//!
//! It writes audio to `PATH` and prints level lines (`Peak amplitude:`,
//! `RMS level:`, `Clipped samples: ... (x%)`) that are parsed here.

use crate::process::{run_with_timeout, CommandOutput};
use crate::{PipelineError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

/// RMS below this counts as silence
pub const SILENCE_RMS: f64 = 0.001;

/// `Peak amplitude:`, `RMS level:` and `Clipped samples: ... (x%)` lines
static METRIC_PATTERNS: LazyLock<std::result::Result<[Regex; 3], regex::Error>> = LazyLock::new(|| {
    Ok([
        Regex::new(r"Peak amplitude:\s*([\d.]+)")?,
        Regex::new(r"RMS level:\s*([\d.]+)")?,
        Regex::new(r"Clipped samples:.*\(([\d.]+)%\)")?,
    ])
});

/// `[index] /path/name (min=a, max=b, init=c)`
static PARAM_LINE: LazyLock<std::result::Result<Regex, regex::Error>> = LazyLock::new(|| {
    Regex::new(
        r"^\[\s*(\d+)\s*\]\s*(.+?)\s*\(\s*min=\s*([-+0-9.eE]+)\s*,\s*max=\s*([-+0-9.eE]+)\s*,\s*init=\s*([-+0-9.eE]+)\s*\)",
    )
});

/// Gate value that holds a note for the whole render
pub const GATE_ON: f64 = 5.0;

const BASIC_DURATION: f64 = 2.0;
const DEFAULT_RENDER_TIMEOUT: Duration = Duration::from_secs(30);
const LIST_TIMEOUT: Duration = Duration::from_secs(60);

/// One render invocation
#[derive(Debug, Clone, PartialEq)]
pub struct RenderRequest {
    pub module: String,

    pub output: PathBuf,

    /// Seconds
    pub duration: f64,

    /// Renderer default when `None`
    pub sample_rate: Option<u32>,

    /// `--param NAME=VALUE` pairs, in order
    pub params: Vec<(String, f64)>,

    pub scenario: Option<String>,

    pub no_auto_gate: bool,

    pub showcase: bool,

    pub timeout: Duration,
}

impl RenderRequest {
    pub fn new<P: Into<PathBuf>>(module: &str, output: P) -> Self {
        Self {
            module: module.to_string(),
            output: output.into(),
            duration: BASIC_DURATION,
            sample_rate: None,
            params: Vec::new(),
            scenario: None,
            no_auto_gate: false,
            showcase: false,
            timeout: DEFAULT_RENDER_TIMEOUT,
        }
    }

    /// Short render with the gate held open
    pub fn basic<P: Into<PathBuf>>(module: &str, output: P) -> Self {
        Self::new(module, output).with_param("gate", GATE_ON)
    }

    pub fn with_duration(mut self, seconds: f64) -> Self {
        self.duration = seconds;
        self
    }

    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = Some(sample_rate);
        self
    }

    /// Set a parameter, replacing an earlier value for the same name
    pub fn with_param(mut self, name: &str, value: f64) -> Self {
        match self.params.iter_mut().find(|(n, _)| n == name) {
            Some(entry) => entry.1 = value,
            None => self.params.push((name.to_string(), value)),
        }
        self
    }

    pub fn with_scenario(mut self, scenario: &str) -> Self {
        self.scenario = Some(scenario.to_string());
        self
    }

    pub fn without_auto_gate(mut self) -> Self {
        self.no_auto_gate = true;
        self
    }

    pub fn with_showcase(mut self) -> Self {
        self.showcase = true;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Command-line arguments for the renderer
    pub fn to_args(&self) -> Vec<String> {
        let mut args = vec![
            "--module".to_string(),
            self.module.clone(),
            "--output".to_string(),
            self.output.display().to_string(),
            "--duration".to_string(),
            self.duration.to_string(),
        ];
        if let Some(sr) = self.sample_rate {
            args.push("--sample-rate".into());
            args.push(sr.to_string());
        }
        for (name, value) in &self.params {
            args.push("--param".into());
            args.push(format!("{}={}", name, value));
        }
        if let Some(scenario) = &self.scenario {
            args.push("--scenario".into());
            args.push(scenario.clone());
        }
        if self.no_auto_gate {
            args.push("--no-auto-gate".into());
        }
        if self.showcase {
            args.push("--showcase".into());
        }
        args
    }
}

/// What a finished render left behind
#[derive(Debug, Clone)]
pub struct RenderOutcome {
    pub exit_code: Option<i32>,

    pub stdout: String,

    pub stderr: String,

    pub output: PathBuf,
}

impl RenderOutcome {
    pub fn from_command(output: CommandOutput, path: &Path) -> Self {
        Self {
            exit_code: output.exit_code,
            stdout: output.stdout,
            stderr: output.stderr,
            output: path.to_path_buf(),
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    pub fn combined_output(&self) -> String {
        format!("{}{}", self.stdout, self.stderr)
    }
}

/// Level metrics printed by the renderer
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderMetrics {
    pub peak_amplitude: f64,

    pub rms_level: f64,

    /// Share of clipped samples (%)
    pub clipping_percent: f64,

    pub is_silent: bool,
}

impl RenderMetrics {
    /// Parse renderer text; absent lines read as zero
    pub fn parse(text: &str) -> Result<Self> {
        let [peak, rms, clipped] = METRIC_PATTERNS.as_ref().map_err(|e| PipelineError::Regex(e.clone()))?;

        let capture = |re: &Regex| -> f64 {
            re.captures(text)
                .and_then(|c| c.get(1))
                .and_then(|m| m.as_str().parse().ok())
                .unwrap_or(0.0)
        };

        let rms_level = capture(rms);
        Ok(Self {
            peak_amplitude: capture(peak),
            rms_level,
            clipping_percent: capture(clipped),
            is_silent: rms_level < SILENCE_RMS,
        })
    }

    /// A render that produced nothing
    pub fn failed() -> Self {
        Self {
            is_silent: true,
            ..Default::default()
        }
    }
}

/// Parameter metadata reported by `--list-params`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamInfo {
    pub index: usize,

    /// Last path component
    pub name: String,

    pub path: String,

    pub min: f64,

    pub max: f64,

    pub init: f64,
}

impl ParamInfo {
    /// Parse `[0] /Module/pressure (min=0, max=1, init=0.5)`
    pub fn parse_line(line: &str) -> Option<Self> {
        let caps = PARAM_LINE.as_ref().ok()?.captures(line.trim())?;
        let number = |i: usize| caps.get(i)?.as_str().parse::<f64>().ok();

        let path = caps.get(2)?.as_str().trim().to_string();
        let name = path.rsplit('/').next().unwrap_or(&path).to_string();
        Some(Self {
            index: caps.get(1)?.as_str().parse().ok()?,
            name,
            path,
            min: number(3)?,
            max: number(4)?,
            init: number(5)?,
        })
    }

    /// `steps` evenly spaced values from min to max inclusive
    pub fn sweep_values(&self, steps: usize) -> Vec<f64> {
        match steps {
            0 => Vec::new(),
            1 => vec![self.min],
            _ => {
                let step = (self.max - self.min) / (steps - 1) as f64;
                (0..steps).map(|i| self.min + i as f64 * step).collect()
            }
        }
    }
}

/// External renderer
pub trait Renderer: Send + Sync {
    /// Run one render; a non-zero exit is reported in the outcome, not as an error
    fn render(&self, request: &RenderRequest) -> Result<RenderOutcome>;

    fn list_params(&self, module: &str) -> Result<Vec<ParamInfo>>;

    fn list_modules(&self) -> Result<Vec<String>>;

    /// Render and parse the printed level metrics
    fn measure(&self, request: &RenderRequest) -> Result<RenderMetrics> {
        let outcome = self.render(request)?;
        if !outcome.success() {
            return Err(PipelineError::Render(format!(
                "{} exited with {:?}: {}",
                request.module,
                outcome.exit_code,
                outcome.stderr.trim()
            )));
        }
        RenderMetrics::parse(&outcome.combined_output())
    }

    /// 2 s render with the gate held, into a scratch file
    fn basic_render(&self, module: &str) -> Result<RenderMetrics> {
        let scratch = tempfile::Builder::new().prefix("modqa-basic-").tempdir()?;
        let request = RenderRequest::basic(module, scratch.path().join(format!("{}.wav", module)));
        self.measure(&request)
    }
}

/// `Renderer` backed by the renderer executable
#[derive(Debug, Clone)]
pub struct CliRenderer {
    /// Executable locations in order of preference
    candidates: Vec<PathBuf>,

    working_dir: Option<PathBuf>,

    /// Used when a request does not set one
    sample_rate: u32,
}

impl CliRenderer {
    pub fn new<P: Into<PathBuf>>(executable: P) -> Self {
        Self::from_candidates(vec![executable.into()])
    }

    /// Resolve the executable on every call, so a renderer produced by a
    /// later build step is picked up
    pub fn from_candidates(candidates: Vec<PathBuf>) -> Self {
        Self {
            candidates,
            working_dir: None,
            sample_rate: 48000,
        }
    }

    pub fn with_working_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    /// First existing candidate, else the first candidate
    pub fn executable(&self) -> Result<PathBuf> {
        self.candidates
            .iter()
            .find(|p| p.is_file())
            .or_else(|| self.candidates.first())
            .cloned()
            .ok_or_else(|| PipelineError::RendererNotFound("no candidates".into()))
    }

    fn run(&self, args: &[String], timeout: Duration) -> Result<CommandOutput> {
        let executable = self.executable()?;
        run_with_timeout(&executable, args, self.working_dir.as_deref(), timeout)
    }

    fn listing(&self, args: &[String]) -> Result<String> {
        let output = self.run(args, LIST_TIMEOUT)?;
        if !output.success() {
            return Err(PipelineError::Render(output.stderr.trim().to_string()));
        }
        Ok(output.stdout)
    }
}

impl Renderer for CliRenderer {
    fn render(&self, request: &RenderRequest) -> Result<RenderOutcome> {
        let request = match request.sample_rate {
            Some(_) => request.clone(),
            None => request.clone().with_sample_rate(self.sample_rate),
        };
        log::debug!("Rendering {} ({:.1}s) -> {}", request.module, request.duration, request.output.display());
        let output = self.run(&request.to_args(), request.timeout)?;
        Ok(RenderOutcome::from_command(output, &request.output))
    }

    fn list_params(&self, module: &str) -> Result<Vec<ParamInfo>> {
        let stdout = self.listing(&["--module".to_string(), module.to_string(), "--list-params".to_string()])?;
        Ok(stdout.lines().filter_map(ParamInfo::parse_line).collect())
    }

    fn list_modules(&self) -> Result<Vec<String>> {
        let stdout = self.listing(&["--list-modules".to_string()])?;
        Ok(parse_module_list(&stdout))
    }
}

/// Non-empty lines that are not the `Available ...` header
pub fn parse_module_list(text: &str) -> Vec<String> {
    text.lines()
        .filter(|line| !line.starts_with("Available"))
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(String::from)
        .collect()
}
