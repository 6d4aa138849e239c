//! Embedding-similarity scorer adapter
//!
//! The scorer compares a render against positive and negative text
//! descriptors ("warm analog tone", "harsh digital distortion", ...) and
//! reports mean similarities plus the best-matching descriptors. Its output
//! is passed through to the judge as-is.

use crate::inference::InferenceResource;
use crate::process::run_with_timeout;
use crate::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Embedding scorer result
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AiAnalysis {
    /// 0-100, 0 when no score was obtained
    pub clap_score: u32,

    /// Mean similarity to positive descriptors
    pub clap_positive_sim: f64,

    /// Mean similarity to negative descriptors
    pub clap_negative_sim: f64,

    /// Best positive matches as (descriptor, similarity)
    pub top_positive: Vec<(String, f64)>,

    /// Best negative matches as (descriptor, similarity)
    pub top_negative: Vec<(String, f64)>,
}

impl AiAnalysis {
    pub fn has_score(&self) -> bool {
        self.clap_score > 0
    }

    /// Build from similarities alone
    pub fn from_similarities(
        positive: f64,
        negative: f64,
        top_positive: Vec<(String, f64)>,
        top_negative: Vec<(String, f64)>,
    ) -> Self {
        Self {
            clap_score: quality_from_similarity(positive, negative).round() as u32,
            clap_positive_sim: positive,
            clap_negative_sim: negative,
            top_positive,
            top_negative,
        }
    }
}

/// Map `positive - negative` similarity onto 0-100
pub fn quality_from_similarity(positive: f64, negative: f64) -> f64 {
    let raw = positive - negative;
    ((raw + 0.3) / 0.6 * 100.0).clamp(0.0, 100.0)
}

/// Scores a rendered WAV file
pub trait EmbeddingScorer: Send + Sync {
    fn score(&self, wav: &Path) -> Result<AiAnalysis>;
}

/// Scorer program and arguments; the WAV path is appended
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptCommand {
    pub program: PathBuf,

    pub args: Vec<String>,
}

/// `EmbeddingScorer` that shells out to a scoring script.
///
/// The script loads its model per process, so calls are serialized through a
/// shared `InferenceResource`; clones share the same lock.
#[derive(Debug, Clone)]
pub struct ScriptScorer {
    command: Arc<InferenceResource<ScriptCommand>>,

    working_dir: Option<PathBuf>,

    timeout: Duration,
}

impl ScriptScorer {
    pub fn new(command: &[String], timeout: Duration) -> Result<Self> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| PipelineError::Config("scorer command is empty".into()))?;
        let command = ScriptCommand {
            program: PathBuf::from(program),
            args: args.to_vec(),
        };
        Ok(Self {
            command: Arc::new(InferenceResource::new(command)),
            working_dir: None,
            timeout,
        })
    }

    pub fn with_working_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn resource(&self) -> &Arc<InferenceResource<ScriptCommand>> {
        &self.command
    }
}

impl EmbeddingScorer for ScriptScorer {
    fn score(&self, wav: &Path) -> Result<AiAnalysis> {
        let output = {
            let lease = self.command.acquire()?;
            let mut args = lease.args.clone();
            args.push(wav.display().to_string());
            let output = run_with_timeout(&lease.program, &args, self.working_dir.as_deref(), self.timeout);
            lease.release();
            output?
        };

        if !output.success() {
            return Err(PipelineError::MalformedOutput(format!(
                "scorer exited with {:?}: {}",
                output.exit_code,
                output.stderr.trim()
            )));
        }
        parse_scorer_output(&output.stdout)
    }
}

/// Parse scorer JSON.
///
/// Accepts a single object or a list (first entry used), with the fields at
/// the top level or under `clap`. Similarities may be named
/// `positive_similarity`/`negative_similarity` or `positive_score`/`negative_score`.
pub fn parse_scorer_output(text: &str) -> Result<AiAnalysis> {
    let value: Value = serde_json::from_str(text.trim())?;
    let entry = match &value {
        Value::Array(items) => items
            .first()
            .ok_or_else(|| PipelineError::MalformedOutput("empty scorer result list".into()))?,
        other => other,
    };
    let fields = entry.get("clap").unwrap_or(entry);

    let number = |keys: &[&str]| keys.iter().find_map(|k| fields.get(*k).and_then(Value::as_f64));
    let positive = number(&["positive_similarity", "positive_score"]).unwrap_or(0.0);
    let negative = number(&["negative_similarity", "negative_score"]).unwrap_or(0.0);

    let mut analysis = AiAnalysis::from_similarities(
        positive,
        negative,
        descriptor_list(fields.get("top_positive")),
        descriptor_list(fields.get("top_negative")),
    );
    if let Some(score) = number(&["quality_score"]) {
        analysis.clap_score = score.clamp(0.0, 100.0).round() as u32;
    } else if number(&["positive_similarity", "positive_score"]).is_none() {
        return Err(PipelineError::MalformedOutput(
            "scorer output has neither quality_score nor similarities".into(),
        ));
    }
    Ok(analysis)
}

/// `[["desc", 0.3], ...]` or `[{"descriptor": "desc", "similarity": 0.3}, ...]`
fn descriptor_list(value: Option<&Value>) -> Vec<(String, f64)> {
    let Some(Value::Array(items)) = value else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| match item {
            Value::Array(pair) if pair.len() == 2 => {
                Some((pair[0].as_str()?.to_string(), pair[1].as_f64()?))
            }
            Value::Object(map) => Some((
                map.get("descriptor")?.as_str()?.to_string(),
                map.get("similarity")?.as_f64()?,
            )),
            _ => None,
        })
        .collect()
}
