//! Module build step

use crate::process::{describe, run_with_timeout};
use crate::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Outcome of one build
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BuildOutcome {
    pub success: bool,

    /// Captured error text when the build failed
    pub error: String,
}

impl BuildOutcome {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: String::new(),
        }
    }

    pub fn failed<S: Into<String>>(error: S) -> Self {
        Self {
            success: false,
            error: error.into(),
        }
    }
}

/// Builds the project's modules
pub trait Builder: Send + Sync {
    /// Build everything. Errors are reserved for being unable to run the
    /// build at all; a failing build is `Ok` with `success == false`.
    fn build(&self) -> Result<BuildOutcome>;
}

/// Runs a build command (default `just build`) from the project root
#[derive(Debug, Clone)]
pub struct CommandBuilder {
    program: PathBuf,

    args: Vec<String>,

    project_root: PathBuf,

    timeout: Duration,
}

impl CommandBuilder {
    /// `command[0]` is the program, the rest its arguments
    pub fn new<P: Into<PathBuf>>(command: &[String], project_root: P, timeout: Duration) -> Result<Self> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| PipelineError::Config("build command is empty".into()))?;
        Ok(Self {
            program: PathBuf::from(program),
            args: args.to_vec(),
            project_root: project_root.into(),
            timeout,
        })
    }

    pub fn command_line(&self) -> String {
        describe(&self.program, &self.args)
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }
}

impl Builder for CommandBuilder {
    fn build(&self) -> Result<BuildOutcome> {
        log::info!("Building: {}", self.command_line());
        match run_with_timeout(&self.program, &self.args, Some(&self.project_root), self.timeout) {
            Ok(output) if output.success() => Ok(BuildOutcome::ok()),
            Ok(output) => {
                let error = if output.stderr.trim().is_empty() {
                    output.stdout
                } else {
                    output.stderr
                };
                log::warn!("Build failed ({:?})", output.exit_code);
                Ok(BuildOutcome::failed(error))
            }
            // A hung build is a failed build
            Err(PipelineError::Timeout { command, secs }) => Ok(BuildOutcome::failed(format!(
                "Build timed out after {}s: {}",
                secs, command
            ))),
            Err(e) => Err(e),
        }
    }
}
