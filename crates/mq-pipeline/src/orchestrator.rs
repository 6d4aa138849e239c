//! Verify -> judge -> fix development loop
//!
//! Each iteration verifies the module and judges the result. A pass or a
//! build failure ends the session. Otherwise fix instructions are produced;
//! in manual mode the session stops there for a developer to act, in auto
//! mode the next untried template fix is applied and the loop goes round
//! again. A fix that lowers the score or breaks the build is rolled back.

use crate::fixer::{AutoFixer, FixParams, FixType};
use crate::judge::{Issue, Judge, JudgmentResult, Verdict};
use crate::verifier::{VerificationResult, Verifier, VerifyOptions};
use crate::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// How a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionOutcome {
    #[serde(rename = "PASS")]
    Passed,
    BuildFailed,
    AwaitingFixes,
    Exhausted,
}

impl SessionOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            SessionOutcome::Passed => "PASS",
            SessionOutcome::BuildFailed => "BUILD_FAILED",
            SessionOutcome::AwaitingFixes => "AWAITING_FIXES",
            SessionOutcome::Exhausted => "EXHAUSTED",
        }
    }
}

impl fmt::Display for SessionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One verify + judge pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationRecord {
    /// 1-based
    pub iteration: usize,

    pub timestamp: String,

    pub verification_score: u32,

    pub judgment_score: u32,

    pub verdict: Verdict,

    pub issues_count: usize,

    /// First three critical/high descriptions
    pub high_priority_issues: Vec<String>,

    pub action_taken: String,
}

impl IterationRecord {
    fn new(iteration: usize, verification: &VerificationResult, judgment: &JudgmentResult) -> Self {
        Self {
            iteration,
            timestamp: chrono::Utc::now().to_rfc3339(),
            verification_score: verification.quality.overall_score,
            judgment_score: judgment.overall_score,
            verdict: judgment.verdict,
            issues_count: judgment.issues.len(),
            high_priority_issues: judgment
                .priority_issues()
                .take(3)
                .map(|i| i.description.clone())
                .collect(),
            action_taken: String::new(),
        }
    }
}

/// Full history of one development loop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DevelopmentSession {
    pub module_name: String,

    pub started_at: String,

    pub completed_at: Option<String>,

    pub total_iterations: usize,

    pub final_verdict: Option<SessionOutcome>,

    pub final_score: u32,

    pub iterations: Vec<IterationRecord>,

    pub success: bool,

    /// Instructions left for the developer when the loop stopped short of a pass
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<FixInstructions>,
}

impl DevelopmentSession {
    fn new(module_name: &str) -> Self {
        Self {
            module_name: module_name.to_string(),
            started_at: chrono::Utc::now().to_rfc3339(),
            completed_at: None,
            total_iterations: 0,
            final_verdict: None,
            final_score: 0,
            iterations: Vec::new(),
            success: false,
            instructions: None,
        }
    }

    fn finish(&mut self, outcome: SessionOutcome, score: u32) {
        self.final_verdict = Some(outcome);
        self.final_score = score;
        self.success = outcome == SessionOutcome::Passed;
        self.total_iterations = self.iterations.len();
        self.completed_at = Some(chrono::Utc::now().to_rfc3339());
        log::info!(
            "{}: session finished {} after {} iteration(s), score {}",
            self.module_name,
            outcome,
            self.total_iterations,
            score
        );
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| "{}".into())
    }
}

/// Structured fix request for whoever edits the DSP source next
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixInstructions {
    pub module_name: String,

    /// Empty when no DSP file was found
    pub dsp_file: String,

    /// Critical and high issues
    pub priority_issues: Vec<Issue>,

    /// Every non-empty code hint
    pub hints: Vec<String>,

    /// `fix (category)` for the top five issues
    pub suggested_changes: Vec<String>,

    pub context: String,
}

impl FixInstructions {
    /// Markdown prompt
    pub fn to_prompt(&self) -> String {
        let mut lines = vec![
            format!("# Fix Instructions for {}", self.module_name),
            String::new(),
            format!("DSP File: `{}`", self.dsp_file),
            String::new(),
            "## Priority Issues to Fix".to_string(),
            String::new(),
        ];

        for (i, issue) in self.priority_issues.iter().enumerate() {
            lines.push(format!("### {}. [{}] {}", i + 1, issue.severity, issue.category));
            lines.push(format!("**Issue:** {}", issue.description));
            lines.push(format!("**Fix:** {}", issue.fix_instruction));
            if !issue.code_hint.is_empty() {
                lines.push("**Code hint:**".to_string());
                lines.push("```faust".to_string());
                lines.push(issue.code_hint.clone());
                lines.push("```".to_string());
            }
            lines.push(String::new());
        }

        if !self.suggested_changes.is_empty() {
            lines.push("## Suggested Changes".to_string());
            lines.extend(self.suggested_changes.iter().map(|c| format!("- {}", c)));
            lines.push(String::new());
        }

        if !self.context.is_empty() {
            lines.push("## Context".to_string());
            lines.push(self.context.clone());
        }

        lines.join("\n")
    }
}

/// Drives the development loop for one module at a time
pub struct Orchestrator {
    verifier: Verifier,

    fixer: AutoFixer,

    max_iterations: usize,

    options: VerifyOptions,

    /// Apply template fixes instead of stopping for manual edits
    auto_fix: bool,
}

impl Orchestrator {
    pub fn new(verifier: Verifier) -> Self {
        let fixer = AutoFixer::new(verifier.layout().clone()).with_capabilities(*verifier.capabilities());
        let max_iterations = verifier.config().max_iterations;
        Self {
            verifier,
            fixer,
            max_iterations,
            options: VerifyOptions::default(),
            auto_fix: false,
        }
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations.max(1);
        self
    }

    pub fn with_options(mut self, options: VerifyOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_auto_fix(mut self, auto_fix: bool) -> Self {
        self.auto_fix = auto_fix;
        self
    }

    pub fn verifier(&self) -> &Verifier {
        &self.verifier
    }

    pub fn fixer_mut(&mut self) -> &mut AutoFixer {
        &mut self.fixer
    }

    /// Verify and judge once
    pub fn run_iteration(&self, module: &str) -> Result<(VerificationResult, JudgmentResult)> {
        let verification = self.verifier.verify(module, &self.options)?;
        let judgment = Judge::for_module(&verification.config).judge(&verification);
        Ok((verification, judgment))
    }

    pub fn generate_fix_instructions(&self, module: &str, judgment: &JudgmentResult) -> FixInstructions {
        FixInstructions {
            module_name: module.to_string(),
            dsp_file: self
                .fixer
                .dsp_file(module)
                .map(|p| p.display().to_string())
                .unwrap_or_default(),
            priority_issues: judgment.priority_issues().cloned().collect(),
            hints: judgment
                .issues
                .iter()
                .filter(|i| !i.code_hint.is_empty())
                .map(|i| i.code_hint.clone())
                .collect(),
            suggested_changes: judgment
                .issues
                .iter()
                .take(5)
                .map(|i| format!("{} ({})", i.fix_instruction, i.category))
                .collect(),
            context: format!("Score: {}/100, Verdict: {}", judgment.overall_score, judgment.verdict),
        }
    }

    /// Auto-fix of the first fixable priority issue, else of any issue, not yet tried
    fn next_fix(judgment: &JudgmentResult, tried: &HashSet<FixType>) -> Option<FixType> {
        let untried = |issue: &Issue| issue.auto_fix_type.filter(|fix| !tried.contains(fix));
        judgment
            .priority_issues()
            .find_map(untried)
            .or_else(|| judgment.issues.iter().find_map(untried))
    }

    pub fn run(&mut self, module: &str) -> Result<DevelopmentSession> {
        let mut session = DevelopmentSession::new(module);
        let mut tried: HashSet<FixType> = HashSet::new();
        // Fix applied last iteration and the score it has to hold
        let mut pending: Option<(FixType, u32)> = None;
        let mut last_score = 0;

        for iteration in 1..=self.max_iterations {
            log::info!("{}: iteration {}/{}", module, iteration, self.max_iterations);
            let (verification, judgment) = self.run_iteration(module)?;
            let mut record = IterationRecord::new(iteration, &verification, &judgment);
            last_score = judgment.overall_score;

            if let Some((fix, baseline)) = pending.take() {
                let regressed = judgment.verdict == Verdict::BuildFailed || judgment.overall_score < baseline;
                if regressed {
                    record.action_taken = if self.fixer.rollback(module) {
                        format!("rolled back {}", fix)
                    } else {
                        format!("rollback of {} failed", fix)
                    };
                    log::warn!("{}: {} made things worse, {}", module, fix, record.action_taken);
                    session.iterations.push(record);
                    continue;
                }
                self.fixer.clear_backups(Some(module));
            }

            match judgment.verdict {
                Verdict::Pass => {
                    record.action_taken = "none".into();
                    session.iterations.push(record);
                    session.finish(SessionOutcome::Passed, judgment.overall_score);
                    return Ok(session);
                }
                Verdict::BuildFailed => {
                    record.action_taken = "stopped: build failed".into();
                    session.iterations.push(record);
                    session.finish(SessionOutcome::BuildFailed, judgment.overall_score);
                    return Ok(session);
                }
                Verdict::NeedsWork | Verdict::MajorIssues => {}
            }

            let instructions = self.generate_fix_instructions(module, &judgment);
            let fix = if self.auto_fix {
                Self::next_fix(&judgment, &tried)
            } else {
                None
            };

            let Some(fix) = fix else {
                record.action_taken = "awaiting fixes".into();
                session.iterations.push(record);
                session.instructions = Some(instructions);
                session.finish(SessionOutcome::AwaitingFixes, judgment.overall_score);
                return Ok(session);
            };

            tried.insert(fix);
            let result = self.fixer.apply_fix(module, fix, &FixParams::default())?;
            record.action_taken = if result.success && !result.already_applied {
                pending = Some((fix, judgment.overall_score));
                format!("applied {}", fix)
            } else {
                format!("{} not applied: {}", fix, result.message)
            };
            session.iterations.push(record);
            session.instructions = Some(instructions);
        }

        session.finish(SessionOutcome::Exhausted, last_score);
        Ok(session)
    }
}
