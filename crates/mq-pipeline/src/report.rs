//! Text and JSON rendering of pipeline results

use crate::checks::ModuleCheckReport;
use crate::judge::{JudgmentResult, Severity};
use crate::orchestrator::DevelopmentSession;
use crate::verifier::VerificationResult;
use serde::Serialize;
use std::io::Write;
use std::path::Path;

/// Report format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReportFormat {
    /// Plain text
    #[default]
    Text,
    /// Pretty JSON
    Json,
}

/// A result that can be printed or saved
pub trait Report: Serialize {
    fn to_text(&self) -> String;

    fn to_json_report(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| "{}".into())
    }

    fn generate(&self, format: ReportFormat) -> String {
        match format {
            ReportFormat::Text => self.to_text(),
            ReportFormat::Json => self.to_json_report(),
        }
    }

    fn save<P: AsRef<Path>>(&self, path: P, format: ReportFormat) -> std::io::Result<()> {
        let content = self.generate(format);
        let mut file = std::fs::File::create(path)?;
        file.write_all(content.as_bytes())
    }
}

fn banner(output: &mut String, title: &str) {
    let rule = "=".repeat(60);
    output.push_str(&format!("\n{}\n{}\n{}\n", rule, title, rule));
}

fn indent(text: &str, spaces: usize) -> String {
    let prefix = " ".repeat(spaces);
    text.lines()
        .map(|line| format!("{}{}", prefix, line))
        .collect::<Vec<_>>()
        .join("\n")
}

impl Report for VerificationResult {
    fn to_text(&self) -> String {
        let mut output = String::new();
        banner(&mut output, &format!("VERIFICATION RESULTS: {}", self.module_name));

        output.push_str(&format!("Build: {}\n", if self.build_success { "OK" } else { "FAILED" }));
        if !self.build_success {
            output.push_str(&format!("{}\n", indent(self.build_error.trim(), 2)));
        }
        output.push_str(&format!(
            "Render: peak={:.3}, clipping={:.1}%\n",
            self.render.peak_amplitude, self.render.clipping_percent
        ));
        output.push_str(&format!("Quality Score: {}/100\n", self.quality.overall_score));
        match &self.ai {
            Some(ai) => output.push_str(&format!("AI Score: {}/100\n", ai.clap_score)),
            None => output.push_str("AI Score: n/a\n"),
        }

        if !self.parameter_issues.is_empty() {
            output.push_str(&format!("\nParameter Issues ({}):\n", self.parameter_issues.len()));
            for issue in &self.parameter_issues {
                output.push_str(&format!(
                    "  - {}={}: {} [{}]\n",
                    issue.param, issue.value, issue.issue, issue.severity
                ));
            }
        }

        if !self.quality.issues.is_empty() {
            output.push_str("\nQuality Issues:\n");
            for issue in &self.quality.issues {
                output.push_str(&format!("  - {}\n", issue));
            }
        }

        if !self.notes.is_empty() {
            output.push_str("\nNotes:\n");
            for note in &self.notes {
                output.push_str(&format!("  - {}\n", note));
            }
        }

        output.push_str(&format!(
            "\nOverall: {}\n",
            if self.success { "PASS" } else { "NEEDS WORK" }
        ));
        output
    }
}

impl Report for JudgmentResult {
    fn to_text(&self) -> String {
        let mut output = String::new();
        banner(&mut output, &format!("JUDGMENT: {}", self.module_name));

        output.push_str(&format!("Verdict: {}\n", self.verdict));
        output.push_str(&format!("Score: {}/100\n", self.overall_score));
        output.push_str(&format!("Summary: {}\n", self.summary));
        output.push_str(&format!("Next Action: {}\n", self.next_action));

        for severity in [Severity::Critical, Severity::High, Severity::Medium, Severity::Low] {
            let issues: Vec<_> = self.issues.iter().filter(|i| i.severity == severity).collect();
            if issues.is_empty() {
                continue;
            }
            output.push_str(&format!("\n{}\n", "-".repeat(60)));
            output.push_str(&format!("{} ({})\n", severity.as_str().to_uppercase(), issues.len()));
            output.push_str(&format!("{}\n", "-".repeat(60)));
            for issue in issues {
                output.push_str(&format!("\n[{}] {}\n", issue.category, issue.description));
                output.push_str(&format!("   Fix: {}\n", issue.fix_instruction));
                if let Some(fix) = issue.auto_fix_type {
                    output.push_str(&format!("   Auto-fix: {}\n", fix));
                }
                if !issue.code_hint.is_empty() {
                    output.push_str(&format!("   Hint:\n{}\n", indent(&issue.code_hint, 6)));
                }
            }
        }
        output
    }
}

impl Report for DevelopmentSession {
    fn to_text(&self) -> String {
        let mut output = String::new();
        banner(&mut output, "DEVELOPMENT SESSION COMPLETE");

        output.push_str(&format!("Module: {}\n", self.module_name));
        output.push_str(&format!("Iterations: {}\n", self.total_iterations));
        output.push_str(&format!(
            "Final Verdict: {}\n",
            self.final_verdict.map(|v| v.label()).unwrap_or("-")
        ));
        output.push_str(&format!("Final Score: {}/100\n", self.final_score));
        output.push_str(&format!("Success: {}\n", if self.success { "Yes" } else { "No" }));

        if !self.iterations.is_empty() {
            output.push_str("\nHistory:\n");
            for record in &self.iterations {
                output.push_str(&format!(
                    "  {:>2}. {:<12} score {:>3}/100, {} issue(s), {}\n",
                    record.iteration,
                    record.verdict.label(),
                    record.judgment_score,
                    record.issues_count,
                    record.action_taken
                ));
            }
        }

        if let Some(instructions) = &self.instructions {
            output.push_str(&format!("\n{}\n", "-".repeat(60)));
            output.push_str("FIX INSTRUCTIONS\n");
            output.push_str(&format!("{}\n", "-".repeat(60)));
            output.push_str(&instructions.to_prompt());
            output.push('\n');
        }
        output
    }
}

impl Report for ModuleCheckReport {
    fn to_text(&self) -> String {
        let mut output = String::new();
        banner(&mut output, &format!("CHECKS: {}", self.module_name));

        for check in &self.checks {
            output.push_str(&format!(
                "  [{}] {:<20} {}\n",
                if check.passed { "OK" } else { "FAIL" },
                check.name,
                check.message
            ));
        }
        let failed = self.failed_checks().count();
        output.push_str(&format!(
            "\n{}/{} checks passed ({} ms)\n",
            self.checks.len() - failed,
            self.checks.len(),
            self.duration_ms
        ));
        output
    }
}
