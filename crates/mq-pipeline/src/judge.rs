//! Judgment of a verification result
//!
//! Four independent passes (render levels, quality metrics, parameter sweep,
//! AI feedback) turn a `VerificationResult` into prioritized issues, each
//! with a fix instruction, a code hint and, where a template applies, an
//! auto-fix type. The issues then decide the score and verdict.

use crate::ai::AiAnalysis;
use crate::fixer::FixType;
use crate::module_config::ModuleConfig;
use crate::verifier::VerificationResult;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

// ============================================================================
// Severity / Verdict
// ============================================================================

/// Issue priority, `Critical > High > Medium > Low`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
}

impl Severity {
    /// 3 for critical down to 0 for low
    pub fn rank(&self) -> u8 {
        match self {
            Severity::Critical => 3,
            Severity::High => 2,
            Severity::Medium => 1,
            Severity::Low => 0,
        }
    }

    /// Critical or high
    pub fn is_priority(&self) -> bool {
        matches!(self, Severity::Critical | Severity::High)
    }

    /// Score deduction for one issue of this severity
    pub fn penalty(&self) -> f64 {
        match self {
            Severity::Critical => 30.0,
            Severity::High => 15.0,
            Severity::Medium => 5.0,
            Severity::Low => 2.0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::High => "high",
            Severity::Medium => "medium",
            Severity::Low => "low",
        }
    }
}

impl Ord for Severity {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank().cmp(&other.rank())
    }
}

impl PartialOrd for Severity {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one judgment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Pass,
    NeedsWork,
    MajorIssues,
    BuildFailed,
}

impl Verdict {
    /// `PASS`, `NEEDS_WORK`, ...
    pub fn label(&self) -> &'static str {
        match self {
            Verdict::Pass => "PASS",
            Verdict::NeedsWork => "NEEDS_WORK",
            Verdict::MajorIssues => "MAJOR_ISSUES",
            Verdict::BuildFailed => "BUILD_FAILED",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// ============================================================================
// Issues
// ============================================================================

/// One prioritized problem with fix guidance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub severity: Severity,

    /// clipping, output, distortion, noise, quality, parameter, ai_quality
    pub category: String,

    pub description: String,

    pub fix_instruction: String,

    /// Suggested DSP code, may be empty
    #[serde(default)]
    pub code_hint: String,

    /// Template that can fix this automatically
    #[serde(default)]
    pub auto_fix_type: Option<FixType>,
}

impl Issue {
    /// Issue whose auto-fix type is classified from its own text
    pub fn new(severity: Severity, category: &str, description: String, fix_instruction: &str, code_hint: &str) -> Self {
        let auto_fix_type = classify_fix_type(category, &description, severity);
        Self {
            severity,
            category: category.to_string(),
            description,
            fix_instruction: fix_instruction.to_string(),
            code_hint: code_hint.to_string(),
            auto_fix_type,
        }
    }

    /// Issue that always needs manual work
    pub fn manual(severity: Severity, category: &str, description: String, fix_instruction: &str, code_hint: &str) -> Self {
        Self {
            auto_fix_type: None,
            ..Self::new(severity, category, description, fix_instruction, code_hint)
        }
    }
}

/// Map an issue onto a fix template by keyword
pub fn classify_fix_type(category: &str, description: &str, severity: Severity) -> Option<FixType> {
    let category = category.to_lowercase();
    let description = description.to_lowercase();

    if category.contains("clipping") || description.contains("clipping") {
        return Some(if severity.is_priority() {
            FixType::AddLimiter
        } else {
            FixType::ReduceGain
        });
    }

    if category.contains("dc") || description.contains("dc offset") {
        return Some(FixType::AddDcBlocker);
    }

    if ["click", "pop", "transient", "discontinuit"]
        .iter()
        .any(|k| description.contains(k))
    {
        return Some(FixType::SmoothGate);
    }

    let mentions_thd = category.contains("thd") || description.contains("thd");
    if mentions_thd && (description.contains("intentional") || description.contains("may be")) {
        return Some(FixType::AdjustThreshold);
    }

    if category == "parameter" && description.contains("silent") {
        return Some(FixType::AdjustThreshold);
    }

    if category.contains("ai_quality") {
        if description.contains("harsh") || description.contains("distortion") {
            return Some(FixType::AddLimiter);
        }
        return None;
    }

    if description.contains("threshold") || description.contains("test_config") {
        return Some(FixType::AdjustThreshold);
    }

    None
}

// ============================================================================
// Thresholds
// ============================================================================

/// Judge thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JudgeThresholds {
    /// Score needed to pass with only medium/low issues
    pub quality_score_pass: u32,

    /// Clipping above this is an issue (%)
    pub clipping_max: f64,

    /// Severe clipping (%)
    pub clipping_severe: f64,

    /// THD above this is a medium issue (%)
    pub thd_high: f64,

    /// THD above this is a high issue (%)
    pub thd_very_high: f64,

    /// HNR below this is an issue for tonal content (dB)
    pub hnr_min: f64,

    /// Peak below this is too quiet
    pub peak_min: f64,

    /// AI score below this is an issue
    pub clap_acceptable: u32,

    /// Negative descriptor similarity that counts as a match
    pub negative_match: f64,

    /// Negative descriptor similarity that makes the match medium severity
    pub negative_strong: f64,
}

impl Default for JudgeThresholds {
    fn default() -> Self {
        Self {
            quality_score_pass: 80,
            clipping_max: 0.1,
            clipping_severe: 5.0,
            thd_high: 15.0,
            thd_very_high: 30.0,
            hnr_min: 5.0,
            peak_min: 0.1,
            clap_acceptable: 40,
            negative_match: 0.2,
            negative_strong: 0.25,
        }
    }
}

impl JudgeThresholds {
    /// THD bands follow the module's own THD limit
    pub fn for_module(config: &ModuleConfig) -> Self {
        let thd_high = config.quality_thresholds.thd_max_percent;
        Self {
            thd_high,
            thd_very_high: thd_high * 2.0,
            ..Default::default()
        }
    }
}

// ============================================================================
// Judgment
// ============================================================================

/// Verdict, score and issues for one module
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JudgmentResult {
    pub module_name: String,

    pub verdict: Verdict,

    /// 0-100
    pub overall_score: u32,

    /// Sorted by severity, most severe first
    pub issues: Vec<Issue>,

    pub summary: String,

    /// What the developer should do next
    pub next_action: String,
}

impl JudgmentResult {
    fn new(module_name: &str) -> Self {
        Self {
            module_name: module_name.to_string(),
            verdict: Verdict::NeedsWork,
            overall_score: 0,
            issues: Vec::new(),
            summary: String::new(),
            next_action: String::new(),
        }
    }

    pub fn priority_issues(&self) -> impl Iterator<Item = &Issue> {
        self.issues.iter().filter(|i| i.severity.is_priority())
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.issues.iter().filter(|i| i.severity == severity).count()
    }

    pub fn passed(&self) -> bool {
        self.verdict == Verdict::Pass
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| "{}".into())
    }
}

/// Negative AI descriptors with known remedies: (key, instruction, hint)
const NEGATIVE_DESCRIPTOR_FIXES: [(&str, &str, &str); 7] = [
    (
        "harsh digital distortion",
        "Add filtering and reduce gain staging",
        "brightness_filter = fi.lowpass(2, 6000 + param * 4000);",
    ),
    (
        "aliasing artifacts",
        "Add anti-aliasing filter or oversample",
        "// Add lowpass before any nonlinearity\nanti_alias = fi.lowpass(4, ma.SR/2.5);",
    ),
    (
        "unpleasant metallic sound",
        "Reduce high frequency resonance, add damping",
        "damping = fi.lowpass(1, 4000);\n// Apply in feedback path",
    ),
    (
        "noisy and harsh",
        "Reduce noise, add filtering",
        "// Reduce noise gain\n// Add output filtering: fi.lowpass(2, 8000)",
    ),
    (
        "clicking and popping",
        "Smooth envelope transitions",
        "// Smooth gate/envelope:\ngate_smooth = gate : si.smooth(0.995);",
    ),
    (
        "broken audio with glitches",
        "Check for numerical issues, add stability protection",
        "// Add DC blocker and limiter:\n: fi.dcblocker : ma.tanh",
    ),
    (
        "low quality digital sound",
        "Improve overall signal chain quality",
        "// General improvements:\n// - Add subtle saturation: ef.cubicnl(0.5, 0)\n// - Add filtering\n// - Improve envelope",
    ),
];

/// Instruction and hint for a negative descriptor
pub fn fix_for_negative(descriptor: &str) -> (&'static str, &'static str) {
    let descriptor = descriptor.to_lowercase();
    NEGATIVE_DESCRIPTOR_FIXES
        .iter()
        .find(|(key, _, _)| descriptor.contains(key))
        .map(|(_, instruction, hint)| (*instruction, *hint))
        .unwrap_or((
            "Review signal chain for quality issues",
            "// Check gain staging, filtering, and envelope",
        ))
}

/// Turns verification results into judgments
#[derive(Debug, Clone, Default)]
pub struct Judge {
    thresholds: JudgeThresholds,
}

impl Judge {
    pub fn new(thresholds: JudgeThresholds) -> Self {
        Self { thresholds }
    }

    pub fn for_module(config: &ModuleConfig) -> Self {
        Self::new(JudgeThresholds::for_module(config))
    }

    pub fn thresholds(&self) -> &JudgeThresholds {
        &self.thresholds
    }

    pub fn judge(&self, v: &VerificationResult) -> JudgmentResult {
        let mut result = JudgmentResult::new(&v.module_name);

        if !v.build_success {
            result.verdict = Verdict::BuildFailed;
            result.summary = format!("Build failed: {}", v.build_error.trim());
            result.next_action = "fix_build_errors".into();
            return result;
        }

        if v.config.skip_audio_tests {
            result.verdict = Verdict::Pass;
            result.overall_score = 100;
            result.summary = format!("Audio tests skipped: {}", v.config.skip_reason_or_default());
            result.next_action = "none".into();
            return result;
        }

        let mut issues = self.analyze_render(v);
        issues.extend(self.analyze_quality(v));
        issues.extend(self.analyze_parameters(v));
        if let Some(ai) = &v.ai {
            issues.extend(self.analyze_ai(ai));
        }

        // Stable: equal severities keep their discovery order
        issues.sort_by(|a, b| b.severity.cmp(&a.severity));

        result.overall_score = self.calculate_score(v, &issues);
        result.issues = issues;

        let critical = result.count(Severity::Critical);
        let high = result.count(Severity::High);
        if result.issues.is_empty() {
            result.verdict = Verdict::Pass;
            result.summary = "Module passes all quality checks".into();
            result.next_action = "none".into();
        } else if critical > 0 {
            result.verdict = Verdict::MajorIssues;
            result.summary = format!("Critical issues found: {}", critical);
            result.next_action = "fix_critical".into();
        } else if high > 0 {
            result.verdict = Verdict::NeedsWork;
            result.summary = format!("High priority issues: {}", high);
            result.next_action = "fix_high_priority".into();
        } else if result.overall_score >= self.thresholds.quality_score_pass {
            result.verdict = Verdict::Pass;
            result.summary = format!("Module acceptable with minor issues ({})", result.issues.len());
            result.next_action = "optional_improvements".into();
        } else {
            result.verdict = Verdict::NeedsWork;
            result.summary = format!("Score {}/100 below threshold", result.overall_score);
            result.next_action = "improve_quality".into();
        }

        log::info!(
            "{}: {} ({}/100, {} issues)",
            result.module_name,
            result.verdict,
            result.overall_score,
            result.issues.len()
        );
        result
    }

    fn analyze_render(&self, v: &VerificationResult) -> Vec<Issue> {
        let t = &self.thresholds;
        let r = &v.render;
        let mut issues = Vec::new();

        if r.clipping_percent > t.clipping_severe {
            issues.push(Issue::new(
                Severity::Critical,
                "clipping",
                format!("Severe clipping: {:.1}% of samples", r.clipping_percent),
                "Reduce output gain or add limiting before output",
                "output_gain = current_gain * 0.5; // Reduce gain\n// Or add soft limiter: : ma.tanh",
            ));
        } else if r.clipping_percent > t.clipping_max {
            issues.push(Issue::new(
                Severity::High,
                "clipping",
                format!("Clipping detected: {:.1}%", r.clipping_percent),
                "Add gain compensation or soft limiting",
                "// Add before output:\nsoft_limit = ma.tanh;\n// Reduce gain slightly",
            ));
        }

        if r.is_silent {
            issues.push(Issue::manual(
                Severity::Critical,
                "output",
                "Module produces no audible output".into(),
                "Check signal chain - excitation may not reach resonator",
                "// Verify signal flow:\n// 1. Check gate/trigger is working\n// 2. Check oscillator/exciter output\n// 3. Increase output_gain",
            ));
        } else if r.peak_amplitude < t.peak_min {
            let boost = f64::max(2.0, 0.5 / r.peak_amplitude.max(1e-6));
            issues.push(Issue::manual(
                Severity::High,
                "output",
                format!("Output too quiet: peak={:.3}", r.peak_amplitude),
                "Increase output gain",
                &format!("output_gain = {:.1};  // Boost output", boost),
            ));
        }

        issues
    }

    fn analyze_quality(&self, v: &VerificationResult) -> Vec<Issue> {
        let t = &self.thresholds;
        let q = &v.quality;
        let mut issues = Vec::new();

        if q.thd_percent > t.thd_very_high {
            issues.push(Issue::new(
                Severity::High,
                "distortion",
                format!("Very high THD: {:.1}%", q.thd_percent),
                "Check for gain staging issues or unwanted saturation",
                "// Reduce internal gain before saturation stage\n// Or add lowpass filtering",
            ));
        } else if q.thd_percent > t.thd_high {
            issues.push(Issue::new(
                Severity::Medium,
                "distortion",
                format!("High THD: {:.1}% (may be intentional)", q.thd_percent),
                "Review if distortion is intentional for this module type",
                "// If unintentional, reduce excitation or feedback",
            ));
        }

        // Near-zero or negative HNR is not meaningful for non-tonal content
        if q.hnr_db > 0.0 && q.hnr_db < t.hnr_min {
            issues.push(Issue::manual(
                Severity::Medium,
                "noise",
                format!("Low harmonic-to-noise ratio: {:.1}dB", q.hnr_db),
                "Reduce noise in signal chain or increase resonator feedback",
                "// For physical models, increase resonator feedback\n// Or reduce breath/noise component",
            ));
        }

        for text in q.issues.iter().filter(|text| !text.contains("THD")) {
            issues.push(Issue::manual(
                Severity::Low,
                "quality",
                text.clone(),
                "Review and address as needed",
                "",
            ));
        }

        issues
    }

    fn analyze_parameters(&self, v: &VerificationResult) -> Vec<Issue> {
        let mut issues = Vec::new();

        for p in &v.parameter_issues {
            let constrain = format!(
                "{} = hslider(\"{}\", init, {:.2}, max, step);",
                p.param,
                p.param,
                p.value + 0.1
            );
            if p.severity == Severity::High || p.issue.to_lowercase().contains("clipping") {
                issues.push(Issue::new(
                    Severity::High,
                    "parameter",
                    format!("Parameter {}={}: {}", p.param, p.value, p.issue),
                    &format!("Add compensation or constrain {} range", p.param),
                    &format!("// Option 1: Fix the issue\n// Option 2: Constrain range:\n{}", constrain),
                ));
            } else if p.issue == "silent" {
                issues.push(Issue::new(
                    Severity::Low,
                    "parameter",
                    format!("Parameter {}={} produces silence", p.param, p.value),
                    &format!("Consider constraining {} minimum if silence is unwanted", p.param),
                    &format!("// Constrain to audible range:\n{}", constrain),
                ));
            }
        }

        issues
    }

    fn analyze_ai(&self, ai: &AiAnalysis) -> Vec<Issue> {
        let t = &self.thresholds;
        let mut issues = Vec::new();

        if ai.clap_score < t.clap_acceptable {
            let mut description = format!("Low AI quality score: {}/100", ai.clap_score);
            if !ai.top_negative.is_empty() {
                let detected: Vec<String> = ai
                    .top_negative
                    .iter()
                    .take(2)
                    .map(|(desc, sim)| format!("{} ({:.2})", desc, sim))
                    .collect();
                description.push_str(&format!(" - detected: {}", detected.join(", ")));
            }
            issues.push(Issue::new(
                Severity::Medium,
                "ai_quality",
                description,
                "Address detected quality issues (harshness, noise, artifacts)",
                "// Common fixes:\n// - Add filtering: fi.lowpass(2, 8000)\n// - Smooth transients: si.smooth(0.99)\n// - Add soft limiting: ma.tanh",
            ));
        }

        for (descriptor, similarity) in &ai.top_negative {
            if *similarity <= t.negative_match {
                continue;
            }
            let (instruction, hint) = fix_for_negative(descriptor);
            let severity = if *similarity > t.negative_strong {
                Severity::Medium
            } else {
                Severity::Low
            };
            issues.push(Issue::new(
                severity,
                "ai_quality",
                format!("AI detected: {} (similarity: {:.2})", descriptor, similarity),
                instruction,
                hint,
            ));
        }

        issues
    }

    /// Quality score weighted 40% over a 60 baseline, blended 80/20 with the
    /// AI score, minus per-issue penalties, clamped to 0-100
    fn calculate_score(&self, v: &VerificationResult, issues: &[Issue]) -> u32 {
        let mut score = 100.0;

        if v.quality.overall_score > 0 {
            score = v.quality.overall_score as f64 * 0.4 + 60.0;
        }

        if let Some(ai) = v.ai.as_ref().filter(|ai| ai.has_score()) {
            score = score * 0.8 + ai.clap_score as f64 / 100.0 * 20.0;
        }

        for issue in issues {
            score -= issue.severity.penalty();
        }

        score.clamp(0.0, 100.0) as u32
    }
}
