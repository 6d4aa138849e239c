//! Verifier, judge and check suite against in-process fakes

mod common;

use approx::assert_abs_diff_eq;
use common::{FakeBuilder, FakeRenderer, FakeScorer, TestProject, CLEAN_SOURCE, HOT_SOURCE};
use mq_pipeline::{
    Capabilities, Judge, ModuleCheckSuite, ModuleType, Report, Severity, Verdict, Verifier,
    VerifyOptions,
};
use std::sync::Arc;

fn verifier(project: &TestProject, renderer: FakeRenderer) -> Verifier {
    Verifier::new(project.config(), Box::new(FakeBuilder::new(project.layout())), Arc::new(renderer))
}

// ============================================================================
// Verification stages
// ============================================================================

#[test]
fn test_quality_render_of_clean_module() {
    let project = TestProject::new();
    project.add_module("CleanOsc", CLEAN_SOURCE);

    let mut config = project.config();
    config.quality_duration = 3.0;
    let verifier = Verifier::new(
        config,
        Box::new(FakeBuilder::new(project.layout())),
        Arc::new(FakeRenderer::new(project.layout())),
    );

    let result = verifier
        .verify("CleanOsc", &VerifyOptions::default().without_params().without_ai())
        .unwrap();

    assert!(result.build_success);
    assert!(result.success);
    assert_abs_diff_eq!(result.render.peak_amplitude, 0.5, epsilon = 1e-3);
    assert_eq!(result.render.clipping_percent, 0.0);
    assert!(!result.render.is_silent);
    assert!(result.quality.overall_score >= 70);
    assert!(result.quality.thd_percent < 1.0);
    assert!(result.notes.is_empty());
}

#[test]
fn test_skipped_module_is_not_rendered() {
    let project = TestProject::new();
    project.add_module("Clock", "process = 0;\n");
    project.write_config("Clock", r#"{ "skip_audio_tests": true, "skip_reason": "control-rate utility" }"#);

    let renderer = Arc::new(FakeRenderer::new(project.layout()));
    let verifier = Verifier::new(project.config(), Box::new(FakeBuilder::new(project.layout())), renderer.clone());

    let result = verifier.verify("Clock", &VerifyOptions::default()).unwrap();
    assert!(result.success);
    assert_eq!(renderer.renders(), 0);
    assert_eq!(result.notes, vec!["Audio tests skipped: control-rate utility".to_string()]);

    let judgment = Judge::for_module(&result.config).judge(&result);
    assert_eq!(judgment.verdict, Verdict::Pass);
    assert_eq!(judgment.overall_score, 100);
}

#[test]
fn test_unknown_module_fails_basic_render() {
    let project = TestProject::new();
    project.add_module("CleanOsc", CLEAN_SOURCE);

    let result = verifier(&project, FakeRenderer::new(project.layout()))
        .verify("Missing", &VerifyOptions::basic())
        .unwrap();

    assert!(!result.success);
    assert!(result.render.is_silent);
    assert!(result.notes[0].starts_with("Failed to render audio"));
}

#[test]
fn test_unmeasured_quality_is_not_success() {
    let project = TestProject::new();
    project.add_module("CleanOsc", CLEAN_SOURCE);

    let options = VerifyOptions {
        run_quality: false,
        run_params: false,
        run_ai: false,
    };
    let result = verifier(&project, FakeRenderer::new(project.layout()))
        .verify("CleanOsc", &options)
        .unwrap();

    assert!(result.build_success);
    assert!(!result.render.is_silent);
    assert_eq!(result.render.clipping_percent, 0.0);
    assert_eq!(result.quality.overall_score, 0);
    assert!(!result.success);
}

#[test]
fn test_build_failure_skips_rendering() {
    let project = TestProject::new();
    project.add_module("Broken", "process = syntax_error;\n");
    project.write_config("Broken", r#"{ "module_type": "filter", "quality_thresholds": { "thd_max_percent": 40.0 } }"#);

    let renderer = Arc::new(FakeRenderer::new(project.layout()));
    let verifier = Verifier::new(project.config(), Box::new(FakeBuilder::new(project.layout())), renderer.clone());
    let result = verifier.verify("Broken", &VerifyOptions::default()).unwrap();

    assert!(!result.build_success);
    assert!(result.build_error.contains("syntax error"));
    assert_eq!(renderer.renders(), 0);
    // The config snapshot is taken before the build
    assert_eq!(result.config.module_type, ModuleType::Filter);
    assert_eq!(result.config.quality_thresholds.thd_max_percent, 40.0);

    let judgment = Judge::default().judge(&result);
    assert_eq!(judgment.verdict, Verdict::BuildFailed);
    assert_eq!(judgment.next_action, "fix_build_errors");
}

// ============================================================================
// Parameter sweep
// ============================================================================

#[test]
fn test_sweep_finds_clipping_drive_range() {
    let project = TestProject::new();
    project.add_module("DriveOsc", CLEAN_SOURCE);
    let renderer = FakeRenderer::new(project.layout())
        .with_param("DriveOsc", "drive", 0.0, 1.0, 0.5)
        .with_param("DriveOsc", "freq", 20.0, 2000.0, 440.0)
        .with_param("DriveOsc", "gate", 0.0, 1.0, 0.0);

    let result = verifier(&project, renderer)
        .verify("DriveOsc", &VerifyOptions::basic())
        .unwrap();
    // `basic()` turns the sweep off
    assert!(result.parameter_ranges.is_empty());

    let renderer = FakeRenderer::new(project.layout())
        .with_param("DriveOsc", "drive", 0.0, 1.0, 0.5)
        .with_param("DriveOsc", "freq", 20.0, 2000.0, 440.0)
        .with_param("DriveOsc", "gate", 0.0, 1.0, 0.0);
    let options = VerifyOptions::default().without_quality().without_ai();
    let result = verifier(&project, renderer).verify("DriveOsc", &options).unwrap();

    // Gate is a control parameter and is not swept
    assert_eq!(result.parameter_ranges.len(), 2);
    assert_eq!(result.safe_params, vec!["freq".to_string()]);

    assert_eq!(result.parameter_issues.len(), 1);
    let issue = &result.parameter_issues[0];
    assert_eq!(issue.param, "drive");
    assert_eq!(issue.value, 1.0);
    assert_eq!(issue.severity, Severity::High);
    assert!(issue.issue.starts_with("clipping"));

    let drive = result
        .parameter_ranges
        .iter()
        .find(|a| a.param_name == "drive")
        .unwrap();
    assert_eq!(drive.safe_range, Some((0.0, 0.75)));
    assert_eq!(drive.recommended_max, Some(0.75));

    let judgment = Judge::for_module(&result.config).judge(&result);
    assert_eq!(judgment.verdict, Verdict::NeedsWork);
    assert_eq!(judgment.issues[0].category, "parameter");
    assert_eq!(judgment.overall_score, 85);
}

// ============================================================================
// Embedding scorer
// ============================================================================

#[test]
fn test_scorer_result_feeds_judgment() {
    let project = TestProject::new();
    project.add_module("CleanOsc", CLEAN_SOURCE);

    let scorer = Arc::new(FakeScorer::scoring(30, vec![("harsh digital distortion", 0.28)]));
    let verifier = verifier(&project, FakeRenderer::new(project.layout())).with_scorer(scorer.clone());
    let options = VerifyOptions::default().without_quality().without_params();

    let result = verifier.verify("CleanOsc", &options).unwrap();
    assert_eq!(scorer.calls(), 1);
    assert_eq!(result.ai.as_ref().map(|ai| ai.clap_score), Some(30));

    let judgment = Judge::default().judge(&result);
    let categories: Vec<&str> = judgment.issues.iter().map(|i| i.category.as_str()).collect();
    assert_eq!(categories, vec!["ai_quality", "ai_quality"]);
    assert!(judgment.issues[0].description.starts_with("Low AI quality score: 30/100"));
    assert!(judgment.issues[1].description.contains("harsh digital distortion"));
    assert_eq!(judgment.issues[1].auto_fix_type, Some(mq_pipeline::FixType::AddLimiter));
}

#[test]
fn test_scorer_failure_becomes_a_note() {
    let project = TestProject::new();
    project.add_module("CleanOsc", CLEAN_SOURCE);

    let verifier =
        verifier(&project, FakeRenderer::new(project.layout())).with_scorer(Arc::new(FakeScorer::broken()));
    let result = verifier
        .verify("CleanOsc", &VerifyOptions::default().without_quality().without_params())
        .unwrap();

    assert!(result.ai.is_none());
    assert!(result.build_success);
    assert!(result.notes.iter().any(|n| n.starts_with("AI analysis failed")));
}

#[test]
fn test_scorer_disabled_by_capabilities() {
    let project = TestProject::new();
    project.add_module("CleanOsc", CLEAN_SOURCE);

    let scorer = Arc::new(FakeScorer::scoring(90, Vec::new()));
    let verifier = verifier(&project, FakeRenderer::new(project.layout()))
        .with_scorer(scorer.clone())
        .with_capabilities(Capabilities::default().without_embedding_scorer());
    let result = verifier.verify("CleanOsc", &VerifyOptions::default().without_params()).unwrap();

    assert_eq!(scorer.calls(), 0);
    assert!(result.ai.is_none());
}

// ============================================================================
// Batch verification
// ============================================================================

#[test]
fn test_verify_all_keeps_module_order() {
    let project = TestProject::new();
    project.add_module("CleanOsc", CLEAN_SOURCE);
    project.add_module("HotOsc", HOT_SOURCE);

    let verifier = verifier(&project, FakeRenderer::new(project.layout()));
    let modules = vec!["HotOsc".to_string(), "CleanOsc".to_string()];
    let results = verifier.verify_all(&modules, &VerifyOptions::basic()).unwrap();

    assert_eq!(results.len(), 2);
    assert_eq!(results[0].module_name, "HotOsc");
    assert!(!results[0].success);
    assert!(results[0].render.clipping_percent > 5.0);
    assert_eq!(results[1].module_name, "CleanOsc");
    assert_eq!(results[1].render.clipping_percent, 0.0);
    // Quality was not measured, so it cannot count as verified
    assert!(!results[1].success);

    let text = results[0].to_text();
    assert!(text.contains("VERIFICATION RESULTS: HotOsc"));
    assert!(text.contains("Overall: NEEDS WORK"));
}

// ============================================================================
// Check suite
// ============================================================================

#[test]
fn test_check_suite_on_clean_module() {
    let project = TestProject::new();
    project.add_module("CleanOsc", CLEAN_SOURCE);
    let renderer = FakeRenderer::new(project.layout());

    let suite = ModuleCheckSuite::new(&renderer, project.layout());
    let report = suite.run("CleanOsc").unwrap();

    let names: Vec<&str> = report.checks.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(
        names,
        vec![
            "compilation",
            "basic_render",
            "audio_stability",
            "thd",
            "aliasing",
            "harmonic_character",
            "spectral_richness",
            "envelope"
        ]
    );
    let failed: Vec<_> = report.failed_checks().map(|c| c.name.clone()).collect();
    assert!(failed.is_empty(), "unexpected failures: {:?}", failed);
    assert!(report.passed);
}

#[test]
fn test_check_suite_flags_clipping() {
    let project = TestProject::new();
    project.add_module("HotOsc", HOT_SOURCE);
    let renderer = FakeRenderer::new(project.layout());

    let report = ModuleCheckSuite::new(&renderer, project.layout()).run("HotOsc").unwrap();
    assert!(!report.passed);

    let stability = report.checks.iter().find(|c| c.name == "audio_stability").unwrap();
    assert!(!stability.passed);
    assert!(stability.message.contains("Excessive clipping"));
    assert_eq!(stability.details["clipping_limit_percent"], 1.0);
}

#[test]
fn test_check_suite_without_signal_analysis() {
    let project = TestProject::new();
    project.add_module("CleanOsc", CLEAN_SOURCE);
    let renderer = FakeRenderer::new(project.layout());

    let report = ModuleCheckSuite::new(&renderer, project.layout())
        .with_capabilities(Capabilities::default().without_signal_analysis())
        .run("CleanOsc")
        .unwrap();

    let thd = report.checks.iter().find(|c| c.name == "thd").unwrap();
    assert!(thd.passed);
    assert!(thd.message.contains("skipped"));
}

#[test]
fn test_check_suite_unknown_module() {
    let project = TestProject::new();
    project.add_module("CleanOsc", CLEAN_SOURCE);
    let renderer = FakeRenderer::new(project.layout());

    let report = ModuleCheckSuite::new(&renderer, project.layout()).run("Missing").unwrap();
    assert!(!report.passed);
    assert!(!report.checks[0].passed);
    assert_eq!(report.checks[1].message, "Failed to render audio");
}
