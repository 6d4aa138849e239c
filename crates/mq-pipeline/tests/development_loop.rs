//! End-to-end development loop against in-process fakes

mod common;

use common::{FakeBuilder, FakeRenderer, TestProject, CLEAN_SOURCE, HOT_SOURCE};
use mq_pipeline::{
    FixType, Orchestrator, Report, ReportFormat, SessionOutcome, Verdict, Verifier, VerifyOptions,
};
use std::sync::Arc;

fn orchestrator(project: &TestProject) -> Orchestrator {
    let verifier = Verifier::new(
        project.config(),
        Box::new(FakeBuilder::new(project.layout())),
        Arc::new(FakeRenderer::new(project.layout())),
    );
    Orchestrator::new(verifier).with_options(VerifyOptions::basic())
}

// ============================================================================
// Terminal outcomes
// ============================================================================

#[test]
fn test_clean_module_passes_first_iteration() {
    let project = TestProject::new();
    project.add_module("CleanOsc", CLEAN_SOURCE);

    let session = orchestrator(&project).with_auto_fix(true).run("CleanOsc").unwrap();

    assert!(session.success);
    assert_eq!(session.final_verdict, Some(SessionOutcome::Passed));
    assert_eq!(session.total_iterations, 1);
    assert_eq!(session.final_score, 100);
    assert_eq!(session.iterations[0].verdict, Verdict::Pass);
    assert_eq!(session.iterations[0].action_taken, "none");
    assert!(session.instructions.is_none());
    assert!(session.completed_at.is_some());
}

#[test]
fn test_build_failure_stops_the_loop() {
    let project = TestProject::new();
    project.add_module("Broken", "process = syntax_error;\n");

    let session = orchestrator(&project).with_auto_fix(true).run("Broken").unwrap();

    assert!(!session.success);
    assert_eq!(session.final_verdict, Some(SessionOutcome::BuildFailed));
    assert_eq!(session.total_iterations, 1);
    assert_eq!(session.iterations[0].verdict, Verdict::BuildFailed);
    assert_eq!(session.iterations[0].action_taken, "stopped: build failed");
}

#[test]
fn test_manual_mode_leaves_instructions() {
    let project = TestProject::new();
    project.add_module("HotOsc", HOT_SOURCE);

    let session = orchestrator(&project).run("HotOsc").unwrap();

    assert_eq!(session.final_verdict, Some(SessionOutcome::AwaitingFixes));
    assert_eq!(session.total_iterations, 1);
    assert_eq!(session.iterations[0].verdict, Verdict::MajorIssues);
    assert_eq!(session.iterations[0].action_taken, "awaiting fixes");
    assert!(session.iterations[0].high_priority_issues[0].starts_with("Severe clipping"));

    // Nothing was touched
    assert_eq!(project.source("HotOsc"), HOT_SOURCE);

    let instructions = session.instructions.as_ref().unwrap();
    assert!(instructions.dsp_file.ends_with("hotosc.dsp"));
    assert_eq!(instructions.priority_issues[0].category, "clipping");
    assert_eq!(instructions.priority_issues[0].auto_fix_type, Some(FixType::AddLimiter));

    let prompt = instructions.to_prompt();
    assert!(prompt.contains("# Fix Instructions for HotOsc"));
    assert!(prompt.contains("Severe clipping"));
}

// ============================================================================
// Auto-fix
// ============================================================================

#[test]
fn test_auto_fix_adds_limiter_then_passes() {
    let project = TestProject::new();
    project.add_module("HotOsc", HOT_SOURCE);

    let session = orchestrator(&project).with_auto_fix(true).run("HotOsc").unwrap();

    assert!(session.success);
    assert_eq!(session.total_iterations, 2);
    assert_eq!(session.iterations[0].verdict, Verdict::MajorIssues);
    assert_eq!(session.iterations[0].judgment_score, 70);
    assert_eq!(session.iterations[0].action_taken, "applied add_limiter");
    assert_eq!(session.iterations[1].verdict, Verdict::Pass);

    assert!(project.source("HotOsc").contains("process = os.osc(440) * hot_gain : ma.tanh;"));
    // Accepted fixes drop their backups
    assert!(project.backups("HotOsc").is_empty());
}

#[test]
fn test_fix_that_breaks_the_build_is_rolled_back() {
    let project = TestProject::new();
    let source = format!("// limiter_breaks_build\n{}", HOT_SOURCE);
    project.add_module("Fragile", &source);

    let session = orchestrator(&project).with_auto_fix(true).run("Fragile").unwrap();

    assert_eq!(session.total_iterations, 3);
    assert_eq!(session.iterations[0].action_taken, "applied add_limiter");
    assert_eq!(session.iterations[1].verdict, Verdict::BuildFailed);
    assert_eq!(session.iterations[1].action_taken, "rolled back add_limiter");
    // The limiter was already tried, so the loop hands over
    assert_eq!(session.iterations[2].action_taken, "awaiting fixes");
    assert_eq!(session.final_verdict, Some(SessionOutcome::AwaitingFixes));
    assert_eq!(session.final_score, 70);

    assert_eq!(project.source("Fragile"), source);
    assert!(project.backups("Fragile").is_empty());
}

#[test]
fn test_iteration_budget_exhausted() {
    let project = TestProject::new();
    project.add_module("HotOsc", HOT_SOURCE);

    let session = orchestrator(&project)
        .with_auto_fix(true)
        .with_max_iterations(1)
        .run("HotOsc")
        .unwrap();

    assert!(!session.success);
    assert_eq!(session.final_verdict, Some(SessionOutcome::Exhausted));
    assert_eq!(session.total_iterations, 1);
    assert_eq!(session.final_score, 70);
    // The fix stays applied for the next run to verify
    assert!(project.source("HotOsc").contains("ma.tanh"));
}

#[test]
fn test_session_report() {
    let project = TestProject::new();
    project.add_module("HotOsc", HOT_SOURCE);

    let session = orchestrator(&project).with_auto_fix(true).run("HotOsc").unwrap();

    let text = session.generate(ReportFormat::Text);
    assert!(text.contains("DEVELOPMENT SESSION COMPLETE"));
    assert!(text.contains("Final Verdict: PASS"));
    assert!(text.contains("applied add_limiter"));

    let json: serde_json::Value = serde_json::from_str(&session.to_json()).unwrap();
    assert_eq!(json["final_verdict"], "PASS");
    assert_eq!(json["iterations"][0]["verdict"], "major_issues");
    assert_eq!(json["total_iterations"], 2);
}
