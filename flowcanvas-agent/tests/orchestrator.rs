//! Retry Orchestrator Integration Tests
//!
//! Drives the validation state machine with a scripted generator:
//! - Acceptance on the first proposal
//! - Revision with feedback at each stage
//! - Per-stage budget exhaustion
//! - Spec proposals and generator failures

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use flowcanvas_agent::{
    DiagramGenerator, GenerationError, GenerationRequest, OrchestrationError, Proposal,
    RetryOrchestrator, Stage, ValidationConfig, ValidationPipeline,
};
use flowcanvas_core::{
    ApplyMode, CanvasContext, DiagramSpec, LintOptions, LiveIds, SyntaxChecker, SyntaxError,
};

const GOOD: &str = "flowchart TD\n    a[\"A\"]\n    b[\"B\"]\n    a --> b\n";
const BAD_HEADER: &str = "flowchart TB\n    a[\"A\"]\n";

/// One recorded generator call.
#[derive(Debug, Clone)]
struct Call {
    action: &'static str,
    previous: Option<String>,
    feedback: Option<String>,
}

/// Replays queued responses in order and records every call.
struct ScriptedGenerator {
    script: Mutex<VecDeque<Result<Proposal, GenerationError>>>,
    calls: Mutex<Vec<Call>>,
}

impl ScriptedGenerator {
    fn new(script: Vec<Result<Proposal, GenerationError>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            calls: Mutex::new(Vec::new()),
        })
    }

    fn texts(texts: &[&str]) -> Arc<Self> {
        Self::new(
            texts
                .iter()
                .map(|t| Ok(Proposal::Text((*t).to_string())))
                .collect(),
        )
    }

    fn calls(&self) -> Vec<Call> {
        self.calls.lock().expect("lock").clone()
    }

    fn next(&self, call: Call) -> Result<Proposal, GenerationError> {
        self.calls.lock().expect("lock").push(call);
        self.script
            .lock()
            .expect("lock")
            .pop_front()
            .unwrap_or_else(|| Err(GenerationError::MalformedResponse("script ended".into())))
    }
}

#[async_trait]
impl DiagramGenerator for ScriptedGenerator {
    async fn propose(&self, _request: &GenerationRequest) -> Result<Proposal, GenerationError> {
        self.next(Call {
            action: "propose",
            previous: None,
            feedback: None,
        })
    }

    async fn revise(
        &self,
        _request: &GenerationRequest,
        previous: &str,
        feedback: &str,
    ) -> Result<Proposal, GenerationError> {
        self.next(Call {
            action: "revise",
            previous: Some(previous.to_string()),
            feedback: Some(feedback.to_string()),
        })
    }
}

/// Rejects every candidate at the final gate.
struct RejectingSyntax;

impl SyntaxChecker for RejectingSyntax {
    fn check(&self, _text: &str) -> Result<(), SyntaxError> {
        Err(SyntaxError {
            line: 1,
            message: "renderer refused the diagram".into(),
        })
    }
}

fn orchestrator(generator: Arc<ScriptedGenerator>) -> RetryOrchestrator {
    RetryOrchestrator::new(generator, ValidationConfig::default())
}

fn request(mode: ApplyMode) -> GenerationRequest {
    GenerationRequest::new("connect a to b", mode, CanvasContext::default())
}

fn live_with(ids: &[&str]) -> LiveIds {
    LiveIds {
        used_node_ids: ids.iter().map(|s| (*s).to_string()).collect(),
        ..LiveIds::default()
    }
}

// ============================================================================
// Acceptance
// ============================================================================

#[tokio::test]
async fn test_valid_first_proposal_is_accepted() {
    let generator = ScriptedGenerator::texts(&[GOOD]);
    let accepted = orchestrator(generator.clone())
        .run(&request(ApplyMode::ReplaceCanvas), &LiveIds::default())
        .await
        .expect("accepted");

    assert_eq!(accepted.text, GOOD);
    assert_eq!(accepted.attempts, 1);
    assert!(accepted.warnings.is_empty());
    assert_eq!(generator.calls().len(), 1);
}

#[tokio::test]
async fn test_warnings_do_not_block_acceptance() {
    let long = format!("flowchart TD\n    a[\"{}\"]\n", "word ".repeat(20));
    let generator = ScriptedGenerator::texts(&[&long]);
    let accepted = orchestrator(generator)
        .run(&request(ApplyMode::ReplaceCanvas), &LiveIds::default())
        .await
        .expect("accepted");
    assert_eq!(accepted.warnings.len(), 1);
}

#[tokio::test]
async fn test_spec_proposal_is_rendered() {
    let spec = DiagramSpec::from_json(
        r#"{"direction":"LR","nodes":[{"id":"x","label":"X","shape":"decision"}],"edges":[]}"#,
    )
    .expect("spec");
    let generator = ScriptedGenerator::new(vec![Ok(Proposal::Spec(spec))]);
    let accepted = orchestrator(generator)
        .run(&request(ApplyMode::ReplaceCanvas), &LiveIds::default())
        .await
        .expect("accepted");
    assert_eq!(accepted.text, "flowchart LR\n    x{\"X\"}\n");
}

// ============================================================================
// Revision
// ============================================================================

#[tokio::test]
async fn test_lint_failure_asks_for_revision() {
    let generator = ScriptedGenerator::texts(&[BAD_HEADER, GOOD]);
    let accepted = orchestrator(generator.clone())
        .run(&request(ApplyMode::ReplaceCanvas), &LiveIds::default())
        .await
        .expect("accepted");

    assert_eq!(accepted.attempts, 2);
    let calls = generator.calls();
    assert_eq!(calls[1].action, "revise");
    assert_eq!(calls[1].previous.as_deref(), Some(BAD_HEADER));
    assert!(calls[1]
        .feedback
        .as_deref()
        .is_some_and(|f| f.contains("BAD_DIRECTION")));
}

#[tokio::test]
async fn test_collision_feedback_only_in_incremental_mode() {
    let live = live_with(&["a"]);

    let generator = ScriptedGenerator::texts(&[GOOD]);
    let accepted = orchestrator(generator)
        .run(&request(ApplyMode::ReplaceCanvas), &live)
        .await
        .expect("replace mode skips collision check");
    assert_eq!(accepted.attempts, 1);

    let renamed = "flowchart TD\n    a_2[\"A\"]\n    b[\"B\"]\n    a_2 --> b\n";
    let generator = ScriptedGenerator::texts(&[GOOD, renamed]);
    let accepted = orchestrator(generator.clone())
        .run(&request(ApplyMode::Incremental), &live)
        .await
        .expect("accepted after rename");
    assert_eq!(accepted.text, renamed);
    let feedback = generator.calls()[1].feedback.clone().expect("feedback");
    assert!(feedback.contains("Collision avoidance is needed"));
    assert!(feedback.contains("rename `a` to `a_2`"));
}

#[tokio::test]
async fn test_incremental_edges_may_reference_live_nodes() {
    let text = "flowchart TD\n    c[\"C\"]\n    a --> c\n";
    let generator = ScriptedGenerator::texts(&[text]);
    let accepted = orchestrator(generator)
        .run(&request(ApplyMode::Incremental), &live_with(&["a"]))
        .await
        .expect("accepted");
    assert_eq!(accepted.attempts, 1);
}

#[tokio::test]
async fn test_syntax_gate_failure_restarts_at_linting() {
    let generator = ScriptedGenerator::texts(&[GOOD, GOOD, GOOD]);
    let config = ValidationConfig {
        max_attempts_per_stage: 3,
        ..ValidationConfig::default()
    };
    let pipeline = ValidationPipeline::new(LintOptions::default(), Default::default())
        .with_syntax(Arc::new(RejectingSyntax));

    let err = RetryOrchestrator::new(generator.clone(), config)
        .run_with(&request(ApplyMode::ReplaceCanvas), &pipeline)
        .await
        .expect_err("syntax gate always fails");

    match err {
        OrchestrationError::Exhausted { stage, detail } => {
            assert_eq!(stage, Stage::ValidatingSyntax);
            assert!(detail.contains("renderer refused the diagram"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(generator.calls().len(), 3);
}

// ============================================================================
// Failure
// ============================================================================

#[tokio::test]
async fn test_lint_budget_exhausts_after_five_failures() {
    let generator = ScriptedGenerator::texts(&[BAD_HEADER; 6]);
    let err = orchestrator(generator.clone())
        .run(&request(ApplyMode::ReplaceCanvas), &LiveIds::default())
        .await
        .expect_err("exhausted");

    match err {
        OrchestrationError::Exhausted { stage, detail } => {
            assert_eq!(stage, Stage::Linting);
            assert!(detail.contains("BAD_DIRECTION"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    let calls = generator.calls();
    assert_eq!(calls.len(), 5);
    assert_eq!(calls[0].action, "propose");
    assert!(calls[1..].iter().all(|c| c.action == "revise"));
}

#[tokio::test]
async fn test_invalid_spec_counts_against_linting() {
    let bad = DiagramSpec::from_json(r#"{"direction":"TD","nodes":[],"edges":[]}"#).expect("spec");
    let generator = ScriptedGenerator::new(vec![
        Ok(Proposal::Spec(bad)),
        Ok(Proposal::Text(GOOD.into())),
    ]);
    let accepted = orchestrator(generator.clone())
        .run(&request(ApplyMode::ReplaceCanvas), &LiveIds::default())
        .await
        .expect("accepted");
    assert_eq!(accepted.attempts, 2);
    assert!(generator.calls()[1]
        .feedback
        .as_deref()
        .is_some_and(|f| f.contains("spec is invalid")));
}

#[tokio::test]
async fn test_cancelled_call_is_not_retried() {
    let generator = ScriptedGenerator::new(vec![
        Ok(Proposal::Text(BAD_HEADER.into())),
        Err(GenerationError::Cancelled),
        Ok(Proposal::Text(GOOD.into())),
    ]);
    let err = orchestrator(generator.clone())
        .run(&request(ApplyMode::ReplaceCanvas), &LiveIds::default())
        .await
        .expect_err("cancelled");
    assert!(err.is_cancelled());
    assert_eq!(generator.calls().len(), 2);
}
