//! Editing Session Integration Tests
//!
//! Runs transcripts through the scheduler, orchestrator and applier under
//! paused time.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use flowcanvas_agent::{
    AgentConfig, DiagramGenerator, EditingSession, GenerationError, GenerationRequest, Proposal,
    TranscriptChunk,
};
use flowcanvas_core::{
    ApplyMode, CanvasStore, DiagramApplier, LayeredConverter, MemoryRecordStore, RecordStore,
};

/// Draws one node named after the transcript; "slow" transcripts take 20s.
#[derive(Default)]
struct EchoGenerator {
    calls: AtomicUsize,
}

#[async_trait]
impl DiagramGenerator for EchoGenerator {
    async fn propose(&self, request: &GenerationRequest) -> Result<Proposal, GenerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if request.transcript.starts_with("slow") {
            tokio::time::sleep(Duration::from_secs(20)).await;
        }
        let id = request.transcript.replace(' ', "_");
        Ok(Proposal::Text(format!(
            "flowchart TD\n    {id}[\"{}\"]\n",
            request.transcript
        )))
    }

    async fn revise(
        &self,
        request: &GenerationRequest,
        _previous: &str,
        _feedback: &str,
    ) -> Result<Proposal, GenerationError> {
        self.propose(request).await
    }
}

/// Session over a fresh canvas and in-memory records.
fn session(
    generator: Arc<EchoGenerator>,
    config: &AgentConfig,
) -> (EditingSession, Arc<MemoryRecordStore>) {
    let records = Arc::new(MemoryRecordStore::new());
    let applier = DiagramApplier::new(
        Arc::new(LayeredConverter::default()),
        records.clone(),
        "session-1",
    );
    let session = EditingSession::new(CanvasStore::default(), applier, generator, config);
    (session, records)
}

fn said(text: &str) -> TranscriptChunk {
    TranscriptChunk::final_text(text, 0.9)
}

async fn sleep_ms(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

#[tokio::test(start_paused = true)]
async fn test_only_latest_transcript_reaches_canvas() {
    let generator = Arc::new(EchoGenerator::default());
    let (session, records) = session(generator.clone(), &AgentConfig::default());

    assert!(session.on_transcript(said("draw login")));
    sleep_ms(300).await;
    assert!(session.on_transcript(said("draw logout")));
    sleep_ms(2000).await;

    assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
    let scene = session.store().get();
    assert_eq!(scene.bound_text("draw_logout"), Some("draw logout"));
    assert!(scene.get_element("draw_login").is_none());

    let record = records.read("session-1").expect("read").expect("record");
    assert!(record.diagram_text.contains("draw_logout"));
}

#[tokio::test(start_paused = true)]
async fn test_newer_transcript_cancels_in_flight_call() {
    let generator = Arc::new(EchoGenerator::default());
    let (session, _records) = session(generator.clone(), &AgentConfig::default());

    session.on_transcript(said("slow diagram"));
    sleep_ms(1500).await;
    assert!(session.snapshot().in_flight);

    session.on_transcript(said("quick diagram"));
    sleep_ms(100).await;
    assert!(!session.snapshot().in_flight, "cancelled call completes the job");
    assert!(session.store().get().is_empty());

    // The debounce fired inside the cooldown of the cancelled job.
    sleep_ms(5000).await;
    assert!(session.snapshot().pending);
    assert!(session.flush());
    sleep_ms(100).await;

    let scene = session.store().get();
    assert_eq!(scene.bound_text("quick_diagram"), Some("quick diagram"));
    assert!(scene.get_element("slow_diagram").is_none());
    assert_eq!(generator.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_teardown_drops_pending_transcript() {
    let generator = Arc::new(EchoGenerator::default());
    let (session, _records) = session(generator.clone(), &AgentConfig::default());

    session.on_transcript(said("draw box"));
    session.teardown();
    sleep_ms(5000).await;

    assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
    assert!(session.store().get().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_incremental_mode_from_config() {
    let mut config = AgentConfig::default();
    config.session.apply_mode = ApplyMode::Incremental;
    let generator = Arc::new(EchoGenerator::default());
    let (session, _records) = session(generator, &config);
    assert_eq!(session.apply_mode(), ApplyMode::Incremental);

    session.process("first").await.expect("first").expect("applied");
    session.process("second").await.expect("second").expect("applied");

    let scene = session.store().get();
    assert!(scene.get_element("second").is_some());
}

#[test]
fn test_from_config_requires_generator_url() {
    let err = EditingSession::from_config(
        CanvasStore::default(),
        Arc::new(MemoryRecordStore::new()),
        "session-1",
        &AgentConfig::default(),
    )
    .expect_err("no url");
    assert!(matches!(err, GenerationError::InvalidUrl(_)));
}
