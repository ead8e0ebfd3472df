//! One user's live editing session.
//!
//! Final transcript chunks are debounced through the [`Scheduler`]; each
//! execution projects the canvas, runs the [`RetryOrchestrator`] and applies
//! the accepted diagram atomically. A newer transcript aborts any generator
//! call still in flight.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use flowcanvas_core::{
    ApplyMode, ApplyOutcome, CanvasContext, CanvasError, CanvasStore, DiagramApplier,
    LayeredConverter, LiveIds, RecordStore,
};

use crate::client::HttpGenerator;
use crate::config::{AgentConfig, SessionConfig};
use crate::generator::{DiagramGenerator, GenerationError, GenerationRequest};
use crate::guard::{CallTracker, GuardedGenerator};
use crate::orchestrator::{OrchestrationError, RetryOrchestrator};
use crate::scheduler::{Execution, GenerationJob, Job, Scheduler};

/// A piece of speech-to-text output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptChunk {
    /// Recognized text.
    pub text: String,
    /// Whether the recognizer has finalized this text.
    pub is_final: bool,
    /// Recognizer confidence in `[0, 1]`.
    pub confidence: f32,
}

impl TranscriptChunk {
    /// A finalized chunk.
    #[must_use]
    pub fn final_text(text: impl Into<String>, confidence: f32) -> Self {
        Self {
            text: text.into(),
            is_final: true,
            confidence,
        }
    }

    /// A chunk the recognizer may still revise.
    #[must_use]
    pub fn interim(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_final: false,
            confidence: 0.0,
        }
    }
}

/// Errors from processing one transcript.
#[derive(Debug, Error)]
pub enum SessionError {
    /// No acceptable diagram was produced.
    #[error(transparent)]
    Orchestration(#[from] OrchestrationError),
    /// The accepted diagram could not be applied.
    #[error("failed to apply diagram: {0}")]
    Apply(#[from] CanvasError),
}

/// The work behind each scheduled transcript.
struct SessionCore {
    store: CanvasStore,
    applier: DiagramApplier,
    orchestrator: RetryOrchestrator,
}

impl SessionCore {
    /// Orchestrate and apply `transcript`. A superseded `execution` never
    /// reaches the canvas.
    async fn process(
        &self,
        transcript: &str,
        execution: Option<&Execution>,
    ) -> Result<Option<ApplyOutcome>, SessionError> {
        let scene = self.store.get();
        let request = GenerationRequest::new(
            transcript,
            self.applier.mode(),
            CanvasContext::from_scene(&scene),
        );
        let live = LiveIds::from_scene(&scene);

        let accepted = match self.orchestrator.run(&request, &live).await {
            Ok(accepted) => accepted,
            Err(e) if e.is_cancelled() => {
                debug!("generation superseded by a newer transcript");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        for warning in &accepted.warnings {
            debug!(code = %warning.code, message = %warning.message, "accepted with warning");
        }
        if let Some(execution) = execution.filter(|e| !e.is_current()) {
            debug!(
                generation = execution.generation(),
                "execution superseded; discarding accepted diagram"
            );
            return Ok(None);
        }

        let outcome = self.applier.apply(&self.store, &accepted.text)?;
        info!(
            elements = outcome.element_count,
            attempts = accepted.attempts,
            "transcript applied to canvas"
        );
        Ok(Some(outcome))
    }
}

#[async_trait]
impl Job<String> for SessionCore {
    async fn run(&self, transcript: String, execution: Execution) -> anyhow::Result<()> {
        self.process(&transcript, Some(&execution)).await?;
        Ok(())
    }
}

/// Binds a canvas, a generator and the scheduler for one user.
pub struct EditingSession {
    core: Arc<SessionCore>,
    scheduler: Scheduler<String>,
    tracker: Arc<CallTracker>,
    config: SessionConfig,
}

impl std::fmt::Debug for EditingSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EditingSession")
            .field("config", &self.config)
            .field("scheduler", &self.scheduler)
            .finish_non_exhaustive()
    }
}

impl EditingSession {
    /// Create a session.
    ///
    /// `generator` is wrapped with the configured call timeout, and the
    /// applier is switched to the configured apply mode.
    #[must_use]
    pub fn new(
        store: CanvasStore,
        applier: DiagramApplier,
        generator: Arc<dyn DiagramGenerator>,
        config: &AgentConfig,
    ) -> Self {
        let guarded = GuardedGenerator::new(generator, config.generator.call_timeout);
        let tracker = guarded.tracker();
        let core = Arc::new(SessionCore {
            store,
            applier: applier.with_mode(config.session.apply_mode),
            orchestrator: RetryOrchestrator::new(Arc::new(guarded), config.validation.clone()),
        });

        let job: Arc<dyn Job<String>> = core.clone();
        let scheduler = Scheduler::new(config.scheduler, job);
        let hook_tracker = Arc::clone(&tracker);
        scheduler.on_cancel(move || {
            hook_tracker.cancel_all();
        });

        Self {
            core,
            scheduler,
            tracker,
            config: config.session,
        }
    }

    /// Create a session talking to the configured HTTP generator.
    ///
    /// # Errors
    ///
    /// Returns [`GenerationError::InvalidUrl`] if no valid generator URL is
    /// configured.
    pub fn from_config(
        store: CanvasStore,
        records: Arc<dyn RecordStore>,
        record_key: impl Into<String>,
        config: &AgentConfig,
    ) -> Result<Self, GenerationError> {
        let generator = HttpGenerator::from_config(&config.generator)?;
        let applier =
            DiagramApplier::new(Arc::new(LayeredConverter::default()), records, record_key);
        Ok(Self::new(store, applier, Arc::new(generator), config))
    }

    /// Handle a transcript chunk. Returns true if it was scheduled.
    ///
    /// Interim, empty and low-confidence chunks are ignored.
    pub fn on_transcript(&self, chunk: TranscriptChunk) -> bool {
        if !chunk.is_final {
            return false;
        }
        if chunk.confidence < self.config.min_confidence {
            debug!(confidence = chunk.confidence, "ignoring low-confidence transcript");
            return false;
        }
        let text = chunk.text.trim();
        if text.is_empty() {
            return false;
        }
        self.tracker.cancel_all();
        self.scheduler.enqueue(text.to_string());
        true
    }

    /// Process `transcript` immediately, bypassing the scheduler.
    ///
    /// Returns `Ok(None)` if the generator call was cancelled.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] if no diagram was accepted or applying it
    /// failed.
    pub async fn process(&self, transcript: &str) -> Result<Option<ApplyOutcome>, SessionError> {
        self.core.process(transcript, None).await
    }

    /// Run the pending transcript now. Returns false if nothing was pending.
    pub fn flush(&self) -> bool {
        self.scheduler.force_flush()
    }

    /// Canvas this session edits.
    #[must_use]
    pub fn store(&self) -> &CanvasStore {
        &self.core.store
    }

    /// Apply mode used for accepted diagrams.
    #[must_use]
    pub fn apply_mode(&self) -> ApplyMode {
        self.core.applier.mode()
    }

    /// Scheduler state.
    #[must_use]
    pub fn snapshot(&self) -> GenerationJob {
        self.scheduler.snapshot()
    }

    /// Stop all work: drop the pending transcript and abort generator calls.
    pub fn teardown(&self) {
        self.scheduler.cancel();
        self.tracker.cancel_all();
        debug!("editing session torn down");
    }
}

impl Drop for EditingSession {
    fn drop(&mut self) {
        self.scheduler.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::Proposal;
    use flowcanvas_core::MemoryRecordStore;

    struct FixedGenerator(&'static str);

    #[async_trait]
    impl DiagramGenerator for FixedGenerator {
        async fn propose(&self, _request: &GenerationRequest) -> Result<Proposal, GenerationError> {
            Ok(Proposal::Text(self.0.into()))
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

    fn session(generator: FixedGenerator) -> EditingSession {
        let applier = DiagramApplier::new(
            Arc::new(LayeredConverter::default()),
            Arc::new(MemoryRecordStore::new()),
            "test",
        );
        EditingSession::new(
            CanvasStore::default(),
            applier,
            Arc::new(generator),
            &AgentConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_interim_and_low_confidence_ignored() {
        let s = session(FixedGenerator("flowchart TD\n    a[\"A\"]\n"));
        assert!(!s.on_transcript(TranscriptChunk::interim("draw a box")));
        assert!(!s.on_transcript(TranscriptChunk::final_text("draw a box", 0.2)));
        assert!(!s.on_transcript(TranscriptChunk::final_text("   ", 0.9)));
        assert!(!s.snapshot().pending);

        assert!(s.on_transcript(TranscriptChunk::final_text("draw a box", 0.5)));
        assert!(s.snapshot().pending);
        s.teardown();
        assert!(!s.snapshot().pending);
    }

    #[tokio::test]
    async fn test_process_applies_accepted_diagram() {
        let s = session(FixedGenerator("flowchart LR\n    a[\"Start\"]\n    b[\"Stop\"]\n    a --> b\n"));
        let outcome = s.process("start then stop").await.expect("process").expect("applied");
        assert!(outcome.element_count > 0);
        assert_eq!(s.store().get().bound_text("a"), Some("Start"));
        assert_eq!(s.apply_mode(), ApplyMode::ReplaceCanvas);
    }

    #[tokio::test]
    async fn test_superseded_execution_does_not_apply() {
        use std::sync::atomic::AtomicU64;

        let s = session(FixedGenerator("flowchart TD\n    a[\"A\"]\n"));
        let live = Arc::new(AtomicU64::new(2));
        let stale = Execution::new(1, Arc::clone(&live));

        let outcome = s.core.process("draw a", Some(&stale)).await.expect("process");
        assert!(outcome.is_none());
        assert!(s.store().get().is_empty());

        let current = Execution::new(2, live);
        let outcome = s.core.process("draw a", Some(&current)).await.expect("process");
        assert!(outcome.is_some());
        assert_eq!(s.store().get().bound_text("a"), Some("A"));
    }

    #[tokio::test]
    async fn test_process_reports_exhaustion() {
        let s = session(FixedGenerator("sequenceDiagram\n    A->>B: hi\n"));
        let err = s.process("say hi").await.expect_err("never valid");
        assert!(matches!(
            err,
            SessionError::Orchestration(OrchestrationError::Exhausted { .. })
        ));
        assert!(s.store().get().is_empty());
    }

    #[test]
    fn test_transcript_chunk_serde() {
        let chunk: TranscriptChunk =
            serde_json::from_str(r#"{"text":"hi","isFinal":true,"confidence":0.9}"#)
                .expect("json");
        assert!(chunk.is_final);
    }
}
