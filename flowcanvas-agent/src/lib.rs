//! # FlowCanvas Agent
//!
//! Asynchronous glue between a voice transcript stream, an external diagram
//! generator and the synchronous `flowcanvas-core` pipeline.
//!
//! ## Flow
//!
//! ```text
//! transcript ──► EditingSession ──► Scheduler (debounce, single-flight)
//!                                        │
//!                                        ▼
//!                 RetryOrchestrator ◄──► GuardedGenerator ──► HttpGenerator
//!                   lint → ids → syntax       (timeout, cancel)   (backoff)
//!                                        │
//!                                        ▼
//!                          DiagramApplier (atomic, rollback)
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod client;
pub mod config;
pub mod generator;
pub mod guard;
pub mod orchestrator;
pub mod scheduler;
pub mod session;
pub mod telemetry;

pub use client::HttpGenerator;
pub use config::{
    AgentConfig, GeneratorConfig, RetryConfig, SchedulerConfig, SessionConfig, ValidationConfig,
};
pub use generator::{DiagramGenerator, GenerationError, GenerationRequest, Proposal};
pub use guard::{CallTracker, GuardedGenerator};
pub use orchestrator::{
    Accepted, AttemptBudget, Evaluation, OrchestrationError, RetryOrchestrator, Stage,
    ValidationPipeline,
};
pub use scheduler::{next_wait, Execution, GenerationJob, Job, Scheduler};
pub use session::{EditingSession, SessionError, TranscriptChunk};
