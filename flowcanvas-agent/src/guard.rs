//! Timeout and cancellation around generator calls.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::{AbortHandle, AbortRegistration, Abortable};

use crate::generator::{DiagramGenerator, GenerationError, GenerationRequest, Proposal};

/// Outstanding generator calls that a newer request may abort.
#[derive(Debug, Default)]
pub struct CallTracker {
    calls: Mutex<HashMap<u64, AbortHandle>>,
    next_id: AtomicU64,
}

impl CallTracker {
    /// Create an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn register(&self) -> (u64, AbortRegistration) {
        let (handle, registration) = AbortHandle::new_pair();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, handle);
        (id, registration)
    }

    fn finish(&self, id: u64) {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
    }

    /// Abort every outstanding call. Returns how many were aborted.
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<AbortHandle> = self
            .calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, handle)| handle)
            .collect();
        for handle in &drained {
            handle.abort();
        }
        if !drained.is_empty() {
            tracing::debug!(count = drained.len(), "cancelled outstanding generator calls");
        }
        drained.len()
    }

    /// Number of calls currently in progress.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Removes a call from its tracker when the call ends or is dropped.
struct TrackedCall<'a> {
    tracker: &'a CallTracker,
    id: u64,
}

impl Drop for TrackedCall<'_> {
    fn drop(&mut self) {
        self.tracker.finish(self.id);
    }
}

/// Wraps a generator with a wall-clock timeout and tracked cancellation.
#[derive(Debug)]
pub struct GuardedGenerator<G> {
    inner: G,
    timeout: Duration,
    tracker: Arc<CallTracker>,
}

impl<G: DiagramGenerator> GuardedGenerator<G> {
    /// Guard `inner` with `timeout` per call.
    pub fn new(inner: G, timeout: Duration) -> Self {
        Self {
            inner,
            timeout,
            tracker: Arc::new(CallTracker::new()),
        }
    }

    /// Tracker shared with whoever signals newer requests.
    #[must_use]
    pub fn tracker(&self) -> Arc<CallTracker> {
        Arc::clone(&self.tracker)
    }

    /// Abort every outstanding call.
    pub fn cancel_all(&self) -> usize {
        self.tracker.cancel_all()
    }

    async fn guard<F>(&self, call: F) -> Result<Proposal, GenerationError>
    where
        F: Future<Output = Result<Proposal, GenerationError>> + Send,
    {
        let (id, registration) = self.tracker.register();
        let _tracked = TrackedCall {
            tracker: &self.tracker,
            id,
        };
        match tokio::time::timeout(self.timeout, Abortable::new(call, registration)).await {
            Ok(Ok(result)) => result,
            Ok(Err(_aborted)) => Err(GenerationError::Cancelled),
            Err(_elapsed) => {
                tracing::warn!(timeout = ?self.timeout, "generator call timed out");
                Err(GenerationError::Timeout(self.timeout))
            }
        }
    }
}

#[async_trait]
impl<G: DiagramGenerator> DiagramGenerator for GuardedGenerator<G> {
    async fn propose(&self, request: &GenerationRequest) -> Result<Proposal, GenerationError> {
        self.guard(self.inner.propose(request)).await
    }

    async fn revise(
        &self,
        request: &GenerationRequest,
        previous: &str,
        feedback: &str,
    ) -> Result<Proposal, GenerationError> {
        self.guard(self.inner.revise(request, previous, feedback))
            .await
    }
}

#[async_trait]
impl<G: DiagramGenerator + ?Sized> DiagramGenerator for Arc<G> {
    async fn propose(&self, request: &GenerationRequest) -> Result<Proposal, GenerationError> {
        (**self).propose(request).await
    }

    async fn revise(
        &self,
        request: &GenerationRequest,
        previous: &str,
        feedback: &str,
    ) -> Result<Proposal, GenerationError> {
        (**self).revise(request, previous, feedback).await
    }
}
