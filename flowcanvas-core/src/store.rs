//! Injectable canvas state container.
//!
//! A [`CanvasStore`] owns one session's [`Scene`] and last accepted diagram
//! text. Clones share the same state, so the store can be handed to every
//! component that needs it. Subscribers are notified after each committed
//! mutation, outside the lock. A [`CanvasStore::transaction`] stages its
//! changes and publishes them once, only if it succeeds.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use crate::{Element, Scene};

/// Default viewport width in pixels.
const DEFAULT_WIDTH: f32 = 800.0;

/// Default viewport height in pixels.
const DEFAULT_HEIGHT: f32 = 600.0;

/// Errors that can occur during store and record operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// An I/O error occurred during persistence.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// A serialization or deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(String),
    /// The backing store refused the write.
    #[error("Write rejected: {0}")]
    Rejected(String),
}

/// Handle returned by [`CanvasStore::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Subscriber = Arc<dyn Fn(&Scene) + Send + Sync>;

#[derive(Debug, Clone, Default)]
struct CanvasState {
    scene: Scene,
    diagram_text: Option<String>,
    /// Bumped on every committed mutation.
    revision: u64,
}

/// Staged changes handed to the closure of [`CanvasStore::transaction`].
///
/// Nothing written here is visible to readers or subscribers until the
/// closure returns `Ok`.
#[derive(Debug)]
pub struct CanvasTransaction {
    staged: CanvasState,
}

impl CanvasTransaction {
    /// A copy of the staged scene.
    #[must_use]
    pub fn get(&self) -> Scene {
        self.staged.scene.clone()
    }

    /// Staged diagram text.
    #[must_use]
    pub fn diagram_text(&self) -> Option<&str> {
        self.staged.diagram_text.as_deref()
    }

    /// Mutate the staged scene.
    pub fn update<F, R>(&mut self, f: F) -> R
    where
        F: FnOnce(&mut Scene) -> R,
    {
        f(&mut self.staged.scene)
    }

    /// Stage new elements and the diagram text they came from.
    pub fn commit(&mut self, elements: Vec<Element>, diagram_text: impl Into<String>) {
        self.staged.scene.set_elements(elements);
        self.staged.diagram_text = Some(diagram_text.into());
    }
}

/// Thread-safe canvas state shared by the applier and the editing session.
#[derive(Clone)]
pub struct CanvasStore {
    state: Arc<RwLock<CanvasState>>,
    subscribers: Arc<RwLock<Vec<(SubscriptionId, Subscriber)>>>,
    next_subscription: Arc<AtomicU64>,
}

impl fmt::Debug for CanvasStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self
            .state
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        f.debug_struct("CanvasStore")
            .field("elements", &state.scene.element_count())
            .field("has_diagram_text", &state.diagram_text.is_some())
            .finish_non_exhaustive()
    }
}

impl Default for CanvasStore {
    fn default() -> Self {
        Self::new(Scene::new(DEFAULT_WIDTH, DEFAULT_HEIGHT))
    }
}

impl CanvasStore {
    /// Create a store holding `scene`.
    #[must_use]
    pub fn new(scene: Scene) -> Self {
        Self {
            state: Arc::new(RwLock::new(CanvasState {
                scene,
                diagram_text: None,
                revision: 0,
            })),
            subscribers: Arc::new(RwLock::new(Vec::new())),
            next_subscription: Arc::new(AtomicU64::new(1)),
        }
    }

    /// A copy of the current scene.
    #[must_use]
    pub fn get(&self) -> Scene {
        self.read_state().scene.clone()
    }

    /// Last accepted diagram text, if any.
    #[must_use]
    pub fn diagram_text(&self) -> Option<String> {
        self.read_state().diagram_text.clone()
    }

    /// Number of mutations committed so far.
    #[must_use]
    pub fn revision(&self) -> u64 {
        self.read_state().revision
    }

    /// Replace the scene.
    pub fn set(&self, scene: Scene) {
        self.write_state(|state| state.scene = scene);
    }

    /// Mutate the scene in place and return the closure's result.
    pub fn update<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut Scene) -> R,
    {
        self.write_state(|state| f(&mut state.scene))
    }

    /// Replace the elements and record the diagram text they came from.
    pub fn commit(&self, elements: Vec<Element>, diagram_text: impl Into<String>) {
        let diagram_text = diagram_text.into();
        self.write_state(|state| {
            state.scene.set_elements(elements);
            state.diagram_text = Some(diagram_text);
        });
    }

    /// Register a callback invoked with the scene after every mutation.
    pub fn subscribe<F>(&self, f: F) -> SubscriptionId
    where
        F: Fn(&Scene) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::Relaxed));
        self.subscribers
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push((id, Arc::new(f)));
        id
    }

    /// Remove a subscriber. Returns `false` if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self
            .subscribers
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let before = subscribers.len();
        subscribers.retain(|(sid, _)| *sid != id);
        subscribers.len() != before
    }

    /// Run `f` against a staged copy of the canvas.
    ///
    /// If `f` returns `Ok` the staged scene and text replace the live ones
    /// in a single mutation and subscribers are notified once. If it fails
    /// the staged copy is dropped; the live canvas, including writes made
    /// by others in the meantime, is untouched and nobody is notified.
    ///
    /// # Errors
    ///
    /// Returns whatever error `f` returns.
    pub fn transaction<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut CanvasTransaction) -> Result<T, E>,
        E: fmt::Display,
    {
        let mut tx = CanvasTransaction {
            staged: self.read_state().clone(),
        };
        let base = tx.staged.revision;
        match f(&mut tx) {
            Ok(value) => {
                self.write_state(|state| {
                    if state.revision != base {
                        tracing::warn!(
                            base,
                            current = state.revision,
                            "canvas changed during transaction; last write wins"
                        );
                    }
                    state.scene = tx.staged.scene;
                    state.diagram_text = tx.staged.diagram_text;
                });
                Ok(value)
            }
            Err(e) => {
                tracing::warn!(
                    elements = tx.staged.scene.element_count(),
                    "discarding staged canvas: {e}"
                );
                Err(e)
            }
        }
    }

    fn read_state(&self) -> std::sync::RwLockReadGuard<'_, CanvasState> {
        self.state
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn write_state<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut CanvasState) -> R,
    {
        let (result, scene) = {
            let mut state = self
                .state
                .write()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            let result = f(&mut state);
            state.revision += 1;
            (result, state.scene.clone())
        };
        self.notify(&scene);
        result
    }

    fn notify(&self, scene: &Scene) {
        let subscribers: Vec<Subscriber> = self
            .subscribers
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .iter()
            .map(|(_, s)| Arc::clone(s))
            .collect();
        for subscriber in subscribers {
            subscriber(scene);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;
    use crate::{CanvasError, ElementKind};

    fn rect(id: &str) -> Element {
        Element::new(ElementKind::Rectangle).with_id(id)
    }

    #[test]
    fn test_default_store_is_empty() {
        let store = CanvasStore::default();
        assert!(store.get().is_empty());
        assert!(store.diagram_text().is_none());
        assert!((store.get().viewport_width - DEFAULT_WIDTH).abs() < f32::EPSILON);
    }

    #[test]
    fn test_clones_share_state() {
        let store = CanvasStore::default();
        let other = store.clone();
        other.update(|scene| scene.add_element(rect("a")));
        assert!(store.get().get_element("a").is_some());
    }

    #[test]
    fn test_commit_sets_elements_and_text() {
        let store = CanvasStore::default();
        store.update(|scene| scene.add_element(rect("old")));
        store.commit(vec![rect("a"), rect("b")], "flowchart TD");
        let scene = store.get();
        assert_eq!(scene.element_count(), 2);
        assert!(scene.get_element("old").is_none());
        assert_eq!(store.diagram_text().as_deref(), Some("flowchart TD"));
    }

    #[test]
    fn test_subscribers_notified_until_unsubscribed() {
        let store = CanvasStore::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let id = store.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        store.set(Scene::new(100.0, 100.0));
        store.update(|scene| scene.add_element(rect("a")));
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        assert!(store.unsubscribe(id));
        assert!(!store.unsubscribe(id));
        store.update(Scene::clear);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_subscriber_can_read_store() {
        let store = CanvasStore::default();
        let seen = Arc::new(AtomicUsize::new(0));
        let (inner, counter) = (store.clone(), Arc::clone(&seen));
        store.subscribe(move |_| {
            counter.store(inner.get().element_count(), Ordering::SeqCst);
        });
        store.update(|scene| scene.add_element(rect("a")));
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_transaction_rolls_back_on_error() {
        let store = CanvasStore::default();
        store.commit(vec![rect("keep")], "flowchart TD\n    keep[\"Keep\"]\n");

        let result: Result<(), CanvasError> = store.transaction(|tx| {
            tx.commit(vec![rect("new")], "flowchart LR");
            assert_eq!(tx.diagram_text(), Some("flowchart LR"));
            Err(CanvasError::ConversionFailure { nodes: 1 })
        });
        assert!(result.is_err());
        assert!(store.get().get_element("keep").is_some());
        assert!(store.get().get_element("new").is_none());
        assert!(store
            .diagram_text()
            .is_some_and(|t| t.contains("keep")));
    }

    #[test]
    fn test_transaction_keeps_successful_changes() {
        let store = CanvasStore::default();
        let count: Result<usize, CanvasError> = store.transaction(|tx| {
            tx.update(|scene| scene.add_element(rect("a")));
            Ok(tx.get().element_count())
        });
        assert_eq!(count.ok(), Some(1));
        assert!(store.get().get_element("a").is_some());
        assert_eq!(store.revision(), 1);
    }

    #[test]
    fn test_transaction_notifies_only_on_success() {
        let store = CanvasStore::default();
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let log = Arc::clone(&seen);
        store.subscribe(move |scene| {
            let ids: Vec<String> = scene.elements().iter().map(|e| e.id.to_string()).collect();
            log.lock().expect("lock").push(ids);
        });

        let failed: Result<(), CanvasError> = store.transaction(|tx| {
            tx.commit(vec![rect("draft")], "flowchart TD");
            Err(CanvasError::ConversionFailure { nodes: 1 })
        });
        assert!(failed.is_err());
        assert!(seen.lock().expect("lock").is_empty());
        assert_eq!(store.revision(), 0);

        let done: Result<(), CanvasError> = store.transaction(|tx| {
            tx.commit(vec![rect("final")], "flowchart TD");
            Ok(())
        });
        assert!(done.is_ok());
        assert_eq!(*seen.lock().expect("lock"), vec![vec!["final".to_string()]]);
    }

    #[test]
    fn test_failed_transaction_keeps_concurrent_write() {
        let store = CanvasStore::default();
        let other = store.clone();
        let result: Result<(), CanvasError> = store.transaction(|tx| {
            tx.commit(vec![rect("draft")], "flowchart TD");
            other.update(|scene| scene.add_element(rect("elsewhere")));
            Err(CanvasError::ConversionFailure { nodes: 1 })
        });
        assert!(result.is_err());
        let scene = store.get();
        assert!(scene.get_element("elsewhere").is_some());
        assert!(scene.get_element("draft").is_none());
    }
}
