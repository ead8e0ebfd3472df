//! Adaptive debounced single-flight scheduler.
//!
//! Items are debounced: every [`Scheduler::enqueue`] replaces the pending
//! item and restarts the timer. When the timer fires the pending item runs,
//! unless an execution is already in flight or the cooldown since the last
//! completion has not elapsed, in which case the firing does nothing and the
//! item waits for the next enqueue or [`Scheduler::force_flush`].
//!
//! Each execution is tagged with a generation number. Only the execution
//! whose tag is still current when it finishes may clear the busy flag,
//! record its completion time and adapt the debounce wait. A superseded
//! execution still occupies the single slot until its task exits; nothing
//! else starts before then.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::SchedulerConfig;

/// Work run for each scheduled item.
#[async_trait]
pub trait Job<T>: Send + Sync {
    /// Execute `item`.
    ///
    /// Long-running jobs should check [`Execution::is_current`] before
    /// committing results.
    ///
    /// # Errors
    ///
    /// Failures are logged by the scheduler and otherwise ignored.
    async fn run(&self, item: T, execution: Execution) -> anyhow::Result<()>;
}

/// Tag of one running execution.
#[derive(Debug, Clone)]
pub struct Execution {
    generation: u64,
    current: Arc<AtomicU64>,
}

impl Execution {
    pub(crate) fn new(generation: u64, current: Arc<AtomicU64>) -> Self {
        Self {
            generation,
            current,
        }
    }

    /// Generation this execution was started with.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// False once a cancel or forced flush has superseded this execution.
    #[must_use]
    pub fn is_current(&self) -> bool {
        self.current.load(Ordering::SeqCst) == self.generation
    }
}

/// Read-only view of the scheduler state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenerationJob {
    /// An item is waiting to run.
    pub pending: bool,
    /// An execution is in flight.
    pub in_flight: bool,
    /// Tag of the most recently started execution.
    pub generation_counter: u64,
    /// When the last current execution finished.
    pub last_completed_at: Option<Instant>,
    /// Debounce wait applied to the next enqueue.
    pub current_wait: Duration,
}

/// Wait to use after an execution that took `elapsed`.
#[must_use]
pub fn next_wait(current: Duration, elapsed: Duration, config: &SchedulerConfig) -> Duration {
    if elapsed > config.slow_threshold {
        config.slow_wait
    } else if elapsed < config.fast_threshold {
        config.base_wait
    } else {
        current
    }
}

type CancelHook = Box<dyn Fn() + Send + Sync>;

struct State<T> {
    pending: Option<T>,
    /// The current generation is running.
    in_flight: bool,
    /// A task is running, current or superseded.
    running: bool,
    /// Start the pending item as soon as the running task exits.
    flush_requested: bool,
    generation: u64,
    last_completed_at: Option<Instant>,
    current_wait: Duration,
    timer: Option<JoinHandle<()>>,
    timer_epoch: u64,
}

impl<T> State<T> {
    fn stop_timer(&mut self) {
        self.timer_epoch += 1;
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

struct Inner<T> {
    config: SchedulerConfig,
    job: Arc<dyn Job<T>>,
    state: Mutex<State<T>>,
    /// Mirrors `State::generation` for [`Execution::is_current`].
    live_generation: Arc<AtomicU64>,
    cancel_hooks: Mutex<Vec<CancelHook>>,
}

/// Debounced single-flight runner for one editing session.
///
/// Must be used from within a Tokio runtime.
pub struct Scheduler<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Scheduler<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Send + 'static> std::fmt::Debug for Scheduler<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("config", &self.inner.config)
            .field("snapshot", &self.snapshot())
            .finish_non_exhaustive()
    }
}

impl<T: Send + 'static> Scheduler<T> {
    /// Create a scheduler running `job`.
    pub fn new(config: SchedulerConfig, job: Arc<dyn Job<T>>) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                job,
                state: Mutex::new(State {
                    pending: None,
                    in_flight: false,
                    running: false,
                    flush_requested: false,
                    generation: 0,
                    last_completed_at: None,
                    current_wait: config.base_wait,
                    timer: None,
                    timer_epoch: 0,
                }),
                live_generation: Arc::new(AtomicU64::new(0)),
                cancel_hooks: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Register a callback invoked whenever an in-flight execution is
    /// superseded by [`Scheduler::cancel`] or [`Scheduler::force_flush`].
    pub fn on_cancel<F>(&self, hook: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner
            .cancel_hooks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Box::new(hook));
    }

    /// Replace the pending item and restart the debounce timer.
    pub fn enqueue(&self, item: T) {
        let mut state = self.inner.lock();
        if state.pending.replace(item).is_some() {
            debug!("pending item superseded before it started");
        }
        state.stop_timer();
        let epoch = state.timer_epoch;
        let wait = state.current_wait;
        let inner = Arc::clone(&self.inner);
        state.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(wait).await;
            Inner::fire(&inner, epoch);
        }));
    }

    /// Drop the pending item and stop the timer. Returns true if an item
    /// was dropped.
    pub fn clear(&self) -> bool {
        let mut state = self.inner.lock();
        state.stop_timer();
        state.flush_requested = false;
        state.pending.take().is_some()
    }

    /// Clear pending work and supersede any in-flight execution.
    ///
    /// The superseded execution keeps running until its own cancellation
    /// takes effect, but its completion no longer changes scheduler state.
    pub fn cancel(&self) {
        let superseded = {
            let mut state = self.inner.lock();
            state.stop_timer();
            state.pending = None;
            state.flush_requested = false;
            self.inner.supersede(&mut state)
        };
        if superseded {
            self.inner.run_cancel_hooks();
        }
    }

    /// Run the pending item now, ignoring debounce and cooldown.
    ///
    /// Any in-flight execution is superseded and its cancel hooks run
    /// first. The pending item starts once the superseded task has exited.
    /// Returns false if nothing was pending.
    pub fn force_flush(&self) -> bool {
        let superseded = {
            let mut state = self.inner.lock();
            if state.pending.is_none() {
                return false;
            }
            state.stop_timer();
            self.inner.supersede(&mut state)
        };
        if superseded {
            self.inner.run_cancel_hooks();
        }

        let mut state = self.inner.lock();
        if state.running {
            debug!("flush deferred until the superseded execution exits");
            state.flush_requested = true;
        } else {
            Inner::start(&self.inner, &mut state);
        }
        true
    }

    /// Current state.
    #[must_use]
    pub fn snapshot(&self) -> GenerationJob {
        let state = self.inner.lock();
        GenerationJob {
            pending: state.pending.is_some(),
            in_flight: state.in_flight,
            generation_counter: state.generation,
            last_completed_at: state.last_completed_at,
            current_wait: state.current_wait,
        }
    }
}

impl<T: Send + 'static> Inner<T> {
    fn lock(&self) -> MutexGuard<'_, State<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn fire(inner: &Arc<Self>, epoch: u64) {
        let mut state = inner.lock();
        if state.timer_epoch != epoch {
            return;
        }
        state.timer = None;
        if state.running {
            debug!("debounce fired while busy; item stays pending");
            return;
        }
        if let Some(done) = state.last_completed_at {
            if done.elapsed() < inner.config.cooldown {
                debug!("debounce fired during cooldown; item stays pending");
                return;
            }
        }
        Self::start(inner, &mut state);
    }

    fn start(inner: &Arc<Self>, state: &mut State<T>) {
        let Some(item) = state.pending.take() else {
            return;
        };
        state.generation += 1;
        state.in_flight = true;
        state.running = true;
        state.flush_requested = false;
        let generation = state.generation;
        inner.live_generation.store(generation, Ordering::SeqCst);
        let execution = Execution::new(generation, Arc::clone(&inner.live_generation));
        let inner = Arc::clone(inner);
        tokio::spawn(async move {
            let started = Instant::now();
            let result = inner.job.run(item, execution).await;
            Self::complete(&inner, generation, started.elapsed(), result);
        });
    }

    fn complete(
        inner: &Arc<Self>,
        generation: u64,
        elapsed: Duration,
        result: anyhow::Result<()>,
    ) {
        if let Err(error) = &result {
            warn!(generation, error = %error, "scheduled job failed");
        }
        let mut state = inner.lock();
        state.running = false;
        if state.generation != generation {
            debug!(
                generation,
                current = state.generation,
                "stale completion ignored"
            );
            if state.flush_requested {
                Self::start(inner, &mut state);
            }
            return;
        }
        state.in_flight = false;
        state.last_completed_at = Some(Instant::now());
        state.current_wait = next_wait(state.current_wait, elapsed, &inner.config);
        debug!(
            generation,
            elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            next_wait_ms = u64::try_from(state.current_wait.as_millis()).unwrap_or(u64::MAX),
            "scheduled job completed"
        );
    }

    /// Invalidate the in-flight execution, if any.
    fn supersede(&self, state: &mut State<T>) -> bool {
        if !state.in_flight {
            return false;
        }
        state.generation += 1;
        state.in_flight = false;
        self.live_generation.store(state.generation, Ordering::SeqCst);
        true
    }

    fn run_cancel_hooks(&self) {
        let hooks = self
            .cancel_hooks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        for hook in hooks.iter() {
            hook();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SchedulerConfig {
        SchedulerConfig::default()
    }

    #[test]
    fn test_next_wait_slow_raises() {
        let c = config();
        assert_eq!(next_wait(c.base_wait, Duration::from_secs(9), &c), c.slow_wait);
    }

    #[test]
    fn test_next_wait_fast_relaxes() {
        let c = config();
        assert_eq!(next_wait(c.slow_wait, Duration::from_secs(1), &c), c.base_wait);
    }

    #[test]
    fn test_next_wait_middle_unchanged() {
        let c = config();
        assert_eq!(next_wait(c.slow_wait, Duration::from_secs(5), &c), c.slow_wait);
        assert_eq!(next_wait(c.base_wait, Duration::from_secs(5), &c), c.base_wait);
    }

    #[test]
    fn test_execution_goes_stale_when_generation_moves() {
        let current = Arc::new(AtomicU64::new(4));
        let execution = Execution::new(4, Arc::clone(&current));
        assert!(execution.is_current());
        current.store(5, Ordering::SeqCst);
        assert!(!execution.is_current());
        assert_eq!(execution.generation(), 4);
    }

    #[test]
    fn test_next_wait_thresholds_are_exclusive() {
        let c = config();
        let current = Duration::from_millis(1234);
        assert_eq!(next_wait(current, c.slow_threshold, &c), current);
        assert_eq!(next_wait(current, c.fast_threshold, &c), current);
    }
}
