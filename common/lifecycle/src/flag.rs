//! Process-wide shutdown signal shared by every admission point and probe.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

const RUNNING: u8 = 0;
const SHUTTING_DOWN: u8 = 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlagState {
    Running,
    ShuttingDown,
}

/// Tri-state shutdown signal: `Running → ShuttingDown`, with [`reset`](ShutdownFlag::reset)
/// back to `Running` for test harnesses.
///
/// Cloning is cheap and every clone observes the same state. Construct one per process in
/// `main` and hand clones to the gate, the probes and the drain routine.
///
/// Reads and writes are `SeqCst`: once [`begin`](ShutdownFlag::begin) returns, every
/// subsequent [`is_shutting_down`](ShutdownFlag::is_shutting_down) on any thread returns
/// true. The admission gate relies on this total order together with the in-flight
/// counter (see [`Gate::admit`](crate::Gate::admit)).
#[derive(Clone, Debug, Default)]
pub struct ShutdownFlag {
    inner: Arc<FlagInner>,
}

#[derive(Debug, Default)]
struct FlagInner {
    state: AtomicU8,
    changed: Notify,
}

impl ShutdownFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move to `ShuttingDown`. Idempotent; returns true only for the call that performed
    /// the transition.
    pub fn begin(&self) -> bool {
        let transitioned = self
            .inner
            .state
            .compare_exchange(RUNNING, SHUTTING_DOWN, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();
        if transitioned {
            self.inner.changed.notify_waiters();
        }
        transitioned
    }

    /// Non-blocking read, safe from any thread.
    pub fn is_shutting_down(&self) -> bool {
        self.inner.state.load(Ordering::SeqCst) == SHUTTING_DOWN
    }

    pub fn state(&self) -> FlagState {
        if self.is_shutting_down() {
            FlagState::ShuttingDown
        } else {
            FlagState::Running
        }
    }

    /// Resolves once the flag is `ShuttingDown`; immediately if it already is.
    pub async fn wait(&self) {
        let notified = self.inner.changed.notified();
        tokio::pin!(notified);
        // Register before reading the state so a concurrent begin() cannot slip between.
        notified.as_mut().enable();
        if self.is_shutting_down() {
            return;
        }
        notified.await;
    }

    /// Restore `Running`. Test harnesses only: production shutdown is one-way.
    #[doc(hidden)]
    pub fn reset(&self) {
        self.inner.state.store(RUNNING, Ordering::SeqCst);
    }
}
