//! In-flight work accounting with RAII guards.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

use crate::metrics;

/// Counts admitted operations that have not finished yet.
///
/// Every admission holds an [`InFlightGuard`]; dropping the last guard wakes anyone
/// parked in [`wait_idle`](InFlightTracker::wait_idle).
#[derive(Clone, Debug, Default)]
pub struct InFlightTracker {
    inner: Arc<TrackerInner>,
}

#[derive(Debug, Default)]
struct TrackerInner {
    count: AtomicUsize,
    idle: Notify,
}

impl InFlightTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one unit of in-flight work. The count drops again when the guard does.
    pub fn enter(&self) -> InFlightGuard {
        let now = self.inner.count.fetch_add(1, Ordering::SeqCst) + 1;
        metrics::emit_in_flight(now);
        InFlightGuard {
            inner: self.inner.clone(),
        }
    }

    pub fn count(&self) -> usize {
        self.inner.count.load(Ordering::SeqCst)
    }

    pub(crate) fn same_as(&self, other: &InFlightTracker) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Resolves once the count is observed at zero.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.count() == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// Held for the lifetime of one admitted operation.
#[must_use = "dropping the guard immediately marks the work as finished"]
#[derive(Debug)]
pub struct InFlightGuard {
    inner: Arc<TrackerInner>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let before = self.inner.count.fetch_sub(1, Ordering::SeqCst);
        metrics::emit_in_flight(before - 1);
        if before == 1 {
            self.inner.idle.notify_waiters();
        }
    }
}
