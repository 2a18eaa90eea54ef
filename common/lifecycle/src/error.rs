//! Lifecycle error types returned by the admission gate.

use thiserror::Error;

/// Errors surfaced by the admission gate and the driver wrapper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LifecycleError {
    /// New work was rejected because the process is draining. Returned identically by
    /// the mutation hook, the query interceptor and the driver wrapper.
    #[error("database is shutting down, not admitting new work")]
    ShuttingDown,

    /// The wrapped driver cannot open transactions at all. A configuration defect,
    /// unrelated to the shutdown state.
    #[error("driver does not support beginning transactions")]
    DriverLackingBeginTx,
}

impl LifecycleError {
    /// True for rejections caused by the shutdown sequence, whichever gate caught them.
    pub fn is_shutting_down(&self) -> bool {
        matches!(self, LifecycleError::ShuttingDown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_shutdown_rejection_reports_shutting_down() {
        assert!(LifecycleError::ShuttingDown.is_shutting_down());
        assert!(!LifecycleError::DriverLackingBeginTx.is_shutting_down());
        assert_ne!(
            LifecycleError::ShuttingDown,
            LifecycleError::DriverLackingBeginTx
        );
    }
}
