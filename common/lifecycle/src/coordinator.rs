//! Shutdown coordinator: turns signals, the pre-stop file, or an explicit request into
//! a single flag transition, then drains in-flight work and closes the database client.

use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::drain::{self, DrainOutcome};
use crate::driver::Close;
use crate::flag::ShutdownFlag;
use crate::gate::Gate;
use crate::liveness::LivenessHandler;
use crate::metrics;
use crate::readiness::ReadinessHandler;
use crate::signals;

/// Options for a [`Coordinator`].
#[derive(Clone, Debug)]
pub struct CoordinatorOptions {
    pub name: String,
    /// Install SIGINT/SIGTERM handlers (default: true).
    pub trap_signals: bool,
    /// File whose appearance starts shutdown, for K8s pre-stop hooks (default: `/tmp/shutdown`).
    pub prestop_file: Option<PathBuf>,
    pub prestop_poll_interval: Duration,
    /// Upper bound between in-flight re-checks while draining.
    pub drain_poll_interval: Duration,
    /// How long the drain waits before abandoning outstanding work.
    pub drain_timeout: Duration,
    /// Delay between the flag flipping and [`Coordinator::shutdown_signal`] resolving, so
    /// load balancers observe the failing readiness probe before the listener closes.
    pub readiness_grace: Duration,
}

impl Default for CoordinatorOptions {
    fn default() -> Self {
        Self {
            name: "app".to_string(),
            trap_signals: true,
            prestop_file: Some(PathBuf::from("/tmp/shutdown")),
            prestop_poll_interval: Duration::from_secs(1),
            drain_poll_interval: Duration::from_secs(1),
            drain_timeout: Duration::from_secs(30),
            readiness_grace: Duration::ZERO,
        }
    }
}

pub struct CoordinatorBuilder {
    options: CoordinatorOptions,
}

impl CoordinatorBuilder {
    pub fn with_trap_signals(mut self, trap: bool) -> Self {
        self.options.trap_signals = trap;
        self
    }

    /// `None` disables the pre-stop watcher.
    pub fn with_prestop_file(mut self, path: Option<PathBuf>) -> Self {
        self.options.prestop_file = path;
        self
    }

    pub fn with_prestop_poll_interval(mut self, interval: Duration) -> Self {
        self.options.prestop_poll_interval = interval;
        self
    }

    pub fn with_drain_poll_interval(mut self, interval: Duration) -> Self {
        self.options.drain_poll_interval = interval;
        self
    }

    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.options.drain_timeout = timeout;
        self
    }

    pub fn with_readiness_grace(mut self, grace: Duration) -> Self {
        self.options.readiness_grace = grace;
        self
    }

    pub fn build(self) -> Coordinator {
        Coordinator {
            options: self.options,
            gate: Gate::default(),
        }
    }
}

/// Owns the process-wide [`Gate`] and drives shutdown for one service.
pub struct Coordinator {
    options: CoordinatorOptions,
    gate: Gate,
}

impl Coordinator {
    pub fn builder(name: impl Into<String>) -> CoordinatorBuilder {
        CoordinatorBuilder {
            options: CoordinatorOptions {
                name: name.into(),
                ..CoordinatorOptions::default()
            },
        }
    }

    pub fn options(&self) -> &CoordinatorOptions {
        &self.options
    }

    /// Shared by every admission point; clone it into hooks, interceptors and the driver wrapper.
    pub fn gate(&self) -> &Gate {
        &self.gate
    }

    pub fn flag(&self) -> &ShutdownFlag {
        self.gate.flag()
    }

    pub fn readiness_handler(&self) -> ReadinessHandler {
        ReadinessHandler::new(self.gate.flag().clone())
    }

    pub fn liveness_handler(&self) -> LivenessHandler {
        LivenessHandler::new(self.gate.flag().clone())
    }

    /// Resolves once shutdown has begun and the readiness grace has elapsed; pass to
    /// `axum::serve(..).with_graceful_shutdown(..)`.
    pub fn shutdown_signal(&self) -> impl Future<Output = ()> + Send + 'static {
        let flag = self.gate.flag().clone();
        let grace = self.options.readiness_grace;
        async move {
            flag.wait().await;
            if !grace.is_zero() {
                info!(
                    grace_secs = grace.as_secs_f64(),
                    "Lifecycle: holding listener open for readiness grace"
                );
                tokio::time::sleep(grace).await;
            }
        }
    }

    /// Begin shutdown from application code. Returns false if it had already begun.
    pub fn trigger(&self, reason: &str) -> bool {
        initiate(self.gate.flag(), &self.options.name, reason)
    }

    /// Watch for shutdown triggers, then drain admitted work and close `client`.
    ///
    /// Returns once the drain finishes or `drain_timeout` expires. On timeout the client is
    /// left open and [`DrainOutcome::Abandoned`] is returned.
    pub async fn run<C>(&self, client: &C) -> Result<DrainOutcome, C::Error>
    where
        C: Close + ?Sized,
    {
        let watchers = CancellationToken::new();
        let _stop_watchers = watchers.clone().drop_guard();

        if self.options.trap_signals {
            let flag = self.gate.flag().clone();
            let name = self.options.name.clone();
            let stop = watchers.clone();
            tokio::spawn(async move {
                tokio::select! {
                    res = signals::wait_for_shutdown_signal() => match res {
                        Ok(signal) => {
                            info!(signal, "Lifecycle: received shutdown signal");
                            initiate(&flag, &name, "signal");
                        }
                        Err(e) => warn!(error = %e, "Lifecycle: failed to install signal handlers"),
                    },
                    _ = stop.cancelled() => {}
                }
            });
        }

        if let Some(path) = self.options.prestop_file.clone() {
            let flag = self.gate.flag().clone();
            let name = self.options.name.clone();
            let stop = watchers.clone();
            let period = self.options.prestop_poll_interval;
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(period);
                loop {
                    tokio::select! {
                        _ = interval.tick() => {
                            if tokio::fs::try_exists(&path).await.unwrap_or(false) {
                                info!(path = %path.display(), "Lifecycle: prestop file detected");
                                initiate(&flag, &name, "prestop");
                                return;
                            }
                        }
                        _ = stop.cancelled() => return,
                    }
                }
            });
        }

        self.gate.flag().wait().await;
        watchers.cancel();

        drain::drain(
            client,
            self.options.drain_poll_interval,
            &self.gate,
            tokio::time::sleep(self.options.drain_timeout),
        )
        .await
    }
}

fn initiate(flag: &ShutdownFlag, name: &str, trigger: &str) -> bool {
    if !flag.begin() {
        return false;
    }
    metrics::emit_shutdown_initiated(name, trigger);
    info!(
        service = name,
        trigger_reason = trigger,
        "Lifecycle: shutdown initiated, rejecting new work"
    );
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_coordinator() -> Coordinator {
        Coordinator::builder("test")
            .with_trap_signals(false)
            .with_prestop_file(None)
            .build()
    }

    #[test]
    fn trigger_is_idempotent() {
        let coordinator = test_coordinator();
        assert!(coordinator.trigger("test"));
        assert!(!coordinator.trigger("test"));
        assert!(coordinator.flag().is_shutting_down());
    }

    #[tokio::test]
    async fn shutdown_signal_waits_for_grace() {
        let coordinator = Coordinator::builder("test")
            .with_trap_signals(false)
            .with_prestop_file(None)
            .with_readiness_grace(Duration::from_millis(100))
            .build();
        let signal = coordinator.shutdown_signal();

        let started = std::time::Instant::now();
        coordinator.trigger("test");
        signal.await;
        assert!(started.elapsed() >= Duration::from_millis(90));
    }

    #[tokio::test]
    async fn prestop_file_starts_shutdown() {
        let path = std::env::temp_dir().join(format!("lifecycle-prestop-{}", std::process::id()));
        std::fs::remove_file(&path).ok();

        let coordinator = Coordinator::builder("test")
            .with_trap_signals(false)
            .with_prestop_file(Some(path.clone()))
            .with_prestop_poll_interval(Duration::from_millis(10))
            .build();
        let flag = coordinator.flag().clone();

        let writer = {
            let path = path.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                std::fs::write(&path, b"").unwrap();
            })
        };

        let outcome = tokio::time::timeout(Duration::from_secs(5), coordinator.run(&NoopClient))
            .await
            .unwrap()
            .unwrap();
        writer.await.unwrap();
        std::fs::remove_file(&path).unwrap();

        assert!(flag.is_shutting_down());
        assert_eq!(outcome, DrainOutcome::Drained);
    }

    struct NoopClient;

    #[async_trait::async_trait]
    impl Close for NoopClient {
        type Error = std::convert::Infallible;

        async fn close(&self) -> Result<(), Self::Error> {
            Ok(())
        }
    }
}
