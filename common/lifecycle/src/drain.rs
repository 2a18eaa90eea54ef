//! Drain coordinator: wait for admitted work to finish, then release the shared client.

use std::future::Future;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::driver::Close;
use crate::gate::Gate;
use crate::metrics;

/// How a drain ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DrainOutcome {
    /// No work remained in flight and the client was closed.
    Drained,
    /// The wait was cancelled first. The client was left open so the outstanding work
    /// can still finish in the background.
    Abandoned {
        /// Admitted operations still holding a gate guard.
        in_flight: usize,
        /// Connections the client still reported as checked out. A gated transaction
        /// shows up here as well as in `in_flight`.
        connections: usize,
    },
}

/// Wait until no admitted work remains, then close `client`.
///
/// Re-checks at least every `poll_interval`, and sooner when the gate's last in-flight
/// guard is dropped. Cancelling `cancel` makes this return `Ok(())` straight away without
/// aborting anything still running. Errors from `client.close()` are returned unchanged.
///
/// Callers are expected to have set the shutdown flag already; if they have not, it is
/// set here so no new work can be admitted while draining. Call at most once per
/// shutdown; the close itself must be idempotent.
pub async fn graceful_close<C>(
    cancel: &CancellationToken,
    client: &C,
    poll_interval: Duration,
    gate: &Gate,
) -> Result<(), C::Error>
where
    C: Close + ?Sized,
{
    drain(client, poll_interval, gate, cancel.cancelled())
        .await
        .map(|_| ())
}

/// [`graceful_close`] bounded by a deadline instead of a cancellation token.
pub async fn graceful_close_with_timeout<C>(
    timeout: Duration,
    client: &C,
    poll_interval: Duration,
    gate: &Gate,
) -> Result<(), C::Error>
where
    C: Close + ?Sized,
{
    drain(client, poll_interval, gate, tokio::time::sleep(timeout))
        .await
        .map(|_| ())
}

pub(crate) async fn drain<C, F>(
    client: &C,
    poll_interval: Duration,
    gate: &Gate,
    stop: F,
) -> Result<DrainOutcome, C::Error>
where
    C: Close + ?Sized,
    F: Future<Output = ()>,
{
    if gate.flag().begin() {
        warn!("Lifecycle: drain started before shutdown was flagged, closing admission now");
    }

    let started = Instant::now();
    tokio::pin!(stop);

    loop {
        let in_flight = gate.in_flight().count();
        let connections = client.in_use();
        if in_flight == 0 && connections == 0 {
            client.close().await?;
            let elapsed = started.elapsed();
            metrics::emit_drain_finished("drained", elapsed.as_secs_f64());
            info!(
                duration_secs = elapsed.as_secs_f64(),
                result = "drained",
                "Lifecycle: in-flight work drained, database client closed"
            );
            return Ok(DrainOutcome::Drained);
        }

        debug!(in_flight, connections, "Lifecycle: waiting for in-flight work");

        tokio::select! {
            biased;

            _ = &mut stop => {
                let elapsed = started.elapsed();
                metrics::emit_drain_finished("abandoned", elapsed.as_secs_f64());
                warn!(
                    duration_secs = elapsed.as_secs_f64(),
                    in_flight,
                    connections,
                    result = "abandoned",
                    "Lifecycle: stopped waiting for in-flight work, leaving it to finish"
                );
                return Ok(DrainOutcome::Abandoned {
                    in_flight,
                    connections,
                });
            }
            // Only useful while admitted work remains; pool connections are polled.
            _ = gate.in_flight().wait_idle(), if in_flight > 0 => {}
            _ = tokio::time::sleep(poll_interval) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingClient {
        in_use: AtomicUsize,
        closes: AtomicUsize,
    }

    #[async_trait]
    impl Close for CountingClient {
        type Error = std::convert::Infallible;

        fn in_use(&self) -> usize {
            self.in_use.load(Ordering::SeqCst)
        }

        async fn close(&self) -> Result<(), Self::Error> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn idle_client_is_closed_immediately() {
        let gate = Gate::default();
        let client = CountingClient::default();

        let outcome = drain(&client, Duration::from_millis(10), &gate, std::future::pending())
            .await
            .unwrap();

        assert_eq!(outcome, DrainOutcome::Drained);
        assert_eq!(client.closes.load(Ordering::SeqCst), 1);
        assert!(gate.flag().is_shutting_down());
    }

    #[tokio::test]
    async fn waits_for_pool_accounting_to_reach_zero() {
        let gate = Gate::default();
        gate.flag().begin();
        let client = std::sync::Arc::new(CountingClient::default());
        client.in_use.store(1, Ordering::SeqCst);

        {
            let client = client.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                client.in_use.store(0, Ordering::SeqCst);
            });
        }

        let started = Instant::now();
        let outcome = drain(&client, Duration::from_millis(5), &gate, std::future::pending())
            .await
            .unwrap();

        assert_eq!(outcome, DrainOutcome::Drained);
        assert!(started.elapsed() >= Duration::from_millis(40));
        assert_eq!(client.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancelled_drain_leaves_client_open() {
        let gate = Gate::default();
        gate.flag().begin();
        let client = CountingClient::default();
        let _held = gate.in_flight().enter();

        let outcome = drain(
            &client,
            Duration::from_millis(5),
            &gate,
            tokio::time::sleep(Duration::from_millis(30)),
        )
        .await
        .unwrap();

        assert_eq!(
            outcome,
            DrainOutcome::Abandoned {
                in_flight: 1,
                connections: 0
            }
        );
        assert_eq!(client.closes.load(Ordering::SeqCst), 0);
    }
}
