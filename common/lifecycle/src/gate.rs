//! Admission gate: decides whether new database work may start.
//!
//! Three enforcement points consult the same [`Gate`]: the mutation hook and the query
//! interceptor (both [`AdmissionLayer`]s wrapping a `tower::Service`) and the driver
//! wrapper ([`GatedDriver`](crate::GatedDriver)). All of them reject with
//! [`LifecycleError::ShuttingDown`] once the flag is set.

use std::fmt;
use std::task::{Context, Poll};

use futures::future::BoxFuture;
use tower::{Layer, Service};
use tracing::debug;

use crate::error::LifecycleError;
use crate::flag::ShutdownFlag;
use crate::inflight::{InFlightGuard, InFlightTracker};
use crate::metrics;

tokio::task_local! {
    /// Tracker of the gate that admitted the request this task is serving.
    static ADMITTED: InFlightTracker;
}

/// Which enforcement point admitted or rejected an operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GatePath {
    /// Pre-mutation hook.
    Mutation,
    /// Pre-query interceptor.
    Query,
    /// Transaction begin on the wrapped driver.
    Driver,
}

impl GatePath {
    pub fn as_str(&self) -> &'static str {
        match self {
            GatePath::Mutation => "mutation",
            GatePath::Query => "query",
            GatePath::Driver => "driver",
        }
    }
}

impl fmt::Display for GatePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shutdown flag plus in-flight accounting, shared by every enforcement point and by
/// the drain routine.
#[derive(Clone, Debug, Default)]
pub struct Gate {
    flag: ShutdownFlag,
    in_flight: InFlightTracker,
}

impl Gate {
    pub fn new(flag: ShutdownFlag) -> Self {
        Self {
            flag,
            in_flight: InFlightTracker::new(),
        }
    }

    pub fn flag(&self) -> &ShutdownFlag {
        &self.flag
    }

    pub fn in_flight(&self) -> &InFlightTracker {
        &self.in_flight
    }

    /// Admit one operation, or reject it if shutdown has begun.
    ///
    /// The work is counted before the flag is read. Paired with the `SeqCst` flag, this
    /// means a drain that saw zero in-flight work after `begin()` can never be followed
    /// by a successful admission.
    pub fn admit(&self, path: GatePath) -> Result<InFlightGuard, LifecycleError> {
        let guard = self.in_flight.enter();
        if self.flag.is_shutting_down() {
            drop(guard);
            metrics::emit_admission_rejected(path.as_str());
            debug!(path = %path, "Lifecycle: rejected new work, shutting down");
            return Err(LifecycleError::ShuttingDown);
        }
        Ok(guard)
    }

    /// Like [`admit`](Gate::admit), but work already admitted by an [`AdmissionLayer`] on
    /// this gate is counted without consulting the flag again. A request that passed the
    /// hook before shutdown can still open its transaction after it.
    pub fn admit_nested(&self, path: GatePath) -> Result<InFlightGuard, LifecycleError> {
        if self.is_admitted_here() {
            return Ok(self.in_flight.enter());
        }
        self.admit(path)
    }

    /// True inside a request admitted by an [`AdmissionLayer`] built from this gate.
    /// Not inherited by tasks the request spawns.
    pub fn is_admitted_here(&self) -> bool {
        ADMITTED
            .try_with(|tracker| tracker.same_as(&self.in_flight))
            .unwrap_or(false)
    }
}

/// `tower::Layer` installing the admission check in front of a mutation or query
/// pipeline. The wrapped service must be able to express [`LifecycleError`] in its own
/// error type.
#[derive(Clone, Debug)]
pub struct AdmissionLayer {
    gate: Gate,
    path: GatePath,
}

impl AdmissionLayer {
    /// Mutation-path hook.
    pub fn hook(gate: Gate) -> Self {
        Self {
            gate,
            path: GatePath::Mutation,
        }
    }

    /// Query-path interceptor.
    pub fn interceptor(gate: Gate) -> Self {
        Self {
            gate,
            path: GatePath::Query,
        }
    }
}

impl<S> Layer<S> for AdmissionLayer {
    type Service = Admission<S>;

    fn layer(&self, inner: S) -> Self::Service {
        Admission {
            inner,
            gate: self.gate.clone(),
            path: self.path,
        }
    }
}

/// Service produced by [`AdmissionLayer`]. Rejected calls never reach `inner`; admitted
/// ones stay counted as in flight until the inner future resolves, and run with the
/// admission recorded so a [`GatedDriver`](crate::GatedDriver) on the same gate lets
/// them open transactions during shutdown.
#[derive(Clone, Debug)]
pub struct Admission<S> {
    inner: S,
    gate: Gate,
    path: GatePath,
}

impl<S, Request> Service<Request> for Admission<S>
where
    S: Service<Request>,
    S::Response: Send + 'static,
    S::Error: From<LifecycleError> + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<S::Response, S::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request) -> Self::Future {
        let guard = match self.gate.admit(self.path) {
            Ok(guard) => guard,
            Err(e) => return Box::pin(futures::future::ready(Err(e.into()))),
        };
        let fut = self.inner.call(request);
        let tracker = self.gate.in_flight.clone();
        Box::pin(ADMITTED.scope(tracker, async move {
            let result = fut.await;
            drop(guard);
            result
        }))
    }
}
