//! Database lifecycle for services that share one client across request handlers.
//!
//! A single [`ShutdownFlag`] is flipped when shutdown begins (signal, pre-stop file, or
//! [`Coordinator::trigger`]). From then on every admission point built from the shared
//! [`Gate`] rejects new work with [`LifecycleError::ShuttingDown`]: the mutation hook and
//! query interceptor ([`AdmissionLayer`]) and the transaction-opening driver wrapper
//! ([`GatedDriver`]). The drain ([`graceful_close`]) waits for admitted work to finish and
//! then closes the client, while the probes ([`probe_routes`]) report the flag.

mod coordinator;
mod drain;
mod driver;
mod error;
mod flag;
mod gate;
mod inflight;
mod liveness;
mod metrics;
mod probes;
mod readiness;
mod signals;

pub use coordinator::{Coordinator, CoordinatorBuilder, CoordinatorOptions};
pub use drain::{graceful_close, graceful_close_with_timeout, DrainOutcome};
pub use driver::{Close, Driver, GatedDriver, GatedTx, Transaction};
pub use error::LifecycleError;
pub use flag::{FlagState, ShutdownFlag};
pub use gate::{Admission, AdmissionLayer, Gate, GatePath};
pub use inflight::{InFlightGuard, InFlightTracker};
pub use liveness::{LivenessHandler, LivenessStatus};
pub use probes::probe_routes;
pub use readiness::{ReadinessHandler, ReadinessStatus, ReadyCheck};
