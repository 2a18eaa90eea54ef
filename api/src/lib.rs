use axum::Router;
use lifecycle::{probe_routes, LivenessHandler, ReadinessHandler};

use store::Store;

pub mod config;
pub mod handlers;
pub mod metrics;
pub mod store;

/// Service routes plus the liveness and readiness probes.
pub fn app(store: Store, readiness: ReadinessHandler, liveness: LivenessHandler) -> Router {
    handlers::add_routes(Router::new(), store).merge(probe_routes(readiness, liveness))
}
