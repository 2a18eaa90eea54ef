//! Probe routes for the orchestrator and load balancer.

use axum::{routing::get, Router};

use crate::liveness::LivenessHandler;
use crate::readiness::ReadinessHandler;

/// `/livez` and `/ready`, plus the `/_liveness` and `/_readiness` aliases used by our
/// deployment manifests. Merge into the service router.
pub fn probe_routes(readiness: ReadinessHandler, liveness: LivenessHandler) -> Router {
    let livez = move || std::future::ready(liveness.check());
    let ready = move || {
        let readiness = readiness.clone();
        async move { readiness.check().await }
    };

    Router::new()
        .route("/livez", get(livez.clone()))
        .route("/_liveness", get(livez))
        .route("/ready", get(ready.clone()))
        .route("/_readiness", get(ready))
}
