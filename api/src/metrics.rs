use std::time::Instant;

use axum::{
    body::Body,
    extract::MatchedPath,
    http::Request,
    middleware::Next,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use crate::handlers::ShutdownRejection;

const HTTP_REQUESTS: &str = "core_api_http_requests_total";
const HTTP_REQUEST_DURATION: &str = "core_api_http_request_duration_seconds";

/// Add `/metrics` and per-request metrics to `router`. Every series carries a `service`
/// label set to `service_name`.
pub fn setup_metrics_routes(router: Router, service_name: &str) -> Result<Router, BuildError> {
    let recorder_handle = setup_metrics_recorder(service_name)?;

    Ok(router
        .route(
            "/metrics",
            get(move || std::future::ready(recorder_handle.render())),
        )
        .layer(axum::middleware::from_fn(track_metrics)))
}

pub fn setup_metrics_recorder(service_name: &str) -> Result<PrometheusHandle, BuildError> {
    const SECONDS: &[f64] = &[
        0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
    ];

    PrometheusBuilder::new()
        .add_global_label("service", service_name)
        .set_buckets(SECONDS)?
        .install_recorder()
}

/// How a request ended, as far as shutdown is concerned. Requests turned away by the
/// admission gate are counted apart from ordinary failures so a rollout shows up as
/// `shutting_down` rather than as an error spike.
pub fn request_outcome(response: &Response) -> &'static str {
    if response.extensions().get::<ShutdownRejection>().is_some() {
        "shutting_down"
    } else if response.status().is_server_error() {
        "error"
    } else {
        "ok"
    }
}

/// Records a count and a latency per route. Routes are labelled by their template, and
/// anything the router did not match is folded into `unmatched` to keep cardinality flat.
pub async fn track_metrics(req: Request<Body>, next: Next) -> impl IntoResponse {
    let start = Instant::now();

    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|matched| matched.as_str().to_owned())
        .unwrap_or_else(|| "unmatched".to_owned());
    let method = req.method().to_string();

    let response = next.run(req).await;

    let labels = [
        ("route", route),
        ("method", method),
        ("status", response.status().as_u16().to_string()),
        ("outcome", request_outcome(&response).to_owned()),
    ];
    metrics::counter!(HTTP_REQUESTS, &labels).increment(1);
    metrics::histogram!(HTTP_REQUEST_DURATION, &labels).record(start.elapsed().as_secs_f64());

    response
}
