//! Liveness probe handler.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::flag::ShutdownFlag;

/// Liveness probe: a pure projection of the shutdown flag. Fails the moment shutdown
/// begins, before the drain has finished, so the orchestrator stops routing to us early.
#[derive(Clone, Debug)]
pub struct LivenessHandler {
    flag: ShutdownFlag,
}

impl LivenessHandler {
    pub fn new(flag: ShutdownFlag) -> Self {
        Self { flag }
    }

    pub fn check(&self) -> LivenessStatus {
        LivenessStatus {
            shutting_down: self.flag.is_shutting_down(),
        }
    }
}

/// Implements [`IntoResponse`]: 200 while running, 503 once shutting down.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LivenessStatus {
    pub shutting_down: bool,
}

impl IntoResponse for LivenessStatus {
    fn into_response(self) -> Response {
        if self.shutting_down {
            (StatusCode::SERVICE_UNAVAILABLE, "shutting down").into_response()
        } else {
            (StatusCode::OK, "ok").into_response()
        }
    }
}
