//! Readiness probe handler and dependency checks.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tracing::warn;

use crate::flag::ShutdownFlag;

const DEFAULT_CHECK_TIMEOUT: Duration = Duration::from_secs(2);

/// A dependency that must be reachable for the instance to take traffic.
#[async_trait]
pub trait ReadyCheck: Send + Sync {
    async fn check(&self) -> Result<(), String>;
}

/// Readiness probe. Returns 503 as soon as shutdown has begun without running any
/// check; otherwise 200 if every registered check passes within its timeout.
#[derive(Clone)]
pub struct ReadinessHandler {
    flag: ShutdownFlag,
    checks: Vec<(String, Arc<dyn ReadyCheck>)>,
    check_timeout: Duration,
}

impl ReadinessHandler {
    pub fn new(flag: ShutdownFlag) -> Self {
        Self {
            flag,
            checks: Vec::new(),
            check_timeout: DEFAULT_CHECK_TIMEOUT,
        }
    }

    pub fn with_check(mut self, name: impl Into<String>, check: impl ReadyCheck + 'static) -> Self {
        self.checks.push((name.into(), Arc::new(check)));
        self
    }

    pub fn with_check_timeout(mut self, timeout: Duration) -> Self {
        self.check_timeout = timeout;
        self
    }

    pub async fn check(&self) -> ReadinessStatus {
        if self.flag.is_shutting_down() {
            return ReadinessStatus::ShuttingDown;
        }

        let timeout = self.check_timeout;
        let results = futures::future::join_all(self.checks.iter().map(|(name, check)| async move {
            match tokio::time::timeout(timeout, check.check()).await {
                Ok(Ok(())) => None,
                Ok(Err(reason)) => {
                    warn!(check = %name, reason = %reason, "readiness check failed");
                    Some(name.clone())
                }
                Err(_) => {
                    warn!(check = %name, timeout_ms = timeout.as_millis() as u64, "readiness check timed out");
                    Some(name.clone())
                }
            }
        }))
        .await;

        let failing: Vec<String> = results.into_iter().flatten().collect();
        if failing.is_empty() {
            ReadinessStatus::Ready
        } else {
            ReadinessStatus::Failing(failing)
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReadinessStatus {
    Ready,
    ShuttingDown,
    /// Names of the checks that did not pass.
    Failing(Vec<String>),
}

impl ReadinessStatus {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ReadinessStatus::Ready => StatusCode::OK,
            _ => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for ReadinessStatus {
    fn into_response(self) -> Response {
        let code = self.status_code();
        let body = match self {
            ReadinessStatus::Ready => "ok".to_string(),
            ReadinessStatus::ShuttingDown => "shutting down".to_string(),
            ReadinessStatus::Failing(names) => format!("failing checks: {}", names.join(", ")),
        };
        (code, body).into_response()
    }
}
