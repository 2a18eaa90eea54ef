pub(crate) const METRIC_SHUTDOWN_INITIATED: &str = "lifecycle_shutdown_initiated_total";
pub(crate) const METRIC_ADMISSION_REJECTED: &str = "lifecycle_admission_rejected_total";
pub(crate) const METRIC_IN_FLIGHT: &str = "lifecycle_in_flight";
pub(crate) const METRIC_DRAIN_DURATION: &str = "lifecycle_drain_duration_seconds";
pub(crate) const METRIC_DRAIN_RESULT: &str = "lifecycle_drain_result_total";

pub(crate) fn emit_shutdown_initiated(service_name: &str, trigger: &str) {
    metrics::counter!(
        METRIC_SHUTDOWN_INITIATED,
        "service_name" => service_name.to_string(),
        "trigger" => trigger.to_string()
    )
    .increment(1);
}

pub(crate) fn emit_admission_rejected(path: &'static str) {
    metrics::counter!(METRIC_ADMISSION_REJECTED, "path" => path).increment(1);
}

pub(crate) fn emit_in_flight(count: usize) {
    metrics::gauge!(METRIC_IN_FLIGHT).set(count as f64);
}

pub(crate) fn emit_drain_finished(result: &'static str, duration_secs: f64) {
    metrics::histogram!(METRIC_DRAIN_DURATION, "result" => result).record(duration_secs);
    metrics::counter!(METRIC_DRAIN_RESULT, "result" => result).increment(1);
}
