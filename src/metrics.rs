//! Operational counters for s3remote.
//!
//! Counters are recorded through the `metrics` facade, so they are free
//! when no recorder is installed.  The binary installs a Prometheus
//! recorder with [`init_metrics`] and prints [`render`] on exit when
//! asked to.

use metrics::{counter, describe_counter};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;

// -- Metric name constants ----------------------------------------------------

/// Failures that were logged instead of returned (counter). Labels: operation.
pub const ERRORS_TOTAL: &str = "s3remote_errors_total";

/// Provider requests issued (counter). Labels: operation, status.
pub const REQUESTS_TOTAL: &str = "s3remote_requests_total";

/// List pages fetched (counter).
pub const LIST_PAGES_TOTAL: &str = "s3remote_list_pages_total";

/// Bytes sent in upload bodies (counter).
pub const BYTES_UPLOADED_TOTAL: &str = "s3remote_bytes_uploaded_total";

// -- Global recorder installation ---------------------------------------------

/// Singleton handle to the Prometheus recorder.
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the global Prometheus metrics recorder. Idempotent -- safe to call
/// multiple times. Returns `None` if another recorder was already installed.
pub fn init_metrics() -> Option<&'static PrometheusHandle> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Some(handle);
    }
    let handle = PrometheusBuilder::new().install_recorder().ok()?;
    describe_metrics();
    Some(PROMETHEUS_HANDLE.get_or_init(|| handle))
}

/// Register metric descriptions with the global recorder.
pub fn describe_metrics() {
    describe_counter!(ERRORS_TOTAL, "Failures logged and counted by operation");
    describe_counter!(REQUESTS_TOTAL, "Provider requests by operation and status");
    describe_counter!(LIST_PAGES_TOTAL, "List pages fetched from the provider");
    describe_counter!(BYTES_UPLOADED_TOTAL, "Bytes sent in upload bodies");
}

/// Render the Prometheus exposition text, if a recorder is installed.
pub fn render() -> Option<String> {
    PROMETHEUS_HANDLE.get().map(|handle| handle.render())
}

// -- Recording helpers --------------------------------------------------------

/// Count a failure that is reported out of band rather than returned.
pub fn record_error(operation: &'static str) {
    counter!(ERRORS_TOTAL, "operation" => operation).increment(1);
}

/// Count a provider request by outcome.
pub fn record_request(operation: &'static str, status: u16) {
    counter!(REQUESTS_TOTAL, "operation" => operation, "status" => status.to_string())
        .increment(1);
}

/// Count one fetched list page.
pub fn record_list_page() {
    counter!(LIST_PAGES_TOTAL).increment(1);
}

/// Count uploaded body bytes.
pub fn record_bytes_uploaded(bytes: u64) {
    counter!(BYTES_UPLOADED_TOTAL).increment(bytes);
}
