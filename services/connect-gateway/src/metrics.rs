//! Prometheus metrics exposition
//!
//! The state service and sweeper record through the `metrics` facade:
//!
//! - `oauth_state_requests_total` (counter): labels `operation`, `outcome`
//! - `oauth_state_pending` (gauge)
//! - `oauth_state_swept_total` (counter)
//!
//! The gateway adds `oauth_http_responses_total` (counter): labels `route`,
//! `status`.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Install the Prometheus recorder and return a handle for rendering metrics.
pub fn install_recorder() -> PrometheusHandle {
    PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder")
}

/// Record a response sent by one of the `/oauth/state` routes.
pub fn record_response(route: &'static str, status: u16) {
    metrics::counter!("oauth_http_responses_total", "route" => route, "status" => status.to_string())
        .increment(1);
}
