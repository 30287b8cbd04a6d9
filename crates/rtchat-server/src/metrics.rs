//! Prometheus recorder and metric names.
//!
//! Until [`install_recorder`] runs, every `metrics` macro call is a no-op.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the global Prometheus recorder. Call once, before serving.
///
/// The returned handle renders the `/metrics` endpoint.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Connections that reached the active state (counter).
pub const CONNECTIONS_TOTAL: &str = "chat_connections_total";
/// Currently active connections (gauge).
pub const CONNECTIONS_ACTIVE: &str = "chat_connections_active";
/// Messages persisted and published (counter).
pub const MESSAGES_TOTAL: &str = "chat_messages_total";
/// Per-subscriber delivery failures (counter, labels: reason).
pub const DELIVERY_FAILURES_TOTAL: &str = "chat_delivery_failures_total";
/// Client payloads rejected as malformed (counter).
pub const MALFORMED_INPUT_TOTAL: &str = "chat_malformed_input_total";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metric_names_are_prefixed_snake_case() {
        for name in [
            CONNECTIONS_TOTAL,
            CONNECTIONS_ACTIVE,
            MESSAGES_TOTAL,
            DELIVERY_FAILURES_TOTAL,
            MALFORMED_INPUT_TOTAL,
        ] {
            assert!(name.starts_with("chat_"), "{name}");
            assert!(name.chars().all(|c| c.is_ascii_lowercase() || c == '_'), "{name}");
        }
    }

    #[test]
    fn recorded_counters_render() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        metrics::with_local_recorder(&recorder, || {
            metrics::counter!(MESSAGES_TOTAL).increment(2);
        });
        assert!(handle.render().contains("chat_messages_total 2"));
    }
}
