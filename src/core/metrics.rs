use std::sync::OnceLock;

use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::core::config::Settings;

static RECORDER: OnceLock<PrometheusHandle> = OnceLock::new();

pub(crate) fn init(settings: &Settings) -> anyhow::Result<()> {
    if !settings.telemetry().prometheus_enabled {
        return Ok(());
    }

    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|err| anyhow::anyhow!("failed to install metrics recorder: {err}"))?;
    if RECORDER.set(handle).is_err() {
        tracing::warn!("metrics recorder already initialized");
        return Ok(());
    }

    describe_counter!("http_requests_total", "HTTP requests served");
    describe_histogram!("http_request_duration_seconds", "HTTP request latency");
    describe_counter!("scripts_processed_total", "Scripts that reached a terminal state");
    describe_histogram!(
        "script_processing_duration_seconds",
        "Wall time per script through the pipeline"
    );
    describe_counter!("scripts_flagged_total", "Scripts routed to the manual review queue");
    describe_counter!(
        "stale_events_dropped_total",
        "Progress events rejected by the stage tracker"
    );
    describe_counter!("observer_connect_failures_total", "Observer connection attempts that failed");
    describe_counter!("observer_reconnects_total", "Observer reconnects after a dropped connection");
    Ok(())
}

pub(crate) fn render() -> Option<String> {
    RECORDER.get().map(|handle| handle.render())
}
