use tracing_subscriber::{fmt, EnvFilter};

use crate::core::config::Settings;

/// Console or JSON logs, driven by RUST_LOG with the configured level as the
/// fallback. Spans emit a close event so request and pipeline latency shows
/// up in the log stream.
pub(crate) fn init_tracing(settings: &Settings) -> anyhow::Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::new(&settings.telemetry().log_level),
    };

    let builder = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_span_events(fmt::format::FmtSpan::CLOSE);

    let result = if settings.telemetry().json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    result.map_err(|err| anyhow::anyhow!("tracing init failed: {err}"))
}
