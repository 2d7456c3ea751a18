use std::path::Path;

use anyhow::Result;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Registry, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use partfinder_config::TelemetryConfig;

/// Filter directives: `PARTFINDER_LOG`, then `RUST_LOG`, then the configured
/// level.
fn filter(config: &TelemetryConfig) -> EnvFilter {
    ["PARTFINDER_LOG", "RUST_LOG"]
        .iter()
        .find_map(|var| {
            let raw = std::env::var(var).ok()?;
            EnvFilter::try_new(raw.trim()).ok()
        })
        .unwrap_or_else(|| EnvFilter::new(&config.log_level))
}

/// Install the global subscriber.  Logs go to stderr (stdout carries the
/// results) and, when `log_dir` is set, to a daily rolling file.  Keep the
/// returned guard alive until exit so buffered lines are flushed.
pub fn init(config: &TelemetryConfig) -> Result<Option<WorkerGuard>> {
    let stderr = fmt::layer().with_writer(std::io::stderr).with_target(false);
    let registry = Registry::default().with(filter(config)).with(stderr);

    if config.log_dir.trim().is_empty() {
        registry.try_init()?;
        return Ok(None);
    }

    std::fs::create_dir_all(Path::new(&config.log_dir))?;
    let appender = tracing_appender::rolling::daily(&config.log_dir, "partfinder.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let file = fmt::layer().with_writer(writer).with_ansi(false);
    registry.with(file).try_init()?;
    Ok(Some(guard))
}
