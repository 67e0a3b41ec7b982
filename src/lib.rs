//! Chartfeed library
//!
//! Reconciles live streaming price ticks with periodically-fetched
//! historical OHLC snapshots into a single gap-free, duplicate-free candle
//! series per symbol and timeframe.

pub mod candles;
pub mod chart;
pub mod cli;
pub mod config;
pub mod feed;
pub mod metrics;

use anyhow::Result;

/// Application result type for consistent error handling
pub type AppResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

/// Initialize tracing with a console layer and, when configured, a rolling
/// file sink. The returned guard must be held for the lifetime of the
/// process to keep the file writer flushing.
pub fn init_logging(
    level: &str,
    log: &config::LogConfig,
) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("chartfeed={}", level).into());

    if log.file_path.trim().is_empty() {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
        return Ok(None);
    }

    let path = std::path::Path::new(&log.file_path);
    let directory = path.parent().unwrap_or_else(|| std::path::Path::new("."));
    let file_name = path
        .file_name()
        .unwrap_or_else(|| std::ffi::OsStr::new("chartfeed.log"));
    let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::daily(
        directory, file_name,
    ));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer),
        )
        .init();

    Ok(Some(guard))
}
