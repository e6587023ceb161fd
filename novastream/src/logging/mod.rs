//! Tracing setup: an `EnvFilter`-driven subscriber with optional rolling file output.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Default filter directive when `RUST_LOG` is not set.
pub const DEFAULT_LOG_FILTER: &str = "novastream=info,tower_http=info,axum::rejection=trace";

/// Initialize the global tracing subscriber.
///
/// Logs to stdout always; additionally logs to a daily-rotated file under `log_dir` when
/// one is supplied. The returned `WorkerGuard` must be held for the lifetime of the process
/// so the non-blocking file writer flushes on shutdown.
pub fn init_logging(log_dir: Option<&Path>) -> crate::error::Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    let stdout_layer = tracing_subscriber::fmt::layer().with_target(true);

    match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let file_appender = tracing_appender::rolling::daily(dir, "novastream.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            let file_layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(non_blocking);

            tracing_subscriber::registry()
                .with(filter)
                .with(stdout_layer)
                .with(file_layer)
                .try_init()
                .map_err(|e| crate::error::Error::internal(format!("logging init: {e}")))?;

            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(stdout_layer)
                .try_init()
                .map_err(|e| crate::error::Error::internal(format!("logging init: {e}")))?;
            Ok(None)
        }
    }
}
