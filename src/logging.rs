use crate::constants::{LOG_DIR, LOG_FILE_PREFIX};
use std::fs;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const DEFAULT_DIRECTIVE: &str = "pipe_flow=info";

/// Initializes console logging plus daily-rotated JSON logs under `log_dir`.
///
/// `RUST_LOG` overrides the default `pipe_flow=info` filter. Keep the returned
/// guard alive until exit so buffered file logs are flushed. With `log_dir` set
/// to `None` only the console layer is installed.
pub fn init_logging(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVE));
    // Console logs go to stderr so stdout stays clean for summaries.
    let console_layer = fmt::layer().with_writer(std::io::stderr);

    let (file_layer, guard) = match log_dir {
        Some(dir) if fs::create_dir_all(dir).is_ok() => {
            let file_appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(file_appender);
            (Some(fmt::layer().json().with_writer(writer)), Some(guard))
        }
        _ => (None, None),
    };

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(console_layer)
        .try_init();
    guard
}

/// Default location for JSON log files.
pub fn default_log_dir() -> &'static Path {
    Path::new(LOG_DIR)
}
