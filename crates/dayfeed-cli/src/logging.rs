//! Logging setup for the CLI.
//!
//! Logs go to stderr so command output on stdout stays machine-readable.
//! Setting `DAYFEED_LOG_DIR` additionally writes a plain-text log file there.
//! Use `RUST_LOG` to control the level (default `warn`).

use std::io;
use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Environment variable naming the optional log directory.
pub const LOG_DIR_VAR: &str = "DAYFEED_LOG_DIR";

const LOG_FILE: &str = "dayfeed.log";

/// Keeps the file writer alive; dropping it flushes the log file.
pub struct LoggingGuard {
    _file_guard: Option<WorkerGuard>,
}

pub fn init_tracing() -> io::Result<LoggingGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let stderr_layer = fmt::layer().with_writer(io::stderr);

    match std::env::var(LOG_DIR_VAR) {
        Ok(dir) if !dir.is_empty() => {
            std::fs::create_dir_all(&dir)?;
            let appender = tracing_appender::rolling::never(Path::new(&dir), LOG_FILE);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr_layer)
                .with(fmt::layer().with_writer(writer).with_ansi(false))
                .init();
            Ok(LoggingGuard {
                _file_guard: Some(guard),
            })
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr_layer)
                .init();
            Ok(LoggingGuard { _file_guard: None })
        }
    }
}
