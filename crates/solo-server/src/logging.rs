//! Logging initialisation
//!
//! Human-readable events go to stdout. When a log directory is configured,
//! the same events are also written to a daily rolling file
//! `<log_dir>/solo-server.log.YYYY-MM-DD`, optionally as JSON lines.

use crate::config::ServerConfig;
use std::fs;
use std::io;
use tracing_appender::{non_blocking, non_blocking::WorkerGuard, rolling};
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Prefix of the rolling log file name
pub const LOG_FILE_PREFIX: &str = "solo-server.log";

const LEVEL_ENV: &str = "SOLO_LOG";
const ALT_LEVEL_ENV: &str = "RUST_LOG";

/// Keeps the background file writer alive. Dropping it flushes pending lines.
pub struct LogGuard {
    _file_guard: Option<WorkerGuard>,
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_env(LEVEL_ENV)
        .or_else(|_| EnvFilter::try_from_env(ALT_LEVEL_ENV))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber. Call once, before serving.
pub fn init(config: &ServerConfig) -> io::Result<LogGuard> {
    let stdout_layer = fmt::layer().with_target(true);

    let (file_layer, file_guard) = match &config.log_dir {
        Some(dir) => {
            fs::create_dir_all(dir)?;
            let (writer, guard) = non_blocking(rolling::daily(dir, LOG_FILE_PREFIX));
            let layer = if config.log_json {
                fmt::layer()
                    .json()
                    .with_writer(writer)
                    .with_current_span(false)
                    .with_span_list(false)
                    .boxed()
            } else {
                fmt::layer().with_ansi(false).with_writer(writer).boxed()
            };
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter())
        .with(stdout_layer)
        .with(file_layer)
        .try_init()
        .map_err(io::Error::other)?;

    if let Some(dir) = &config.log_dir {
        tracing::info!(dir = %dir.display(), json = config.log_json, "writing logs to file");
    }

    Ok(LogGuard {
        _file_guard: file_guard,
    })
}
