//! File logging for the CLI.
//!
//! stdout carries the JSON output, so logs go to a daily rolling file under
//! `~/.cometa/logs`. The returned guard flushes the non-blocking writer on
//! drop and must live until `main` returns.

use std::env;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

const LOG_FILE_PREFIX: &str = "cometa-results.log";

pub fn init() -> Option<WorkerGuard> {
    let logs_dir = results_core::config::logs_dir().ok()?;
    fs_err::create_dir_all(&logs_dir).ok()?;

    let appender = tracing_appender::rolling::daily(&logs_dir, LOG_FILE_PREFIX);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let debug_enabled = env::var("COMETA_DEBUG_LOG")
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false);
    let filter = if debug_enabled {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .try_init()
        .ok()?;

    Some(guard)
}
