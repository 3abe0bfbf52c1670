//! Debug file logging for zindex
//!
//! Every run writes a trace log to `/tmp/zindex-{session_id}.log`, where the
//! session ID is a UUID generated at startup. The console only shows INFO
//! (or DEBUG with `--verbose`).

use std::path::PathBuf;

use tracing_subscriber::Layer as _;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

use crate::progress;

const LOG_DIR: &str = "/tmp";

/// Keeps the non-blocking file writer flushing until dropped
pub struct DebugLogGuard {
    _guard: tracing_appender::non_blocking::WorkerGuard,
}

/// Session info returned after initializing debug logging
pub struct SessionInfo {
    pub log_path: PathBuf,
    pub guard: DebugLogGuard,
}

fn log_filename(session_id: uuid::Uuid) -> String {
    format!("zindex-{session_id}.log")
}

/// Initialize combined logging: file (detailed) + console (through the progress writer).
///
/// The returned guard must be kept alive for the duration of the program.
pub fn init(verbose: bool) -> SessionInfo {
    let log_filename = log_filename(uuid::Uuid::new_v4());
    let log_path = PathBuf::from(LOG_DIR).join(&log_filename);

    let file_appender = tracing_appender::rolling::never(LOG_DIR, &log_filename);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    // RUST_LOG overrides what reaches the file
    let file_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn,zindex=trace,zindex_core=trace"));
    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_filter(file_filter);

    let console_level = if verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(progress::ProgressWriter)
        .with_target(false)
        .with_filter(console_level);

    tracing_subscriber::registry()
        .with(file_layer)
        .with(console_layer)
        .init();

    SessionInfo {
        log_path,
        guard: DebugLogGuard { _guard: guard },
    }
}
