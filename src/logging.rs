//! Tracing setup.
//!
//! Host applications call [`init`] once at startup. The filter honors
//! `RUST_LOG`; without it, the crate logs at `info`. An optional file layer
//! writes newline-delimited JSON events for post-hoc debugging of long
//! compression runs.

use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

/// Initialize stderr logging. Later calls in the same process are no-ops.
pub fn init() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,engram=info"));

    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).with_filter(filter))
        .try_init();
}

/// Initialize stderr logging plus a JSON file layer under `log_dir`.
///
/// The returned guard must be held for the lifetime of the process; dropping
/// it flushes and stops the background writer.
pub fn init_with_file(log_dir: &Path) -> std::io::Result<WorkerGuard> {
    std::fs::create_dir_all(log_dir)?;
    let appender = tracing_appender::rolling::daily(log_dir, "engram.log");
    let (file_writer, guard) = tracing_appender::non_blocking(appender);

    let stderr_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,engram=info"));
    let file_filter = EnvFilter::new("debug,engram=debug");

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(stderr_filter),
        )
        .with(
            fmt::layer()
                .json()
                .with_writer(file_writer)
                .with_ansi(false)
                .with_filter(file_filter),
        )
        .try_init()
        .map_err(std::io::Error::other)?;

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_init_creates_log_dir() {
        let dir = tempfile::tempdir().unwrap();
        let log_dir = dir.path().join("logs");
        // init_with_file may fail if a global subscriber is already set by
        // another test; the directory side effect is what we assert on.
        let _ = init_with_file(&log_dir);
        assert!(log_dir.is_dir());
    }
}
