//! Tracing subscriber setup

use crate::config::LogSettings;
use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// Level after applying `-v` flags on top of the configured level
pub fn effective_level(configured: &str, verbose: u8) -> &str {
    match verbose {
        0 => configured,
        1 => "debug",
        _ => "trace",
    }
}

/// Build the filter: `RUST_LOG` wins, otherwise our crates at `level`
pub fn filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("warn,watcher={level},dirwatch={level}")))
}

/// Install the global subscriber
///
/// Logs go to stderr, or to `settings.file` when set. The returned guard
/// must be held until exit so buffered file output is flushed.
pub fn init(settings: &LogSettings, verbose: u8) -> Result<Option<WorkerGuard>> {
    let level = effective_level(&settings.level, verbose).to_ascii_lowercase();

    match &settings.file {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| std::path::Path::new("."));
            let file_name = path
                .file_name()
                .context("log.file must name a file")?;

            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory {}", dir.display()))?;

            let appender = tracing_appender::rolling::never(dir, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);

            tracing_subscriber::fmt()
                .with_env_filter(filter(&level))
                .with_writer(writer)
                .with_ansi(false)
                .init();
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter(&level))
                .with_writer(std::io::stderr)
                .init();
            Ok(None)
        }
    }
}
