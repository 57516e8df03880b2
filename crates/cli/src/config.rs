//! Configuration file handling
//!
//! Settings live in `<config_dir>/dirwatch/config.toml` unless a path is
//! given on the command line. Every key is optional; a missing default file
//! means all defaults.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use watcher::{DEFAULT_BUFFER_SIZE, MIN_BUFFER_SIZE};

/// Largest accepted read buffer
pub const MAX_BUFFER_SIZE: usize = 4 * 1024 * 1024;

/// Longest desktop popup timeout, in milliseconds
pub const MAX_TIMEOUT_MS: u64 = 60_000;

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub watch: WatchSettings,
    pub notify: NotifySettings,
    pub log: LogSettings,
}

/// `[watch]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchSettings {
    /// Bytes read from the kernel per call
    pub buffer_size: usize,
}

impl Default for WatchSettings {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }
}

/// `[notify]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifySettings {
    /// Print one line per event on stdout
    pub console: bool,
    /// Colorize console lines (only when stdout is a terminal)
    pub color: bool,
    /// Show a desktop popup per event
    pub desktop: bool,
    /// Desktop popup display time
    pub timeout_ms: u64,
}

impl Default for NotifySettings {
    fn default() -> Self {
        Self {
            console: true,
            color: true,
            desktop: true,
            timeout_ms: 3000,
        }
    }
}

/// `[log]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    /// Default level when `RUST_LOG` is unset
    pub level: String,
    /// Also write logs to this file
    pub file: Option<PathBuf>,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

impl Config {
    /// Parse a TOML document
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        toml::from_str(raw).context("Failed to parse configuration")
    }

    /// Check every value is within its accepted range
    pub fn validate(&self) -> Result<()> {
        let size = self.watch.buffer_size;
        if !(MIN_BUFFER_SIZE..=MAX_BUFFER_SIZE).contains(&size) {
            anyhow::bail!(
                "watch.buffer_size must be between {} and {} bytes (got {})",
                MIN_BUFFER_SIZE,
                MAX_BUFFER_SIZE,
                size
            );
        }

        if self.notify.timeout_ms > MAX_TIMEOUT_MS {
            anyhow::bail!(
                "notify.timeout_ms must be at most {} (got {})",
                MAX_TIMEOUT_MS,
                self.notify.timeout_ms
            );
        }

        match self.log.level.to_ascii_lowercase().as_str() {
            "error" | "warn" | "info" | "debug" | "trace" | "off" => {}
            other => anyhow::bail!("log.level must be one of error, warn, info, debug, trace, off (got '{}')", other),
        }

        Ok(())
    }
}

/// Default configuration file location
pub fn config_file_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("dirwatch").join("config.toml"))
}

/// Load configuration
///
/// An explicit `path` must exist. Without one, the default location is used
/// if present, otherwise defaults.
pub fn load(path: Option<&Path>) -> Result<Config> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => match config_file_path() {
            Some(default) if default.exists() => default,
            _ => return Ok(Config::default()),
        },
    };

    let raw = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    Config::from_toml_str(&raw).with_context(|| format!("Invalid config file {}", path.display()))
}
