//! Helpers for running the `dirwatch` binary
//!
//! Wraps `std::process::Command` with an isolated config directory so the
//! developer's own configuration never leaks into a test.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

/// Command builder for the `dirwatch` binary
pub struct DirwatchCommand {
    working_dir: PathBuf,
    args: Vec<String>,
    env: HashMap<String, String>,
}

impl DirwatchCommand {
    /// Create a new command in the given working directory
    pub fn new(working_dir: impl AsRef<Path>) -> Self {
        let working_dir = working_dir.as_ref().to_path_buf();
        let mut env = HashMap::new();
        // dirs::config_dir honours XDG_CONFIG_HOME on Linux
        env.insert(
            "XDG_CONFIG_HOME".to_string(),
            working_dir.join(".config").display().to_string(),
        );

        Self {
            working_dir,
            args: Vec::new(),
            env,
        }
    }

    /// Add command arguments
    pub fn args(&mut self, args: &[&str]) -> &mut Self {
        self.args.extend(args.iter().map(|s| s.to_string()));
        self
    }

    fn command(&self) -> Command {
        let mut command = Command::new(env!("CARGO_BIN_EXE_dirwatch"));
        command
            .args(&self.args)
            .current_dir(&self.working_dir)
            .envs(&self.env)
            .env_remove("RUST_LOG");
        command
    }

    /// Run to completion
    pub fn execute(&self) -> Result<CommandResult> {
        let output = self
            .command()
            .output()
            .context("Failed to execute dirwatch")?;

        Ok(CommandResult {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_code: output.status.code().unwrap_or(-1),
        })
    }

    /// Start in the background with stdout piped, stderr passed through
    pub fn spawn(&self) -> Result<Child> {
        self.command()
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .context("Failed to spawn dirwatch")
    }
}

/// Collects stdout lines of a spawned child on a background thread
pub struct LineReader {
    rx: std::sync::mpsc::Receiver<String>,
    seen: Vec<String>,
}

impl LineReader {
    /// Take over the child's piped stdout
    pub fn new(child: &mut Child) -> Result<Self> {
        let stdout = child.stdout.take().context("stdout not piped")?;
        let (tx, rx) = std::sync::mpsc::channel();

        std::thread::spawn(move || {
            for line in BufReader::new(stdout).lines().map_while(|line| line.ok()) {
                if tx.send(line).is_err() {
                    break;
                }
            }
        });

        Ok(Self {
            rx,
            seen: Vec::new(),
        })
    }

    /// Block until a line containing `needle` arrives
    pub fn wait_for(&mut self, needle: &str, timeout: Duration) -> Result<String> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let line = self
                .rx
                .recv_timeout(remaining)
                .with_context(|| format!("Timed out waiting for '{}', saw {:?}", needle, self.seen))?;
            self.seen.push(line.clone());
            if line.contains(needle) {
                return Ok(line);
            }
        }
    }
}

/// Command execution result
#[derive(Debug, Clone)]
pub struct CommandResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CommandResult {
    /// Check if command succeeded
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Check if stderr contains text
    pub fn contains_stderr(&self, text: &str) -> bool {
        self.stderr.contains(text)
    }
}

/// Macro for convenient command construction
#[macro_export]
macro_rules! dirwatch {
    ($dir:expr, $($arg:expr),*) => {{
        let mut cmd = $crate::common::cli::DirwatchCommand::new($dir);
        cmd.args(&[$($arg),*]);
        cmd
    }};
}
