//! dirwatch CLI - watch a directory tree and report every change

use anyhow::{Context, Result};
use clap::Parser;
use dirwatch::{config, logging, notify};
use owo_colors::OwoColorize;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::signal::unix::{signal, SignalKind};
use tracing::info;
use watcher::{Watcher, WatcherConfig};

/// dirwatch - Recursive directory change notifications
#[derive(Parser)]
#[command(name = "dirwatch")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Directory to watch (recursively)
    path: PathBuf,

    /// Configuration file (default: <config dir>/dirwatch/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Disable desktop popups
    #[arg(long)]
    no_desktop: bool,

    /// Desktop popup display time in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Bytes read from the kernel per call
    #[arg(long)]
    buffer_size: Option<usize>,

    /// Don't print events on stdout
    #[arg(short, long)]
    quiet: bool,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    /// Command-line flags win over the configuration file
    fn apply(&self, config: &mut config::Config) {
        if self.no_desktop {
            config.notify.desktop = false;
        }
        if self.quiet {
            config.notify.console = false;
        }
        if let Some(timeout_ms) = self.timeout_ms {
            config.notify.timeout_ms = timeout_ms;
        }
        if let Some(buffer_size) = self.buffer_size {
            config.watch.buffer_size = buffer_size;
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {:#}", "error:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = config::load(cli.config.as_deref())?;
    cli.apply(&mut config);
    config.validate().context("Invalid configuration")?;

    let _log_guard = logging::init(&config.log, cli.verbose)?;

    let watcher = Watcher::with_config(
        &cli.path,
        WatcherConfig {
            buffer_size: config.watch.buffer_size,
        },
    )
    .with_context(|| format!("Cannot watch {}", cli.path.display()))?;

    // Install the SIGTERM handler before announcing we are up
    let mut terminate = signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    let shutdown = async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = terminate.recv() => {}
        }
        info!("Shutdown signal received");
    };

    let report = watcher.seed()?;
    if config.notify.console {
        let root = watcher.root().display().to_string();
        let root = if config.notify.color && std::io::stdout().is_terminal() {
            root.bold().to_string()
        } else {
            root
        };
        println!(
            "Watching {} ({} directories{})",
            root,
            report.registered,
            if report.failed > 0 {
                format!(", {} skipped", report.failed)
            } else {
                String::new()
            }
        );
    }

    let sinks = notify::build_sinks(&config.notify);
    watcher
        .run_until(sinks, shutdown)
        .await
        .context("Watching stopped unexpectedly")?;

    Ok(())
}
