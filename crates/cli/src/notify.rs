//! Notification sinks: console lines and desktop popups

use crate::config::NotifySettings;
use owo_colors::OwoColorize;
use std::io::{self, IsTerminal, Write};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::warn;
use watcher::{Action, EventSink, SemanticEvent, SinkError};

/// Render the console line for an event
pub fn format_event(event: &SemanticEvent, color: bool) -> String {
    let line = event.to_string();
    if !color {
        return line;
    }

    match event.action {
        Action::Created | Action::MovedTo => line.green().to_string(),
        Action::Deleted | Action::SelfDeleted => line.red().to_string(),
        Action::Modified => line.yellow().to_string(),
        Action::MovedFrom => line.cyan().to_string(),
    }
}

/// Prints one line per event on stdout
#[derive(Debug)]
pub struct ConsoleSink {
    color: bool,
}

impl ConsoleSink {
    /// Color is only applied when stdout is a terminal
    pub fn new(color: bool) -> Self {
        Self {
            color: color && io::stdout().is_terminal(),
        }
    }
}

impl EventSink for ConsoleSink {
    fn deliver(&self, event: &SemanticEvent) -> Result<(), SinkError> {
        let mut stdout = io::stdout().lock();
        writeln!(stdout, "{}", format_event(event, self.color))?;
        stdout.flush()?;
        Ok(())
    }
}

/// Shows a desktop popup per event through `notify-send`
///
/// Once the program turns out to be missing, later events are skipped
/// silently instead of failing one by one.
#[derive(Debug)]
pub struct DesktopSink {
    program: String,
    timeout: Duration,
    disabled: AtomicBool,
}

impl DesktopSink {
    pub fn new(timeout: Duration) -> Self {
        Self::with_program("notify-send", timeout)
    }

    pub fn with_program(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
            disabled: AtomicBool::new(false),
        }
    }

    fn summary(event: &SemanticEvent) -> String {
        format!("{} {}", event.entry_kind, event.action)
    }
}

impl EventSink for DesktopSink {
    fn deliver(&self, event: &SemanticEvent) -> Result<(), SinkError> {
        if self.disabled.load(Ordering::Relaxed) {
            return Ok(());
        }

        let status = Command::new(&self.program)
            .arg("--app-name=dirwatch")
            .arg("-t")
            .arg(self.timeout.as_millis().to_string())
            .arg(Self::summary(event))
            .arg(event.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();

        match status {
            Ok(status) if status.success() => Ok(()),
            Ok(status) => Err(SinkError::Unavailable(format!(
                "{} exited with {}",
                self.program, status
            ))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                self.disabled.store(true, Ordering::Relaxed);
                Err(SinkError::Unavailable(format!(
                    "{} not found, desktop notifications disabled",
                    self.program
                )))
            }
            Err(e) => Err(SinkError::Delivery(e)),
        }
    }
}

/// Delivers to several sinks, each failure logged on its own
#[derive(Default)]
pub struct Fanout {
    sinks: Vec<Box<dyn EventSink>>,
}

impl Fanout {
    pub fn push(&mut self, sink: impl EventSink + 'static) {
        self.sinks.push(Box::new(sink));
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl EventSink for Fanout {
    fn deliver(&self, event: &SemanticEvent) -> Result<(), SinkError> {
        let mut first_error = None;
        for sink in &self.sinks {
            if let Err(e) = sink.deliver(event) {
                if first_error.is_none() {
                    first_error = Some(e);
                } else {
                    warn!("{}", e);
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

/// Build the sinks enabled in `settings`
pub fn build_sinks(settings: &NotifySettings) -> Fanout {
    let mut fanout = Fanout::default();
    if settings.console {
        fanout.push(ConsoleSink::new(settings.color));
    }
    if settings.desktop {
        fanout.push(DesktopSink::new(Duration::from_millis(settings.timeout_ms)));
    }
    fanout
}
