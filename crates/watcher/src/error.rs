//! Error taxonomy for the watcher
//!
//! Errors local to one watch or one record are logged and contained by the
//! dispatcher. Errors that compromise the event source itself
//! (`Initialization`, `Read`) are fatal and surface to the caller.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Convenience alias used across the crate
pub type Result<T, E = WatchError> = std::result::Result<T, E>;

/// Errors produced by the watch registry, decoder and read loop
#[derive(Debug, Error)]
pub enum WatchError {
    /// The kernel event source could not be opened
    #[error("failed to initialize kernel event source: {0}")]
    Initialization(#[source] io::Error),

    /// The kernel event source rejected a watch request for `path`
    #[error("failed to watch {}: {source}", path.display())]
    WatchCreation {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Removal was requested for a path the registry does not know
    #[error("{} is not registered", .0.display())]
    NotRegistered(PathBuf),

    /// A record does not fit in the bytes that remain in the buffer
    #[error("truncated event record at offset {offset}: need {needed} bytes, {available} available")]
    TruncatedRecord {
        offset: usize,
        needed: usize,
        available: usize,
    },

    /// A record header declares a name longer than any path can be
    #[error("corrupt event record at offset {offset}: name length {name_len} exceeds {max}")]
    CorruptRecord {
        offset: usize,
        name_len: usize,
        max: usize,
    },

    /// The blocking read on the kernel event source failed
    #[error("failed to read from kernel event source: {0}")]
    Read(#[source] io::Error),

    /// The thread delivering events to the sink could not be started
    #[error("failed to start notification thread: {0}")]
    DeliveryThread(#[source] io::Error),

    /// The kernel dropped events because its queue filled up
    #[error("kernel event queue overflowed, some events were lost")]
    QueueOverflow,

    /// The starting path is missing or not a directory
    #[error("{} is not a directory", .0.display())]
    InvalidRoot(PathBuf),

    /// The spawned read loop panicked or was aborted
    #[error("watch loop task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Failure reported by a notification sink
#[derive(Debug, Error)]
pub enum SinkError {
    /// The sink's backend could not be reached or spawned
    #[error("notification backend unavailable: {0}")]
    Unavailable(String),

    /// The sink accepted the event but rendering failed
    #[error("failed to deliver notification: {0}")]
    Delivery(#[from] io::Error),

    /// The receiving side of a channel sink is gone
    #[error("event receiver dropped")]
    Closed,
}
