//! Recursive directory watching on top of inotify
//!
//! This crate provides:
//! - A watch registry mapping watched directories to kernel watch ids
//! - A bounds-checked decoder for the raw inotify byte stream
//! - Classification of event masks into created/deleted/modified/moved actions
//! - Dynamic registration of new directories, so coverage stays recursive
//!
//! Typical use: `Watcher::new(root)`, then `seed()`, then `run_until(sink, shutdown)`
//! or `spawn(sink)`.

#[cfg(not(target_os = "linux"))]
compile_error!("the watcher crate requires Linux inotify");

pub mod decode;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod platform;
pub mod registry;
pub mod seed;

pub use dispatch::{ChannelSink, Dispatcher, EventSink, SinkThread};
pub use error::{Result, SinkError, WatchError};
pub use event::{Action, EntryKind, EventMask, RawEvent, SemanticEvent, WatchId};
pub use platform::EventSource;
pub use registry::WatchRegistry;
pub use seed::{SeedReport, TreeSeeder};

use decode::{EventDecoder, HEADER_SIZE};
use platform::linux::Inotify;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Smallest read buffer the kernel accepts: one header plus a maximal name
pub const MIN_BUFFER_SIZE: usize = HEADER_SIZE + libc::NAME_MAX as usize + 1;

/// Default read buffer: room for 4096 bare headers
pub const DEFAULT_BUFFER_SIZE: usize = HEADER_SIZE * 4096;

/// Tunables for the read loop
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// Bytes requested per read, raised to `MIN_BUFFER_SIZE` if smaller
    pub buffer_size: usize,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }
}

/// Recursive watcher over one directory tree
pub struct Watcher {
    root: PathBuf,
    inotify: Arc<Inotify>,
    registry: Arc<WatchRegistry>,
    config: WatcherConfig,
}

impl Watcher {
    /// Create a new watcher for the given path
    pub fn new(path: &Path) -> Result<Self> {
        Self::with_config(path, WatcherConfig::default())
    }

    /// Create a watcher with explicit tunables
    ///
    /// The root is canonicalized; it must be an existing directory.
    pub fn with_config(path: &Path, config: WatcherConfig) -> Result<Self> {
        let root = path
            .canonicalize()
            .map_err(|_| WatchError::InvalidRoot(path.to_path_buf()))?;
        if !root.is_dir() {
            return Err(WatchError::InvalidRoot(root));
        }

        let inotify = Arc::new(Inotify::init().map_err(WatchError::Initialization)?);
        let registry = Arc::new(WatchRegistry::new(inotify.clone()));

        Ok(Self {
            root,
            inotify,
            registry,
            config,
        })
    }

    /// Canonical root of the watched tree
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn registry(&self) -> &Arc<WatchRegistry> {
        &self.registry
    }

    /// Register the root and every directory below it
    ///
    /// Must complete before the read loop starts. Failing to watch the root
    /// is an error; failures below it are logged and counted.
    pub fn seed(&self) -> Result<SeedReport> {
        let report = TreeSeeder::new(&self.registry).seed(&self.root)?;

        info!(
            "Watching {} directories under {}",
            report.registered,
            self.root.display()
        );
        if report.failed > 0 {
            warn!("{} directories could not be watched", report.failed);
        }
        Ok(report)
    }

    /// Read and dispatch events until `shutdown` resolves
    ///
    /// The sink runs on its own thread; events already read are delivered
    /// before this returns. A read failure ends the loop with
    /// `WatchError::Read`. Dropping the watcher on return closes the inotify
    /// descriptor and releases every watch.
    pub async fn run_until<S, F>(self, sink: S, shutdown: F) -> Result<()>
    where
        S: EventSink + 'static,
        F: Future<Output = ()>,
    {
        let mut reader = self.inotify.reader().map_err(WatchError::Initialization)?;
        let delivery = SinkThread::spawn(sink).map_err(WatchError::DeliveryThread)?;
        let dispatcher = Dispatcher::new(self.registry.clone(), delivery);

        let result = read_loop(&mut reader, &dispatcher, self.config.buffer_size, shutdown).await;
        match &result {
            Ok(()) => info!("Stopping watcher for {}", self.root.display()),
            Err(e) => error!("Watcher for {} failed: {}", self.root.display(), e),
        }

        dispatcher.into_sink().finish().await?;
        result
    }

    /// Run the read loop on a tokio task
    pub fn spawn<S>(self, sink: S) -> WatcherHandle
    where
        S: EventSink + 'static,
    {
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let registry = self.registry.clone();

        let task = tokio::spawn(self.run_until(sink, async move {
            // A dropped handle also stops the loop
            let _ = stop_rx.await;
        }));

        WatcherHandle {
            stop: Some(stop_tx),
            task,
            registry,
        }
    }
}

/// Read, decode and dispatch until `shutdown` resolves or the source fails
async fn read_loop<R, S, F>(
    source: &mut R,
    dispatcher: &Dispatcher<S>,
    buffer_size: usize,
    shutdown: F,
) -> Result<()>
where
    R: EventSource,
    S: EventSink,
    F: Future<Output = ()>,
{
    let mut decoder = EventDecoder::new();
    let mut buf = vec![0u8; buffer_size.max(MIN_BUFFER_SIZE)];

    tokio::pin!(shutdown);

    loop {
        let n = tokio::select! {
            _ = &mut shutdown => return Ok(()),
            read = source.read(&mut buf) => read.map_err(WatchError::Read)?,
        };

        if n == 0 {
            return Err(WatchError::Read(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "event source closed",
            )));
        }

        for item in decoder.decode(&buf[..n]) {
            match item.and_then(|record| dispatcher.dispatch(&record)) {
                Ok(_) => {}
                Err(e @ WatchError::QueueOverflow) => error!("{}", e),
                Err(e) => warn!("{}", e),
            }
        }
    }
}

impl std::fmt::Debug for Watcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watcher")
            .field("root", &self.root)
            .field("registry", &self.registry)
            .field("config", &self.config)
            .finish()
    }
}

/// Handle to a spawned read loop
#[derive(Debug)]
pub struct WatcherHandle {
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<()>>,
    registry: Arc<WatchRegistry>,
}

impl WatcherHandle {
    /// Registry shared with the running loop
    pub fn registry(&self) -> &Arc<WatchRegistry> {
        &self.registry
    }

    /// Signal shutdown and wait for the loop to finish
    pub async fn stop(mut self) -> Result<()> {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        self.join().await
    }

    /// Wait for the loop to end on its own (read error)
    pub async fn join(self) -> Result<()> {
        self.task.await?
    }
}
