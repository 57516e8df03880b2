//! Classification and dispatch of decoded records
//!
//! For each record the dispatcher resolves the watched directory, classifies
//! the mask, keeps the registry in step with directories appearing and
//! disappearing, and forwards every semantic event to the sink. Failures
//! local to one watch or one sink call are logged and never stop dispatch.
//!
//! Sinks may block (spawning a popup, writing a pipe). `SinkThread` moves
//! delivery onto its own thread so only the kernel read ever waits in the
//! read loop.

use crate::error::{Result, SinkError, WatchError};
use crate::event::{classify, Action, EntryKind, EventMask, RawEvent, SemanticEvent};
use crate::registry::WatchRegistry;
use crate::seed::TreeSeeder;
use smallvec::SmallVec;
use std::ffi::OsString;
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

/// Destination for semantic events
pub trait EventSink: Send + Sync {
    /// Deliver one event; errors are logged by the caller and otherwise ignored
    fn deliver(&self, event: &SemanticEvent) -> Result<(), SinkError>;
}

impl<S: EventSink + ?Sized> EventSink for Arc<S> {
    fn deliver(&self, event: &SemanticEvent) -> Result<(), SinkError> {
        (**self).deliver(event)
    }
}

impl<S: EventSink + ?Sized> EventSink for Box<S> {
    fn deliver(&self, event: &SemanticEvent) -> Result<(), SinkError> {
        (**self).deliver(event)
    }
}

/// Sink forwarding events into an unbounded tokio channel
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<SemanticEvent>,
}

impl ChannelSink {
    /// Create a sink and the receiver its events arrive on
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SemanticEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn deliver(&self, event: &SemanticEvent) -> Result<(), SinkError> {
        self.tx.send(event.clone()).map_err(|_| SinkError::Closed)
    }
}

/// Delivers to a sink from a dedicated thread
///
/// `deliver` only queues the event. The thread drains the queue in order and
/// logs sink failures itself.
#[derive(Debug)]
pub struct SinkThread {
    tx: mpsc::UnboundedSender<SemanticEvent>,
    thread: JoinHandle<()>,
}

impl SinkThread {
    /// Start the delivery thread owning `sink`
    pub fn spawn<S>(sink: S) -> io::Result<Self>
    where
        S: EventSink + 'static,
    {
        let (tx, mut rx) = mpsc::unbounded_channel::<SemanticEvent>();

        let thread = thread::Builder::new()
            .name("watcher-sink".to_string())
            .spawn(move || {
                while let Some(event) = rx.blocking_recv() {
                    if let Err(e) = sink.deliver(&event) {
                        warn!("Notification for {} failed: {}", event.path().display(), e);
                    }
                }
            })?;

        Ok(Self { tx, thread })
    }

    /// Close the queue and wait until every queued event was delivered
    pub async fn finish(self) -> Result<()> {
        let Self { tx, thread } = self;
        drop(tx);

        tokio::task::spawn_blocking(move || {
            if thread.join().is_err() {
                error!("Notification thread panicked");
            }
        })
        .await?;
        Ok(())
    }
}

impl EventSink for SinkThread {
    fn deliver(&self, event: &SemanticEvent) -> Result<(), SinkError> {
        self.tx.send(event.clone()).map_err(|_| SinkError::Closed)
    }
}

/// Events emitted for one record
pub type Emitted = SmallVec<[SemanticEvent; 2]>;

/// Turns raw records into semantic events and registry updates
pub struct Dispatcher<S> {
    registry: Arc<WatchRegistry>,
    sink: S,
}

impl<S: EventSink> Dispatcher<S> {
    pub fn new(registry: Arc<WatchRegistry>, sink: S) -> Self {
        Self { registry, sink }
    }

    pub fn registry(&self) -> &Arc<WatchRegistry> {
        &self.registry
    }

    /// Give back the sink, for flushing after the loop ends
    pub fn into_sink(self) -> S {
        self.sink
    }

    /// Dispatch one record
    ///
    /// Returns the events forwarded to the sink. Records for unknown watch
    /// ids yield nothing. Only a kernel queue overflow is reported as an
    /// error, and dispatch may continue after it.
    pub fn dispatch(&self, record: &RawEvent) -> Result<Emitted> {
        let mut emitted = Emitted::new();

        if record.mask.contains(EventMask::Q_OVERFLOW) {
            return Err(WatchError::QueueOverflow);
        }

        if record.mask.contains(EventMask::IGNORED) {
            // Kernel released the watch (deleted, unmounted or removed by us)
            self.registry.forget(record.watch_id);
            return Ok(emitted);
        }

        let Some(containing_path) = self.registry.resolve(record.watch_id) else {
            trace!("Dropping event for unknown {}", record.watch_id);
            return Ok(emitted);
        };

        if record.mask.contains(EventMask::UNMOUNT) {
            info!("Filesystem backing {} was unmounted", containing_path.display());
        }

        for (action, entry_kind) in classify(record.mask) {
            let name = if action == Action::SelfDeleted {
                OsString::new()
            } else {
                record.name.clone()
            };
            let cookie = matches!(action, Action::MovedFrom | Action::MovedTo)
                .then_some(record.cookie);

            let event = SemanticEvent {
                action,
                entry_kind,
                name,
                containing_path: containing_path.clone(),
                cookie,
            };

            // Registry first, so a new directory is covered before its own events
            self.update_registry(&event, record.mask);

            if let Err(e) = self.sink.deliver(&event) {
                warn!("Notification for {} failed: {}", event.path().display(), e);
            }
            emitted.push(event);
        }

        Ok(emitted)
    }

    fn update_registry(&self, event: &SemanticEvent, mask: EventMask) {
        match (event.action, event.entry_kind) {
            (Action::Created | Action::MovedTo, EntryKind::Directory) => {
                let dir = event.path();
                match self.registry.register(&dir) {
                    Ok(_) => {
                        // Children created before the watch existed
                        TreeSeeder::new(&self.registry).seed_children(&dir);
                    }
                    Err(e) => warn!("{}", e),
                }
            }
            (Action::Deleted, EntryKind::Directory) => self.release(&event.path()),
            (Action::MovedFrom, EntryKind::Directory) => {
                let removed = self.registry.unregister_tree(&event.path());
                debug!("{} left the tree, dropped {} watches", event.path().display(), removed);
            }
            (Action::SelfDeleted, _) => {
                // After a rename inside the tree the parent's MovedFrom has
                // already dropped this watch and MovedTo registered the new
                // path under a fresh id. Otherwise keep the entry while the
                // recorded path still names a directory.
                if mask.contains(EventMask::DELETE_SELF) || !event.containing_path.exists() {
                    self.release(&event.containing_path);
                }
            }
            _ => {}
        }
    }

    fn release(&self, path: &Path) {
        if let Err(e) = self.registry.unregister(path) {
            debug!("{}", e);
        }
    }
}

impl<S> std::fmt::Debug for Dispatcher<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::WatchId;
    use crate::registry::tests::FakeBackend;
    use std::fs;
    use std::path::PathBuf;
    use std::time::{Duration, Instant};
    use tempfile::TempDir;

    struct FailingSink;

    impl EventSink for FailingSink {
        fn deliver(&self, _event: &SemanticEvent) -> Result<(), SinkError> {
            Err(SinkError::Unavailable("no display".to_string()))
        }
    }

    struct Fixture {
        temp_dir: TempDir,
        root_id: WatchId,
        dispatcher: Dispatcher<ChannelSink>,
        rx: mpsc::UnboundedReceiver<SemanticEvent>,
    }

    impl Fixture {
        fn new() -> Self {
            let temp_dir = TempDir::new().unwrap();
            let registry = Arc::new(WatchRegistry::new(FakeBackend::new()));
            let root_id = registry.register(temp_dir.path()).unwrap();
            let (sink, rx) = ChannelSink::new();

            Self {
                temp_dir,
                root_id,
                dispatcher: Dispatcher::new(registry, sink),
                rx,
            }
        }

        fn root(&self) -> &Path {
            self.temp_dir.path()
        }

        fn registry(&self) -> &WatchRegistry {
            self.dispatcher.registry()
        }

        fn record(&self, mask: EventMask, name: &str) -> RawEvent {
            RawEvent {
                watch_id: self.root_id,
                mask,
                cookie: 0,
                name: name.into(),
            }
        }

        fn drain(&mut self) -> Vec<SemanticEvent> {
            let mut events = Vec::new();
            while let Ok(event) = self.rx.try_recv() {
                events.push(event);
            }
            events
        }
    }

    #[test]
    fn test_create_directory_registers_child() {
        let mut fx = Fixture::new();
        fs::create_dir(fx.root().join("sub")).unwrap();

        let emitted = fx
            .dispatcher
            .dispatch(&fx.record(EventMask::CREATE | EventMask::ISDIR, "sub"))
            .unwrap();

        assert_eq!(emitted.len(), 1);
        assert_eq!(emitted[0].action, Action::Created);
        assert_eq!(emitted[0].entry_kind, EntryKind::Directory);
        assert_eq!(emitted[0].name, "sub");
        assert_eq!(emitted[0].containing_path, fx.root());
        assert!(fx.registry().contains(&fx.root().join("sub")));
        assert_eq!(fx.drain().len(), 1);
    }

    #[test]
    fn test_create_directory_picks_up_nested_children() {
        let fx = Fixture::new();
        fs::create_dir_all(fx.root().join("a/b/c")).unwrap();

        fx.dispatcher
            .dispatch(&fx.record(EventMask::CREATE | EventMask::ISDIR, "a"))
            .unwrap();

        assert!(fx.registry().contains(&fx.root().join("a")));
        assert!(fx.registry().contains(&fx.root().join("a/b/c")));
    }

    #[test]
    fn test_modify_file_no_registry_change() {
        let mut fx = Fixture::new();
        let before = fx.registry().paths();

        let emitted = fx
            .dispatcher
            .dispatch(&fx.record(EventMask::MODIFY, "notes.txt"))
            .unwrap();

        assert_eq!(emitted.len(), 1);
        assert_eq!(emitted[0].action, Action::Modified);
        assert_eq!(emitted[0].entry_kind, EntryKind::File);
        assert_eq!(fx.registry().paths(), before);
        assert_eq!(fx.drain(), emitted.to_vec());
    }

    #[test]
    fn test_stale_id_yields_nothing() {
        let mut fx = Fixture::new();
        let record = RawEvent {
            watch_id: WatchId(4242),
            mask: EventMask::CREATE,
            cookie: 0,
            name: "ghost".into(),
        };

        let emitted = fx.dispatcher.dispatch(&record).unwrap();

        assert!(emitted.is_empty());
        assert!(fx.drain().is_empty());
    }

    #[test]
    fn test_delete_directory_unregisters_child() {
        let fx = Fixture::new();
        let sub = fx.root().join("sub");
        fx.registry().register(&sub).unwrap();

        let emitted = fx
            .dispatcher
            .dispatch(&fx.record(EventMask::DELETE | EventMask::ISDIR, "sub"))
            .unwrap();

        assert_eq!(emitted[0].action, Action::Deleted);
        assert_eq!(emitted[0].entry_kind, EntryKind::Directory);
        assert!(!fx.registry().contains(&sub));
        assert!(fx.registry().contains(fx.root()));
    }

    #[test]
    fn test_delete_self_unregisters_watch() {
        let fx = Fixture::new();
        let sub = fx.root().join("sub");
        let sub_id = fx.registry().register(&sub).unwrap();

        let record = RawEvent {
            watch_id: sub_id,
            mask: EventMask::DELETE_SELF,
            cookie: 0,
            name: OsString::new(),
        };
        let emitted = fx.dispatcher.dispatch(&record).unwrap();

        assert_eq!(emitted.len(), 1);
        assert_eq!(emitted[0].action, Action::SelfDeleted);
        assert_eq!(emitted[0].containing_path, sub);
        assert!(emitted[0].is_self());
        assert!(!fx.registry().contains(&sub));
    }

    #[test]
    fn test_move_self_within_tree_keeps_watch() {
        let fx = Fixture::new();
        let moved = fx.root().join("renamed");
        fs::create_dir(&moved).unwrap();
        let id = fx.registry().register(&moved).unwrap();

        let record = RawEvent {
            watch_id: id,
            mask: EventMask::MOVE_SELF,
            cookie: 0,
            name: OsString::new(),
        };
        let emitted = fx.dispatcher.dispatch(&record).unwrap();

        assert_eq!(emitted[0].action, Action::SelfDeleted);
        assert!(fx.registry().contains(&moved));
    }

    #[test]
    fn test_moved_from_directory_drops_subtree() {
        let fx = Fixture::new();
        for p in ["old", "old/inner", "keep"] {
            fx.registry().register(&fx.root().join(p)).unwrap();
        }

        let mut record = fx.record(EventMask::MOVED_FROM | EventMask::ISDIR, "old");
        record.cookie = 77;
        let emitted = fx.dispatcher.dispatch(&record).unwrap();

        assert_eq!(emitted[0].action, Action::MovedFrom);
        assert_eq!(emitted[0].cookie, Some(77));
        assert!(!fx.registry().contains(&fx.root().join("old")));
        assert!(!fx.registry().contains(&fx.root().join("old/inner")));
        assert!(fx.registry().contains(&fx.root().join("keep")));
    }

    #[test]
    fn test_moved_to_directory_registers_subtree() {
        let fx = Fixture::new();
        fs::create_dir_all(fx.root().join("arrived/deep")).unwrap();

        let emitted = fx
            .dispatcher
            .dispatch(&fx.record(EventMask::MOVED_TO | EventMask::ISDIR, "arrived"))
            .unwrap();

        assert_eq!(emitted[0].action, Action::MovedTo);
        assert!(fx.registry().contains(&fx.root().join("arrived")));
        assert!(fx.registry().contains(&fx.root().join("arrived/deep")));
    }

    #[test]
    fn test_ignored_forgets_watch() {
        let fx = Fixture::new();

        let emitted = fx.dispatcher.dispatch(&fx.record(EventMask::IGNORED, "")).unwrap();

        assert!(emitted.is_empty());
        assert!(fx.registry().is_empty());
    }

    #[test]
    fn test_overflow_is_reported() {
        let fx = Fixture::new();
        let record = RawEvent {
            watch_id: WatchId(-1),
            mask: EventMask::Q_OVERFLOW,
            cookie: 0,
            name: OsString::new(),
        };

        assert!(matches!(
            fx.dispatcher.dispatch(&record),
            Err(WatchError::QueueOverflow)
        ));
    }

    #[test]
    fn test_sink_failure_does_not_stop_dispatch() {
        let temp_dir = TempDir::new().unwrap();
        let registry = Arc::new(WatchRegistry::new(FakeBackend::new()));
        let root_id = registry.register(temp_dir.path()).unwrap();
        fs::create_dir(temp_dir.path().join("sub")).unwrap();

        let dispatcher = Dispatcher::new(registry.clone(), FailingSink);
        let record = RawEvent {
            watch_id: root_id,
            mask: EventMask::CREATE | EventMask::ISDIR,
            cookie: 0,
            name: "sub".into(),
        };

        let emitted = dispatcher.dispatch(&record).unwrap();

        assert_eq!(emitted.len(), 1);
        assert!(registry.contains(&temp_dir.path().join("sub")));
    }

    #[test]
    fn test_register_failure_is_contained() {
        let temp_dir = TempDir::new().unwrap();
        let backend = FakeBackend::new();
        backend.reject(&temp_dir.path().join("locked"));
        let registry = Arc::new(WatchRegistry::new(backend));
        let root_id = registry.register(temp_dir.path()).unwrap();
        let (sink, mut rx) = ChannelSink::new();
        let dispatcher = Dispatcher::new(registry.clone(), sink);

        let record = RawEvent {
            watch_id: root_id,
            mask: EventMask::CREATE | EventMask::ISDIR,
            cookie: 0,
            name: "locked".into(),
        };
        dispatcher.dispatch(&record).unwrap();

        let event = rx.try_recv().unwrap();
        assert_eq!(event.path(), PathBuf::from(temp_dir.path()).join("locked"));
        assert_eq!(registry.len(), 1);
    }

    /// Sink that takes its time and records where each event landed
    struct SlowSink {
        delay: Duration,
        seen: Arc<parking_lot::Mutex<Vec<(OsString, Option<String>)>>>,
    }

    impl EventSink for SlowSink {
        fn deliver(&self, event: &SemanticEvent) -> Result<(), SinkError> {
            thread::sleep(self.delay);
            let thread_name = thread::current().name().map(str::to_string);
            self.seen.lock().push((event.name.clone(), thread_name));
            Ok(())
        }
    }

    fn modified(name: &str) -> SemanticEvent {
        SemanticEvent {
            action: Action::Modified,
            entry_kind: EntryKind::File,
            name: name.into(),
            containing_path: PathBuf::from("/tmp/watch"),
            cookie: None,
        }
    }

    #[tokio::test]
    async fn test_sink_thread_queues_without_waiting() {
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let delivery = SinkThread::spawn(SlowSink {
            delay: Duration::from_millis(100),
            seen: seen.clone(),
        })
        .unwrap();

        let started = Instant::now();
        for name in ["a", "b", "c"] {
            delivery.deliver(&modified(name)).unwrap();
        }
        assert!(started.elapsed() < Duration::from_millis(100));

        delivery.finish().await.unwrap();

        let seen = seen.lock();
        let names: Vec<_> = seen.iter().map(|(name, _)| name.clone()).collect();
        assert_eq!(names, vec![OsString::from("a"), OsString::from("b"), OsString::from("c")]);
        assert!(seen
            .iter()
            .all(|(_, thread_name)| thread_name.as_deref() == Some("watcher-sink")));
    }

    #[tokio::test]
    async fn test_sink_thread_survives_failing_sink() {
        let delivery = SinkThread::spawn(FailingSink).unwrap();

        assert!(delivery.deliver(&modified("a")).is_ok());
        assert!(delivery.deliver(&modified("b")).is_ok());
        delivery.finish().await.unwrap();
    }
}
