//! Kernel event source
//!
//! `WatchBackend` is the add/remove half of the source, shared with the
//! registry. `EventSource` is the read half, owned by the read loop.

use crate::event::WatchId;
use std::future::Future;
use std::io;
use std::path::Path;

#[cfg(target_os = "linux")]
pub mod linux;

/// Watch add/remove requests against the kernel event source
pub trait WatchBackend: Send + Sync {
    /// Start watching the directory at `path`
    ///
    /// Watching a path that is already watched returns the id the source
    /// already uses for it.
    fn add_watch(&self, path: &Path) -> io::Result<WatchId>;

    /// Stop watching `id`
    fn remove_watch(&self, id: WatchId) -> io::Result<()>;
}

/// Raw event bytes from the kernel event source
pub trait EventSource: Send {
    /// Wait for pending events and copy whole records into `buf`
    ///
    /// Returns the number of bytes written. Zero means the source is closed.
    fn read<'a>(
        &'a mut self,
        buf: &'a mut [u8],
    ) -> impl Future<Output = io::Result<usize>> + Send + 'a;
}
