//! inotify-backed event source

use super::{EventSource, WatchBackend};
use crate::event::{EventMask, WatchId};
use std::ffi::CString;
use std::future::Future;
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::sync::Arc;
use tokio::io::unix::AsyncFd;

/// An open inotify instance
///
/// The descriptor is non-blocking and closed on drop, which releases every
/// watch it holds.
#[derive(Debug)]
pub struct Inotify {
    fd: OwnedFd,
}

impl Inotify {
    /// Open a new inotify instance
    pub fn init() -> io::Result<Self> {
        // SAFETY: inotify_init1 takes only flags and touches no caller memory
        let fd = unsafe { libc::inotify_init1(libc::IN_NONBLOCK | libc::IN_CLOEXEC) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }

        // SAFETY: fd was just returned by inotify_init1 and is owned by nobody else
        let fd = unsafe { OwnedFd::from_raw_fd(fd) };
        Ok(Self { fd })
    }

    /// Register the descriptor with the tokio reactor for reading
    ///
    /// Must be called from within a tokio runtime.
    pub fn reader(self: &Arc<Self>) -> io::Result<InotifyReader> {
        Ok(InotifyReader {
            fd: AsyncFd::new(self.fd.as_raw_fd())?,
            _owner: Arc::clone(self),
        })
    }
}

impl AsRawFd for Inotify {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

impl WatchBackend for Inotify {
    fn add_watch(&self, path: &Path) -> io::Result<WatchId> {
        let c_path = CString::new(path.as_os_str().as_bytes())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        let mask = EventMask::WATCHED.bits() | libc::IN_ONLYDIR | libc::IN_DONT_FOLLOW;

        // SAFETY: c_path is a NUL-terminated string that outlives the call
        let wd = unsafe { libc::inotify_add_watch(self.fd.as_raw_fd(), c_path.as_ptr(), mask) };
        if wd < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(WatchId(wd))
    }

    fn remove_watch(&self, id: WatchId) -> io::Result<()> {
        // SAFETY: plain integer arguments; an unknown id is reported as EINVAL
        let ret = unsafe { libc::inotify_rm_watch(self.fd.as_raw_fd(), id.raw()) };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

/// Async read half of an `Inotify`
///
/// Keeps the instance alive while registered with the reactor.
#[derive(Debug)]
pub struct InotifyReader {
    fd: AsyncFd<RawFd>,
    _owner: Arc<Inotify>,
}

impl EventSource for InotifyReader {
    /// `buf` must hold at least one header plus a maximal name or the kernel
    /// rejects the read.
    fn read<'a>(
        &'a mut self,
        buf: &'a mut [u8],
    ) -> impl Future<Output = io::Result<usize>> + Send + 'a {
        async move {
            loop {
                let mut guard = self.fd.readable().await?;

                let result = guard.try_io(|inner| {
                    // SAFETY: buf is a live, exclusively borrowed slice of buf.len() bytes
                    let n = unsafe { libc::read(*inner.get_ref(), buf.as_mut_ptr().cast(), buf.len()) };
                    if n < 0 {
                        Err(io::Error::last_os_error())
                    } else {
                        Ok(n as usize)
                    }
                });

                match result {
                    Ok(Err(e)) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Ok(read) => return read,
                    // Spurious readiness, wait again
                    Err(_would_block) => continue,
                }
            }
        }
    }
}
