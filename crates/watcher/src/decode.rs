//! Decoding of the kernel's raw event stream
//!
//! Each record is a fixed 16-byte header (`wd`, `mask`, `cookie`, `len`, all
//! native endian) followed by `len` bytes of NUL-padded name. A read may end
//! in the middle of a record, so `EventDecoder` keeps the unfinished tail and
//! prepends it to the next read. A length field that could never be valid is
//! treated as corruption: pending bytes are dropped and decoding restarts at
//! the next read boundary.

use crate::error::{Result, WatchError};
use crate::event::{EventMask, RawEvent, WatchId};
use bytes::{Buf, BytesMut};
use std::ffi::OsString;
use std::os::unix::ffi::OsStrExt;

/// Size of the fixed record header
pub const HEADER_SIZE: usize = std::mem::size_of::<libc::inotify_event>();

/// Largest name length accepted before a record is considered corrupt
pub const MAX_NAME_LEN: usize = libc::PATH_MAX as usize;

/// Iterate over the complete records in `buf`
pub fn records(buf: &[u8]) -> Records<'_> {
    Records {
        buf,
        offset: 0,
        done: false,
    }
}

/// Lazy, bounds-checked cursor over one buffer of records
///
/// Yields one `Ok` per complete record. If the tail cannot hold a full
/// record, yields a single `TruncatedRecord` and stops. A header declaring an
/// impossible name length yields `CorruptRecord` and stops, even when the
/// bytes it claims are present.
#[derive(Debug)]
pub struct Records<'a> {
    buf: &'a [u8],
    offset: usize,
    done: bool,
}

impl Records<'_> {
    /// Bytes consumed by the complete records yielded so far
    pub fn consumed(&self) -> usize {
        self.offset
    }
}

impl Iterator for Records<'_> {
    type Item = Result<RawEvent>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.offset >= self.buf.len() {
            return None;
        }

        let remaining = &self.buf[self.offset..];
        if remaining.len() < HEADER_SIZE {
            self.done = true;
            return Some(Err(WatchError::TruncatedRecord {
                offset: self.offset,
                needed: HEADER_SIZE,
                available: remaining.len(),
            }));
        }

        let wd = i32::from_ne_bytes(word(remaining, 0));
        let mask = u32::from_ne_bytes(word(remaining, 4));
        let cookie = u32::from_ne_bytes(word(remaining, 8));
        let name_len = u32::from_ne_bytes(word(remaining, 12)) as usize;

        if name_len > MAX_NAME_LEN {
            self.done = true;
            return Some(Err(WatchError::CorruptRecord {
                offset: self.offset,
                name_len,
                max: MAX_NAME_LEN,
            }));
        }

        let needed = HEADER_SIZE + name_len;
        if remaining.len() < needed {
            self.done = true;
            return Some(Err(WatchError::TruncatedRecord {
                offset: self.offset,
                needed,
                available: remaining.len(),
            }));
        }

        let name = strip_padding(&remaining[HEADER_SIZE..needed]);
        self.offset += needed;

        Some(Ok(RawEvent {
            watch_id: WatchId(wd),
            mask: EventMask::from_bits_retain(mask),
            cookie,
            name,
        }))
    }
}

/// Read the 4-byte field at `at`; caller guarantees the header is present
fn word(buf: &[u8], at: usize) -> [u8; 4] {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&buf[at..at + 4]);
    bytes
}

fn strip_padding(raw: &[u8]) -> OsString {
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    std::ffi::OsStr::from_bytes(&raw[..end]).to_os_string()
}

/// Stateful decoder that stitches records split across reads
#[derive(Debug, Default)]
pub struct EventDecoder {
    pending: BytesMut,
}

impl EventDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode one read's worth of bytes
    ///
    /// Returns records in arrival order. An `Err` entry means corrupt bytes
    /// were discarded; records decoded before it are still valid.
    pub fn decode(&mut self, chunk: &[u8]) -> Vec<Result<RawEvent>> {
        self.pending.extend_from_slice(chunk);

        let mut out = Vec::new();
        let mut corrupt = false;
        let mut records = records(&self.pending);

        for item in records.by_ref() {
            match item {
                Ok(event) => out.push(Ok(event)),
                // Tail of a record that continues in the next read
                Err(WatchError::TruncatedRecord { .. }) => {}
                Err(e) => {
                    corrupt = true;
                    out.push(Err(e));
                }
            }
        }

        let consumed = records.consumed();
        if corrupt {
            self.pending.clear();
        } else {
            self.pending.advance(consumed);
        }

        out
    }

    /// Bytes held back waiting for the rest of a record
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}
