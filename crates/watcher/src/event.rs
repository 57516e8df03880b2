//! Event types and flag classification
//!
//! `EventMask` mirrors the kernel's bit layout. `classify` is the only place
//! that turns mask bits into semantic actions.

use bitflags::bitflags;
use smallvec::SmallVec;
use std::ffi::OsString;
use std::fmt;
use std::path::PathBuf;

/// Opaque watch identifier issued by the kernel event source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WatchId(pub i32);

impl WatchId {
    /// Raw descriptor value as used on the wire
    pub const fn raw(self) -> i32 {
        self.0
    }
}

impl fmt::Display for WatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "wd:{}", self.0)
    }
}

bitflags! {
    /// Event mask bits as laid out by inotify
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct EventMask: u32 {
        const MODIFY = libc::IN_MODIFY;
        const MOVED_FROM = libc::IN_MOVED_FROM;
        const MOVED_TO = libc::IN_MOVED_TO;
        const CREATE = libc::IN_CREATE;
        const DELETE = libc::IN_DELETE;
        const DELETE_SELF = libc::IN_DELETE_SELF;
        const MOVE_SELF = libc::IN_MOVE_SELF;

        const UNMOUNT = libc::IN_UNMOUNT;
        const Q_OVERFLOW = libc::IN_Q_OVERFLOW;
        const IGNORED = libc::IN_IGNORED;
        const ISDIR = libc::IN_ISDIR;

        // Keep unknown bits instead of truncating them
        const _ = !0;
    }
}

impl EventMask {
    /// Events requested for every watched directory
    pub const WATCHED: Self = Self::CREATE
        .union(Self::DELETE)
        .union(Self::MODIFY)
        .union(Self::MOVED_FROM)
        .union(Self::MOVED_TO)
        .union(Self::MOVE_SELF)
        .union(Self::DELETE_SELF);
}

/// One decoded wire-level record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    pub watch_id: WatchId,
    pub mask: EventMask,
    /// Pairs `MOVED_FROM` with `MOVED_TO` of the same rename, zero otherwise
    pub cookie: u32,
    /// Child name with NUL padding stripped, empty for the watched path itself
    pub name: OsString,
}

/// Semantic action derived from the mask
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Created,
    Deleted,
    Modified,
    MovedFrom,
    MovedTo,
    /// The watched directory itself was deleted or moved away
    SelfDeleted,
}

impl Action {
    /// Past-tense verb used in human-readable messages
    pub fn verb(self) -> &'static str {
        match self {
            Action::Created => "created",
            Action::Deleted | Action::SelfDeleted => "deleted",
            Action::Modified => "modified",
            Action::MovedFrom | Action::MovedTo => "moved",
        }
    }

    /// Word linking the verb to the containing directory
    pub fn preposition(self) -> &'static str {
        match self {
            Action::MovedFrom => "out of",
            Action::MovedTo => "into",
            _ => "in",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.verb())
    }
}

/// Whether the entry an event refers to is a file or a directory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    File,
    Directory,
}

impl EntryKind {
    fn from_mask(mask: EventMask) -> Self {
        if mask.contains(EventMask::ISDIR) {
            EntryKind::Directory
        } else {
            EntryKind::File
        }
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryKind::File => f.write_str("File"),
            EntryKind::Directory => f.write_str("Directory"),
        }
    }
}

/// A classified event, ready for a sink
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SemanticEvent {
    pub action: Action,
    pub entry_kind: EntryKind,
    /// Child name, empty when the event concerns `containing_path` itself
    pub name: OsString,
    pub containing_path: PathBuf,
    /// Rename cookie, set for `MovedFrom` and `MovedTo`
    pub cookie: Option<u32>,
}

impl SemanticEvent {
    /// Full path of the entry the event refers to
    pub fn path(&self) -> PathBuf {
        if self.name.is_empty() {
            self.containing_path.clone()
        } else {
            self.containing_path.join(&self.name)
        }
    }

    /// True when the event concerns the watched directory rather than a child
    pub fn is_self(&self) -> bool {
        self.name.is_empty()
    }
}

impl fmt::Display for SemanticEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_self() {
            write!(
                f,
                "{} {} has been {}",
                self.entry_kind,
                self.containing_path.display(),
                self.action
            )
        } else {
            write!(
                f,
                "{} {} has been {} {} {}",
                self.entry_kind,
                self.name.to_string_lossy(),
                self.action,
                self.action.preposition(),
                self.containing_path.display()
            )
        }
    }
}

/// Map a mask to every action it carries
///
/// Bits are checked independently: one record may yield several actions.
/// `DELETE_SELF` and `MOVE_SELF` both collapse into a single `SelfDeleted`.
pub fn classify(mask: EventMask) -> SmallVec<[(Action, EntryKind); 2]> {
    let kind = EntryKind::from_mask(mask);
    let mut actions = SmallVec::new();

    if mask.contains(EventMask::CREATE) {
        actions.push((Action::Created, kind));
    }
    if mask.contains(EventMask::DELETE) {
        actions.push((Action::Deleted, kind));
    }
    if mask.contains(EventMask::MODIFY) {
        actions.push((Action::Modified, kind));
    }
    if mask.contains(EventMask::MOVED_FROM) {
        actions.push((Action::MovedFrom, kind));
    }
    if mask.contains(EventMask::MOVED_TO) {
        actions.push((Action::MovedTo, kind));
    }
    if mask.intersects(EventMask::DELETE_SELF | EventMask::MOVE_SELF) {
        // Only directories are watched
        actions.push((Action::SelfDeleted, EntryKind::Directory));
    }

    actions
}
