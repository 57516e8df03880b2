//! Initial tree walk
//!
//! Registers every directory under a root before the read loop starts.
//! Files are never registered; their events arrive through the parent.

use crate::error::Result;
use crate::registry::WatchRegistry;
use std::path::Path;
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Outcome of one seeding walk
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SeedReport {
    /// Directories now watched
    pub registered: usize,
    /// Directories that could not be watched or read
    pub failed: usize,
}

/// Depth-first walker that registers directories with a registry
#[derive(Debug)]
pub struct TreeSeeder<'a> {
    registry: &'a WatchRegistry,
}

impl<'a> TreeSeeder<'a> {
    pub fn new(registry: &'a WatchRegistry) -> Self {
        Self { registry }
    }

    /// Register `root` and every directory below it
    ///
    /// Failing to watch `root` itself is an error. Failures below it are
    /// logged and counted.
    pub fn seed(&self, root: &Path) -> Result<SeedReport> {
        self.registry.register(root)?;

        let mut report = self.walk_below(root);
        report.registered += 1;
        Ok(report)
    }

    /// Register every directory below `dir`, but not `dir` itself
    ///
    /// Used after a new directory was registered on its own, to pick up
    /// children created before its watch existed.
    pub fn seed_children(&self, dir: &Path) -> SeedReport {
        self.walk_below(dir)
    }

    fn walk_below(&self, root: &Path) -> SeedReport {
        let mut report = SeedReport::default();

        for entry in WalkDir::new(root)
            .follow_links(false)
            .min_depth(1)
            .into_iter()
        {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    // Unreadable directories and entries that vanished mid-walk
                    warn!("Skipping {}: {}", e.path().unwrap_or(root).display(), e);
                    report.failed += 1;
                    continue;
                }
            };

            if !entry.file_type().is_dir() {
                continue;
            }

            match self.registry.register(entry.path()) {
                Ok(_) => report.registered += 1,
                Err(e) => {
                    warn!("{}", e);
                    report.failed += 1;
                }
            }
        }

        debug!(
            "Seeded {}: {} watched, {} failed",
            root.display(),
            report.registered,
            report.failed
        );
        report
    }
}
