//! Per-directory cache of "contents not in the index".
//!
//! The monitor core only touches two things here: directory invalidation
//! when the oracle reports a path, and the `use_monitor` toggle that says
//! whether the cache may trust the oracle instead of re-reading
//! directories.

use std::collections::BTreeSet;

use bstr::{BStr, BString};

#[derive(Debug, Default)]
pub struct UntrackedCache {
    /// Whether the cache may rely on the change oracle for directory
    /// freshness. Cleared whenever the oracle gave us nothing usable.
    pub use_monitor: bool,
    stale: BTreeSet<BString>,
}

impl UntrackedCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that the directory holding `path` must be re-read. A single
    /// trailing slash is stripped; empty paths are ignored.
    pub fn invalidate_path(&mut self, path: &[u8]) {
        if path.is_empty() {
            return;
        }
        let stripped = match path.last() {
            Some(b'/') => &path[..path.len() - 1],
            _ => path,
        };
        self.stale.insert(BString::from(stripped));
    }

    /// Drop all recorded invalidations (a full cache rebuild).
    pub fn reset(&mut self) {
        self.stale.clear();
    }

    pub fn is_stale(&self, path: &[u8]) -> bool {
        self.stale.contains(BStr::new(path))
    }

    pub fn stale_count(&self) -> usize {
        self.stale.len()
    }
}
