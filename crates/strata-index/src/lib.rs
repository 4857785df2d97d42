//! # strata-index
//!
//! The cached working-tree index consumed by the Strata monitor core: an
//! ordered list of entries (sorted bytewise by pathname) with per-entry
//! flag bits, case-insensitive name lookup tables, and an optional
//! untracked-directory cache.
//!
//! The outer binary codec for the index file lives elsewhere; this crate
//! models exactly the surface the monitor integration needs.

pub mod entry;
pub mod name_hash;
pub mod untracked;

pub use entry::{IndexEntry, MODE_FILE, MODE_MODULE_LINK};
pub use untracked::UntrackedCache;

use bstr::BString;

use name_hash::NameLookup;

/// Bit in [`Index::changed`] requesting that the persisted monitor
/// extension be rewritten on the next index write.
pub const CHANGE_MONITOR: u32 = 1 << 0;

/// An ordered sequence of [`IndexEntry`] records, sorted bytewise by name.
#[derive(Debug, Default)]
pub struct Index {
    entries: Vec<IndexEntry>,
    /// Dirty-reason bits; writers persist when any bit is set.
    pub changed: u32,
    pub untracked: Option<UntrackedCache>,
    lookup: Option<NameLookup>,
}

impl Index {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    pub fn entries_mut(&mut self) -> &mut [IndexEntry] {
        &mut self.entries
    }

    pub fn entry(&self, pos: usize) -> &IndexEntry {
        &self.entries[pos]
    }

    pub fn entry_mut(&mut self, pos: usize) -> &mut IndexEntry {
        &mut self.entries[pos]
    }

    /// Insert an entry at its sorted position. Replaces an existing entry
    /// with the same name.
    pub fn add(&mut self, name: impl Into<BString>, mode: u32) -> usize {
        let entry = IndexEntry::new(name, mode);
        self.lookup = None;
        match self.position_of(&entry.name) {
            Ok(pos) => {
                self.entries[pos] = entry;
                pos
            }
            Err(pos) => {
                self.entries.insert(pos, entry);
                pos
            }
        }
    }

    /// Bytewise binary search for `name`: `Ok(pos)` on an exact match,
    /// `Err(pos)` with the sorted insertion point otherwise.
    pub fn position_of(&self, name: &[u8]) -> Result<usize, usize> {
        self.entries
            .binary_search_by(|e| e.name.as_slice().cmp(name))
    }

    /// Case-insensitive lookup of a full pathname (sparse directory
    /// entries keep their trailing slash). Returns the entry position.
    pub fn lookup_file_icase(&mut self, name: &[u8]) -> Option<usize> {
        self.ensure_lookup().file(name)
    }

    /// Case-insensitive lookup of a directory prefix (no trailing slash).
    /// Returns the canonical spelling recorded in the index.
    pub fn lookup_dir_icase(&mut self, name: &[u8]) -> Option<BString> {
        self.ensure_lookup().dir(name).cloned()
    }

    fn ensure_lookup(&mut self) -> &NameLookup {
        if self.lookup.is_none() {
            self.lookup = Some(NameLookup::build(&self.entries));
        }
        self.lookup.as_ref().unwrap()
    }
}
