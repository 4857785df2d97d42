//! Case-insensitive name lookup tables.
//!
//! Built lazily from the entry list: one table keyed by the case-folded
//! full pathname (including sparse directory entries, which keep their
//! trailing slash), one keyed by every case-folded directory prefix with
//! the canonical spelling as the value. Lookups fold the probe the same
//! way, so all comparisons stay bytewise.

use std::collections::HashMap;

use bstr::BString;

use crate::entry::IndexEntry;

fn fold(name: &[u8]) -> Vec<u8> {
    name.to_ascii_lowercase()
}

#[derive(Debug, Default)]
pub(crate) struct NameLookup {
    /// Folded full pathname -> entry position. First entry wins on
    /// fold collisions, matching insertion order of the sorted list.
    files: HashMap<Vec<u8>, usize>,
    /// Folded directory prefix (no trailing slash) -> canonical spelling.
    dirs: HashMap<Vec<u8>, BString>,
}

impl NameLookup {
    pub(crate) fn build(entries: &[IndexEntry]) -> Self {
        let mut lookup = Self::default();
        for (pos, entry) in entries.iter().enumerate() {
            let name = entry.name.as_slice();
            lookup.files.entry(fold(name)).or_insert(pos);
            for (i, &b) in name.iter().enumerate() {
                if b == b'/' && i > 0 {
                    lookup
                        .dirs
                        .entry(fold(&name[..i]))
                        .or_insert_with(|| BString::from(&name[..i]));
                }
            }
        }
        lookup
    }

    pub(crate) fn file(&self, name: &[u8]) -> Option<usize> {
        self.files.get(&fold(name)).copied()
    }

    pub(crate) fn dir(&self, name: &[u8]) -> Option<&BString> {
        self.dirs.get(&fold(name))
    }
}
