//! Index entries: a pathname plus mode and flag bits.

use bstr::BString;

/// Mode bits identifying a linked sub-repository rather than a blob.
pub const MODE_MODULE_LINK: u32 = 0o160000;

/// Default mode for a regular tracked file.
pub const MODE_FILE: u32 = 0o100644;

const FLAG_CLEAN: u16 = 1 << 0;
const FLAG_REMOVED: u16 = 1 << 1;

/// One record of the index, ordered bytewise by `name`.
///
/// The monitor core only manipulates the CLEAN bit ("the oracle last said
/// this path is unchanged") and reads the REMOVED bit (pending deletion,
/// skipped when the dirty bitmap is compacted).
#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub name: BString,
    pub mode: u32,
    flags: u16,
}

impl IndexEntry {
    pub fn new(name: impl Into<BString>, mode: u32) -> Self {
        Self {
            name: name.into(),
            mode,
            flags: 0,
        }
    }

    pub fn is_clean(&self) -> bool {
        self.flags & FLAG_CLEAN != 0
    }

    pub fn set_clean(&mut self) {
        self.flags |= FLAG_CLEAN;
    }

    pub fn clear_clean(&mut self) {
        self.flags &= !FLAG_CLEAN;
    }

    pub fn is_removed(&self) -> bool {
        self.flags & FLAG_REMOVED != 0
    }

    pub fn mark_removed(&mut self) {
        self.flags |= FLAG_REMOVED;
    }

    /// Entries for linked sub-repositories are never speculatively
    /// re-marked clean when a persisted dirty bitmap is applied.
    pub fn is_module_link(&self) -> bool {
        self.mode & 0o170000 == MODE_MODULE_LINK
    }
}
