//! Map one oracle-observed path onto the index entries it dirties.
//!
//! The observed path may name a file or, with a trailing slash, a whole
//! directory cone. It carries whatever case the filesystem reported, so
//! on case-folding filesystems a miss gets a second pass through the
//! case-insensitive lookup tables; the canonical spelling found there is
//! re-searched bytewise, bounding the recursion at one canonicalization.

use bstr::{BStr, BString, ByteSlice};
use tracing::trace;

use strata_index::Index;

/// Invalidate everything `name` may refer to: clear CLEAN bits on
/// matching entries and record the path with the untracked cache.
/// Returns the number of entries visited and cleared; zero means the
/// path matched nothing (untracked, ignored, or stale).
pub(crate) fn invalidate_path(index: &mut Index, case_insensitive: bool, name: &BStr) -> usize {
    if name.is_empty() {
        return 0;
    }
    trace!(path = %name, "refresh path");

    if name.last() == Some(&b'/') {
        let in_cone = invalidate_dir(index, name);
        if in_cone == 0 && case_insensitive {
            return invalidate_dir_icase(index, name);
        }
        in_cone
    } else {
        let in_cone = invalidate_file(index, name);
        if in_cone == 0 && case_insensitive {
            return invalidate_file_icase(index, name);
        }
        in_cone
    }
}

fn mark_entry(index: &mut Index, pos: usize) {
    let entry = index.entry_mut(pos);
    if entry.is_clean() {
        trace!(path = %entry.name, "invalidate entry");
    }
    entry.clear_clean();
}

fn invalidate_untracked(index: &mut Index, name: &[u8]) {
    if let Some(untracked) = index.untracked.as_mut() {
        untracked.invalidate_path(name);
    }
}

/// An explicit directory event (`name` keeps its trailing slash): clear
/// every entry in the cone. An exact match is a sparse directory entry;
/// it has no children in the index, so the walk past it terminates on
/// its own.
fn invalidate_dir(index: &mut Index, name: &BStr) -> usize {
    invalidate_untracked(index, name);

    let start = match index.position_of(name) {
        Ok(pos) => pos,
        Err(pos) => pos,
    };

    let mut in_cone = 0;
    for pos in start..index.len() {
        if !index.entry(pos).name.starts_with(name) {
            break;
        }
        mark_entry(index, pos);
        in_cone += 1;
    }
    in_cone
}

/// An unqualified event: a tracked file, an untracked file, or a
/// directory on platforms whose events do not say which.
fn invalidate_file(index: &mut Index, name: &BStr) -> usize {
    invalidate_untracked(index, name);

    match index.position_of(name) {
        Ok(pos) => {
            // An exact match on a tracked file. Assume no directory
            // shares the name, so no forward scan is needed.
            mark_entry(index, pos);
            1
        }
        Err(_) => {
            // Plenty of names sort between "foo" and "foo/" ("foo-",
            // "foo.c"), so re-search with the slash appended rather
            // than scanning from the insertion point.
            let mut dir = BString::from(&name[..]);
            dir.push(b'/');
            invalidate_dir(index, BStr::new(&dir))
        }
    }
}

/// Zero-hit fallback for an unqualified name on a case-folding
/// filesystem: try a file match first, then a directory spelling.
fn invalidate_file_icase(index: &mut Index, name: &BStr) -> usize {
    let in_cone = file_table_fallback(index, name);
    if in_cone > 0 {
        return in_cone;
    }
    dir_table_fallback(index, name)
}

/// Zero-hit fallback for a directory event on a case-folding
/// filesystem. The slashed spelling can match a sparse directory entry
/// directly; the directory table is keyed without the slash.
fn invalidate_dir_icase(index: &mut Index, name: &BStr) -> usize {
    let in_cone = file_table_fallback(index, name);
    if in_cone > 0 {
        return in_cone;
    }
    dir_table_fallback(index, name[..name.len() - 1].as_bstr())
}

/// Case-insensitive full-name match: a regular file or a sparse
/// directory entry. Neither has children in the index, so clearing the
/// one entry is the whole cone.
fn file_table_fallback(index: &mut Index, name: &BStr) -> usize {
    let Some(pos) = index.lookup_file_icase(name) else {
        return 0;
    };
    let canonical = index.entry(pos).name.clone();
    trace!(observed = %name, canonical = %canonical, "case-folded match");

    invalidate_untracked(index, &canonical);
    mark_entry(index, pos);
    1
}

/// Case-insensitive directory-prefix match. The table only corrects the
/// spelling; the canonical form is re-searched so the cone walk runs
/// with the spelling the index actually contains.
fn dir_table_fallback(index: &mut Index, name: &BStr) -> usize {
    let Some(canonical) = index.lookup_dir_icase(name) else {
        return 0; // untracked directory
    };
    if canonical.as_slice() == &name[..] {
        // No case correction happened; the bytewise pass already had
        // its chance with this spelling.
        return 0;
    }
    trace!(observed = %name, canonical = %canonical, "case-folded directory");

    let mut dir = canonical;
    dir.push(b'/');
    invalidate_dir(index, BStr::new(&dir))
}
