//! Persistent monitor extension: token plus compressed dirty bitmap.
//!
//! Layout (big-endian, offsets relative to the extension start):
//!
//! ```text
//! u32  version            (1 or 2)
//! v1:  u64 token_nanos    (kept in memory as its decimal rendering)
//! v2:  token bytes, NUL-terminated
//! u32  bitmap_bytes
//! bitmap_bytes of compressed bitmap payload
//! ```
//!
//! Version 1 is accepted on read so older indexes upgrade in place; writes
//! always emit version 2. Bitmap positions are compacted: entries flagged
//! for removal are skipped, so bit `i` names the i-th surviving entry at
//! write time.

use std::io::Cursor;

use bstr::{BString, ByteSlice};
use roaring::RoaringBitmap;
use tracing::debug;

use strata_index::Index;

use crate::MonitorState;

const EXTENSION_VERSION1: u32 = 1;
const EXTENSION_VERSION2: u32 = 2;

/// Smallest well-formed extension: version, one token byte, bitmap size.
const MIN_SIZE: usize = 4 + 1 + 4;

#[derive(Debug, thiserror::Error)]
pub enum ExtensionError {
    #[error("corrupt monitor extension (too short)")]
    TooShort,
    #[error("bad monitor extension version {0}")]
    BadVersion(u32),
    #[error("corrupt monitor extension (unterminated token)")]
    UnterminatedToken,
    #[error("failed to parse dirty bitmap in monitor extension")]
    Bitmap,
    #[error("dirty bitmap covers {bits} entries but the index has {entries}")]
    BitmapRange { bits: u64, entries: usize },
}

/// Logical size of a bitmap: one past the highest set position.
pub(crate) fn bit_size(bitmap: &RoaringBitmap) -> u64 {
    bitmap.max().map_or(0, |m| m as u64 + 1)
}

/// Decode an extension blob and install the token and pending dirty
/// bitmap on `state`. A bitmap naming positions beyond the live entry
/// count is refused as corrupt.
pub fn read_extension(
    state: &mut MonitorState,
    index: &Index,
    data: &[u8],
) -> Result<(), ExtensionError> {
    if data.len() < MIN_SIZE {
        return Err(ExtensionError::TooShort);
    }

    let version = u32::from_be_bytes(data[..4].try_into().unwrap());
    let (token, mut offset) = match version {
        EXTENSION_VERSION1 => {
            if data.len() < 4 + 8 + 4 {
                return Err(ExtensionError::TooShort);
            }
            let nanos = u64::from_be_bytes(data[4..12].try_into().unwrap());
            (BString::from(nanos.to_string()), 12)
        }
        EXTENSION_VERSION2 => {
            let nul = data[4..]
                .find_byte(0)
                .ok_or(ExtensionError::UnterminatedToken)?;
            (BString::from(&data[4..4 + nul]), 4 + nul + 1)
        }
        other => return Err(ExtensionError::BadVersion(other)),
    };

    if data.len() < offset + 4 {
        return Err(ExtensionError::TooShort);
    }
    let bitmap_bytes = u32::from_be_bytes(data[offset..offset + 4].try_into().unwrap()) as usize;
    offset += 4;
    if data.len() - offset < bitmap_bytes {
        return Err(ExtensionError::TooShort);
    }

    // The decoder gets exactly the declared byte budget and must use all
    // of it; anything else means the blob and its length disagree.
    let mut cursor = Cursor::new(&data[offset..offset + bitmap_bytes]);
    let bitmap =
        RoaringBitmap::deserialize_from(&mut cursor).map_err(|_| ExtensionError::Bitmap)?;
    if cursor.position() != bitmap_bytes as u64 {
        return Err(ExtensionError::Bitmap);
    }

    let bits = bit_size(&bitmap);
    if bits > index.len() as u64 {
        return Err(ExtensionError::BitmapRange {
            bits,
            entries: index.len(),
        });
    }

    debug!(token = %token, dirty = bitmap.len(), "read monitor extension");
    state.last_token = Some(token);
    state.dirty_bitmap = Some(bitmap);
    Ok(())
}

/// Recompute the dirty bitmap from the live entries: skip entries flagged
/// for removal, set a bit for every surviving entry whose CLEAN bit is
/// not set.
pub fn fill_dirty_bitmap(state: &mut MonitorState, index: &Index) {
    let mut bitmap = RoaringBitmap::new();
    let mut skipped = 0u32;
    for (i, entry) in index.entries().iter().enumerate() {
        if entry.is_removed() {
            skipped += 1;
        } else if !entry.is_clean() {
            bitmap.insert(i as u32 - skipped);
        }
    }
    state.dirty_bitmap = Some(bitmap);
}

/// Append a version-2 extension blob to `out`. Fills the dirty bitmap
/// from the live entries if it has not been filled already; the bitmap is
/// consumed by the write.
pub fn write_extension(state: &mut MonitorState, index: &Index, out: &mut Vec<u8>) {
    if state.dirty_bitmap.is_none() {
        fill_dirty_bitmap(state, index);
    }
    let bitmap = state.dirty_bitmap.take().unwrap();
    let bits = bit_size(&bitmap);
    assert!(
        bits <= index.len() as u64,
        "dirty bitmap has more entries than the index ({} > {})",
        bits,
        index.len()
    );

    let token = state
        .last_token
        .as_ref()
        .expect("monitor token is set whenever the extension is written");

    out.extend_from_slice(&EXTENSION_VERSION2.to_be_bytes());
    out.extend_from_slice(token.as_slice());
    out.push(0);

    // Reserve the size slot, serialize, then back-patch the byte count.
    let fixup = out.len();
    out.extend_from_slice(&0u32.to_be_bytes());
    let start = out.len();
    bitmap
        .serialize_into(&mut *out)
        .expect("serializing a bitmap to memory cannot fail");
    let bitmap_bytes = (out.len() - start) as u32;
    out[fixup..fixup + 4].copy_from_slice(&bitmap_bytes.to_be_bytes());

    debug!(token = %token, "wrote monitor extension");
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_index::MODE_FILE;

    fn index_of(names: &[&str]) -> Index {
        let mut index = Index::new();
        for name in names {
            index.add(*name, MODE_FILE);
        }
        index
    }

    fn serialized(bits: &[u32]) -> Vec<u8> {
        let mut bitmap = RoaringBitmap::new();
        for &b in bits {
            bitmap.insert(b);
        }
        let mut out = Vec::new();
        bitmap.serialize_into(&mut out).unwrap();
        out
    }

    fn v1_blob(nanos: u64, bits: &[u32]) -> Vec<u8> {
        let payload = serialized(bits);
        let mut blob = Vec::new();
        blob.extend_from_slice(&1u32.to_be_bytes());
        blob.extend_from_slice(&nanos.to_be_bytes());
        blob.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        blob.extend_from_slice(&payload);
        blob
    }

    #[test]
    fn test_roundtrip_token_and_dirty_set() {
        let mut index = index_of(&["a", "b/c", "b/d", "e"]);
        for entry in index.entries_mut() {
            entry.set_clean();
        }
        index.entry_mut(1).clear_clean();
        index.entry_mut(3).clear_clean();

        let mut state = MonitorState::default();
        state.last_token = Some(BString::from("tok:abc"));

        let mut blob = Vec::new();
        write_extension(&mut state, &index, &mut blob);
        assert!(state.dirty_bitmap.is_none());

        let mut loaded = MonitorState::default();
        read_extension(&mut loaded, &index, &blob).unwrap();
        assert_eq!(loaded.last_token.as_ref().map(|t| t.as_slice()), Some(&b"tok:abc"[..]));
        let bitmap = loaded.dirty_bitmap.unwrap();
        assert_eq!(bitmap.iter().collect::<Vec<_>>(), vec![1, 3]);
    }

    #[test]
    fn test_v1_token_upgrades_to_decimal_rendering() {
        let index = index_of(&["a", "b", "c"]);
        let mut state = MonitorState::default();
        read_extension(&mut state, &index, &v1_blob(1_000_000_000, &[0, 2])).unwrap();

        assert_eq!(state.last_token.as_ref().map(|t| t.as_slice()), Some(&b"1000000000"[..]));
        let bitmap = state.dirty_bitmap.take().unwrap();
        assert_eq!(bitmap.iter().collect::<Vec<_>>(), vec![0, 2]);

        // A rewrite emits v2 and decodes to the same token and dirty set.
        state.dirty_bitmap = Some(bitmap);
        let mut blob = Vec::new();
        write_extension(&mut state, &index, &mut blob);
        assert_eq!(u32::from_be_bytes(blob[..4].try_into().unwrap()), 2);

        let mut reloaded = MonitorState::default();
        read_extension(&mut reloaded, &index, &blob).unwrap();
        assert_eq!(reloaded.last_token.as_ref().map(|t| t.as_slice()), Some(&b"1000000000"[..]));
        assert_eq!(
            reloaded.dirty_bitmap.unwrap().iter().collect::<Vec<_>>(),
            vec![0, 2]
        );
    }

    #[test]
    fn test_too_short_rejected() {
        let index = index_of(&["a"]);
        let mut state = MonitorState::default();
        for len in 0..MIN_SIZE {
            let blob = vec![0u8; len];
            assert!(matches!(
                read_extension(&mut state, &index, &blob),
                Err(ExtensionError::TooShort)
            ));
        }
    }

    #[test]
    fn test_bad_version_rejected() {
        let index = index_of(&["a"]);
        let mut state = MonitorState::default();
        let mut blob = vec![0u8; 16];
        blob[..4].copy_from_slice(&3u32.to_be_bytes());
        assert!(matches!(
            read_extension(&mut state, &index, &blob),
            Err(ExtensionError::BadVersion(3))
        ));
    }

    #[test]
    fn test_unterminated_token_rejected() {
        let index = index_of(&["a"]);
        let mut state = MonitorState::default();
        let mut blob = Vec::new();
        blob.extend_from_slice(&2u32.to_be_bytes());
        blob.extend_from_slice(b"token-with-no-nul");
        assert!(matches!(
            read_extension(&mut state, &index, &blob),
            Err(ExtensionError::UnterminatedToken)
        ));
    }

    #[test]
    fn test_bitmap_size_disagreement_rejected() {
        let index = index_of(&["a", "b"]);
        let payload = serialized(&[0]);

        let mut blob = Vec::new();
        blob.extend_from_slice(&2u32.to_be_bytes());
        blob.extend_from_slice(b"tok\0");
        // Declare one byte more than the codec will consume.
        blob.extend_from_slice(&((payload.len() + 1) as u32).to_be_bytes());
        blob.extend_from_slice(&payload);
        blob.push(0);

        let mut state = MonitorState::default();
        assert!(matches!(
            read_extension(&mut state, &index, &blob),
            Err(ExtensionError::Bitmap)
        ));
    }

    #[test]
    fn test_oversized_bitmap_refused() {
        let index = index_of(&["a", "b"]);
        let mut state = MonitorState::default();
        let result = read_extension(&mut state, &index, &v1_blob(1, &[5]));
        assert!(matches!(
            result,
            Err(ExtensionError::BitmapRange { bits: 6, entries: 2 })
        ));
        assert!(state.last_token.is_none());
    }

    #[test]
    fn test_fill_compacts_past_removed_entries() {
        let mut index = index_of(&["a", "b", "c"]);
        for entry in index.entries_mut() {
            entry.set_clean();
        }
        // "a" is pending removal and also dirty; it must not occupy a bit.
        index.entry_mut(0).clear_clean();
        index.entry_mut(0).mark_removed();
        index.entry_mut(2).clear_clean();

        let mut state = MonitorState::default();
        fill_dirty_bitmap(&mut state, &index);
        let bitmap = state.dirty_bitmap.unwrap();
        assert_eq!(bitmap.iter().collect::<Vec<_>>(), vec![1]);
    }

    #[test]
    fn test_trailing_bytes_after_bitmap_ignored() {
        let index = index_of(&["a", "b"]);
        let mut state = MonitorState::default();
        let mut blob = v1_blob(7, &[0]);
        blob.extend_from_slice(b"future extension data");
        read_extension(&mut state, &index, &blob).unwrap();
        assert_eq!(state.last_token.as_ref().map(|t| t.as_slice()), Some(&b"7"[..]));
    }
}
