//! Turning the monitor on and off, and reconciling persisted state.

use bstr::BString;
use tracing::debug;

use strata_index::{Index, CHANGE_MONITOR};

use crate::extension::bit_size;
use crate::oracle::{nanos_since_epoch, Oracle};
use crate::refresh::run_refresh;
use crate::settings::{MonitorMode, MonitorSettings};
use crate::MonitorState;

/// Turn the monitor on. The index must carry a token before it can be
/// written with a monitor extension, but no oracle has been consulted
/// yet, so the token is seeded from the clock the way a V1 hook would
/// produce it; V2 oracles replace it on the first real query.
pub(crate) fn enable(
    settings: &MonitorSettings,
    state: &mut MonitorState,
    index: &mut Index,
    oracle: &mut dyn Oracle,
) {
    if state.last_token.is_some() {
        return;
    }
    debug!("enable monitor");
    index.changed |= CHANGE_MONITOR;
    state.last_token = Some(BString::from(nanos_since_epoch().to_string()));

    // Nothing is known yet; every entry must be checked once.
    for entry in index.entries_mut() {
        entry.clear_clean();
    }

    if let Some(untracked) = index.untracked.as_mut() {
        untracked.reset();
        untracked.use_monitor = true;
    }

    run_refresh(settings, state, index, oracle);
}

/// Turn the monitor off: drop the token so no extension is written.
pub(crate) fn disable(state: &mut MonitorState, index: &mut Index) {
    if state.last_token.is_some() {
        debug!("disable monitor");
        index.changed |= CHANGE_MONITOR;
        state.last_token = None;
    }
}

/// Called after the index is loaded from disk. A persisted dirty bitmap
/// records which entries the previous process already knew were
/// modified: everything else is speculatively marked clean, the
/// recorded positions are re-dirtied, and a refresh picks up whatever
/// happened since the persisted token. The bitmap is consumed either
/// way. Finally the monitor is enabled or disabled per configuration.
pub(crate) fn reconcile(
    settings: &MonitorSettings,
    state: &mut MonitorState,
    index: &mut Index,
    oracle: &mut dyn Oracle,
) {
    if let Some(bitmap) = state.dirty_bitmap.take() {
        if settings.mode != MonitorMode::Disabled {
            for entry in index.entries_mut() {
                if !entry.is_module_link() {
                    entry.set_clean();
                }
            }

            let bits = bit_size(&bitmap);
            assert!(
                bits <= index.len() as u64,
                "dirty bitmap has more entries than the index ({} > {})",
                bits,
                index.len()
            );
            for pos in bitmap.iter() {
                index.entry_mut(pos as usize).clear_clean();
            }

            run_refresh(settings, state, index, oracle);
        }
    }

    if settings.mode != MonitorMode::Disabled {
        enable(settings, state, index, oracle);
    } else {
        disable(state, index);
    }
}
