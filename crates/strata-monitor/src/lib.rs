//! # strata-monitor
//!
//! Filesystem-monitor integration for the Strata index: instead of
//! re-scanning the working tree, ask an external change oracle (a
//! long-lived daemon over a Unix socket, or a one-shot hook process)
//! what changed since an opaque token, and clear the per-entry CLEAN
//! bits for exactly those paths.
//!
//! ## Architecture
//!
//! - [`extension`] persists the token and a compressed bitmap of dirty
//!   entry positions inside the index file, so pending invalidations
//!   survive between invocations.
//! - [`oracle`] answers `query(token)` over either backend, with hook
//!   protocol negotiation and graceful V2 → V1 fallback.
//! - `invalidate` maps each reported path — possibly a directory,
//!   possibly with the wrong case — onto the entries it dirties.
//! - `refresh` drives one end-to-end cycle per process.
//! - `lifecycle` handles enable / disable / reconcile-after-load.
//!
//! All operations are synchronous and assume single-threaded ownership
//! of the index; callers serialize access.

pub mod extension;
pub(crate) mod invalidate;
pub mod oracle;
pub(crate) mod refresh;
pub mod settings;

mod lifecycle;

#[cfg(test)]
pub(crate) mod testutil;

pub use extension::ExtensionError;
pub use oracle::{HookOracle, IpcOracle, Oracle, QueryOutcome, FAKE_TOKEN};
pub use settings::{HookVersion, Incompatibility, MonitorMode, MonitorSettings};

use bstr::BString;
use roaring::RoaringBitmap;

use strata_index::Index;

/// Monitor state carried alongside an [`Index`].
///
/// `last_token` doubles as the enabled flag: the persisted extension is
/// written if and only if a token is present. `dirty_bitmap` only
/// exists between loading the extension and the first reconcile.
#[derive(Debug, Default)]
pub struct MonitorState {
    pub last_token: Option<BString>,
    pub dirty_bitmap: Option<RoaringBitmap>,
    /// One oracle consultation per process lifetime.
    pub has_run_once: bool,
    pub(crate) warned_incompatible: bool,
    pub(crate) warned_unavailable: bool,
}

/// The monitor subsystem for one index: settings, state, and the
/// configured oracle backend.
pub struct FileMonitor {
    settings: MonitorSettings,
    state: MonitorState,
    oracle: Box<dyn Oracle>,
}

impl FileMonitor {
    /// Build a monitor with the oracle backend the settings select.
    pub fn new(settings: MonitorSettings) -> Self {
        let oracle = oracle::from_settings(&settings);
        Self {
            settings,
            state: MonitorState::default(),
            oracle,
        }
    }

    /// Build a monitor around a caller-supplied oracle.
    pub fn with_oracle(settings: MonitorSettings, oracle: Box<dyn Oracle>) -> Self {
        Self {
            settings,
            state: MonitorState::default(),
            oracle,
        }
    }

    pub fn settings(&self) -> &MonitorSettings {
        &self.settings
    }

    pub fn state(&self) -> &MonitorState {
        &self.state
    }

    /// Decode a persisted extension blob, installing the token and the
    /// pending dirty bitmap.
    pub fn read_extension(&mut self, index: &Index, data: &[u8]) -> Result<(), ExtensionError> {
        extension::read_extension(&mut self.state, index, data)
    }

    /// Serialize the current token plus a dirty bitmap derived from the
    /// live entries; appends the blob to `out`.
    pub fn write_extension(&mut self, index: &Index, out: &mut Vec<u8>) {
        extension::write_extension(&mut self.state, index, out)
    }

    /// Recompute the dirty bitmap from the live entries.
    pub fn fill_dirty_bitmap(&mut self, index: &Index) {
        extension::fill_dirty_bitmap(&mut self.state, index)
    }

    /// Run one refresh cycle against the oracle (at most once per
    /// process; a no-op when disabled).
    pub fn refresh(&mut self, index: &mut Index) {
        refresh::run_refresh(&self.settings, &mut self.state, index, self.oracle.as_mut())
    }

    /// Turn the monitor on and prime it with a first refresh.
    pub fn enable(&mut self, index: &mut Index) {
        lifecycle::enable(&self.settings, &mut self.state, index, self.oracle.as_mut())
    }

    /// Turn the monitor off.
    pub fn disable(&mut self, index: &mut Index) {
        lifecycle::disable(&mut self.state, index)
    }

    /// Reconcile a freshly loaded index with the configured mode,
    /// applying any persisted dirty bitmap.
    pub fn reconcile(&mut self, index: &mut Index) {
        lifecycle::reconcile(&self.settings, &mut self.state, index, self.oracle.as_mut())
    }
}
