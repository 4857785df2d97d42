//! Monitor settings resolved from configuration.

use std::fmt;
use std::path::PathBuf;

use tracing::warn;

/// How the change oracle is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MonitorMode {
    #[default]
    Disabled,
    /// One-shot hook process queried per refresh
    Hook,
    /// Long-lived daemon over a Unix socket
    Ipc,
}

/// Hook wire-protocol versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookVersion {
    V1,
    V2,
}

impl HookVersion {
    pub(crate) fn as_arg(self) -> &'static str {
        match self {
            HookVersion::V1 => "1",
            HookVersion::V2 => "2",
        }
    }
}

/// Why the surrounding system considers the monitor unusable here.
/// Surfaced as a one-time warning per process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Incompatibility {
    /// No working tree to observe
    NoWorktree,
    /// Change events on network mounts are unreliable
    NetworkFilesystem,
    /// Virtualized working trees supply their own freshness source
    VirtualFilesystem,
}

impl fmt::Display for Incompatibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Incompatibility::NoWorktree => {
                write!(f, "repository has no working tree to monitor")
            }
            Incompatibility::NetworkFilesystem => {
                write!(f, "working tree is on a network filesystem; change events are unreliable")
            }
            Incompatibility::VirtualFilesystem => {
                write!(f, "working tree is virtualized and provides its own change tracking")
            }
        }
    }
}

/// Resolved monitor configuration, consumed by [`crate::FileMonitor`].
#[derive(Debug, Clone, Default)]
pub struct MonitorSettings {
    pub mode: MonitorMode,
    /// Hook executable; required when `mode` is [`MonitorMode::Hook`]
    pub hook_path: Option<PathBuf>,
    /// Validated protocol preference; `None` means negotiate
    pub hook_version: Option<HookVersion>,
    /// Daemon socket; used when `mode` is [`MonitorMode::Ipc`]
    pub socket_path: PathBuf,
    /// Working-tree root the oracle is queried from
    pub worktree: PathBuf,
    /// Whether observed paths may differ from index spellings by case
    pub case_insensitive: bool,
    /// Set by the surrounding system when the monitor cannot work here
    pub incompatible: Option<Incompatibility>,
}

impl MonitorSettings {
    /// Resolve settings from the loaded configuration. Unknown mode
    /// strings fall back to disabled; an out-of-range hook version
    /// preference warns and is treated as "no preference".
    pub fn from_config(config: &strata_config::Config) -> Self {
        let mode = match config.monitor.mode.as_str() {
            "hook" => MonitorMode::Hook,
            "ipc" => MonitorMode::Ipc,
            "disabled" => MonitorMode::Disabled,
            other => {
                warn!(mode = other, "unknown monitor mode, disabling");
                MonitorMode::Disabled
            }
        };

        Self {
            mode,
            hook_path: config.monitor.hook_path.clone(),
            hook_version: validate_hook_version(config.monitor.hook_version),
            socket_path: config.monitor.socket.clone(),
            worktree: config.core.worktree.clone(),
            case_insensitive: config.core.case_insensitive,
            incompatible: None,
        }
    }
}

fn validate_hook_version(raw: Option<i64>) -> Option<HookVersion> {
    match raw {
        None => None,
        Some(1) => Some(HookVersion::V1),
        Some(2) => Some(HookVersion::V2),
        Some(other) => {
            warn!(
                version = other,
                "invalid monitor hook version preference, must be 1 or 2; ignoring"
            );
            None
        }
    }
}
