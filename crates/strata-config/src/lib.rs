//! # strata-config
//!
//! Configuration management for Strata.
//!
//! Loads configuration from:
//! 1. `~/.strata/config.toml` (global)
//! 2. `.strata/config.toml` (project-local, overrides global)
//! 3. Environment variables (highest priority)

pub mod logging;
pub mod testing;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::debug;

/// Global config instance
static CONFIG: Lazy<RwLock<Config>> = Lazy::new(|| {
    RwLock::new(Config::load().unwrap_or_else(|e| {
        eprintln!(
            "[strata-config] WARNING: Failed to load config: {}. Using defaults.",
            e
        );
        Config::default()
    }))
});

/// Default Unix socket path for the change-notification daemon
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/strata-monitor.sock";

/// Get global config (read-only)
pub fn config() -> std::sync::RwLockReadGuard<'static, Config> {
    CONFIG.read().unwrap()
}

/// Reload config from disk
pub fn reload() -> Result<(), ConfigError> {
    let new_config = Config::load()?;
    *CONFIG.write().unwrap() = new_config;
    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Current config schema version
pub const CONFIG_VERSION: u32 = 1;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Config schema version (for forward compatibility)
    pub config_version: u32,
    pub core: CoreConfig,
    pub monitor: MonitorConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            config_version: CONFIG_VERSION,
            core: CoreConfig::default(),
            monitor: MonitorConfig::default(),
        }
    }
}

impl Config {
    /// Load config from standard locations (CWD-relative project config)
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_for_project(Path::new("."))
    }

    /// Load config for a specific project root directory.
    /// Resolution order: global → project → env vars.
    pub fn load_for_project(project_root: &Path) -> Result<Self, ConfigError> {
        let mut config = Config::default();

        // 1. Load global config (~/.strata/config.toml)
        if let Some(global_path) = Self::global_config_path() {
            if global_path.exists() {
                debug!("Loading global config from {:?}", global_path);
                let contents = std::fs::read_to_string(&global_path)?;
                config = toml::from_str(&contents)?;
            }
        }

        // 2. Load project config (<project_root>/.strata/config.toml)
        let project_config_path = project_root.join(".strata/config.toml");
        if project_config_path.exists() {
            debug!("Loading project config from {:?}", project_config_path);
            let contents = std::fs::read_to_string(&project_config_path)?;
            let project_config: Config = toml::from_str(&contents)?;
            config.merge(project_config);
        }

        // 3. Apply environment variable overrides
        config.apply_env_overrides();

        // 4. Resolve worktree to an absolute path if still relative
        if config.core.worktree.as_os_str() == "." {
            if let Ok(abs) = std::fs::canonicalize(project_root) {
                config.core.worktree = abs;
            } else {
                config.core.worktree = project_root.to_path_buf();
            }
        }

        Ok(config)
    }

    /// Global config path: ~/.strata/config.toml
    pub fn global_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".strata/config.toml"))
    }

    /// Merge another config (project overrides global).
    /// Non-default values from `other` replace values in `self`.
    fn merge(&mut self, other: Config) {
        let default_core = CoreConfig::default();
        if other.core.worktree != default_core.worktree {
            self.core.worktree = other.core.worktree;
        }
        if other.core.case_insensitive != default_core.case_insensitive {
            self.core.case_insensitive = other.core.case_insensitive;
        }

        let default_monitor = MonitorConfig::default();
        if other.monitor.mode != default_monitor.mode {
            self.monitor.mode = other.monitor.mode;
        }
        if other.monitor.hook_path.is_some() {
            self.monitor.hook_path = other.monitor.hook_path;
        }
        if other.monitor.hook_version.is_some() {
            self.monitor.hook_version = other.monitor.hook_version;
        }
        if other.monitor.socket != default_monitor.socket {
            self.monitor.socket = other.monitor.socket;
        }
    }

    /// Apply environment variable overrides (highest priority)
    fn apply_env_overrides(&mut self) {
        if let Ok(worktree) = std::env::var("STRATA_WORKTREE") {
            self.core.worktree = PathBuf::from(worktree);
        }
        if std::env::var("STRATA_CASE_INSENSITIVE").is_ok() {
            self.core.case_insensitive = true;
        }
        if let Ok(mode) = std::env::var("STRATA_MONITOR_MODE") {
            self.monitor.mode = mode;
        }
        if let Ok(hook) = std::env::var("STRATA_MONITOR_HOOK") {
            self.monitor.hook_path = Some(PathBuf::from(hook));
        }
        if let Ok(version) = std::env::var("STRATA_MONITOR_HOOK_VERSION") {
            if let Ok(n) = version.parse() {
                self.monitor.hook_version = Some(n);
            }
        }
        if let Ok(socket) = std::env::var("STRATA_MONITOR_SOCKET") {
            self.monitor.socket = PathBuf::from(socket);
        }
    }

    // ========== Convenience Accessors ==========

    /// Get the working-tree root
    pub fn worktree(&self) -> &Path {
        &self.core.worktree
    }

    /// Get the daemon socket path
    pub fn socket_path(&self) -> &Path {
        &self.monitor.socket
    }
}

/// Core working-tree configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CoreConfig {
    /// Working-tree root directory (auto-resolved to absolute path)
    pub worktree: PathBuf,
    /// Whether the filesystem folds case; consulted when mapping observed
    /// paths back onto index entries
    pub case_insensitive: bool,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            worktree: PathBuf::from("."),
            case_insensitive: cfg!(target_os = "macos"),
        }
    }
}

/// Change-monitor configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MonitorConfig {
    /// Monitor mode: "disabled", "hook", or "ipc"
    pub mode: String,
    /// Hook executable (required when mode = "hook")
    pub hook_path: Option<PathBuf>,
    /// Hook protocol preference; recognized values are 1 and 2, anything
    /// else warns and is ignored
    pub hook_version: Option<i64>,
    /// Unix socket of the change-notification daemon (mode = "ipc")
    pub socket: PathBuf,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            mode: "disabled".to_string(),
            hook_path: None,
            hook_version: None,
            socket: PathBuf::from(DEFAULT_SOCKET_PATH),
        }
    }
}
