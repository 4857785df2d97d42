//! Test environment abstraction for isolated testing.
//!
//! Provides `TestEnvironment` to manage:
//! - An isolated working tree
//! - Unique daemon socket paths
//! - Executable hook scripts
//!
//! # Usage
//!
//! ```ignore
//! use strata_config::testing::TestEnvironment;
//!
//! #[test]
//! fn test_something() {
//!     let env = TestEnvironment::new().unwrap();
//!     let hook = env.write_hook("report-nothing", "#!/bin/sh\nprintf 'tok2\\0'\n").unwrap();
//!     // env.worktree and env.socket_path are isolated per test
//! }
//! ```

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use tempfile::TempDir;

/// Atomic counter for unique test IDs
static TEST_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Isolated test environment with unique paths
pub struct TestEnvironment {
    /// Temporary directory (dropped on cleanup)
    _temp_dir: TempDir,
    /// Working-tree root for the test
    pub worktree: PathBuf,
    /// Unique socket path for this test
    pub socket_path: PathBuf,
    /// Directory holding generated hook scripts
    pub hook_dir: PathBuf,
    /// Unique test ID
    pub test_id: u32,
}

impl TestEnvironment {
    /// Create a new isolated test environment
    pub fn new() -> anyhow::Result<Self> {
        let test_id = TEST_COUNTER.fetch_add(1, Ordering::Relaxed);
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();

        let worktree = root.join("worktree");
        let hook_dir = root.join("hooks");
        std::fs::create_dir_all(&worktree)?;
        std::fs::create_dir_all(&hook_dir)?;

        let socket_path = root.join(format!("strata-test-{}.sock", test_id));

        Ok(Self {
            _temp_dir: temp_dir,
            worktree,
            socket_path,
            hook_dir,
            test_id,
        })
    }

    /// Create a file in the working tree with the given content
    pub fn create_file(&self, relative_path: &str, content: &[u8]) -> anyhow::Result<PathBuf> {
        let path = self.worktree.join(relative_path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, content)?;
        Ok(path)
    }

    /// Write an executable hook script and return its path
    #[cfg(unix)]
    pub fn write_hook(&self, name: &str, script: &str) -> anyhow::Result<PathBuf> {
        use std::os::unix::fs::PermissionsExt;

        let path = self.hook_dir.join(name);
        std::fs::write(&path, script)?;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))?;
        Ok(path)
    }

    /// Check if socket exists (daemon may be running)
    pub fn is_socket_present(&self) -> bool {
        self.socket_path.exists()
    }
}

impl Default for TestEnvironment {
    fn default() -> Self {
        Self::new().expect("Failed to create test environment")
    }
}
