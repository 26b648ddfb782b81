//! Test environment abstraction for isolated testing.
//!
//! Provides `TestEnvironment` to manage:
//! - Temporary object store roots
//! - Temporary log directories
//! - A config wired to those paths with an in-process cache
//!
//! # Usage
//!
//! ```ignore
//! use vstash_config::testing::TestEnvironment;
//!
//! #[tokio::test]
//! async fn test_something() {
//!     let env = TestEnvironment::new().unwrap();
//!     let config = env.config();
//!     // config.storage.root points at env.store_root
//! }
//! ```

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use tempfile::TempDir;

use crate::{CacheBackend, Config};

/// Atomic counter for unique test IDs
static TEST_COUNTER: AtomicU32 = AtomicU32::new(0);

/// API key configured by [`TestEnvironment::config`].
pub const TEST_API_KEY: &str = "test-api-key";

/// Base URL configured by [`TestEnvironment::config`].
pub const TEST_BASE_URL: &str = "http://stash.test";

/// Isolated test environment with unique paths
pub struct TestEnvironment {
    /// Temporary directory (dropped on cleanup)
    _temp_dir: TempDir,
    /// Isolated object store root
    pub store_root: PathBuf,
    /// Isolated log directory
    pub log_dir: PathBuf,
    /// Unique test ID
    pub test_id: u32,
}

impl TestEnvironment {
    /// Create a new isolated test environment
    pub fn new() -> anyhow::Result<Self> {
        let test_id = TEST_COUNTER.fetch_add(1, Ordering::Relaxed);
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();

        let store_root = root.join("objects");
        let log_dir = root.join("logs");
        std::fs::create_dir_all(&store_root)?;

        Ok(Self {
            _temp_dir: temp_dir,
            store_root,
            log_dir,
            test_id,
        })
    }

    /// Config pointing at this environment, using the memory cache backend.
    pub fn config(&self) -> Config {
        let mut cfg = Config::default();
        cfg.storage.root = self.store_root.clone();
        cfg.server.bind = "127.0.0.1:0".to_string();
        cfg.server.base_url = TEST_BASE_URL.to_string();
        cfg.auth.api_key = Some(TEST_API_KEY.to_string());
        cfg.cache.backend = CacheBackend::Memory;
        cfg.cache.key_prefix = format!("test{}", self.test_id);
        cfg.cache.health_interval_secs = 0;
        cfg.logging.dir = Some(self.log_dir.clone());
        cfg
    }

    /// Names of all entries currently in the store root, sorted.
    pub fn stored_names(&self) -> anyhow::Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.store_root)? {
            names.push(entry?.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(names)
    }

    /// Place a file directly in the store, bypassing the upload path.
    pub fn create_object(&self, name: &str, content: &[u8]) -> anyhow::Result<PathBuf> {
        let path = self.store_root.join(name);
        std::fs::write(&path, content)?;
        Ok(path)
    }
}
