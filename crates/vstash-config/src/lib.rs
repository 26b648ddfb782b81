//! # vstash-config
//!
//! Configuration management for vstash.
//!
//! Loads configuration from:
//! 1. `~/.vstash/config.toml` (global)
//! 2. `.vstash/config.toml` (project-local, overrides global)
//! 3. Environment variables (highest priority)

pub mod logging;
pub mod path;
pub mod testing;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Project-local config file, relative to the working directory.
pub const PROJECT_CONFIG_PATH: &str = ".vstash/config.toml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("TOML render error: {0}")]
    Render(#[from] toml::ser::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
    #[error("Logging setup failed: {0}")]
    Logging(String),
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub cache: CacheConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Load config from standard locations
    pub fn load() -> Result<Self, ConfigError> {
        let mut layered = toml::Table::new();

        // 1. Global config (~/.vstash/config.toml)
        if let Some(global_path) = Self::global_config_path() {
            if global_path.exists() {
                debug!("Loading global config from {:?}", global_path);
                merge_tables(&mut layered, read_table(&global_path)?);
            }
        }

        // 2. Project config (.vstash/config.toml), key-by-key over global
        let project_path = Path::new(PROJECT_CONFIG_PATH);
        if project_path.exists() {
            debug!("Loading project config from {:?}", project_path);
            merge_tables(&mut layered, read_table(project_path)?);
        }

        let mut config: Config = toml::Value::Table(layered).try_into()?;

        // 3. Environment variable overrides
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load config from an explicit file, then apply environment overrides.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        let mut config: Config = toml::from_str(&contents)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Global config path: ~/.vstash/config.toml
    pub fn global_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".vstash/config.toml"))
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply `VSTASH_*` overrides from the given lookup.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(root) = lookup("VSTASH_STORE_ROOT") {
            self.storage.root = PathBuf::from(root);
        }
        if let Some(base_url) = lookup("VSTASH_BASE_URL") {
            self.server.base_url = base_url;
        }
        if let Some(bind) = lookup("VSTASH_BIND") {
            self.server.bind = bind;
        }
        if let Some(key) = lookup("VSTASH_API_KEY") {
            self.auth.api_key = Some(key).filter(|k| !k.is_empty());
        }
        if let Some(url) = lookup("VSTASH_CACHE_URL") {
            self.cache.url = url;
        }
        if let Some(dir) = lookup("VSTASH_LOG_DIR") {
            self.logging.dir = Some(PathBuf::from(dir));
        }
    }

    /// Reject configurations the daemon cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.base_url.trim().is_empty() {
            return Err(ConfigError::Invalid("server.base_url must not be empty".into()));
        }
        let ext = &self.storage.default_extension;
        if !vstash_cas::is_valid_extension(ext) {
            return Err(ConfigError::Invalid(format!(
                "storage.default_extension must be 1-{} lowercase letters or digits, got {:?}",
                vstash_cas::MAX_EXTENSION_LEN,
                ext
            )));
        }
        if self.server.max_upload_bytes == 0 {
            return Err(ConfigError::Invalid("server.max_upload_bytes must be positive".into()));
        }
        Ok(())
    }

    /// Generate default config TOML string
    pub fn default_toml() -> Result<String, ConfigError> {
        Config::default().to_toml()
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Copy with secrets masked, for display.
    pub fn redacted(&self) -> Self {
        let mut config = self.clone();
        if config.auth.api_key.is_some() {
            config.auth.api_key = Some("********".to_string());
        }
        config
    }
}

fn read_table(path: &Path) -> Result<toml::Table, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    Ok(contents.parse::<toml::Table>()?)
}

/// Recursively overlay `overlay` onto `base`.
fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                merge_tables(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Object directory (`~` is expanded)
    pub root: PathBuf,
    /// Extension used when an upload's filename has none
    pub default_extension: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("~/.vstash/objects"),
            default_extension: vstash_cas::DEFAULT_EXTENSION.to_string(),
        }
    }
}

impl StorageConfig {
    pub fn resolved_root(&self) -> PathBuf {
        path::expand_home(&self.root)
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    /// Prefix of returned object URLs
    pub base_url: String,
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:6942".to_string(),
            base_url: "http://localhost:6942".to_string(),
            max_upload_bytes: 1024 * 1024 * 1024,
        }
    }
}

/// Upload authentication
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Shared secret expected in `X-API-Key`. Uploads are refused when unset.
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    Redis,
    Memory,
    Disabled,
}

/// Cache index configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub backend: CacheBackend,
    /// Redis URL, e.g. `redis://127.0.0.1:6379/` or `redis+unix:///run/redis.sock`
    pub url: String,
    pub key_prefix: String,
    /// Entry TTL in seconds (None = no expiry)
    pub ttl_secs: Option<u64>,
    pub op_timeout_ms: u64,
    pub reconnect_interval_secs: u64,
    /// Health check period (0 = disabled)
    pub health_interval_secs: u64,
    /// Also index objects whose upload hit an existing file
    pub populate_on_duplicate: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackend::Redis,
            url: "redis://127.0.0.1:6379/".to_string(),
            key_prefix: "file".to_string(),
            ttl_secs: None,
            op_timeout_ms: 500,
            reconnect_interval_secs: 5,
            health_interval_secs: 30,
            populate_on_duplicate: true,
        }
    }
}

impl CacheConfig {
    pub fn op_timeout(&self) -> Duration {
        Duration::from_millis(self.op_timeout_ms)
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_secs(self.reconnect_interval_secs)
    }

    pub fn health_interval(&self) -> Option<Duration> {
        (self.health_interval_secs > 0).then(|| Duration::from_secs(self.health_interval_secs))
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.ttl_secs.map(Duration::from_secs)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset
    pub level: String,
    /// Directory for daily-rotated log files
    pub dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            dir: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.cache.backend, CacheBackend::Redis);
        assert_eq!(config.cache.key_prefix, "file");
        assert!(config.cache.populate_on_duplicate);
        assert!(config.auth.api_key.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_toml_generation() {
        let toml_str = Config::default_toml().unwrap();
        assert!(toml_str.contains("[storage]"));
        assert!(toml_str.contains("[cache]"));
        assert!(toml_str.contains("backend = \"redis\""));
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = Config::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(config.server.bind, parsed.server.bind);
        assert_eq!(config.cache.op_timeout_ms, parsed.cache.op_timeout_ms);
    }

    #[test]
    fn test_merge_is_key_by_key() {
        let mut base: toml::Table = r#"
[cache]
url = "redis://global/"
key_prefix = "global"
"#
        .parse()
        .unwrap();
        let overlay: toml::Table = r#"
[cache]
key_prefix = "project"
"#
        .parse()
        .unwrap();
        merge_tables(&mut base, overlay);

        let config: Config = toml::Value::Table(base).try_into().unwrap();
        assert_eq!(config.cache.url, "redis://global/");
        assert_eq!(config.cache.key_prefix, "project");
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [
            ("VSTASH_STORE_ROOT", "/srv/objects"),
            ("VSTASH_BASE_URL", "https://cdn.example.com"),
            ("VSTASH_API_KEY", "s3cret"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_overrides(|k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(config.storage.root, PathBuf::from("/srv/objects"));
        assert_eq!(config.server.base_url, "https://cdn.example.com");
        assert_eq!(config.auth.api_key.as_deref(), Some("s3cret"));
        assert_eq!(config.server.bind, "0.0.0.0:6942");
    }

    #[test]
    fn test_empty_api_key_override_disables_uploads() {
        let mut config = Config::default();
        config.auth.api_key = Some("old".into());
        config.apply_overrides(|k| (k == "VSTASH_API_KEY").then(String::new));
        assert!(config.auth.api_key.is_none());
    }

    #[test]
    fn test_validate_rejects_bad_extension() {
        let mut config = Config::default();
        config.storage.default_extension = "b.n".into();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validate_matches_store_extension_rules() {
        let mut config = Config::default();
        for bad in ["", "BIN", "Dat", "abcdefghijklmnopq"] {
            config.storage.default_extension = bad.into();
            assert!(
                matches!(config.validate(), Err(ConfigError::Invalid(_))),
                "{bad:?} accepted"
            );
        }

        config.storage.default_extension = "abcdefghijklmnop".into();
        assert!(config.validate().is_ok());
        config.storage.default_extension = "mp4".into();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_cache_durations() {
        let mut cache = CacheConfig::default();
        assert_eq!(cache.op_timeout(), Duration::from_millis(500));
        assert_eq!(cache.health_interval(), Some(Duration::from_secs(30)));
        assert!(cache.ttl().is_none());
        cache.health_interval_secs = 0;
        cache.ttl_secs = Some(60);
        assert!(cache.health_interval().is_none());
        assert_eq!(cache.ttl(), Some(Duration::from_secs(60)));
    }
}
