//! # vstash-index
//!
//! Best-effort `fingerprint → location` index in front of the object store.
//!
//! The index is an accelerator, never a source of truth: entries may be
//! missing or stale, and the whole backend may be unreachable. Every
//! implementation absorbs backend failures and reports them as misses, so
//! callers only ever see `Option`/`bool` results.
//!
//! ## Backends
//!
//! - [`RedisCacheIndex`]: hash records `<prefix>:<fingerprint>` → `{path, extension}`,
//!   with lazy reconnection and an optional health check task
//! - [`MemoryCacheIndex`]: in-process map, for tests and single-node setups
//! - [`DisabledCacheIndex`]: always misses

mod memory;
mod redis;

pub use crate::memory::MemoryCacheIndex;
pub use crate::redis::{RedisCacheIndex, RedisOptions};

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::field::display;
use vstash_cas::Fingerprint;
use vstash_config::{log_cache_info, log_cache_warn, CacheBackend, CacheConfig};

/// Cached location of a stored object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub path: PathBuf,
    pub extension: String,
}

impl CacheEntry {
    pub fn new(path: impl Into<PathBuf>, extension: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            extension: extension.into(),
        }
    }
}

/// Errors raised while setting up an index backend.
///
/// Lookups never return these; they are logged and treated as misses.
#[derive(Error, Debug)]
pub enum IndexError {
    #[error("Redis error: {0}")]
    Redis(#[from] ::redis::RedisError),

    #[error("Cache backend timed out after {0:?}")]
    Timeout(Duration),
}

/// Fingerprint → location lookup used by the resolver.
#[async_trait]
pub trait CacheIndex: Send + Sync {
    /// Whether an entry is recorded for `fingerprint`.
    async fn exists(&self, fingerprint: &Fingerprint) -> bool;

    /// Recorded location for `fingerprint`, if any.
    async fn get(&self, fingerprint: &Fingerprint) -> Option<CacheEntry>;

    /// Record (or refresh) the location for `fingerprint`.
    async fn set(&self, fingerprint: &Fingerprint, entry: &CacheEntry);

    /// Whether the backend is currently reachable.
    async fn is_available(&self) -> bool {
        true
    }

    /// Short backend name for logs.
    fn backend(&self) -> &'static str;
}

/// Index that records nothing and always misses.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledCacheIndex;

#[async_trait]
impl CacheIndex for DisabledCacheIndex {
    async fn exists(&self, _fingerprint: &Fingerprint) -> bool {
        false
    }

    async fn get(&self, _fingerprint: &Fingerprint) -> Option<CacheEntry> {
        None
    }

    async fn set(&self, _fingerprint: &Fingerprint, _entry: &CacheEntry) {}

    async fn is_available(&self) -> bool {
        false
    }

    fn backend(&self) -> &'static str {
        "disabled"
    }
}

/// Build the index described by `config`.
///
/// A Redis backend that cannot be reached is still returned (it reconnects
/// lazily); only an unparsable URL degrades to [`DisabledCacheIndex`]. When
/// a health interval is configured, the Redis health check task is spawned
/// on the current runtime.
pub async fn build_cache_index(config: &CacheConfig) -> Arc<dyn CacheIndex> {
    let index: Arc<dyn CacheIndex> = match config.backend {
        CacheBackend::Disabled => Arc::new(DisabledCacheIndex),
        CacheBackend::Memory => Arc::new(MemoryCacheIndex::new()),
        CacheBackend::Redis => match RedisCacheIndex::new(RedisOptions::from_config(config)).await {
            Ok(index) => {
                let index = Arc::new(index);
                if let Some(interval) = config.health_interval() {
                    index.spawn_health_check(interval);
                }
                index
            }
            Err(e) => {
                log_cache_warn!("Cache backend misconfigured, running disk-only", error = display(&e));
                Arc::new(DisabledCacheIndex)
            }
        },
    };
    let available = index.is_available().await;
    log_cache_info!("Cache index ready", backend = index.backend(), available = available);
    index
}
