use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use vstash_cas::Fingerprint;

use crate::{CacheEntry, CacheIndex};

/// In-process index backed by a concurrent map.
#[derive(Debug, Default)]
pub struct MemoryCacheIndex {
    entries: DashMap<Fingerprint, CacheEntry>,
    writes: AtomicU64,
}

impl MemoryCacheIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop the entry for `fingerprint`, as an external flush would.
    pub fn remove(&self, fingerprint: &Fingerprint) -> Option<CacheEntry> {
        self.entries.remove(fingerprint).map(|(_, entry)| entry)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of `set` calls served so far.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl CacheIndex for MemoryCacheIndex {
    async fn exists(&self, fingerprint: &Fingerprint) -> bool {
        self.entries.contains_key(fingerprint)
    }

    async fn get(&self, fingerprint: &Fingerprint) -> Option<CacheEntry> {
        self.entries.get(fingerprint).map(|e| e.value().clone())
    }

    async fn set(&self, fingerprint: &Fingerprint, entry: &CacheEntry) {
        self.writes.fetch_add(1, Ordering::Relaxed);
        self.entries.insert(*fingerprint, entry.clone());
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}
