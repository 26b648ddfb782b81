//! Fingerprint resolution: cache first, disk scan as fallback.

use std::path::PathBuf;
use std::sync::Arc;

use axum::body::Body;
use tokio_util::io::ReaderStream;
use tracing::field::display;
use vstash_cas::{CasError, ContentStore, Fingerprint};
use vstash_config::log_fetch_debug;
use vstash_index::{CacheEntry, CacheIndex};

use crate::blocking;

/// Where a lookup found its answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveSource {
    CacheHit,
    DiskScan,
}

impl ResolveSource {
    pub fn as_str(self) -> &'static str {
        match self {
            ResolveSource::CacheHit => "cache",
            ResolveSource::DiskScan => "disk",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedObject {
    pub fingerprint: Fingerprint,
    pub path: PathBuf,
    pub extension: String,
    pub source: ResolveSource,
}

/// An opened object, streamed to the client in chunks.
#[derive(Debug)]
pub struct ServedObject {
    pub fingerprint: Fingerprint,
    pub extension: String,
    pub content_type: String,
    pub size: u64,
    pub file: tokio::fs::File,
    pub source: ResolveSource,
}

impl ServedObject {
    pub fn into_body(self) -> Body {
        Body::from_stream(ReaderStream::new(self.file))
    }
}

pub struct LookupResolver {
    store: Arc<ContentStore>,
    cache: Arc<dyn CacheIndex>,
}

impl LookupResolver {
    pub fn new(store: Arc<ContentStore>, cache: Arc<dyn CacheIndex>) -> Self {
        Self { store, cache }
    }

    /// Locate the object for `fingerprint`.
    ///
    /// A cache entry is only trusted if its path still names a file inside
    /// the store. Otherwise the store directory is scanned and a match is
    /// written back to the cache. A miss writes nothing.
    pub async fn resolve(&self, fingerprint: &Fingerprint) -> Result<Option<ResolvedObject>, CasError> {
        if let Some(entry) = self.cache.get(fingerprint).await {
            let store = Arc::clone(&self.store);
            let path = entry.path.clone();
            if blocking(move || Ok(store.locate(&path))).await? {
                return Ok(Some(ResolvedObject {
                    fingerprint: *fingerprint,
                    path: entry.path,
                    extension: entry.extension,
                    source: ResolveSource::CacheHit,
                }));
            }
            log_fetch_debug!(
                "Stale cache entry",
                fingerprint = display(fingerprint),
                path = display(entry.path.display())
            );
        }

        let store = Arc::clone(&self.store);
        let fp = *fingerprint;
        let Some(found) = blocking(move || store.scan(&fp)).await? else {
            return Ok(None);
        };

        self.cache
            .set(fingerprint, &CacheEntry::new(found.path.clone(), found.extension.clone()))
            .await;
        Ok(Some(ResolvedObject {
            fingerprint: *fingerprint,
            path: found.path,
            extension: found.extension,
            source: ResolveSource::DiskScan,
        }))
    }

    /// Resolve a raw path token and load the object.
    ///
    /// Anything that is not a well-formed fingerprint is simply not found.
    pub async fn fetch(&self, raw: &str) -> Result<Option<ServedObject>, CasError> {
        match Fingerprint::parse(raw) {
            Some(fingerprint) => self.fetch_fingerprint(&fingerprint).await,
            None => Ok(None),
        }
    }

    /// Resolve `fingerprint` and open the object for streaming.
    ///
    /// An object removed between the lookup and the open is not found.
    pub async fn fetch_fingerprint(&self, fingerprint: &Fingerprint) -> Result<Option<ServedObject>, CasError> {
        let Some(resolved) = self.resolve(fingerprint).await? else {
            return Ok(None);
        };

        let store = Arc::clone(&self.store);
        let path = resolved.path.clone();
        match blocking(move || store.open(&path)).await {
            Ok((file, size)) => Ok(Some(ServedObject {
                fingerprint: resolved.fingerprint,
                content_type: content_type_for(&resolved.extension),
                extension: resolved.extension,
                size,
                file: tokio::fs::File::from_std(file),
                source: resolved.source,
            })),
            Err(CasError::NotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// MIME type for a stored extension, `application/octet-stream` if unknown.
pub fn content_type_for(extension: &str) -> String {
    mime_guess::from_ext(extension)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tokio::io::AsyncReadExt;
    use vstash_cas::PutOutcome;
    use vstash_index::{DisabledCacheIndex, MemoryCacheIndex};

    struct Fixture {
        _temp: TempDir,
        store: Arc<ContentStore>,
        cache: Arc<MemoryCacheIndex>,
        resolver: LookupResolver,
    }

    fn fixture() -> Fixture {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(ContentStore::new(temp.path().join("objects")).unwrap());
        let cache = Arc::new(MemoryCacheIndex::new());
        let resolver = LookupResolver::new(store.clone(), cache.clone());
        Fixture {
            _temp: temp,
            store,
            cache,
            resolver,
        }
    }

    async fn read_all(served: ServedObject) -> Vec<u8> {
        let mut file = served.file;
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes).await.unwrap();
        bytes
    }

    fn put(store: &ContentStore, data: &[u8], ext: &str) -> Fingerprint {
        let fp = Fingerprint::of(data);
        assert_eq!(store.put(&fp, ext, data).unwrap(), PutOutcome::Created);
        fp
    }

    #[tokio::test]
    async fn test_cache_hit() {
        let fx = fixture();
        let fp = put(&fx.store, b"hello world", "txt");
        let path = fx.store.canonical_path(&fp, "txt");
        fx.cache.set(&fp, &CacheEntry::new(path.clone(), "txt")).await;

        let resolved = fx.resolver.resolve(&fp).await.unwrap().unwrap();
        assert_eq!(resolved.source, ResolveSource::CacheHit);
        assert_eq!(resolved.path, path);
        // A hit does not rewrite the entry
        assert_eq!(fx.cache.write_count(), 1);
    }

    #[tokio::test]
    async fn test_scan_repopulates_cache() {
        let fx = fixture();
        let fp = put(&fx.store, b"%PDF-1.7", "pdf");

        let served = fx.resolver.fetch(&fp.to_hex()).await.unwrap().unwrap();
        assert_eq!(served.source, ResolveSource::DiskScan);
        assert_eq!(served.content_type, "application/pdf");
        assert_eq!(served.size, 8);
        assert_eq!(read_all(served).await, b"%PDF-1.7");

        let entry = fx.cache.get(&fp).await.unwrap();
        assert_eq!(entry.extension, "pdf");

        let again = fx.resolver.fetch(&fp.to_hex()).await.unwrap().unwrap();
        assert_eq!(again.source, ResolveSource::CacheHit);
    }

    #[tokio::test]
    async fn test_stale_entry_falls_back_to_disk() {
        let fx = fixture();
        let fp = put(&fx.store, b"moved", "md");
        fx.cache
            .set(&fp, &CacheEntry::new(fx.store.root().join("nowhere.md"), "md"))
            .await;

        let resolved = fx.resolver.resolve(&fp).await.unwrap().unwrap();
        assert_eq!(resolved.source, ResolveSource::DiskScan);
        assert_eq!(fx.cache.get(&fp).await.unwrap().path, resolved.path);
    }

    #[tokio::test]
    async fn test_entry_outside_store_is_not_served() {
        let fx = fixture();
        let outside = fx._temp.path().join("secret.txt");
        std::fs::write(&outside, b"not yours").unwrap();
        let fp = Fingerprint::of(b"not yours");
        fx.cache.set(&fp, &CacheEntry::new(outside, "txt")).await;

        assert!(fx.resolver.fetch_fingerprint(&fp).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unknown_fingerprint_writes_nothing() {
        let fx = fixture();
        let fp = Fingerprint::of(b"never uploaded");

        assert!(fx.resolver.fetch(&fp.to_hex()).await.unwrap().is_none());
        assert_eq!(fx.cache.write_count(), 0);
        assert_eq!(std::fs::read_dir(fx.store.root()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_malformed_fingerprint_is_not_found() {
        let fx = fixture();
        for raw in ["", "xyz", "../../etc/passwd", "1f3a9c0b2d4e5f", "ZZZZZZZZZZZZ"] {
            assert!(fx.resolver.fetch(raw).await.unwrap().is_none(), "{raw:?}");
        }
        assert_eq!(fx.cache.write_count(), 0);
    }

    #[tokio::test]
    async fn test_deleted_object_is_not_found() {
        let fx = fixture();
        let fp = put(&fx.store, b"short lived", "txt");
        let path = fx.store.canonical_path(&fp, "txt");
        assert!(fx.resolver.resolve(&fp).await.unwrap().is_some());

        std::fs::remove_file(&path).unwrap();
        // The cache still names the file, and the scan finds nothing.
        assert_eq!(fx.cache.get(&fp).await.unwrap().path, path);
        assert!(fx.resolver.fetch_fingerprint(&fp).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_streams_large_object() {
        let fx = fixture();
        let data: Vec<u8> = (0..256 * 1024).map(|i| (i % 251) as u8).collect();
        let fp = put(&fx.store, &data, "bin");

        let served = fx.resolver.fetch_fingerprint(&fp).await.unwrap().unwrap();
        assert_eq!(served.size, data.len() as u64);
        assert_eq!(read_all(served).await, data);
    }

    #[tokio::test]
    async fn test_disk_only_mode() {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(ContentStore::new(temp.path()).unwrap());
        let fp = put(&store, b"disk only", "txt");
        let resolver = LookupResolver::new(store, Arc::new(DisabledCacheIndex));

        for _ in 0..2 {
            let served = resolver.fetch_fingerprint(&fp).await.unwrap().unwrap();
            assert_eq!(served.source, ResolveSource::DiskScan);
            assert_eq!(served.content_type, "text/plain");
        }
    }

    #[test]
    fn test_content_type_for() {
        assert_eq!(content_type_for("png"), "image/png");
        assert_eq!(content_type_for("txt"), "text/plain");
        assert_eq!(content_type_for("bin"), "application/octet-stream");
        assert_eq!(content_type_for("zzzunknown"), "application/octet-stream");
    }
}
