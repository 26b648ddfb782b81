//! Upload orchestration: fingerprint, store, index, reply.

use std::path::PathBuf;
use std::sync::Arc;

use axum::body::Bytes;
use thiserror::Error;
use vstash_cas::{
    extension_from_filename, CasError, ContentStore, Fingerprint, PutOutcome, DEFAULT_EXTENSION,
};
use vstash_index::{CacheEntry, CacheIndex};

/// Successful upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReceipt {
    pub fingerprint: Fingerprint,
    pub extension: String,
    pub path: PathBuf,
    pub outcome: PutOutcome,
    /// `<base_url>/<fingerprint>`, without extension
    pub url: String,
}

#[derive(Debug, Error)]
#[error("upload failed: {source}")]
pub struct UploadError {
    /// Known once hashing finished.
    pub fingerprint: Option<Fingerprint>,
    #[source]
    pub source: CasError,
}

impl UploadError {
    fn unhashed(source: CasError) -> Self {
        Self {
            fingerprint: None,
            source,
        }
    }
}

pub struct UploadOrchestrator {
    store: Arc<ContentStore>,
    cache: Arc<dyn CacheIndex>,
    base_url: String,
    default_extension: String,
    populate_on_duplicate: bool,
}

impl UploadOrchestrator {
    pub fn new(store: Arc<ContentStore>, cache: Arc<dyn CacheIndex>, base_url: &str) -> Self {
        Self {
            store,
            cache,
            base_url: base_url.trim_end_matches('/').to_string(),
            default_extension: DEFAULT_EXTENSION.to_string(),
            populate_on_duplicate: true,
        }
    }

    pub fn with_default_extension(mut self, extension: impl Into<String>) -> Self {
        self.default_extension = extension.into();
        self
    }

    /// Whether a duplicate upload also writes the cache entry.
    pub fn with_populate_on_duplicate(mut self, enabled: bool) -> Self {
        self.populate_on_duplicate = enabled;
        self
    }

    pub fn url_for(&self, fingerprint: &Fingerprint) -> String {
        format!("{}/{}", self.base_url, fingerprint)
    }

    /// Store `data` and return where it can be fetched.
    ///
    /// Identical content always yields the same URL; only the first upload
    /// of a fingerprint writes to disk, and later uploads under another
    /// extension get the stored object back. The cache is written after a
    /// successful put and its failure never fails the upload.
    pub async fn upload(&self, filename: &str, data: Bytes) -> Result<UploadReceipt, UploadError> {
        let extension = extension_from_filename(filename, &self.default_extension);

        let store = Arc::clone(&self.store);
        let ext = extension.clone();
        let (fingerprint, put) = tokio::task::spawn_blocking(move || {
            let fingerprint = Fingerprint::of(&data);
            let put = store.put_object(&fingerprint, &ext, &data);
            (fingerprint, put)
        })
        .await
        .map_err(|e| UploadError::unhashed(CasError::Io(std::io::Error::other(e))))?;

        let (outcome, stored) = put.map_err(|source| UploadError {
            fingerprint: Some(fingerprint),
            source,
        })?;

        if outcome == PutOutcome::Created || self.populate_on_duplicate {
            self.cache
                .set(&fingerprint, &CacheEntry::new(stored.path.clone(), stored.extension.clone()))
                .await;
        }

        Ok(UploadReceipt {
            url: self.url_for(&fingerprint),
            fingerprint,
            extension: stored.extension,
            path: stored.path,
            outcome,
        })
    }
}
