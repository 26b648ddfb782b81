//! Flat, path-addressable object store.

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tracing::{debug, instrument, warn};

use crate::{is_valid_extension, CasError, Fingerprint, Result};

const TEMP_PREFIX: &str = ".ingest-";
const TEMP_SUFFIX: &str = ".tmp";
const COMPARE_CHUNK: usize = 64 * 1024;

/// Age after which a temp file is assumed abandoned.
pub const STALE_TEMP_AGE: Duration = Duration::from_secs(60 * 60);

/// Result of [`ContentStore::put`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    /// The object was written by this call.
    Created,
    /// An identical object was already present; nothing was written.
    AlreadyExists,
}

/// Location of a stored object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub path: PathBuf,
    pub extension: String,
}

/// Object store rooted at a single directory.
#[derive(Debug, Clone)]
pub struct ContentStore {
    root: PathBuf,
}

impl ContentStore {
    /// Open a store at the given root directory.
    ///
    /// The directory will be created if it doesn't exist. Temp files older
    /// than [`STALE_TEMP_AGE`] are left over from interrupted writes and
    /// are removed.
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        let store = Self { root };
        let swept = store.sweep_temp_files(STALE_TEMP_AGE)?;
        if swept > 0 {
            warn!(root = %store.root.display(), swept, "removed stale temp files");
        }
        Ok(store)
    }

    /// Get the root path of the store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Canonical location of `<fingerprint>.<extension>`.
    pub fn canonical_path(&self, fingerprint: &Fingerprint, extension: &str) -> PathBuf {
        self.root.join(format!("{}.{}", fingerprint, extension))
    }

    /// Store `data` under its canonical path. See [`put_object`](Self::put_object).
    pub fn put(&self, fingerprint: &Fingerprint, extension: &str, data: &[u8]) -> Result<PutOutcome> {
        self.put_object(fingerprint, extension, data)
            .map(|(outcome, _)| outcome)
    }

    /// Store `data` and report where the object lives.
    ///
    /// Any existing `<fingerprint>.*` object, whatever its extension, is
    /// compared byte-for-byte with `data`: a match is
    /// [`PutOutcome::AlreadyExists`] at the existing location, a mismatch is
    /// a [`CasError::Collision`]. Otherwise the content is written to a
    /// hidden temp file, fsynced, and committed with a no-clobber rename.
    /// Losing the commit race to a concurrent writer reports
    /// `AlreadyExists` after the same comparison.
    #[instrument(skip(self, data), fields(fingerprint = %fingerprint, size = data.len()), level = "debug")]
    pub fn put_object(
        &self,
        fingerprint: &Fingerprint,
        extension: &str,
        data: &[u8],
    ) -> Result<(PutOutcome, StoredObject)> {
        if !is_valid_extension(extension) {
            return Err(CasError::InvalidExtension(extension.to_string()));
        }

        let path = self.canonical_path(fingerprint, extension);
        let existing = if path.is_file() {
            Some(StoredObject {
                path: path.clone(),
                extension: extension.to_string(),
            })
        } else {
            self.scan(fingerprint)?
        };
        if let Some(existing) = existing {
            self.verify_duplicate(fingerprint, &existing.path, data)?;
            return Ok((PutOutcome::AlreadyExists, existing));
        }

        let mut temp = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .suffix(TEMP_SUFFIX)
            .tempfile_in(&self.root)?;
        temp.write_all(data)?;
        temp.as_file().sync_all()?;

        let object = StoredObject {
            path: path.clone(),
            extension: extension.to_string(),
        };
        match temp.persist_noclobber(&path) {
            Ok(_) => {
                debug!(path = %path.display(), "object committed");
                Ok((PutOutcome::Created, object))
            }
            Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => {
                // Dropping the returned temp file removes it.
                drop(e.file);
                self.verify_duplicate(fingerprint, &path, data)?;
                Ok((PutOutcome::AlreadyExists, object))
            }
            Err(e) => Err(CasError::Io(e.error)),
        }
    }

    fn verify_duplicate(&self, fingerprint: &Fingerprint, path: &Path, data: &[u8]) -> Result<()> {
        if same_content(path, data)? {
            return Ok(());
        }
        warn!(fingerprint = %fingerprint, path = %path.display(), "fingerprint collision");
        Err(CasError::Collision {
            fingerprint: fingerprint.to_string(),
            path: path.to_path_buf(),
        })
    }

    /// Find an object by fingerprint, whatever its extension.
    ///
    /// Returns the lexicographically first `<fingerprint>.*` file, ignoring
    /// in-flight temp files.
    #[instrument(skip(self), fields(fingerprint = %fingerprint), level = "debug")]
    pub fn scan(&self, fingerprint: &Fingerprint) -> Result<Option<StoredObject>> {
        let prefix = format!("{}.", fingerprint);
        let mut best: Option<String> = None;

        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if !name.starts_with(&prefix) || is_temp_name(name) {
                continue;
            }
            if !entry.file_type()?.is_file() {
                continue;
            }
            if best.as_deref().map_or(true, |current| name < current) {
                best = Some(name.to_string());
            }
        }

        Ok(best.map(|name| {
            let suffix = &name[prefix.len()..];
            let extension = suffix.rsplit('.').next().unwrap_or(suffix).to_string();
            StoredObject {
                path: self.root.join(&name),
                extension,
            }
        }))
    }

    /// Whether `path` names a regular file directly inside this store.
    pub fn locate(&self, path: &Path) -> bool {
        if path.parent() != Some(self.root.as_path()) {
            return false;
        }
        fs::metadata(path).map(|m| m.is_file()).unwrap_or(false)
    }

    /// Read a stored object.
    pub fn read(&self, path: &Path) -> Result<Vec<u8>> {
        fs::read(path).map_err(|e| not_found_or_io(path, e))
    }

    /// Open a stored object for streaming, returning it with its length.
    pub fn open(&self, path: &Path) -> Result<(File, u64)> {
        let file = File::open(path).map_err(|e| not_found_or_io(path, e))?;
        let len = file.metadata()?.len();
        Ok((file, len))
    }

    /// Remove temp files not modified for at least `older_than`.
    ///
    /// Returns how many were removed. Younger temp files may belong to a
    /// write still in progress and are kept.
    pub fn sweep_temp_files(&self, older_than: Duration) -> Result<usize> {
        let now = SystemTime::now();
        let mut removed = 0;
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_name().to_str().is_some_and(is_temp_name) {
                continue;
            }
            let modified = entry.metadata()?.modified()?;
            if now.duration_since(modified).unwrap_or_default() < older_than {
                continue;
            }
            match fs::remove_file(entry.path()) {
                Ok(()) => removed += 1,
                // Committed or cleaned up by its writer meanwhile
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(removed)
    }

    /// Get statistics about the store.
    pub fn stats(&self) -> Result<StoreStats> {
        let mut stats = StoreStats::default();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            if entry.file_name().to_str().is_some_and(is_temp_name) {
                continue;
            }
            stats.object_count += 1;
            stats.total_bytes += entry.metadata()?.len();
        }
        Ok(stats)
    }
}

fn not_found_or_io(path: &Path, e: io::Error) -> CasError {
    if e.kind() != io::ErrorKind::NotFound {
        return CasError::Io(e);
    }
    CasError::NotFound {
        fingerprint: path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default(),
    }
}

fn is_temp_name(name: &str) -> bool {
    name.starts_with(TEMP_PREFIX) && name.ends_with(TEMP_SUFFIX)
}

fn same_content(path: &Path, data: &[u8]) -> Result<bool> {
    let mut file = File::open(path)?;
    if file.metadata()?.len() != data.len() as u64 {
        return Ok(false);
    }

    let mut buf = vec![0u8; COMPARE_CHUNK];
    let mut offset = 0;
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            return Ok(offset == data.len());
        }
        if offset + n > data.len() || buf[..n] != data[offset..offset + n] {
            return Ok(false);
        }
        offset += n;
    }
}

/// Statistics about the store
#[derive(Debug, Clone, Default)]
pub struct StoreStats {
    /// Number of committed objects
    pub object_count: u64,
    /// Total bytes stored (deduplicated)
    pub total_bytes: u64,
}
