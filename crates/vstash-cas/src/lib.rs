//! # vstash-cas
//!
//! Content-Addressable Storage (CAS) for vstash.
//!
//! Objects are keyed by a truncated SHA-256 fingerprint and stored flat in a
//! single directory under their canonical name:
//!
//! ```text
//! <root>/
//! ├── 1f3a9c0b2d4e.txt      # <fingerprint>.<extension>
//! ├── 88e01b7acd90.png
//! └── .ingest-XXXXXX.tmp    # in-flight write, never served
//! ```
//!
//! Writes are committed with a no-clobber rename, so a canonical path only
//! ever names a complete object and concurrent uploads of the same content
//! cannot interleave. Each fingerprint is stored under one name: uploading
//! the same bytes with another extension resolves to the existing file.

mod extension;
mod fingerprint;
mod store;

pub use extension::{extension_from_filename, is_valid_extension, DEFAULT_EXTENSION, MAX_EXTENSION_LEN};
pub use fingerprint::{Fingerprint, FINGERPRINT_LEN};
pub use store::{ContentStore, PutOutcome, StoreStats, StoredObject, STALE_TEMP_AGE};

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur during CAS operations
#[derive(Error, Debug)]
pub enum CasError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Object not found: {fingerprint}")]
    NotFound { fingerprint: String },

    #[error("Fingerprint collision: {fingerprint} already stored at {path:?} with different content")]
    Collision { fingerprint: String, path: PathBuf },

    #[error("Invalid fingerprint: {0:?}")]
    InvalidFingerprint(String),

    #[error("Invalid extension: {0:?}")]
    InvalidExtension(String),
}

pub type Result<T> = std::result::Result<T, CasError>;
