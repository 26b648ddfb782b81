//! # vstash-daemon
//!
//! HTTP front end of the object store.
//!
//! - `POST /api/upload`: store a multipart `file` field, reply with its URL
//! - `GET /{fingerprint}[.ext]`: serve a stored object
//! - `GET /`: liveness probe
//!
//! Uploads go through [`UploadOrchestrator`], fetches through
//! [`LookupResolver`]. Both share one [`ContentStore`](vstash_cas::ContentStore)
//! and one cache index.

pub mod auth;
pub mod error;
pub mod origin;
pub mod resolve;
pub mod server;
pub mod upload;

pub use auth::{CredentialVerifier, SharedKeyVerifier, API_KEY_HEADER};
pub use error::ApiError;
pub use origin::ClientOrigin;
pub use resolve::{content_type_for, LookupResolver, ResolveSource, ResolvedObject, ServedObject};
pub use server::{router, run_server, AppState};
pub use upload::{UploadError, UploadOrchestrator, UploadReceipt};

use std::io;

use vstash_cas::CasError;

/// Run blocking store work off the async executor.
pub(crate) async fn blocking<T, F>(f: F) -> Result<T, CasError>
where
    F: FnOnce() -> Result<T, CasError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| CasError::Io(io::Error::other(e)))?
}
