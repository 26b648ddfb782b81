//! Upload credential checks.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use parking_lot::RwLock;
use subtle::ConstantTimeEq;
use tracing::field::display;
use vstash_config::log_auth_warn;

use crate::error::ApiError;
use crate::origin::ClientOrigin;
use crate::server::AppState;

/// Header carrying the upload credential.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Decides whether a presented credential may upload.
pub trait CredentialVerifier: Send + Sync {
    /// `presented` is `None` when the request carried no credential.
    fn verify(&self, presented: Option<&str>) -> bool;
}

/// Single shared secret, replaceable at runtime.
///
/// With no key configured every request is rejected.
#[derive(Debug, Default)]
pub struct SharedKeyVerifier {
    key: RwLock<Option<String>>,
}

impl SharedKeyVerifier {
    pub fn new(key: Option<String>) -> Self {
        Self {
            key: RwLock::new(key.filter(|k| !k.is_empty())),
        }
    }

    /// Replace the accepted key. Takes effect for the next request.
    pub fn rotate(&self, key: Option<String>) {
        *self.key.write() = key.filter(|k| !k.is_empty());
    }

    pub fn is_configured(&self) -> bool {
        self.key.read().is_some()
    }
}

impl CredentialVerifier for SharedKeyVerifier {
    fn verify(&self, presented: Option<&str>) -> bool {
        let key = self.key.read();
        match (key.as_deref(), presented) {
            (Some(expected), Some(presented)) => {
                expected.as_bytes().ct_eq(presented.as_bytes()).into()
            }
            _ => false,
        }
    }
}

/// Middleware rejecting requests whose `X-API-Key` the verifier refuses.
pub async fn require_api_key(
    State(state): State<Arc<AppState>>,
    origin: ClientOrigin,
    request: Request,
    next: Next,
) -> Response {
    let presented = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok());

    if !state.verifier.verify(presented) {
        log_auth_warn!(
            "UNAUTHORIZED_ACCESS",
            origin = display(&origin),
            key_present = presented.is_some()
        );
        return ApiError::Unauthorized.into_response();
    }
    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matching_key() {
        let verifier = SharedKeyVerifier::new(Some("s3cret".into()));
        assert!(verifier.verify(Some("s3cret")));
        assert!(!verifier.verify(Some("s3cre")));
        assert!(!verifier.verify(Some("s3cret ")));
        assert!(!verifier.verify(Some("")));
        assert!(!verifier.verify(None));
    }

    #[test]
    fn test_unconfigured_rejects_everything() {
        let verifier = SharedKeyVerifier::new(None);
        assert!(!verifier.is_configured());
        assert!(!verifier.verify(None));
        assert!(!verifier.verify(Some("")));

        // An empty configured key counts as unset
        let verifier = SharedKeyVerifier::new(Some(String::new()));
        assert!(!verifier.is_configured());
        assert!(!verifier.verify(Some("")));
    }

    #[test]
    fn test_rotate() {
        let verifier = SharedKeyVerifier::new(Some("old".into()));
        verifier.rotate(Some("new".into()));
        assert!(!verifier.verify(Some("old")));
        assert!(verifier.verify(Some("new")));

        verifier.rotate(None);
        assert!(!verifier.verify(Some("new")));
    }
}
