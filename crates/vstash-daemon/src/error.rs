//! HTTP error responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use crate::upload::UploadError;
use vstash_cas::CasError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("bad request: {0}")]
    BadRequest(&'static str),

    #[error("unauthorized")]
    Unauthorized,

    #[error("not found")]
    NotFound,

    #[error("payload too large")]
    PayloadTooLarge,

    #[error(transparent)]
    UploadFailed(#[from] UploadError),

    #[error("fetch failed: {0}")]
    FetchFailed(#[source] CasError),
}

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::UploadFailed(_) | ApiError::FetchFailed(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Client-facing message. Internal details stay in the logs.
    pub fn message(&self) -> &'static str {
        match self {
            ApiError::BadRequest(msg) => *msg,
            ApiError::Unauthorized => "Unauthorized",
            ApiError::NotFound => "File not found",
            ApiError::PayloadTooLarge => "File too large",
            ApiError::UploadFailed(_) => "Upload failed",
            ApiError::FetchFailed(_) => "Internal server error",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status(),
            Json(ErrorBody {
                error: self.message(),
            }),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_status_mapping() {
        assert_eq!(ApiError::BadRequest("No file provided").status(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::Unauthorized.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(ApiError::NotFound.status(), StatusCode::NOT_FOUND);
        assert_eq!(ApiError::PayloadTooLarge.status(), StatusCode::PAYLOAD_TOO_LARGE);

        let err = ApiError::FetchFailed(CasError::Io(io::Error::other("disk gone")));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        // The I/O detail must not leak to clients
        assert_eq!(err.message(), "Internal server error");
    }

    #[test]
    fn test_upload_failure_message() {
        let err = ApiError::from(UploadError {
            fingerprint: None,
            source: CasError::Io(io::Error::other("no space left")),
        });
        assert_eq!(err.message(), "Upload failed");
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
