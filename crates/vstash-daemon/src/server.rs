//! Router, handlers and the serve loop.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::multipart::{MultipartError, MultipartRejection};
use axum::extract::{DefaultBodyLimit, Multipart, Path, State};
use axum::http::{header, StatusCode};
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::field::{display, Empty};
use tracing::{info_span, Instrument, Span};
use vstash_cas::{CasError, ContentStore, PutOutcome};
use vstash_config::{
    log_daemon_error, log_daemon_info, log_daemon_warn, log_fetch_debug, log_fetch_error,
    log_fetch_info, log_upload_error, log_upload_info, Config,
};
use vstash_index::{build_cache_index, CacheIndex};

use crate::auth::{require_api_key, CredentialVerifier, SharedKeyVerifier};
use crate::error::ApiError;
use crate::origin::ClientOrigin;
use crate::resolve::LookupResolver;
use crate::upload::UploadOrchestrator;

/// Multipart field holding the uploaded file.
const FILE_FIELD: &str = "file";

/// Shared handler state.
pub struct AppState {
    pub store: Arc<ContentStore>,
    pub uploader: UploadOrchestrator,
    pub resolver: LookupResolver,
    pub verifier: Arc<dyn CredentialVerifier>,
    pub max_upload_bytes: usize,
}

impl AppState {
    /// Open the store under `config.storage` and wire both paths to `cache`.
    pub fn new(
        config: &Config,
        cache: Arc<dyn CacheIndex>,
        verifier: Arc<dyn CredentialVerifier>,
    ) -> Result<Self, CasError> {
        let store = Arc::new(ContentStore::new(config.storage.resolved_root())?);
        let uploader = UploadOrchestrator::new(store.clone(), cache.clone(), &config.server.base_url)
            .with_default_extension(config.storage.default_extension.clone())
            .with_populate_on_duplicate(config.cache.populate_on_duplicate);
        let resolver = LookupResolver::new(store.clone(), cache);
        Ok(Self {
            store,
            uploader,
            resolver,
            verifier,
            max_upload_bytes: config.server.max_upload_bytes,
        })
    }
}

/// Build the HTTP router.
///
/// Authentication and the body limit only apply to the upload route.
pub fn router(state: Arc<AppState>) -> Router {
    let upload = Router::new()
        .route("/api/upload", post(upload_file))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_api_key))
        .layer(DefaultBodyLimit::max(state.max_upload_bytes));

    Router::new()
        .route("/", get(index))
        .route("/{resource}", get(serve_file))
        .merge(upload)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub url: String,
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    message: &'static str,
}

async fn index() -> Json<StatusResponse> {
    Json(StatusResponse { message: "OK" })
}

async fn upload_file(
    State(state): State<Arc<AppState>>,
    origin: ClientOrigin,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<UploadResponse>, ApiError> {
    let span = info_span!("upload", origin = %origin, fingerprint = Empty);
    async move {
        let Ok(mut multipart) = multipart else {
            log_upload_info!("UPLOAD_FAILED", reason = "No file");
            return Err(ApiError::BadRequest("No file provided"));
        };

        let (filename, data) = loop {
            let field = match multipart.next_field().await {
                Ok(Some(field)) => field,
                Ok(None) => {
                    log_upload_info!("UPLOAD_FAILED", reason = "No file");
                    return Err(ApiError::BadRequest("No file provided"));
                }
                Err(e) => return Err(multipart_failure(e)),
            };
            if field.name() != Some(FILE_FIELD) {
                continue;
            }
            let filename = field.file_name().unwrap_or_default().to_string();
            if filename.is_empty() {
                log_upload_info!("UPLOAD_FAILED", reason = "Empty filename");
                return Err(ApiError::BadRequest("No file selected"));
            }
            let data = field.bytes().await.map_err(multipart_failure)?;
            break (filename, data);
        };

        match state.uploader.upload(&filename, data).await {
            Ok(receipt) => {
                Span::current().record("fingerprint", display(&receipt.fingerprint));
                match receipt.outcome {
                    PutOutcome::Created => {
                        log_upload_info!("UPLOAD_SUCCESS", filename = filename.as_str());
                    }
                    PutOutcome::AlreadyExists => {
                        log_upload_info!("UPLOAD_SUCCESS", status = "Already exists");
                    }
                }
                Ok(Json(UploadResponse { url: receipt.url }))
            }
            Err(e) => {
                if let Some(fingerprint) = &e.fingerprint {
                    Span::current().record("fingerprint", display(fingerprint));
                }
                log_upload_error!("UPLOAD_FAILED", error = display(&e.source));
                Err(ApiError::UploadFailed(e))
            }
        }
    }
    .instrument(span)
    .await
}

fn multipart_failure(e: MultipartError) -> ApiError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        log_upload_info!("UPLOAD_FAILED", reason = "Too large");
        ApiError::PayloadTooLarge
    } else {
        log_upload_info!("UPLOAD_FAILED", reason = "Malformed body", error = display(&e));
        ApiError::BadRequest("Malformed upload")
    }
}

/// Split `<fingerprint>[.<ext>]` at the first dot.
fn split_resource(resource: &str) -> (&str, Option<&str>) {
    match resource.split_once('.') {
        Some((fingerprint, hint)) => (fingerprint, Some(hint)),
        None => (resource, None),
    }
}

async fn serve_file(
    State(state): State<Arc<AppState>>,
    origin: ClientOrigin,
    Path(resource): Path<String>,
) -> Result<Response, ApiError> {
    let (raw, hint) = split_resource(&resource);
    let span = info_span!("fetch", origin = %origin, fingerprint = %raw);
    async move {
        match state.resolver.fetch(raw).await {
            Ok(Some(object)) => {
                if let Some(hint) = hint.filter(|h| !h.eq_ignore_ascii_case(&object.extension)) {
                    log_fetch_debug!(
                        "Extension hint ignored",
                        hint = hint,
                        stored = object.extension.as_str()
                    );
                }
                log_fetch_info!("FILE_SERVED", source = object.source.as_str(), size = object.size);
                let headers = [
                    (header::CONTENT_TYPE, object.content_type.clone()),
                    (header::CONTENT_LENGTH, object.size.to_string()),
                ];
                Ok((headers, object.into_body()).into_response())
            }
            Ok(None) => {
                log_fetch_info!("FILE_NOT_FOUND");
                Err(ApiError::NotFound)
            }
            Err(e) => {
                log_fetch_error!("FETCH_FAILED", error = display(&e));
                Err(ApiError::FetchFailed(e))
            }
        }
    }
    .instrument(span)
    .await
}

/// Run the daemon until Ctrl-C.
///
/// `config_path` is re-read on SIGHUP to rotate the upload key.
pub async fn run_server(config: Config, config_path: Option<PathBuf>) -> anyhow::Result<()> {
    log_daemon_info!("Starting daemon", version = env!("CARGO_PKG_VERSION"));

    let cache = build_cache_index(&config.cache).await;

    let verifier = Arc::new(SharedKeyVerifier::new(config.auth.api_key.clone()));
    if !verifier.is_configured() {
        log_daemon_warn!("No API key configured, all uploads will be rejected");
    }
    #[cfg(unix)]
    spawn_key_reload(verifier.clone(), config_path)?;
    #[cfg(not(unix))]
    let _ = config_path;

    let state = Arc::new(AppState::new(&config, cache, verifier)?);
    match state.store.stats() {
        Ok(stats) => log_daemon_info!(
            "Object store ready",
            root = display(state.store.root().display()),
            objects = stats.object_count,
            bytes = stats.total_bytes
        ),
        Err(e) => log_daemon_warn!("Object store stats unavailable", error = display(&e)),
    }

    let listener = TcpListener::bind(&config.server.bind).await?;
    log_daemon_info!("Listening", addr = display(listener.local_addr()?));

    axum::serve(
        listener,
        router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    log_daemon_info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => log_daemon_info!("Shutdown signal received"),
        Err(e) => log_daemon_error!("Failed to listen for shutdown signal", error = display(&e)),
    }
}

#[cfg(unix)]
fn spawn_key_reload(verifier: Arc<SharedKeyVerifier>, config_path: Option<PathBuf>) -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = signal(SignalKind::hangup())?;
    tokio::spawn(async move {
        while hangup.recv().await.is_some() {
            let reloaded = match &config_path {
                Some(path) => Config::load_from(path),
                None => Config::load(),
            };
            match reloaded {
                Ok(config) => {
                    verifier.rotate(config.auth.api_key);
                    log_daemon_info!("API key reloaded", configured = verifier.is_configured());
                }
                Err(e) => log_daemon_error!("Config reload failed, keeping current key", error = display(&e)),
            }
        }
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_resource() {
        assert_eq!(split_resource("1f3a9c0b2d4e"), ("1f3a9c0b2d4e", None));
        assert_eq!(split_resource("1f3a9c0b2d4e.txt"), ("1f3a9c0b2d4e", Some("txt")));
        assert_eq!(split_resource("1f3a9c0b2d4e.tar.gz"), ("1f3a9c0b2d4e", Some("tar.gz")));
        assert_eq!(split_resource(".hidden"), ("", Some("hidden")));
    }
}
