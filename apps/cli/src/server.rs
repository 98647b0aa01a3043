//! HTTP surface
//!
//! Routes callers and the engine's push channel onto [`DlrelayCore`].
//! Callers identify themselves with the `X-DL-User` / `X-DL-Password`
//! headers; URIs travel percent-encoded as a single path segment. When an
//! engine secret is configured the push channel must send it in
//! `X-DL-Notify-Token`.

use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use dlrelay_core::{DlrelayCore, DlrelayError};
use dlrelay_types::{
    Credentials, HttpAuth, ProgressSnapshot, ReconcileOutcome, SourceKind, SubmitResponse,
};
use std::net::SocketAddr;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

pub const USER_HEADER: &str = "x-dl-user";
pub const PASSWORD_HEADER: &str = "x-dl-password";
pub const NOTIFY_TOKEN_HEADER: &str = "x-dl-notify-token";

/// Hint sent with 503 replies while the engine is unreachable
const RETRY_AFTER_SECS: &str = "5";

/// Liveness reply for `GET /ping`
pub const PING_REPLY: &str = "dlrelay";

// ============================================================================
// Server
// ============================================================================

pub fn router(core: DlrelayCore) -> Router {
    Router::new()
        .route("/ping", get(|| async { PING_REPLY }))
        .route("/add/torrent/:owner/:uri", post(handle_add_torrent))
        .route("/add/uri/:owner/:uri", post(handle_add_uri))
        .route("/add/uri/:owner/:user/:password/:uri", post(handle_add_uri_with_auth))
        .route("/add/video/:owner/:uri", post(handle_add_video))
        .route("/status/:owner", get(handle_status))
        .route("/notify", post(handle_notify))
        .layer(TraceLayer::new_for_http())
        .with_state(core)
}

/// Serve until Ctrl-C or until the core shuts down
pub async fn serve(core: DlrelayCore, addr: SocketAddr) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("cannot bind {}", addr))?;
    info!("dlrelay listening on http://{}", listener.local_addr()?);

    let shutdown = core.shutdown_token();
    axum::serve(listener, router(core.clone()))
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("Interrupt received"),
                _ = shutdown.cancelled() => {}
            }
        })
        .await?;

    core.shutdown();
    Ok(())
}

// ============================================================================
// Errors
// ============================================================================

/// Core error rendered as an `ERROR` reply with a matching status code
pub struct ApiError(DlrelayError);

impl From<DlrelayError> for ApiError {
    fn from(e: DlrelayError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            warn!("Request failed: {}", self.0);
        }
        let body = Json(SubmitResponse::Error {
            message: self.0.to_string(),
        });
        if self.0.is_retryable() {
            return (status, [(header::RETRY_AFTER, RETRY_AFTER_SECS)], body).into_response();
        }
        (status, body).into_response()
    }
}

// ============================================================================
// HTTP Handlers
// ============================================================================

fn credentials(headers: &HeaderMap) -> Credentials {
    let value = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string()
    };
    Credentials::new(value(USER_HEADER), value(PASSWORD_HEADER))
}

async fn submit(
    core: &DlrelayCore,
    headers: &HeaderMap,
    owner: &str,
    uri: &str,
    kind: SourceKind,
    auth: Option<HttpAuth>,
) -> Result<Json<SubmitResponse>, ApiError> {
    let handle = core
        .create_download(&credentials(headers), owner, uri, kind, auth)
        .await?;
    Ok(Json(SubmitResponse::Ok { gid: handle.gid }))
}

/// POST /add/torrent/:owner/:uri
async fn handle_add_torrent(
    State(core): State<DlrelayCore>,
    Path((owner, uri)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Json<SubmitResponse>, ApiError> {
    submit(&core, &headers, &owner, &uri, SourceKind::Torrent, None).await
}

/// POST /add/uri/:owner/:uri
async fn handle_add_uri(
    State(core): State<DlrelayCore>,
    Path((owner, uri)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Json<SubmitResponse>, ApiError> {
    submit(&core, &headers, &owner, &uri, SourceKind::Http, None).await
}

/// POST /add/uri/:owner/:user/:password/:uri
async fn handle_add_uri_with_auth(
    State(core): State<DlrelayCore>,
    Path((owner, username, password, uri)): Path<(String, String, String, String)>,
    headers: HeaderMap,
) -> Result<Json<SubmitResponse>, ApiError> {
    let auth = HttpAuth { username, password };
    submit(&core, &headers, &owner, &uri, SourceKind::Http, Some(auth)).await
}

/// POST /add/video/:owner/:uri
async fn handle_add_video(
    State(core): State<DlrelayCore>,
    Path((owner, uri)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Json<SubmitResponse>, ApiError> {
    let uri = video_uri(uri);
    submit(&core, &headers, &owner, &uri, SourceKind::Video, None).await
}

/// GET /status/:owner
async fn handle_status(
    State(core): State<DlrelayCore>,
    Path(owner): Path<String>,
    headers: HeaderMap,
) -> Result<Json<ProgressSnapshot>, ApiError> {
    let snapshot = core.query_status(&credentials(&headers), &owner).await?;
    Ok(Json(snapshot))
}

/// POST /notify - engine push channel
async fn handle_notify(
    State(core): State<DlrelayCore>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<ReconcileOutcome>, ApiError> {
    let token = headers
        .get(NOTIFY_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok());
    core.authorize_notifier(token)?;
    let outcome = core.ingest_notification(&body).await?;
    Ok(Json(outcome))
}

/// Browser integrations encode video links twice; undo the second layer
fn video_uri(uri: String) -> String {
    if uri.contains("://") {
        return uri;
    }
    match urlencoding::decode(&uri) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => uri,
    }
}
