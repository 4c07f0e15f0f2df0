//! Browsing and download routes

use crate::api::AppState;
use crate::storage::range::Served;
use crate::storage::{open_range, ByteRange};
use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::Response,
    routing::get,
    Json, Router,
};

use super::error::AppError;
use super::types::{InfoResponse, ListQuery};
use crate::storage::Listing;

// ============================================================================
// ROUTES
// ============================================================================

pub fn file_routes() -> Router<AppState> {
    Router::new()
        .route("/api/info", get(server_info))
        .route("/api/list", get(list_directory))
        .route("/files/*path", get(download_file))
}

// ============================================================================
// HANDLERS
// ============================================================================

async fn server_info(State(state): State<AppState>) -> Json<InfoResponse> {
    let coordinator = &state.coordinator;
    Json(InfoResponse {
        share_root: coordinator.share().path().display().to_string(),
        read_only: coordinator.read_only(),
        overwrite: coordinator.allow_overwrite(),
    })
}

async fn list_directory(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Listing>, AppError> {
    let listing = state.coordinator.list(query.path).await?;
    Ok(Json(listing))
}

/// Stream a file, honouring a single `Range: bytes=start-[end]` request.
async fn download_file(
    State(state): State<AppState>,
    Path(path): Path<String>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let resolved = state.coordinator.resolve(path.clone()).await?;
    let range = headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok())
        .and_then(ByteRange::parse);

    let body = open_range(&resolved, range).await?;
    let mime = mime_guess::from_path(&resolved).first_or_octet_stream();
    let status = match body.served {
        Served::Full => StatusCode::OK,
        Served::Partial { .. } => StatusCode::PARTIAL_CONTENT,
    };

    let mut response = Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, mime.as_ref())
        .header(header::CONTENT_LENGTH, body.length)
        .header(header::ACCEPT_RANGES, "bytes");
    if let Some(content_range) = body.content_range() {
        response = response.header(header::CONTENT_RANGE, content_range);
    }

    tracing::debug!(path = %path, status = %status, bytes = body.length, "Serving file");
    response
        .body(Body::from_stream(body.into_stream()))
        .map_err(|e| AppError::Internal(format!("Failed to build response: {}", e)))
}
