//! Resumable upload routes
//!
//! `POST /api/upload/session` opens (or resumes) a session, then the client
//! sends `PUT /api/upload/:id` chunks in order with a `Content-Range`
//! header. The file appears at its target once the last byte is durable.

use crate::api::AppState;
use crate::storage::UploadView;
use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, Path, State},
    http::{header, HeaderMap, StatusCode},
    routing::{get, post, put},
    Json, Router,
};

use super::error::AppError;
use super::types::{CancelResponse, CreateSessionRequest};

// ============================================================================
// ROUTES
// ============================================================================

pub fn upload_routes() -> Router<AppState> {
    Router::new()
        .route("/api/upload/session", post(create_session))
        .route("/api/upload/:id", put(upload_chunk).delete(cancel_upload))
        .route("/api/upload/:id/status", get(upload_status))
}

// ============================================================================
// HANDLERS
// ============================================================================

async fn create_session(
    State(state): State<AppState>,
    payload: Result<Json<CreateSessionRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<UploadView>), AppError> {
    let Json(req) = payload?;
    let view = state
        .coordinator
        .create_session(req.path, req.size, req.resume, req.overwrite)
        .await?;
    Ok((StatusCode::CREATED, Json(view)))
}

async fn upload_chunk(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<UploadView>, AppError> {
    let content_range = headers
        .get(header::CONTENT_RANGE)
        .map(|v| {
            v.to_str()
                .map_err(|_| AppError::BadRequest("Content-Range is not valid ASCII".into()))
        })
        .transpose()?;

    let view = state
        .coordinator
        .append_chunk(id, content_range, body)
        .await?;
    Ok(Json(view))
}

async fn upload_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<UploadView>, AppError> {
    Ok(Json(state.coordinator.status(id).await?))
}

async fn cancel_upload(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<CancelResponse>, AppError> {
    state.coordinator.cancel(id.clone()).await?;
    Ok(Json(CancelResponse { deleted: id }))
}
