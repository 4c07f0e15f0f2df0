//! ZIP download route

use crate::api::AppState;
use crate::storage::archive_file_name;
use axum::{
    body::Body,
    extract::{rejection::JsonRejection, State},
    http::{header, StatusCode},
    response::Response,
    routing::post,
    Json, Router,
};

use super::error::AppError;
use super::types::ZipRequest;

pub fn archive_routes() -> Router<AppState> {
    Router::new().route("/api/zip", post(download_zip))
}

async fn download_zip(
    State(state): State<AppState>,
    payload: Result<Json<ZipRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let Json(req) = payload?;
    let archive = state.coordinator.archive(req.paths).await?;
    let file_name = archive_file_name();

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/zip")
        .header(header::CONTENT_LENGTH, archive.len)
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", file_name),
        )
        .body(Body::from_stream(archive.into_stream()))
        .map_err(|e| AppError::Internal(format!("Failed to build response: {}", e)))
}
