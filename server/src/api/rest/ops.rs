//! Share mutation routes: mkdir, delete, move

use crate::api::AppState;
use axum::{
    extract::{rejection::JsonRejection, State},
    routing::post,
    Json, Router,
};

use super::error::AppError;
use super::types::{CreatedResponse, DeletedResponse, MoveRequest, MovedResponse, PathRequest};

pub fn ops_routes() -> Router<AppState> {
    Router::new()
        .route("/api/mkdir", post(make_dir))
        .route("/api/delete", post(delete_path))
        .route("/api/move", post(move_path))
}

async fn make_dir(
    State(state): State<AppState>,
    payload: Result<Json<PathRequest>, JsonRejection>,
) -> Result<Json<CreatedResponse>, AppError> {
    let Json(req) = payload?;
    let created = state.coordinator.make_dir(req.path).await?;
    Ok(Json(CreatedResponse { created }))
}

async fn delete_path(
    State(state): State<AppState>,
    payload: Result<Json<PathRequest>, JsonRejection>,
) -> Result<Json<DeletedResponse>, AppError> {
    let Json(req) = payload?;
    let deleted = state.coordinator.delete(req.path).await?;
    Ok(Json(DeletedResponse { deleted }))
}

async fn move_path(
    State(state): State<AppState>,
    payload: Result<Json<MoveRequest>, JsonRejection>,
) -> Result<Json<MovedResponse>, AppError> {
    let Json(req) = payload?;
    let (moved, to) = state
        .coordinator
        .move_entry(req.source, req.destination)
        .await?;
    Ok(Json(MovedResponse { moved, to }))
}
