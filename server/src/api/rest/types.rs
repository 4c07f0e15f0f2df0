//! Shared types for REST API
//!
//! Request/response bodies used across the endpoint modules.

use serde::{Deserialize, Serialize};

// ============================================================================
// SERVER
// ============================================================================

#[derive(Serialize)]
pub struct InfoResponse {
    pub share_root: String,
    pub read_only: bool,
    pub overwrite: bool,
}

#[derive(Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub path: String,
}

// ============================================================================
// UPLOADS
// ============================================================================

#[derive(Deserialize)]
pub struct CreateSessionRequest {
    pub path: String,
    pub size: u64,
    #[serde(default)]
    pub resume: bool,
    pub overwrite: Option<bool>,
}

#[derive(Serialize)]
pub struct CancelResponse {
    pub deleted: String,
}

// ============================================================================
// SHARE OPERATIONS
// ============================================================================

#[derive(Deserialize)]
pub struct PathRequest {
    pub path: String,
}

#[derive(Deserialize)]
pub struct MoveRequest {
    pub source: String,
    pub destination: String,
}

#[derive(Serialize)]
pub struct CreatedResponse {
    pub created: String,
}

#[derive(Serialize)]
pub struct DeletedResponse {
    pub deleted: String,
}

#[derive(Serialize)]
pub struct MovedResponse {
    pub moved: String,
    pub to: String,
}

#[derive(Deserialize)]
pub struct ZipRequest {
    pub paths: Vec<String>,
}
