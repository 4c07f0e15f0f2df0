//! Error handling for REST API
//!
//! Every storage error converts into `AppError`, which renders a JSON body
//! `{"error": ..., "code": ...}` with a stable machine-readable code.

use crate::storage::{ArchiveError, BrowseError, PathError, RangeError, UploadError};
use axum::{
    extract::rejection::JsonRejection,
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use serde_json::json;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    Forbidden(String),
    PathEscape(String),
    RangeInvalid(String),
    SessionNotFound(String),
    PathNotFound(String),
    SequenceMismatch { expected: u64, got: u64 },
    TargetExists(String),
    /// Carries the size of the file the range was requested against
    RangeNotSatisfiable(u64),
    Internal(String),
}

impl AppError {
    pub fn code(&self) -> &'static str {
        match self {
            AppError::BadRequest(_) => "bad_request",
            AppError::Forbidden(_) => "forbidden",
            AppError::PathEscape(_) => "path_escape",
            AppError::RangeInvalid(_) => "range_invalid",
            AppError::SessionNotFound(_) => "session_not_found",
            AppError::PathNotFound(_) => "path_not_found",
            AppError::SequenceMismatch { .. } => "sequence_mismatch",
            AppError::TargetExists(_) => "target_exists",
            AppError::RangeNotSatisfiable(_) => "range_not_satisfiable",
            AppError::Internal(_) => "internal",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) | AppError::RangeInvalid(_) => StatusCode::BAD_REQUEST,
            AppError::Forbidden(_) | AppError::PathEscape(_) => StatusCode::FORBIDDEN,
            AppError::SessionNotFound(_) | AppError::PathNotFound(_) => StatusCode::NOT_FOUND,
            AppError::SequenceMismatch { .. } | AppError::TargetExists(_) => StatusCode::CONFLICT,
            AppError::RangeNotSatisfiable(_) => StatusCode::RANGE_NOT_SATISFIABLE,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status();
        let code = self.code();

        let body = match self {
            AppError::SequenceMismatch { expected, got } => json!({
                "error": format!("Unexpected chunk start {}, expected {}", got, expected),
                "code": code,
                "expected": expected,
            }),
            AppError::RangeNotSatisfiable(size) => {
                let body = json!({
                    "error": format!("Requested range not satisfiable for {} bytes", size),
                    "code": code,
                });
                return (
                    status,
                    [(header::CONTENT_RANGE, format!("bytes */{}", size))],
                    Json(body),
                )
                    .into_response();
            }
            AppError::Internal(msg) => {
                // Log full details server-side, return generic message to client
                tracing::error!(details = %msg, "Internal server error");
                json!({ "error": "An internal error occurred", "code": code })
            }
            AppError::BadRequest(msg)
            | AppError::Forbidden(msg)
            | AppError::PathEscape(msg)
            | AppError::RangeInvalid(msg)
            | AppError::SessionNotFound(msg)
            | AppError::PathNotFound(msg)
            | AppError::TargetExists(msg) => json!({ "error": msg, "code": code }),
        };

        (status, Json(body)).into_response()
    }
}

// ============================================================================
// CONVERSIONS
// ============================================================================

impl From<PathError> for AppError {
    fn from(err: PathError) -> Self {
        match err {
            PathError::Escape(path) => AppError::PathEscape(format!("Path escapes share root: {}", path)),
            PathError::Invalid(msg) => AppError::BadRequest(msg),
            PathError::Io(e) => AppError::Internal(e.to_string()),
        }
    }
}

impl From<UploadError> for AppError {
    fn from(err: UploadError) -> Self {
        match err {
            UploadError::SessionNotFound(id) => {
                AppError::SessionNotFound(format!("Upload session not found: {}", id))
            }
            UploadError::SequenceMismatch { expected, got } => {
                AppError::SequenceMismatch { expected, got }
            }
            UploadError::RangeInvalid(msg) => AppError::RangeInvalid(msg),
            UploadError::TargetExists(path) => {
                AppError::TargetExists(format!("Target already exists: {}", path))
            }
            UploadError::TargetIsDirectory(path) => {
                AppError::BadRequest(format!("Upload target is a directory: {}", path))
            }
            UploadError::ParentNotDirectory(path) => {
                AppError::BadRequest(format!("Upload target is below a regular file: {}", path))
            }
            UploadError::Path(e) => e.into(),
            other => AppError::Internal(other.to_string()),
        }
    }
}

impl From<RangeError> for AppError {
    fn from(err: RangeError) -> Self {
        match err {
            RangeError::NotFound(_) => AppError::PathNotFound("File not found".into()),
            RangeError::NotSatisfiable { size } => AppError::RangeNotSatisfiable(size),
            RangeError::Io(e) => AppError::Internal(e.to_string()),
        }
    }
}

impl From<ArchiveError> for AppError {
    fn from(err: ArchiveError) -> Self {
        match err {
            ArchiveError::PathNotFound(path) => AppError::PathNotFound(format!("Path not found: {}", path)),
            ArchiveError::Path(e) => e.into(),
            other => AppError::Internal(other.to_string()),
        }
    }
}

impl From<BrowseError> for AppError {
    fn from(err: BrowseError) -> Self {
        match err {
            BrowseError::PathNotFound(path) => AppError::PathNotFound(format!("Path not found: {}", path)),
            BrowseError::NotADirectory(path) => {
                AppError::PathNotFound(format!("Not a directory: {}", path))
            }
            BrowseError::RootProtected => {
                AppError::BadRequest("The share root cannot be deleted or moved".into())
            }
            BrowseError::Path(e) => e.into(),
            BrowseError::Io(e) => AppError::Internal(e.to_string()),
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(err: JsonRejection) -> Self {
        AppError::BadRequest(err.body_text())
    }
}

impl From<tokio::task::JoinError> for AppError {
    fn from(err: tokio::task::JoinError) -> Self {
        AppError::Internal(format!("Blocking task failed: {}", err))
    }
}
