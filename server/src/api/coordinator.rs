//! Request-level orchestration for transfers and share mutations
//!
//! Handlers hand validated inputs to the [`TransferCoordinator`], which
//! applies the write gate, runs the blocking storage work off the async
//! runtime and converts storage errors into [`AppError`]s. It keeps no state
//! of its own beyond its configuration.

use crate::api::rest::error::AppError;
use crate::storage::{browse, build_archive, Archive, Listing, ShareRoot, UploadStore, UploadView};
use axum::body::Bytes;
use std::path::PathBuf;
use std::sync::Arc;

/// Parsed `Content-Range` of an upload chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkRange {
    pub start: u64,
    /// One past the last byte
    pub end: u64,
    pub total: u64,
}

impl ChunkRange {
    /// Accepts `bytes start-end/total` (end inclusive) and `bytes */total`, an
    /// empty chunk at the end offset. The empty form finalizes zero-byte
    /// uploads and retries a finalize that was refused earlier.
    pub fn parse(header: &str) -> Result<Self, AppError> {
        let invalid = || AppError::BadRequest(format!("Malformed Content-Range: {}", header));

        let ranges = header.trim().strip_prefix("bytes ").ok_or_else(invalid)?;
        let (span, total) = ranges.split_once('/').ok_or_else(invalid)?;
        let total = parse_number(total).ok_or_else(invalid)?;

        if span.trim() == "*" {
            return Ok(Self {
                start: total,
                end: total,
                total,
            });
        }

        let (start, end) = span.split_once('-').ok_or_else(invalid)?;
        let start = parse_number(start).ok_or_else(invalid)?;
        let last = parse_number(end).ok_or_else(invalid)?;
        if last < start || last >= total {
            return Err(invalid());
        }
        Ok(Self {
            start,
            end: last + 1,
            total,
        })
    }

    pub fn len(&self) -> u64 {
        self.end - self.start
    }
}

fn parse_number(value: &str) -> Option<u64> {
    let value = value.trim();
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    value.parse().ok()
}

async fn blocking<T, E, F>(f: F) -> Result<T, AppError>
where
    F: FnOnce() -> Result<T, E> + Send + 'static,
    T: Send + 'static,
    E: Into<AppError> + Send + 'static,
{
    tokio::task::spawn_blocking(f).await?.map_err(Into::into)
}

pub struct TransferCoordinator {
    read_only: bool,
    allow_overwrite: bool,
    spool_limit: usize,
    share: Arc<ShareRoot>,
    uploads: Arc<UploadStore>,
}

impl TransferCoordinator {
    pub fn new(
        uploads: Arc<UploadStore>,
        read_only: bool,
        allow_overwrite: bool,
        spool_limit: usize,
    ) -> Self {
        Self {
            read_only,
            allow_overwrite,
            spool_limit,
            share: Arc::new(uploads.share().clone()),
            uploads,
        }
    }

    pub fn share(&self) -> &ShareRoot {
        &self.share
    }

    pub fn read_only(&self) -> bool {
        self.read_only
    }

    pub fn allow_overwrite(&self) -> bool {
        self.allow_overwrite
    }

    /// Checked before any path is looked at.
    fn require_write(&self) -> Result<(), AppError> {
        if self.read_only {
            return Err(AppError::Forbidden("Server is read-only".into()));
        }
        Ok(())
    }

    // ========================================================================
    // UPLOADS
    // ========================================================================

    pub async fn create_session(
        &self,
        path: String,
        size: u64,
        resume: bool,
        overwrite: Option<bool>,
    ) -> Result<UploadView, AppError> {
        self.require_write()?;
        let overwrite = overwrite.unwrap_or(self.allow_overwrite);
        let uploads = self.uploads.clone();
        blocking(move || uploads.create(&path, size, resume, overwrite)).await
    }

    pub async fn append_chunk(
        &self,
        id: String,
        content_range: Option<&str>,
        body: Bytes,
    ) -> Result<UploadView, AppError> {
        self.require_write()?;
        let range = ChunkRange::parse(
            content_range.ok_or_else(|| AppError::BadRequest("Missing Content-Range header".into()))?,
        )?;
        if body.len() as u64 != range.len() {
            return Err(AppError::BadRequest(format!(
                "Body is {} bytes but Content-Range covers {}",
                body.len(),
                range.len()
            )));
        }

        let uploads = self.uploads.clone();
        blocking(move || {
            let session = uploads.status(&id)?;
            if range.total != session.total_size {
                return Err(AppError::RangeInvalid(format!(
                    "Declared total {} does not match session size {}",
                    range.total, session.total_size
                )));
            }
            Ok(uploads.append_chunk(&id, range.start, range.end, &body)?)
        })
        .await
    }

    pub async fn status(&self, id: String) -> Result<UploadView, AppError> {
        let uploads = self.uploads.clone();
        blocking(move || uploads.status(&id)).await
    }

    pub async fn cancel(&self, id: String) -> Result<bool, AppError> {
        self.require_write()?;
        let uploads = self.uploads.clone();
        blocking(move || uploads.cancel(&id)).await
    }

    // ========================================================================
    // SHARE OPERATIONS
    // ========================================================================

    /// Resolve a download path off the async runtime.
    pub async fn resolve(&self, path: String) -> Result<PathBuf, AppError> {
        let share = self.share.clone();
        blocking(move || share.resolve(&path)).await
    }

    pub async fn list(&self, path: String) -> Result<Listing, AppError> {
        let share = self.share.clone();
        blocking(move || browse::list_directory(&share, &path)).await
    }

    pub async fn make_dir(&self, path: String) -> Result<String, AppError> {
        self.require_write()?;
        let share = self.share.clone();
        blocking(move || browse::make_dir(&share, &path)).await
    }

    pub async fn delete(&self, path: String) -> Result<String, AppError> {
        self.require_write()?;
        let share = self.share.clone();
        blocking(move || browse::delete(&share, &path)).await
    }

    pub async fn move_entry(
        &self,
        source: String,
        destination: String,
    ) -> Result<(String, String), AppError> {
        self.require_write()?;
        let share = self.share.clone();
        blocking(move || browse::move_entry(&share, &source, &destination)).await
    }

    pub async fn archive(&self, paths: Vec<String>) -> Result<Archive, AppError> {
        if paths.is_empty() {
            return Err(AppError::BadRequest("No paths given".into()));
        }
        let share = self.share.clone();
        let spool_limit = self.spool_limit;
        blocking(move || build_archive(&share, &paths, spool_limit)).await
    }
}
