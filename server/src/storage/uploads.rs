//! Resumable upload sessions
//!
//! A session tracks how many contiguous bytes of a declared-size upload
//! have been durably written to its staging file. Chunks must arrive in
//! order: each one starts exactly where the previous one ended. A chunk is
//! only acknowledged after both the staging bytes and the session record
//! are synced to disk, so a restart resumes from the recorded offset.
//!
//! ## On-disk layout
//!
//! ```text
//! <state_dir>/uploads/<id>.json   session record
//! <state_dir>/uploads/<id>.part   staging bytes
//! ```

use super::paths::{PathError, ShareRoot};
use super::records::{FileRecords, SessionRecords};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::fs::{self, File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;
use uuid::Uuid;

/// How many finalized sessions `status` still answers for.
const FINALIZED_MEMORY: usize = 256;
const STAGING_EXTENSION: &str = "part";

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("Upload session not found: {0}")]
    SessionNotFound(String),
    #[error("Unexpected chunk start: expected {expected}, got {got}")]
    SequenceMismatch { expected: u64, got: u64 },
    #[error("Invalid chunk range: {0}")]
    RangeInvalid(String),
    #[error("Target file exists: {0}")]
    TargetExists(String),
    #[error("Target path points to a directory: {0}")]
    TargetIsDirectory(String),
    #[error("Target path runs through a regular file: {0}")]
    ParentNotDirectory(String),
    #[error(transparent)]
    Path(#[from] PathError),
    #[error("Corrupt session record {id}: {source}")]
    CorruptRecord {
        id: String,
        source: serde_json::Error,
    },
    #[error("Failed to encode session record: {0}")]
    Encode(serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Persisted state of one in-flight upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadSession {
    pub upload_id: String,
    /// Normalized destination relative to the share root
    pub target_path: String,
    pub staging_file: PathBuf,
    pub total_size: u64,
    /// Contiguous bytes durably written so far
    pub received: u64,
    pub overwrite: bool,
    pub created_at: DateTime<Utc>,
}

impl UploadSession {
    pub fn is_complete(&self) -> bool {
        self.received >= self.total_size && self.total_size > 0
    }

    pub fn view(&self) -> UploadView {
        UploadView {
            upload_id: self.upload_id.clone(),
            target_path: self.target_path.clone(),
            total_size: self.total_size,
            received: self.received,
            overwrite: self.overwrite,
            created_at: self.created_at,
            completed: self.is_complete(),
        }
    }
}

/// What clients get to see of a session. The staging location stays private.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadView {
    pub upload_id: String,
    pub target_path: String,
    pub total_size: u64,
    pub received: u64,
    pub overwrite: bool,
    pub created_at: DateTime<Utc>,
    pub completed: bool,
}

/// Outcome of [`UploadStore::recover_all`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RecoveryReport {
    pub resumable: usize,
    pub discarded: usize,
    pub orphans_removed: usize,
}

#[derive(Default)]
struct StoreState {
    finalized: VecDeque<UploadView>,
}

/// Upload session state machine.
///
/// Every mutation goes through one store-owned lock, held for the
/// check/update and the durability write only. Callers run these methods
/// on a blocking thread.
pub struct UploadStore<R = FileRecords> {
    share: ShareRoot,
    records: R,
    staging_dir: PathBuf,
    state: Mutex<StoreState>,
}

impl UploadStore<FileRecords> {
    /// Open the file-backed store under `<state_dir>/uploads`.
    pub fn open(share: ShareRoot, state_dir: &Path) -> Result<Self, UploadError> {
        let upload_dir = state_dir.join("uploads");
        let records = FileRecords::new(&upload_dir)?;
        Ok(Self::with_records(share, records, upload_dir))
    }
}

impl<R: SessionRecords> UploadStore<R> {
    pub fn with_records(share: ShareRoot, records: R, staging_dir: PathBuf) -> Self {
        Self {
            share,
            records,
            staging_dir,
            state: Mutex::new(StoreState::default()),
        }
    }

    pub fn share(&self) -> &ShareRoot {
        &self.share
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        // Records on disk are the source of truth; a panic elsewhere does not
        // invalidate them.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn staging_path(&self, id: &str) -> Option<PathBuf> {
        Uuid::try_parse(id).ok()?;
        Some(self.staging_dir.join(format!("{}.{}", id, STAGING_EXTENSION)))
    }

    /// Start a new upload, or with `resume` pick up an unfinished one for the
    /// same target and size.
    ///
    /// Resume discovery matches on `(target_path, total_size)` only.
    pub fn create(
        &self,
        target: &str,
        total_size: u64,
        resume: bool,
        overwrite: bool,
    ) -> Result<UploadView, UploadError> {
        let target_path = ShareRoot::normalize(target)?;
        let resolved = self.share.resolve(&target_path)?;
        if target_path.is_empty() || resolved.is_dir() {
            return Err(UploadError::TargetIsDirectory(target.to_string()));
        }
        if self.share.blocked_by_file(&resolved) {
            return Err(UploadError::ParentNotDirectory(target_path));
        }

        let _guard = self.lock();

        if resume {
            for id in self.records.ids()? {
                match self.records.load(&id) {
                    Ok(Some(session))
                        if session.target_path == target_path
                            && session.total_size == total_size =>
                    {
                        tracing::info!(
                            upload_id = %session.upload_id,
                            received = session.received,
                            "Resuming upload session for {}",
                            target_path
                        );
                        return Ok(session.view());
                    }
                    Ok(_) => {}
                    Err(err) => tracing::warn!("Skipping unreadable upload record {}: {}", id, err),
                }
            }
        }

        let upload_id = Uuid::new_v4().simple().to_string();
        let staging_file = self
            .staging_path(&upload_id)
            .ok_or_else(|| UploadError::SessionNotFound(upload_id.clone()))?;
        File::create(&staging_file)?.sync_all()?;

        let session = UploadSession {
            upload_id,
            target_path,
            staging_file,
            total_size,
            received: 0,
            overwrite,
            created_at: Utc::now(),
        };
        if let Err(err) = self.records.store(&session) {
            let _ = fs::remove_file(&session.staging_file);
            return Err(err);
        }

        tracing::info!(
            upload_id = %session.upload_id,
            total_size,
            overwrite,
            "Created upload session for {}",
            session.target_path
        );
        Ok(session.view())
    }

    /// Accept the bytes `[start, end_exclusive)` of an upload.
    ///
    /// The write is synced, then the record, before this returns. When the
    /// last byte arrives the staging file is moved onto the target.
    pub fn append_chunk(
        &self,
        id: &str,
        start: u64,
        end_exclusive: u64,
        bytes: &[u8],
    ) -> Result<UploadView, UploadError> {
        let mut state = self.lock();

        let mut session = self
            .records
            .load(id)?
            .ok_or_else(|| UploadError::SessionNotFound(id.to_string()))?;

        if start != session.received {
            return Err(UploadError::SequenceMismatch {
                expected: session.received,
                got: start,
            });
        }
        if end_exclusive < start {
            return Err(UploadError::RangeInvalid(format!(
                "range end {} before start {}",
                end_exclusive, start
            )));
        }
        if end_exclusive > session.total_size {
            return Err(UploadError::RangeInvalid(format!(
                "chunk end {} exceeds declared size {}",
                end_exclusive, session.total_size
            )));
        }
        if bytes.len() as u64 != end_exclusive - start {
            return Err(UploadError::RangeInvalid(format!(
                "payload is {} bytes but range covers {}",
                bytes.len(),
                end_exclusive - start
            )));
        }

        if let Err(err) = self.write_staging(&session, start, end_exclusive, bytes) {
            if matches!(err, UploadError::SessionNotFound(_)) {
                tracing::warn!(upload_id = %id, "Discarding upload session with damaged staging file");
                self.discard(id, Some(&session.staging_file));
            }
            return Err(err);
        }

        session.received = end_exclusive;
        self.records.store(&session)?;

        tracing::debug!(
            upload_id = %id,
            start,
            end_exclusive,
            total = session.total_size,
            "Accepted upload chunk"
        );

        if session.received == session.total_size {
            self.finalize(&session)?;
            let mut view = session.view();
            view.completed = true;
            state.finalized.push_back(view.clone());
            if state.finalized.len() > FINALIZED_MEMORY {
                state.finalized.pop_front();
            }
            return Ok(view);
        }

        Ok(session.view())
    }

    fn write_staging(
        &self,
        session: &UploadSession,
        start: u64,
        end_exclusive: u64,
        bytes: &[u8],
    ) -> Result<(), UploadError> {
        let mut file = match OpenOptions::new().write(true).open(&session.staging_file) {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(UploadError::SessionNotFound(session.upload_id.clone()));
            }
            Err(err) => return Err(err.into()),
        };
        // A staging file shorter than the recorded offset lost bytes we acknowledged.
        if file.metadata()?.len() < start {
            return Err(UploadError::SessionNotFound(session.upload_id.clone()));
        }

        file.seek(SeekFrom::Start(start))?;
        file.write_all(bytes)?;
        file.set_len(end_exclusive)?;
        file.flush()?;
        file.sync_all()?;
        Ok(())
    }

    /// Move a complete staging file onto its target and drop the record.
    fn finalize(&self, session: &UploadSession) -> Result<(), UploadError> {
        let target = self.share.resolve(&session.target_path)?;
        if target.is_dir() || (target.exists() && !session.overwrite) {
            tracing::warn!(
                upload_id = %session.upload_id,
                "Refusing to overwrite existing target {}",
                session.target_path
            );
            return Err(UploadError::TargetExists(session.target_path.clone()));
        }
        if self.share.blocked_by_file(&target) {
            return Err(UploadError::ParentNotDirectory(session.target_path.clone()));
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }

        move_into_place(&session.staging_file, &target)?;
        self.records.remove(&session.upload_id)?;

        tracing::info!(
            upload_id = %session.upload_id,
            size = session.total_size,
            "Finalized upload to {}",
            session.target_path
        );
        Ok(())
    }

    pub fn status(&self, id: &str) -> Result<UploadView, UploadError> {
        let state = self.lock();
        if let Some(session) = self.records.load(id)? {
            return Ok(session.view());
        }
        state
            .finalized
            .iter()
            .find(|view| view.upload_id == id)
            .cloned()
            .ok_or_else(|| UploadError::SessionNotFound(id.to_string()))
    }

    /// Drop a session and its staging bytes. Returns whether anything existed.
    pub fn cancel(&self, id: &str) -> Result<bool, UploadError> {
        let mut state = self.lock();
        state.finalized.retain(|view| view.upload_id != id);

        let staging = match self.records.load(id) {
            Ok(Some(session)) => Some(session.staging_file),
            Ok(None) => None,
            Err(err) => {
                tracing::warn!(upload_id = %id, "Cancelling unreadable upload record: {}", err);
                self.staging_path(id)
            }
        };
        let existed = staging.is_some();
        let staging = staging.or_else(|| self.staging_path(id));

        self.records.remove(id)?;
        if let Some(path) = staging {
            remove_if_exists(&path)?;
        }
        if existed {
            tracing::info!(upload_id = %id, "Cancelled upload session");
        }
        Ok(existed)
    }

    /// Every readable in-flight session, oldest first.
    pub fn list(&self) -> Result<Vec<UploadView>, UploadError> {
        let _guard = self.lock();
        let mut sessions = Vec::new();
        for id in self.records.ids()? {
            if let Ok(Some(session)) = self.records.load(&id) {
                sessions.push(session.view());
            }
        }
        sessions.sort_by_key(|view| view.created_at);
        Ok(sessions)
    }

    /// Scan persisted sessions after a restart.
    ///
    /// Broken sessions are cleaned up instead of failing startup: unreadable
    /// records, missing staging files and staging files shorter than the
    /// recorded offset. Bytes past the recorded offset were never
    /// acknowledged and are truncated.
    pub fn recover_all(&self) -> Result<RecoveryReport, UploadError> {
        let _guard = self.lock();
        let mut report = RecoveryReport::default();
        let mut live = HashSet::new();

        let stale = self.records.compact()?;
        if stale > 0 {
            tracing::debug!("Removed {} interrupted record writes", stale);
        }

        for id in self.records.ids()? {
            match self.records.load(&id) {
                Ok(Some(session)) => match check_staging(&session) {
                    Ok(()) => {
                        live.insert(id);
                        report.resumable += 1;
                    }
                    Err(reason) => {
                        tracing::warn!(upload_id = %id, "Discarding upload session: {}", reason);
                        self.discard(&id, Some(&session.staging_file));
                        report.discarded += 1;
                    }
                },
                Ok(None) => {}
                Err(err) => {
                    tracing::warn!(upload_id = %id, "Discarding upload session: {}", err);
                    self.discard(&id, None);
                    report.discarded += 1;
                }
            }
        }

        for entry in fs::read_dir(&self.staging_dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(STAGING_EXTENSION) {
                continue;
            }
            let owned = path
                .file_stem()
                .and_then(|s| s.to_str())
                .is_some_and(|stem| live.contains(stem));
            if !owned {
                remove_if_exists(&path)?;
                report.orphans_removed += 1;
            }
        }

        tracing::info!(
            resumable = report.resumable,
            discarded = report.discarded,
            orphans = report.orphans_removed,
            "Recovered upload sessions"
        );
        Ok(report)
    }

    /// Best-effort removal of a broken session.
    fn discard(&self, id: &str, staging: Option<&Path>) {
        if let Err(err) = self.records.remove(id) {
            tracing::warn!(upload_id = %id, "Failed to remove upload record: {}", err);
        }
        let staging = staging.map(Path::to_path_buf).or_else(|| self.staging_path(id));
        if let Some(path) = staging {
            if let Err(err) = remove_if_exists(&path) {
                tracing::warn!(upload_id = %id, "Failed to remove staging file: {}", err);
            }
        }
    }
}

fn check_staging(session: &UploadSession) -> Result<(), String> {
    let len = match fs::metadata(&session.staging_file) {
        Ok(meta) => meta.len(),
        Err(err) => return Err(format!("staging file unavailable: {}", err)),
    };
    if len < session.received {
        return Err(format!(
            "staging file holds {} bytes but {} were acknowledged",
            len, session.received
        ));
    }
    if len > session.received {
        let truncate = || -> std::io::Result<()> {
            let file = OpenOptions::new().write(true).open(&session.staging_file)?;
            file.set_len(session.received)?;
            file.sync_all()
        };
        truncate().map_err(|err| format!("failed to truncate staging file: {}", err))?;
    }
    Ok(())
}

fn remove_if_exists(path: &Path) -> std::io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err),
    }
}

/// Rename the staging file onto the target, copying when they live on
/// different filesystems.
fn move_into_place(staging: &Path, target: &Path) -> std::io::Result<()> {
    if fs::rename(staging, target).is_ok() {
        return Ok(());
    }

    let file_name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp_path = target.with_file_name(format!(".{}.upload-tmp", file_name));
    {
        let mut source = File::open(staging)?;
        let mut dest = File::create(&temp_path)?;
        std::io::copy(&mut source, &mut dest)?;
        dest.sync_all()?;
    }
    if let Err(err) = fs::rename(&temp_path, target) {
        let _ = fs::remove_file(&temp_path);
        return Err(err);
    }
    fs::remove_file(staging)
}
