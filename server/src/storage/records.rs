//! Durable upload session records
//!
//! One JSON document per session, written atomically (temp file, fsync,
//! rename, directory fsync) so a record on disk is always either the old
//! or the new version of the session.

use super::uploads::{UploadError, UploadSession};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use uuid::Uuid;

const RECORD_EXTENSION: &str = "json";
const TEMP_EXTENSION: &str = "json.tmp";

/// Key-value persistence for upload sessions, keyed by session id.
///
/// `store` must not return before the record is durable.
pub trait SessionRecords: Send + Sync {
    /// Load a session. `Ok(None)` when no record exists for `id`.
    fn load(&self, id: &str) -> Result<Option<UploadSession>, UploadError>;

    fn store(&self, session: &UploadSession) -> Result<(), UploadError>;

    /// Remove a record. Missing records are not an error.
    fn remove(&self, id: &str) -> Result<(), UploadError>;

    /// Ids of every persisted record, readable or not.
    fn ids(&self) -> Result<Vec<String>, UploadError>;

    /// Drop leftovers of interrupted writes.
    fn compact(&self) -> Result<usize, UploadError> {
        Ok(0)
    }
}

/// File-backed records under `<state_dir>/uploads`.
pub struct FileRecords {
    dir: PathBuf,
}

impl FileRecords {
    pub fn new<P: AsRef<Path>>(dir: P) -> Result<Self, UploadError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Session ids double as file names, so anything that is not a uuid
    /// never maps to a path.
    fn record_path(&self, id: &str) -> Option<PathBuf> {
        Uuid::try_parse(id).ok()?;
        Some(self.dir.join(format!("{}.{}", id, RECORD_EXTENSION)))
    }

    fn sync_dir(&self) -> Result<(), UploadError> {
        #[cfg(unix)]
        File::open(&self.dir)?.sync_all()?;
        Ok(())
    }
}

impl SessionRecords for FileRecords {
    fn load(&self, id: &str) -> Result<Option<UploadSession>, UploadError> {
        let Some(path) = self.record_path(id) else {
            return Ok(None);
        };
        let raw = match fs::read(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let session = serde_json::from_slice(&raw).map_err(|source| UploadError::CorruptRecord {
            id: id.to_string(),
            source,
        })?;
        Ok(Some(session))
    }

    fn store(&self, session: &UploadSession) -> Result<(), UploadError> {
        let path = self
            .record_path(&session.upload_id)
            .ok_or_else(|| UploadError::SessionNotFound(session.upload_id.clone()))?;
        let payload = serde_json::to_vec(session).map_err(UploadError::Encode)?;

        // Write atomically using temp file
        let temp_path = self.dir.join(format!("{}.{}", session.upload_id, TEMP_EXTENSION));
        {
            let mut file = File::create(&temp_path)?;
            file.write_all(&payload)?;
            file.flush()?;
            file.sync_all()?;
        }
        fs::rename(&temp_path, &path)?;
        self.sync_dir()?;

        tracing::debug!(
            upload_id = %session.upload_id,
            received = session.received,
            "Persisted upload session"
        );
        Ok(())
    }

    fn remove(&self, id: &str) -> Result<(), UploadError> {
        let Some(path) = self.record_path(id) else {
            return Ok(());
        };
        match fs::remove_file(&path) {
            Ok(()) => self.sync_dir(),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn ids(&self) -> Result<Vec<String>, UploadError> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXTENSION) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if Uuid::try_parse(stem).is_ok() {
                ids.push(stem.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }

    fn compact(&self) -> Result<usize, UploadError> {
        let mut removed = 0;
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            let is_temp = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(TEMP_EXTENSION));
            if is_temp {
                fs::remove_file(&path)?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}
