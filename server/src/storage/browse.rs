//! Directory listings and simple tree operations inside the share

use super::paths::{is_missing, PathError, ShareRoot};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BrowseError {
    #[error("Path not found: {0}")]
    PathNotFound(String),
    #[error("Not a directory: {0}")]
    NotADirectory(String),
    #[error("Refusing to modify the share root")]
    RootProtected,
    #[error(transparent)]
    Path(#[from] PathError),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Dir,
    File,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirEntry {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: EntryKind,
    /// Bytes for files, 0 for directories
    pub size: u64,
    /// Local time, seconds precision
    pub modified: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Listing {
    pub path: String,
    pub entries: Vec<DirEntry>,
}

fn format_modified(meta: &fs::Metadata) -> String {
    meta.modified()
        .map(|time| {
            DateTime::<Local>::from(time)
                .format("%Y-%m-%dT%H:%M:%S")
                .to_string()
        })
        .unwrap_or_default()
}

/// List a directory: subdirectories first, then files, each group ordered
/// case-insensitively. Dot entries are left out.
pub fn list_directory(share: &ShareRoot, relative: &str) -> Result<Listing, BrowseError> {
    let path = ShareRoot::normalize(relative)?;
    let resolved = share.resolve(&path)?;
    let meta = match fs::metadata(&resolved) {
        Ok(meta) => meta,
        Err(err) if is_missing(&err) => return Err(BrowseError::PathNotFound(path)),
        Err(err) => return Err(err.into()),
    };
    if !meta.is_dir() {
        return Err(BrowseError::NotADirectory(path));
    }

    let mut entries = Vec::new();
    for entry in fs::read_dir(&resolved)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') {
            continue;
        }
        // Follows links; dangling ones are skipped
        let Ok(meta) = fs::metadata(entry.path()) else {
            continue;
        };
        let kind = if meta.is_dir() {
            EntryKind::Dir
        } else {
            EntryKind::File
        };
        entries.push(DirEntry {
            name,
            kind,
            size: if kind == EntryKind::File { meta.len() } else { 0 },
            modified: format_modified(&meta),
        });
    }

    entries.sort_by(|a, b| {
        let a_file = a.kind == EntryKind::File;
        let b_file = b.kind == EntryKind::File;
        a_file
            .cmp(&b_file)
            .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
    });

    Ok(Listing { path, entries })
}

/// Create a directory and any missing parents. Existing directories are fine.
pub fn make_dir(share: &ShareRoot, relative: &str) -> Result<String, BrowseError> {
    let path = ShareRoot::normalize(relative)?;
    let resolved = share.resolve(&path)?;
    if share.blocked_by_file(&resolved) {
        return Err(BrowseError::NotADirectory(path));
    }
    fs::create_dir_all(&resolved)?;
    tracing::info!("Created directory {}", path);
    Ok(path)
}

fn existing(share: &ShareRoot, relative: &str) -> Result<(String, PathBuf), BrowseError> {
    let path = ShareRoot::normalize(relative)?;
    let resolved = share.resolve(&path)?;
    if share.is_root(&resolved) {
        return Err(BrowseError::RootProtected);
    }
    if fs::symlink_metadata(&resolved).is_err() {
        return Err(BrowseError::PathNotFound(path));
    }
    Ok((path, resolved))
}

/// Delete a file or a whole directory tree.
pub fn delete(share: &ShareRoot, relative: &str) -> Result<String, BrowseError> {
    let (path, resolved) = existing(share, relative)?;
    if resolved.is_dir() {
        fs::remove_dir_all(&resolved)?;
    } else {
        fs::remove_file(&resolved)?;
    }
    tracing::info!("Deleted {}", path);
    Ok(path)
}

/// Move or rename an entry, creating the destination's parent directories.
pub fn move_entry(
    share: &ShareRoot,
    source: &str,
    destination: &str,
) -> Result<(String, String), BrowseError> {
    let (from, from_resolved) = existing(share, source)?;
    let to = ShareRoot::normalize(destination)?;
    let to_resolved = share.resolve(&to)?;
    if share.is_root(&to_resolved) {
        return Err(BrowseError::RootProtected);
    }
    if share.blocked_by_file(&to_resolved) {
        return Err(BrowseError::NotADirectory(to));
    }

    if let Some(parent) = to_resolved.parent() {
        fs::create_dir_all(parent)?;
    }
    match fs::rename(&from_resolved, &to_resolved) {
        Ok(()) => {}
        Err(err) if is_missing(&err) => return Err(BrowseError::PathNotFound(from)),
        Err(err) => return Err(err.into()),
    }
    tracing::info!("Moved {} to {}", from, to);
    Ok((from, to))
}
