//! ZIP bundling of shared files and directories
//!
//! The archive is assembled into a spooled temporary file (memory up to a
//! limit, disk beyond it) so its exact length is known before the first
//! byte goes out. Directories get explicit entries, including empty ones.

use super::paths::{PathError, ShareRoot};
use super::range::STREAM_BLOCK_SIZE;
use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;
use tempfile::SpooledTempFile;
use thiserror::Error;
use tokio_stream::wrappers::ReceiverStream;
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("Path not found: {0}")]
    PathNotFound(String),
    #[error(transparent)]
    Path(#[from] PathError),
    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("Walk error: {0}")]
    Walk(#[from] walkdir::Error),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// A finished archive waiting to be sent.
pub struct Archive {
    spool: SpooledTempFile,
    /// Total archive size in bytes
    pub len: u64,
    pub entries: usize,
}

impl Archive {
    /// Stream the archive in bounded blocks from a blocking reader thread.
    pub fn into_stream(self) -> ReceiverStream<io::Result<Vec<u8>>> {
        let (tx, rx) = tokio::sync::mpsc::channel(4);
        let mut spool = self.spool;
        tokio::task::spawn_blocking(move || {
            let mut buf = vec![0u8; STREAM_BLOCK_SIZE];
            loop {
                match spool.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        if tx.blocking_send(Ok(buf[..n].to_vec())).is_err() {
                            tracing::debug!("Archive download abandoned by client");
                            break;
                        }
                    }
                    Err(e) => {
                        let _ = tx.blocking_send(Err(e));
                        break;
                    }
                }
            }
        });
        ReceiverStream::new(rx)
    }
}

/// Download name for a freshly built archive.
pub fn archive_file_name() -> String {
    format!("shareport-{}.zip", chrono::Utc::now().timestamp())
}

struct Builder<'a, W: Write + Seek> {
    share: &'a ShareRoot,
    zip: ZipWriter<W>,
    names: HashSet<String>,
    file_options: SimpleFileOptions,
    dir_options: SimpleFileOptions,
}

impl<W: Write + Seek> Builder<'_, W> {
    fn add_dir_entry(&mut self, name: &str) -> Result<(), ArchiveError> {
        let entry = format!("{}/", name);
        if self.names.insert(entry.clone()) {
            self.zip.add_directory(entry, self.dir_options)?;
        }
        Ok(())
    }

    fn add_file_entry(&mut self, name: &str, path: &Path) -> Result<(), ArchiveError> {
        if !self.names.insert(name.to_string()) {
            return Ok(());
        }
        let mut file = File::open(path)?;
        let mut options = self.file_options;
        if needs_zip64(file.metadata()?.len()) {
            options = options.large_file(true);
        }
        self.zip.start_file(name, options)?;
        io::copy(&mut file, &mut self.zip)?;
        Ok(())
    }

    /// Emit `dir` and everything beneath it under the archive prefix `name`.
    /// An empty `name` puts the contents at the top level.
    fn add_tree(&mut self, name: &str, dir: &Path) -> Result<(), ArchiveError> {
        if !name.is_empty() {
            self.add_dir_entry(name)?;
        }

        for entry in WalkDir::new(dir).min_depth(1).sort_by_file_name() {
            let entry = entry?;
            let rel = relative_name(dir, entry.path());
            let arcname = if name.is_empty() {
                rel
            } else {
                format!("{}/{}", name, rel)
            };

            let file_type = entry.file_type();
            if file_type.is_dir() {
                self.add_dir_entry(&arcname)?;
            } else if file_type.is_file() {
                self.add_file_entry(&arcname, entry.path())?;
            } else if file_type.is_symlink() {
                self.add_link(&arcname, entry.path())?;
            }
        }
        Ok(())
    }

    /// Links are followed only when they land inside the share. Linked
    /// directories get an entry but are not descended into.
    fn add_link(&mut self, arcname: &str, path: &Path) -> Result<(), ArchiveError> {
        let target = match fs::canonicalize(path) {
            Ok(target) if target.starts_with(self.share.path()) => target,
            _ => {
                tracing::warn!("Skipping link outside share: {}", path.display());
                return Ok(());
            }
        };
        if target.is_dir() {
            self.add_dir_entry(arcname)
        } else {
            self.add_file_entry(arcname, &target)
        }
    }
}

/// Entries this large need ZIP64 size fields.
fn needs_zip64(len: u64) -> bool {
    len >= u64::from(u32::MAX)
}

fn relative_name(base: &Path, path: &Path) -> String {
    path.strip_prefix(base)
        .unwrap_or(path)
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// Build a deflated ZIP of `paths`, in order.
///
/// Every path is resolved and checked before compression starts: if any of
/// them is neither a file nor a directory the whole request fails and no
/// archive is produced.
pub fn build_archive(
    share: &ShareRoot,
    paths: &[String],
    spool_limit: usize,
) -> Result<Archive, ArchiveError> {
    let mut targets = Vec::with_capacity(paths.len());
    for requested in paths {
        let name = ShareRoot::normalize(requested)?;
        let resolved = share.resolve(&name)?;
        match fs::metadata(&resolved) {
            Ok(meta) if meta.is_dir() || meta.is_file() => {
                targets.push((name, resolved, meta.is_dir()))
            }
            _ => return Err(ArchiveError::PathNotFound(requested.clone())),
        }
    }

    let mut builder = Builder {
        share,
        zip: ZipWriter::new(tempfile::spooled_tempfile(spool_limit)),
        names: HashSet::new(),
        file_options: SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .unix_permissions(0o644),
        dir_options: SimpleFileOptions::default()
            .compression_method(CompressionMethod::Stored)
            .unix_permissions(0o775),
    };

    for (name, resolved, is_dir) in &targets {
        if *is_dir {
            builder.add_tree(name, resolved)?;
        } else {
            builder.add_file_entry(name, resolved)?;
        }
    }

    let entries = builder.names.len();
    let mut spool = builder.zip.finish()?;
    let len = spool.seek(SeekFrom::End(0))?;
    spool.seek(SeekFrom::Start(0))?;

    tracing::info!(entries, bytes = len, "Built ZIP archive");
    Ok(Archive {
        spool,
        len,
        entries,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tempfile::{tempdir, TempDir};
    use zip::ZipArchive;

    fn share_with_docs() -> (TempDir, ShareRoot) {
        let temp = tempdir().unwrap();
        let root = temp.path();
        fs::create_dir_all(root.join("docs/empty")).unwrap();
        fs::create_dir_all(root.join("docs/sub")).unwrap();
        fs::write(root.join("docs/a.txt"), b"alpha").unwrap();
        fs::write(root.join("docs/sub/b.txt"), b"beta").unwrap();
        fs::write(root.join("top.txt"), b"top level").unwrap();
        let share = ShareRoot::new(root).unwrap();
        (temp, share)
    }

    fn read_back(archive: Archive) -> ZipArchive<Cursor<Vec<u8>>> {
        let mut bytes = Vec::new();
        let mut spool = archive.spool;
        spool.read_to_end(&mut bytes).unwrap();
        assert_eq!(bytes.len() as u64, archive.len);
        ZipArchive::new(Cursor::new(bytes)).unwrap()
    }

    fn names(zip: &mut ZipArchive<Cursor<Vec<u8>>>) -> Vec<String> {
        (0..zip.len())
            .map(|i| zip.by_index(i).unwrap().name().to_string())
            .collect()
    }

    fn content(zip: &mut ZipArchive<Cursor<Vec<u8>>>, name: &str) -> String {
        let mut out = String::new();
        zip.by_name(name).unwrap().read_to_string(&mut out).unwrap();
        out
    }

    #[test]
    fn test_directory_with_empty_subdirectory() {
        let (_temp, share) = share_with_docs();
        let archive = build_archive(&share, &["docs".to_string()], 1024 * 1024).unwrap();
        assert_eq!(archive.entries, 5);

        let mut zip = read_back(archive);
        assert_eq!(
            names(&mut zip),
            vec!["docs/", "docs/a.txt", "docs/empty/", "docs/sub/", "docs/sub/b.txt"]
        );
        assert!(zip.by_name("docs/empty/").unwrap().is_dir());
        assert_eq!(content(&mut zip, "docs/a.txt"), "alpha");
        assert_eq!(content(&mut zip, "docs/sub/b.txt"), "beta");
    }

    #[test]
    fn test_files_keep_request_order_and_names() {
        let (_temp, share) = share_with_docs();
        let paths = vec![
            "/top.txt".to_string(),
            "docs//sub/b.txt".to_string(),
            "top.txt".to_string(),
        ];
        let archive = build_archive(&share, &paths, 1024 * 1024).unwrap();

        let mut zip = read_back(archive);
        assert_eq!(names(&mut zip), vec!["top.txt", "docs/sub/b.txt"]);
        assert_eq!(content(&mut zip, "top.txt"), "top level");
    }

    #[test]
    fn test_missing_path_fails_whole_archive() {
        let (_temp, share) = share_with_docs();
        let paths = vec!["docs".to_string(), "ghost.txt".to_string()];
        assert!(matches!(
            build_archive(&share, &paths, 1024),
            Err(ArchiveError::PathNotFound(p)) if p == "ghost.txt"
        ));
        assert!(matches!(
            build_archive(&share, &["../etc".to_string()], 1024),
            Err(ArchiveError::Path(PathError::Escape(_)))
        ));
    }

    #[test]
    fn test_share_root_contents_at_top_level() {
        let (_temp, share) = share_with_docs();
        let archive = build_archive(&share, &["/".to_string()], 1024 * 1024).unwrap();

        let mut zip = read_back(archive);
        let names = names(&mut zip);
        assert_eq!(names[0], "docs/");
        assert!(names.contains(&"top.txt".to_string()));
        assert!(names.contains(&"docs/empty/".to_string()));
    }

    #[test]
    fn test_spills_to_disk_beyond_spool_limit() {
        let (temp, share) = share_with_docs();
        let noise: Vec<u8> = (0..200_000u32).map(|i| (i.wrapping_mul(2654435761) >> 13) as u8).collect();
        fs::write(temp.path().join("noise.bin"), &noise).unwrap();

        let archive = build_archive(&share, &["noise.bin".to_string()], 1024).unwrap();
        assert!(archive.spool.is_rolled());

        let mut zip = read_back(archive);
        let mut out = Vec::new();
        zip.by_name("noise.bin").unwrap().read_to_end(&mut out).unwrap();
        assert_eq!(out, noise);
    }

    #[cfg(unix)]
    #[test]
    fn test_skips_links_leaving_share() {
        let outside = tempdir().unwrap();
        fs::write(outside.path().join("secret.txt"), b"secret").unwrap();
        let (temp, share) = share_with_docs();
        std::os::unix::fs::symlink(outside.path().join("secret.txt"), temp.path().join("docs/leak.txt"))
            .unwrap();
        std::os::unix::fs::symlink(temp.path().join("top.txt"), temp.path().join("docs/alias.txt"))
            .unwrap();

        let archive = build_archive(&share, &["docs".to_string()], 1024 * 1024).unwrap();
        let mut zip = read_back(archive);
        let names = names(&mut zip);
        assert!(!names.contains(&"docs/leak.txt".to_string()));
        assert_eq!(content(&mut zip, "docs/alias.txt"), "top level");
    }

    #[tokio::test]
    async fn test_stream_matches_declared_length() {
        use tokio_stream::StreamExt;

        let (_temp, share) = share_with_docs();
        let archive = build_archive(&share, &["docs".to_string()], 1024 * 1024).unwrap();
        let declared = archive.len;

        let mut stream = archive.into_stream();
        let mut bytes = Vec::new();
        while let Some(block) = stream.next().await {
            bytes.extend(block.unwrap());
        }
        assert_eq!(bytes.len() as u64, declared);
        assert!(ZipArchive::new(Cursor::new(bytes)).is_ok());
    }

    #[test]
    fn test_zip64_threshold() {
        assert!(!needs_zip64(0));
        assert!(!needs_zip64(u64::from(u32::MAX) - 1));
        assert!(needs_zip64(u64::from(u32::MAX)));
        assert!(needs_zip64(5 * 1024 * 1024 * 1024));
    }
}
