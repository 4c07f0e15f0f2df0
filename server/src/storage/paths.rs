//! Share root confinement
//!
//! Every client-supplied relative path goes through [`ShareRoot::resolve`]
//! before it touches the filesystem. The check runs on the canonicalized
//! result, so `..` segments and symlinks pointing outside the root are
//! rejected no matter how they are spelled.

use std::io;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PathError {
    #[error("Requested path escapes share root: {0}")]
    Escape(String),
    #[error("Invalid path: {0}")]
    Invalid(String),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// The directory tree exposed by the server. Immutable once constructed.
#[derive(Debug, Clone)]
pub struct ShareRoot {
    root: PathBuf,
}

impl ShareRoot {
    /// Open a share root; the directory must already exist.
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self, PathError> {
        let root = std::fs::canonicalize(root.as_ref())?;
        if !root.is_dir() {
            return Err(PathError::Invalid(format!(
                "share root is not a directory: {}",
                root.display()
            )));
        }
        Ok(Self { root })
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Normalize a browser-style relative path into `a/b/c` form.
    ///
    /// Empty and `.` segments are dropped, `..` pops the previous segment.
    /// Climbing above the root is an escape. The root itself normalizes to
    /// the empty string.
    pub fn normalize(relative: &str) -> Result<String, PathError> {
        if relative.contains('\0') {
            return Err(PathError::Invalid("path contains a null byte".into()));
        }

        let mut segments: Vec<&str> = Vec::new();
        for segment in relative.split('/') {
            match segment {
                "" | "." => continue,
                ".." => {
                    if segments.pop().is_none() {
                        return Err(PathError::Escape(relative.to_string()));
                    }
                }
                other => {
                    // Host-specific separators and prefixes (`C:`, `a\b` on Windows)
                    let mut components = Path::new(other).components();
                    match (components.next(), components.next()) {
                        (Some(Component::Normal(_)), None) => segments.push(other),
                        _ => return Err(PathError::Escape(relative.to_string())),
                    }
                }
            }
        }
        Ok(segments.join("/"))
    }

    /// Resolve a relative path to an absolute path confined to the root.
    ///
    /// The target does not need to exist. Symlinks are followed wherever the
    /// filesystem can resolve them, and the final containment check is made
    /// against the canonical form.
    pub fn resolve(&self, relative: &str) -> Result<PathBuf, PathError> {
        let normalized = Self::normalize(relative)?;
        let candidate = if normalized.is_empty() {
            self.root.clone()
        } else {
            normalized
                .split('/')
                .fold(self.root.clone(), |path, segment| path.join(segment))
        };

        let resolved = canonicalize_lenient(&candidate)?;
        if !resolved.starts_with(&self.root) {
            tracing::warn!(path = %relative, "Rejected path outside share root");
            return Err(PathError::Escape(relative.to_string()));
        }
        Ok(resolved)
    }

    pub fn is_root(&self, resolved: &Path) -> bool {
        resolved == self.root
    }

    /// Whether the nearest existing ancestor of `resolved` is not a directory,
    /// so nothing can ever be created at `resolved`.
    pub fn blocked_by_file(&self, resolved: &Path) -> bool {
        for ancestor in resolved.ancestors().skip(1) {
            if !ancestor.starts_with(&self.root) {
                break;
            }
            if let Ok(meta) = std::fs::metadata(ancestor) {
                return !meta.is_dir();
            }
        }
        false
    }
}

/// Errors meaning "nothing lives at this path", including a path that runs
/// through a regular file.
pub fn is_missing(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::NotFound | io::ErrorKind::NotADirectory
    )
}

/// Canonicalize the longest existing ancestor and re-append the missing tail.
fn canonicalize_lenient(path: &Path) -> Result<PathBuf, PathError> {
    let mut existing = path.to_path_buf();
    let mut tail: Vec<std::ffi::OsString> = Vec::new();

    loop {
        match std::fs::canonicalize(&existing) {
            Ok(canonical) => {
                let mut resolved = canonical;
                for part in tail.iter().rev() {
                    resolved.push(part);
                }
                return Ok(resolved);
            }
            Err(err) if is_missing(&err) => {
                // A dangling symlink exists but points nowhere we can check.
                if std::fs::symlink_metadata(&existing).is_ok() {
                    return Err(PathError::Escape(path.display().to_string()));
                }
                let name = existing
                    .file_name()
                    .map(|n| n.to_os_string())
                    .ok_or_else(|| PathError::Invalid(path.display().to_string()))?;
                tail.push(name);
                if !existing.pop() {
                    return Err(PathError::Invalid(path.display().to_string()));
                }
            }
            Err(err) => return Err(PathError::Io(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_normalize() {
        assert_eq!(ShareRoot::normalize("").unwrap(), "");
        assert_eq!(ShareRoot::normalize("/").unwrap(), "");
        assert_eq!(ShareRoot::normalize("./a//b/").unwrap(), "a/b");
        assert_eq!(ShareRoot::normalize("a/b/../c").unwrap(), "a/c");
        assert_eq!(ShareRoot::normalize("/docs/./report.pdf").unwrap(), "docs/report.pdf");
    }

    #[test]
    fn test_normalize_rejects_climbing_out() {
        assert!(matches!(ShareRoot::normalize(".."), Err(PathError::Escape(_))));
        assert!(matches!(ShareRoot::normalize("a/../../b"), Err(PathError::Escape(_))));
        assert!(matches!(ShareRoot::normalize("/../etc/passwd"), Err(PathError::Escape(_))));
        assert!(matches!(ShareRoot::normalize("a\0b"), Err(PathError::Invalid(_))));
    }

    #[test]
    fn test_resolve_stays_inside_root() {
        let temp = tempdir().unwrap();
        let share = ShareRoot::new(temp.path()).unwrap();
        std::fs::create_dir(temp.path().join("docs")).unwrap();

        assert_eq!(share.resolve("").unwrap(), share.path());
        assert_eq!(share.resolve("docs").unwrap(), share.path().join("docs"));
        // Missing targets still resolve
        assert_eq!(
            share.resolve("docs/new/file.txt").unwrap(),
            share.path().join("docs/new/file.txt")
        );
        // Absolute-looking input is taken as relative to the root
        assert_eq!(share.resolve("/etc/passwd").unwrap(), share.path().join("etc/passwd"));
    }

    #[test]
    fn test_resolve_traversal_never_leaves_root() {
        let temp = tempdir().unwrap();
        let share = ShareRoot::new(temp.path()).unwrap();

        for input in [
            "..",
            "../..",
            "../../etc/passwd",
            "a/../../b",
            "//..//..//x",
            "a/b/c/../../../../x",
        ] {
            match share.resolve(input) {
                Ok(path) => assert!(path.starts_with(share.path()), "{input} -> {path:?}"),
                Err(PathError::Escape(_)) => {}
                Err(other) => panic!("unexpected error for {input}: {other}"),
            }
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_resolve_rejects_symlink_escape() {
        let outside = tempdir().unwrap();
        let temp = tempdir().unwrap();
        let share = ShareRoot::new(temp.path()).unwrap();
        std::os::unix::fs::symlink(outside.path(), temp.path().join("link")).unwrap();
        std::os::unix::fs::symlink(
            outside.path().join("missing"),
            temp.path().join("dangling"),
        )
        .unwrap();

        assert!(matches!(share.resolve("link"), Err(PathError::Escape(_))));
        assert!(matches!(share.resolve("link/secret.txt"), Err(PathError::Escape(_))));
        assert!(matches!(share.resolve("dangling"), Err(PathError::Escape(_))));
    }

    #[cfg(unix)]
    #[test]
    fn test_resolve_allows_symlink_inside_root() {
        let temp = tempdir().unwrap();
        let share = ShareRoot::new(temp.path()).unwrap();
        std::fs::create_dir(temp.path().join("real")).unwrap();
        std::os::unix::fs::symlink(temp.path().join("real"), temp.path().join("alias")).unwrap();

        assert_eq!(
            share.resolve("alias/file").unwrap(),
            share.path().join("real/file")
        );
    }

    #[test]
    fn test_resolve_through_regular_file() {
        let temp = tempdir().unwrap();
        let share = ShareRoot::new(temp.path()).unwrap();
        std::fs::write(temp.path().join("a.txt"), b"x").unwrap();
        std::fs::create_dir(temp.path().join("docs")).unwrap();

        let resolved = share.resolve("a.txt/child/deeper").unwrap();
        assert_eq!(resolved, share.path().join("a.txt/child/deeper"));
        assert!(share.blocked_by_file(&resolved));
        assert!(!share.blocked_by_file(&share.resolve("docs/new/file").unwrap()));
        assert!(!share.blocked_by_file(&share.resolve("a.txt").unwrap()));
    }
}
