//! Writing decoded archive entries below a restore root.

use crate::archive::ArchiveEntry;
use crate::fs::metadata::FileMetadata;
use crate::utils::errors::{BackupError, Result};
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};

/// Destination directory of a restore.
#[derive(Debug, Clone)]
pub struct RestoreTarget {
    root: PathBuf,
}

impl RestoreTarget {
    /// Use `root` as the restore destination, creating it if needed.
    pub fn create(root: &Path) -> Result<Self> {
        fs::create_dir_all(root).map_err(|e| BackupError::io(root, e))?;
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map an archive path onto the restore root.
    ///
    /// A leading `/` is taken as relative to the root (older snapshots were
    /// written with root-anchored names). `..`, drive prefixes and paths that
    /// name the root itself are rejected rather than rewritten.
    pub fn resolve(&self, archived: &Path) -> Result<PathBuf> {
        let mut resolved = self.root.clone();
        let mut depth = 0usize;

        for component in archived.components() {
            match component {
                Component::Normal(part) => {
                    resolved.push(part);
                    depth += 1;
                }
                Component::RootDir | Component::CurDir => {}
                Component::ParentDir | Component::Prefix(_) => {
                    return Err(BackupError::PathTraversal(archived.to_path_buf()));
                }
            }
        }

        if depth == 0 {
            return Err(BackupError::PathTraversal(archived.to_path_buf()));
        }
        Ok(resolved)
    }

    /// Check the existing part of `path` below the root for symlinks.
    ///
    /// A symlinked parent could point outside the root, so it is rejected as
    /// `PathTraversal`. A symlink at `path` itself is removed so the file is
    /// written in its place rather than at the link's target. The root itself
    /// is trusted.
    fn unlink_symlinks(&self, archived: &Path, path: &Path) -> Result<()> {
        let relative = path
            .strip_prefix(&self.root)
            .map_err(|_| BackupError::PathTraversal(archived.to_path_buf()))?;

        let mut current = self.root.clone();
        let mut components = relative.components().peekable();
        while let Some(component) = components.next() {
            current.push(component);
            let meta = match fs::symlink_metadata(&current) {
                Ok(meta) => meta,
                Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
                Err(e) => return Err(BackupError::io(&current, e)),
            };
            if !meta.file_type().is_symlink() {
                continue;
            }
            if components.peek().is_some() {
                return Err(BackupError::PathTraversal(archived.to_path_buf()));
            }
            fs::remove_file(&current).map_err(|e| BackupError::io(&current, e))?;
        }
        Ok(())
    }

    /// Write one entry's content to its resolved path.
    ///
    /// Parent directories are created first and the file handle is closed
    /// before returning. Existing symlinks below the root are never followed.
    /// Read errors keep the taxonomy tag of the stage that raised them; local
    /// write errors are reported against the target path.
    pub fn write_file<R: Read>(&self, entry: &ArchiveEntry, content: &mut R) -> Result<u64> {
        let path = self.resolve(&entry.path)?;
        self.unlink_symlinks(&entry.path, &path)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| BackupError::io(parent, e))?;
        }

        let mut file = File::create(&path).map_err(|e| BackupError::io(&path, e))?;
        let written = io::copy(content, &mut file)
            .map_err(|e| BackupError::from_io(e, |source| BackupError::io(&path, source)))?;

        let metadata = FileMetadata {
            size: entry.size,
            modified: entry.mtime,
            mode: entry.mode,
        };
        metadata
            .apply_to_file(&file)
            .map_err(|e| BackupError::io(&path, e))?;

        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn entry(path: &str, size: u64) -> ArchiveEntry {
        ArchiveEntry {
            path: PathBuf::from(path),
            mode: 0o644,
            size,
            mtime: 1_600_000_000,
        }
    }

    #[test]
    fn test_resolve_relative_paths() {
        let target = RestoreTarget {
            root: PathBuf::from("/restore"),
        };

        assert_eq!(
            target.resolve(Path::new("a.txt")).unwrap(),
            PathBuf::from("/restore/a.txt")
        );
        assert_eq!(
            target.resolve(Path::new("./b/c.txt")).unwrap(),
            PathBuf::from("/restore/b/c.txt")
        );
        assert_eq!(
            target.resolve(Path::new("/graph.db/neostore")).unwrap(),
            PathBuf::from("/restore/graph.db/neostore")
        );
    }

    #[test]
    fn test_resolve_rejects_traversal() {
        let target = RestoreTarget {
            root: PathBuf::from("/restore"),
        };

        for bad in ["../../etc/passwd", "a/../../b", "..", "", "/", "."] {
            assert!(
                matches!(
                    target.resolve(Path::new(bad)),
                    Err(BackupError::PathTraversal(_))
                ),
                "{bad:?} must be rejected"
            );
        }
    }

    #[test]
    fn test_write_file_creates_parents() -> Result<()> {
        let temp_dir = TempDir::new().unwrap();
        let target = RestoreTarget::create(&temp_dir.path().join("out"))?;

        let written = target.write_file(&entry("b/c/d.txt", 5), &mut &b"world"[..])?;

        assert_eq!(written, 5);
        let restored = fs::read(temp_dir.path().join("out/b/c/d.txt")).unwrap();
        assert_eq!(restored, b"world");
        Ok(())
    }

    #[test]
    #[cfg(unix)]
    fn test_write_file_applies_mode() -> Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = TempDir::new().unwrap();
        let target = RestoreTarget::create(temp_dir.path())?;
        let mut exec = entry("run.sh", 2);
        exec.mode = 0o750;

        target.write_file(&exec, &mut &b"#!"[..])?;

        let meta = fs::metadata(temp_dir.path().join("run.sh")).unwrap();
        assert_eq!(meta.permissions().mode() & 0o7777, 0o750);
        assert_eq!(FileMetadata::from_metadata(&meta).modified, 1_600_000_000);
        Ok(())
    }

    #[test]
    fn test_write_file_rejects_traversal_without_writing() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("inner");
        let target = RestoreTarget::create(&root).unwrap();

        let result = target.write_file(&entry("../escaped.txt", 4), &mut &b"oops"[..]);

        assert!(matches!(result, Err(BackupError::PathTraversal(_))));
        assert!(!temp_dir.path().join("escaped.txt").exists());
    }

    #[test]
    #[cfg(unix)]
    fn test_write_file_refuses_symlinked_parent() {
        let temp_dir = TempDir::new().unwrap();
        let outside = temp_dir.path().join("outside");
        fs::create_dir(&outside).unwrap();
        let root = temp_dir.path().join("restore");
        let target = RestoreTarget::create(&root).unwrap();
        std::os::unix::fs::symlink(&outside, root.join("b")).unwrap();

        let result = target.write_file(&entry("b/c.txt", 5), &mut &b"world"[..]);

        assert!(matches!(result, Err(BackupError::PathTraversal(_))));
        assert!(!outside.join("c.txt").exists());
    }

    #[test]
    #[cfg(unix)]
    fn test_write_file_replaces_symlinked_file() -> Result<()> {
        let temp_dir = TempDir::new().unwrap();
        let outside = temp_dir.path().join("outside.txt");
        fs::write(&outside, b"keep").unwrap();
        let root = temp_dir.path().join("restore");
        let target = RestoreTarget::create(&root)?;
        std::os::unix::fs::symlink(&outside, root.join("a.txt")).unwrap();

        target.write_file(&entry("a.txt", 5), &mut &b"hello"[..])?;

        assert_eq!(fs::read(&outside).unwrap(), b"keep");
        let meta = fs::symlink_metadata(root.join("a.txt")).unwrap();
        assert!(meta.file_type().is_file());
        assert_eq!(fs::read(root.join("a.txt")).unwrap(), b"hello");
        Ok(())
    }
}
