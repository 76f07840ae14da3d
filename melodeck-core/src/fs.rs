//! Filesystem capability used by the history ledger and lyric acquisition.

use crate::error::Result;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

/// Minimal file access the core needs. Absence is a normal outcome, not an error.
pub trait Filesystem: Send + Sync {
    fn exists(&self, path: &Path) -> bool;

    /// Read a UTF-8 text file; `None` when missing or unreadable
    fn read_text(&self, path: &Path) -> Option<String>;

    /// Write a text file, creating parent directories as needed
    ///
    /// # Errors
    ///
    /// Returns an error if the file or its parent directories cannot be written.
    fn write_text(&self, path: &Path, contents: &str) -> Result<()>;
}

/// The real filesystem
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFilesystem;

impl Filesystem for LocalFilesystem {
    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    /// Invalid UTF-8 is replaced rather than treated as unreadable
    fn read_text(&self, path: &Path) -> Option<String> {
        let bytes = std::fs::read(path).ok()?;
        Some(String::from_utf8_lossy(&bytes).into_owned())
    }

    fn write_text(&self, path: &Path, contents: &str) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, contents)?;
        Ok(())
    }
}

/// In-memory filesystem for embedding and tests.
///
/// Directories are implicit; a path exists once a file has been written to it.
#[derive(Debug, Default)]
pub struct MemoryFilesystem {
    files: RwLock<HashMap<PathBuf, String>>,
}

impl MemoryFilesystem {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style seeding
    #[must_use]
    pub fn with_file(self, path: impl Into<PathBuf>, contents: impl Into<String>) -> Self {
        self.insert(path, contents);
        self
    }

    pub fn insert(&self, path: impl Into<PathBuf>, contents: impl Into<String>) {
        self.files
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path.into(), contents.into());
    }

    pub fn remove(&self, path: &Path) -> Option<String> {
        self.files
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(path)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.files.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Filesystem for MemoryFilesystem {
    fn exists(&self, path: &Path) -> bool {
        self.files
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(path)
    }

    fn read_text(&self, path: &Path) -> Option<String> {
        self.files
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
            .cloned()
    }

    fn write_text(&self, path: &Path, contents: &str) -> Result<()> {
        self.insert(path, contents);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_filesystem_roundtrip() {
        let fs = MemoryFilesystem::new().with_file("/a/b.lrc", "[00:01.00]hi");
        assert!(fs.exists(Path::new("/a/b.lrc")));
        assert!(!fs.exists(Path::new("/a/c.lrc")));
        assert_eq!(fs.read_text(Path::new("/a/b.lrc")).as_deref(), Some("[00:01.00]hi"));

        assert!(fs.write_text(Path::new("/a/c.lrc"), "x").is_ok());
        assert_eq!(fs.len(), 2);
        assert_eq!(fs.remove(Path::new("/a/c.lrc")).as_deref(), Some("x"));
        assert!(!fs.exists(Path::new("/a/c.lrc")));
    }

    #[test]
    fn test_local_filesystem_creates_parent_dirs() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("nested").join("deeper").join("song.lrc");
        let fs = LocalFilesystem;

        assert!(fs.read_text(&path).is_none());
        fs.write_text(&path, "[00:01.00]line")?;
        assert!(fs.exists(&path));
        assert_eq!(fs.read_text(&path).as_deref(), Some("[00:01.00]line"));
        Ok(())
    }

    #[test]
    fn test_local_filesystem_reads_latin1_lossily() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("song.lrc");
        std::fs::write(&path, b"[00:01.00]caf\xe9 line\n[00:02.00]second")?;

        let text = LocalFilesystem.read_text(&path).unwrap_or_default();
        assert_eq!(text, "[00:01.00]caf\u{fffd} line\n[00:02.00]second");
        Ok(())
    }
}
