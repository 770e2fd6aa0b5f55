//! FileSystem seam under the document store.
//!
//! Implementations:
//! - `InMemoryFs` - For testing
//! - `NativeFs` - Uses tokio::fs, rooted at the vault directory
//!
//! Paths are vault-relative strings using `/` as separator.

use async_trait::async_trait;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use thiserror::Error;
use tokio::fs;

#[derive(Debug, Error)]
pub enum FsError {
    #[error("File not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(String),
}

pub type Result<T> = std::result::Result<T, FsError>;

#[async_trait]
pub trait FileSystem: Send + Sync {
    /// Read file contents
    async fn read(&self, path: &str) -> Result<Vec<u8>>;

    /// Replace file contents (creates parent directories if needed)
    async fn write(&self, path: &str, content: &[u8]) -> Result<()>;

    /// Check if path exists
    async fn exists(&self, path: &str) -> Result<bool>;
}

/// In-memory filesystem for testing
#[derive(Default)]
pub struct InMemoryFs {
    files: RwLock<HashMap<String, Vec<u8>>>,
}

impl InMemoryFs {
    pub fn new() -> Self {
        Self::default()
    }

    fn normalize_path(path: &str) -> String {
        path.trim_matches('/').to_string()
    }
}

fn poisoned<T>(_: T) -> FsError {
    FsError::Io("in-memory filesystem lock poisoned".to_string())
}

#[async_trait]
impl FileSystem for InMemoryFs {
    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        let path = Self::normalize_path(path);
        let files = self.files.read().map_err(poisoned)?;
        files
            .get(&path)
            .cloned()
            .ok_or(FsError::NotFound(path))
    }

    async fn write(&self, path: &str, content: &[u8]) -> Result<()> {
        let path = Self::normalize_path(path);
        let mut files = self.files.write().map_err(poisoned)?;
        files.insert(path, content.to_vec());
        Ok(())
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let path = Self::normalize_path(path);
        let files = self.files.read().map_err(poisoned)?;
        Ok(files.contains_key(&path))
    }
}

// Lets a test keep a handle on the same filesystem it gave to a store
#[async_trait]
impl<T: FileSystem> FileSystem for std::sync::Arc<T> {
    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        (**self).read(path).await
    }

    async fn write(&self, path: &str, content: &[u8]) -> Result<()> {
        (**self).write(path, content).await
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        (**self).exists(path).await
    }
}

/// Native filesystem rooted at a base directory.
pub struct NativeFs {
    base_path: PathBuf,
}

impl NativeFs {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn full_path(&self, path: &str) -> PathBuf {
        if path.is_empty() {
            self.base_path.clone()
        } else {
            self.base_path.join(path)
        }
    }

    /// Write to a sibling temp file, flush it to disk, then rename over the
    /// target. Readers see either the old or the new content.
    async fn atomic_write(path: &Path, content: &[u8]) -> std::io::Result<()> {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let temp_path = path.with_file_name(format!(".{file_name}.{}.tmp", std::process::id()));

        let written = async {
            let mut file = fs::File::create(&temp_path).await?;
            tokio::io::AsyncWriteExt::write_all(&mut file, content).await?;
            file.sync_all().await
        }
        .await;

        if let Err(e) = written {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e);
        }

        if let Err(e) = fs::rename(&temp_path, path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e);
        }

        Ok(())
    }
}

fn io_error(path: &str, e: std::io::Error) -> FsError {
    match e.kind() {
        ErrorKind::NotFound => FsError::NotFound(path.to_string()),
        _ => FsError::Io(format!("{path}: {e}")),
    }
}

#[async_trait]
impl FileSystem for NativeFs {
    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        fs::read(self.full_path(path))
            .await
            .map_err(|e| io_error(path, e))
    }

    async fn write(&self, path: &str, content: &[u8]) -> Result<()> {
        let full_path = self.full_path(path);

        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error(path, e))?;
        }

        Self::atomic_write(&full_path, content)
            .await
            .map_err(|e| io_error(path, e))
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        fs::try_exists(self.full_path(path))
            .await
            .map_err(|e| io_error(path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_inmemory_fs_basic_operations() {
        let fs = InMemoryFs::new();

        fs.write("reading.md", b"hello").await.unwrap();
        assert_eq!(fs.read("/reading.md").await.unwrap(), b"hello");
        assert!(fs.exists("reading.md").await.unwrap());
        assert!(!fs.exists("other.md").await.unwrap());

        fs.write("reading.md", b"replaced").await.unwrap();
        assert_eq!(fs.read("reading.md").await.unwrap(), b"replaced");
    }

    #[tokio::test]
    async fn test_inmemory_fs_missing_file() {
        let fs = InMemoryFs::new();
        assert!(matches!(fs.read("nope.md").await, Err(FsError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_native_fs_round_trip() {
        let temp = TempDir::new().unwrap();
        let fs = NativeFs::new(temp.path());

        assert!(!fs.exists("reading.md").await.unwrap());
        fs.write("reading.md", b"first").await.unwrap();
        fs.write("reading.md", b"second").await.unwrap();

        assert_eq!(fs.read("reading.md").await.unwrap(), b"second");
        assert!(fs.exists("reading.md").await.unwrap());
    }

    #[tokio::test]
    async fn test_native_fs_creates_parents_and_leaves_no_temp_files() {
        let temp = TempDir::new().unwrap();
        let fs = NativeFs::new(temp.path());

        fs.write("nested/dir/reading.md", b"content").await.unwrap();

        let entries: Vec<_> = std::fs::read_dir(temp.path().join("nested/dir"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(entries, ["reading.md"]);
    }

    #[tokio::test]
    async fn test_native_fs_missing_file_is_not_found() {
        let temp = TempDir::new().unwrap();
        let fs = NativeFs::new(temp.path());
        assert!(matches!(fs.read("reading.md").await, Err(FsError::NotFound(_))));
    }
}
