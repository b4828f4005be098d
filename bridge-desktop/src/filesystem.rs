//! File System Access Implementation using Tokio

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    storage::{FileMetadata, FileSystemAccess},
};
use bytes::Bytes;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// Tokio-based file system implementation
///
/// Paths are used as given; the replica root decides where things live.
#[derive(Debug, Clone, Default)]
pub struct TokioFileSystem;

impl TokioFileSystem {
    pub fn new() -> Self {
        Self
    }

    /// Convert std::io::Error to BridgeError, keeping not-found and
    /// permission failures distinguishable.
    fn map_io_error(path: &Path) -> impl FnOnce(std::io::Error) -> BridgeError + '_ {
        move |e| match e.kind() {
            ErrorKind::NotFound => BridgeError::NotFound(path.display().to_string()),
            ErrorKind::PermissionDenied => {
                BridgeError::PermissionDenied(format!("{}: {}", path.display(), e))
            }
            _ => BridgeError::Io(e),
        }
    }

    async fn ensure_parent(&self, path: &Path) -> Result<()> {
        match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => self.create_dir_all(parent).await,
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl FileSystemAccess for TokioFileSystem {
    async fn exists(&self, path: &Path) -> Result<bool> {
        fs::try_exists(path)
            .await
            .map_err(Self::map_io_error(path))
    }

    async fn metadata(&self, path: &Path) -> Result<FileMetadata> {
        let metadata = fs::metadata(path)
            .await
            .map_err(Self::map_io_error(path))?;

        let to_secs = |t: std::io::Result<std::time::SystemTime>| {
            t.ok()
                .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                .map(|d| d.as_secs() as i64)
        };

        Ok(FileMetadata {
            size: metadata.len(),
            created_at: to_secs(metadata.created()),
            modified_at: to_secs(metadata.modified()),
            is_directory: metadata.is_dir(),
        })
    }

    async fn create_dir_all(&self, path: &Path) -> Result<()> {
        fs::create_dir_all(path)
            .await
            .map_err(Self::map_io_error(path))
    }

    async fn read_file(&self, path: &Path) -> Result<Bytes> {
        let data = fs::read(path).await.map_err(Self::map_io_error(path))?;
        debug!(path = ?path, size = data.len(), "Read file");
        Ok(Bytes::from(data))
    }

    async fn write_file(&self, path: &Path, data: Bytes) -> Result<()> {
        self.ensure_parent(path).await?;

        let mut file = fs::File::create(path)
            .await
            .map_err(Self::map_io_error(path))?;
        file.write_all(data.as_ref())
            .await
            .map_err(Self::map_io_error(path))?;
        file.sync_all().await.map_err(Self::map_io_error(path))?;

        debug!(path = ?path, size = data.len(), "Wrote file");
        Ok(())
    }

    async fn append_file(&self, path: &Path, data: Bytes) -> Result<()> {
        self.ensure_parent(path).await?;

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .map_err(Self::map_io_error(path))?;

        file.write_all(data.as_ref())
            .await
            .map_err(Self::map_io_error(path))?;
        file.flush().await.map_err(Self::map_io_error(path))?;
        Ok(())
    }

    async fn delete_file(&self, path: &Path) -> Result<()> {
        fs::remove_file(path)
            .await
            .map_err(Self::map_io_error(path))?;
        debug!(path = ?path, "Deleted file");
        Ok(())
    }

    async fn delete_dir_all(&self, path: &Path) -> Result<()> {
        fs::remove_dir_all(path)
            .await
            .map_err(Self::map_io_error(path))?;
        debug!(path = ?path, "Deleted directory");
        Ok(())
    }

    async fn list_directory(&self, path: &Path) -> Result<Vec<PathBuf>> {
        let mut entries = Vec::new();
        let mut read_dir = fs::read_dir(path)
            .await
            .map_err(Self::map_io_error(path))?;

        while let Some(entry) = read_dir
            .next_entry()
            .await
            .map_err(Self::map_io_error(path))?
        {
            entries.push(entry.path());
        }

        entries.sort();
        Ok(entries)
    }

    async fn open_read_stream(
        &self,
        path: &Path,
    ) -> Result<Box<dyn core_async::io::AsyncRead + Send + Unpin>> {
        let file = fs::File::open(path)
            .await
            .map_err(Self::map_io_error(path))?;
        Ok(Box::new(file))
    }

    async fn open_write_stream(
        &self,
        path: &Path,
    ) -> Result<Box<dyn core_async::io::AsyncWrite + Send + Unpin>> {
        self.ensure_parent(path).await?;

        let file = fs::File::create(path)
            .await
            .map_err(Self::map_io_error(path))?;
        Ok(Box::new(file))
    }

    async fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        fs::rename(from, to)
            .await
            .map_err(Self::map_io_error(from))?;
        debug!(from = ?from, to = ?to, "Renamed file");
        Ok(())
    }

    async fn copy_file(&self, from: &Path, to: &Path) -> Result<u64> {
        self.ensure_parent(to).await?;

        let copied = fs::copy(from, to).await.map_err(Self::map_io_error(from))?;
        self.sync_file(to).await?;

        debug!(from = ?from, to = ?to, bytes = copied, "Copied file");
        Ok(copied)
    }

    async fn sync_file(&self, path: &Path) -> Result<()> {
        // Opened for writing so the flush also works on Windows.
        let file = fs::OpenOptions::new()
            .write(true)
            .open(path)
            .await
            .map_err(Self::map_io_error(path))?;
        file.sync_all().await.map_err(Self::map_io_error(path))
    }
}
