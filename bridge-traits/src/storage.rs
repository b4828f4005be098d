//! File System Abstraction
//!
//! Everything the sync core does to a replica root goes through
//! [`FileSystemAccess`], so tests can point it at a temporary directory and
//! hosts with sandboxed storage can supply their own adapter.

use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Path, PathBuf};

use crate::error::Result;

/// File metadata information
#[derive(Debug, Clone)]
pub struct FileMetadata {
    pub size: u64,
    pub created_at: Option<i64>,
    pub modified_at: Option<i64>,
    pub is_directory: bool,
}

/// File system access trait
///
/// Implementations map "not found" failures to
/// [`BridgeError::NotFound`](crate::error::BridgeError::NotFound) and
/// permission failures to
/// [`BridgeError::PermissionDenied`](crate::error::BridgeError::PermissionDenied)
/// so callers can tell tolerable errors apart from real ones.
///
/// # Example
///
/// ```ignore
/// use bridge_traits::storage::FileSystemAccess;
///
/// async fn write_readme(fs: &dyn FileSystemAccess, root: &Path) -> Result<()> {
///     fs.create_dir_all(root).await?;
///     fs.write_file(&root.join("README.txt"), "DJ USB Drive\n".into()).await
/// }
/// ```
#[async_trait]
pub trait FileSystemAccess: Send + Sync {
    /// Check if a file or directory exists
    async fn exists(&self, path: &Path) -> Result<bool>;

    /// Get metadata for a file or directory
    async fn metadata(&self, path: &Path) -> Result<FileMetadata>;

    /// Create a directory and all parent directories if they don't exist
    async fn create_dir_all(&self, path: &Path) -> Result<()>;

    /// Read entire file contents into memory
    async fn read_file(&self, path: &Path) -> Result<Bytes>;

    /// Write data to a file, creating or truncating it.
    ///
    /// The data must be flushed to stable storage before this returns.
    async fn write_file(&self, path: &Path, data: Bytes) -> Result<()>;

    /// Append data to an existing file or create it
    async fn append_file(&self, path: &Path, data: Bytes) -> Result<()>;

    /// Delete a file
    async fn delete_file(&self, path: &Path) -> Result<()>;

    /// Delete a directory and all its contents
    async fn delete_dir_all(&self, path: &Path) -> Result<()>;

    /// List all entries in a directory
    async fn list_directory(&self, path: &Path) -> Result<Vec<PathBuf>>;

    /// Open a file for streaming reads
    async fn open_read_stream(
        &self,
        path: &Path,
    ) -> Result<Box<dyn core_async::io::AsyncRead + Send + Unpin>>;

    /// Open a file for streaming writes, creating or truncating it
    async fn open_write_stream(
        &self,
        path: &Path,
    ) -> Result<Box<dyn core_async::io::AsyncWrite + Send + Unpin>>;

    /// Rename `from` to `to`, replacing `to` if it exists.
    ///
    /// Atomic when both paths live on the same filesystem. Fails otherwise.
    async fn rename(&self, from: &Path, to: &Path) -> Result<()>;

    /// Copy `from` to `to` and flush the copy. Returns the bytes copied.
    async fn copy_file(&self, from: &Path, to: &Path) -> Result<u64>;

    /// Flush a written file's contents to the storage device.
    async fn sync_file(&self, path: &Path) -> Result<()>;

    /// Calculate total size of a directory recursively
    async fn directory_size(&self, path: &Path) -> Result<u64> {
        let mut total = 0u64;
        let entries = self.list_directory(path).await?;

        for entry in entries {
            let metadata = self.metadata(&entry).await?;
            if metadata.is_directory {
                total += self.directory_size(&entry).await?;
            } else {
                total += metadata.size;
            }
        }

        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_metadata() {
        let metadata = FileMetadata {
            size: 1024,
            created_at: Some(1234567890),
            modified_at: Some(1234567900),
            is_directory: false,
        };

        assert_eq!(metadata.size, 1024);
        assert!(!metadata.is_directory);
    }
}
