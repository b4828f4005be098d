use bridge_traits::catalog::CatalogError;
use bridge_traits::error::BridgeError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Catalog unreachable: {0}")]
    CatalogUnreachable(String),

    #[error("Catalog returned an invalid response: {0}")]
    CatalogProtocol(String),

    #[error("Download of '{filename}' failed: {reason}")]
    DownloadFailed { filename: String, reason: String },

    #[error("Incomplete download of '{filename}' after {received} bytes: {reason}")]
    IncompleteDownload {
        filename: String,
        expected: Option<u64>,
        received: u64,
        reason: String,
    },

    #[error("Manifest at {path} is corrupt: {reason}")]
    ManifestCorrupt { path: PathBuf, reason: String },

    #[error("Catalog lists '{0}' more than once")]
    DuplicateFilename(String),

    #[error("Unsafe filename: {0:?}")]
    UnsafeFilename(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("'{0}' is not in the manifest")]
    NotInManifest(String),

    #[error("File system error: {0}")]
    FileSystem(String),

    #[error("Invalid sync configuration: {0}")]
    InvalidConfig(String),

    #[error("Sync cancelled")]
    Cancelled,
}

impl SyncError {
    /// Whether the error only affects one file and the cycle can continue.
    pub fn is_per_file(&self) -> bool {
        matches!(
            self,
            SyncError::DownloadFailed { .. }
                | SyncError::IncompleteDownload { .. }
                | SyncError::UnsafeFilename(_)
                | SyncError::PermissionDenied(_)
        )
    }
}

impl From<BridgeError> for SyncError {
    fn from(error: BridgeError) -> Self {
        match error {
            BridgeError::PermissionDenied(msg) => SyncError::PermissionDenied(msg),
            other => SyncError::FileSystem(other.to_string()),
        }
    }
}

impl From<CatalogError> for SyncError {
    fn from(error: CatalogError) -> Self {
        match error {
            CatalogError::Unreachable(msg) => SyncError::CatalogUnreachable(msg),
            CatalogError::Protocol(msg) => SyncError::CatalogProtocol(msg),
            CatalogError::DownloadFailed { filename, reason } => {
                SyncError::DownloadFailed { filename, reason }
            }
            CatalogError::Bridge(e) => SyncError::CatalogUnreachable(e.to_string()),
            other => SyncError::CatalogProtocol(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_error_conversion() {
        let err: SyncError = CatalogError::Unreachable("timeout".into()).into();
        assert!(matches!(err, SyncError::CatalogUnreachable(_)));

        let err: SyncError = CatalogError::DownloadFailed {
            filename: "a.mp3".into(),
            reason: "HTTP 500".into(),
        }
        .into();
        assert!(err.is_per_file());
    }

    #[test]
    fn test_bridge_error_conversion() {
        let err: SyncError = BridgeError::PermissionDenied("/mnt/usb/Music/a.mp3".into()).into();
        assert!(matches!(err, SyncError::PermissionDenied(_)));

        let err: SyncError = BridgeError::OperationFailed("disk full".into()).into();
        assert!(matches!(err, SyncError::FileSystem(_)));
        assert!(!err.is_per_file());
    }

    #[test]
    fn test_incomplete_download_message() {
        let err = SyncError::IncompleteDownload {
            filename: "a.mp3".into(),
            expected: Some(100),
            received: 40,
            reason: "stream ended early".into(),
        };
        assert_eq!(
            err.to_string(),
            "Incomplete download of 'a.mp3' after 40 bytes: stream ended early"
        );
    }
}
