use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Core initialization failed: {0}")]
    InitializationFailed(String),

    #[error("Capability missing: {capability} - {message}")]
    CapabilityMissing { capability: String, message: String },

    #[error("{0} is not an initialized replica (run `init` first)")]
    NotInitialized(PathBuf),

    #[error("Sync error: {0}")]
    Sync(#[from] core_sync::SyncError),

    #[error("Catalog error: {0}")]
    Catalog(#[from] bridge_traits::CatalogError),

    #[error("File system error: {0}")]
    Bridge(#[from] bridge_traits::BridgeError),
}

impl From<core_runtime::Error> for CoreError {
    fn from(error: core_runtime::Error) -> Self {
        match error {
            core_runtime::Error::CapabilityMissing {
                capability,
                message,
            } => CoreError::CapabilityMissing {
                capability,
                message,
            },
            other => CoreError::InitializationFailed(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
