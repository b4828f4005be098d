//! Song Catalog Abstraction
//!
//! The catalog is the authoritative list of songs a replica converges to.
//! [`SongCatalog`] is implemented by the HTTP catalog client and by
//! in-memory fakes in tests.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::error::BridgeError;

/// One song advertised by the catalog.
///
/// A snapshot for a single sync cycle. Never persisted as-is: the replica
/// manifest keeps its own entry type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteSong {
    /// Unique key and on-disk name inside the replica's music directory.
    pub filename: String,
    /// Where the bytes can be fetched from.
    pub url: String,
    /// Size in bytes as reported by the server.
    #[serde(default)]
    pub size: Option<u64>,
    /// Opaque server-side identifier, carried into the manifest unchanged.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artist: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub album: Option<String>,
    /// Duration in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
}

impl RemoteSong {
    pub fn new(filename: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            url: url.into(),
            size: None,
            id: None,
            title: None,
            artist: None,
            album: None,
            duration: None,
        }
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    /// Whether `filename` can be used as a single path segment.
    ///
    /// Rejects empty names, `.`/`..`, path separators and NUL bytes.
    pub fn has_safe_filename(&self) -> bool {
        is_safe_filename(&self.filename)
    }

    /// Display title, falling back to the filename.
    pub fn display_title(&self) -> &str {
        self.title.as_deref().unwrap_or(&self.filename)
    }
}

/// Whether `name` is safe to join onto a directory as a single component.
pub fn is_safe_filename(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', '\0'])
}

/// Catalog failures.
#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Catalog unreachable: {0}")]
    Unreachable(String),

    #[error("Catalog protocol error: {0}")]
    Protocol(String),

    #[error("Download of '{filename}' failed: {reason}")]
    DownloadFailed { filename: String, reason: String },

    #[error("Not authorized: {0}")]
    Unauthorized(String),

    #[error("Upload limit reached ({limit} songs)")]
    UploadLimitReached { limit: u32 },

    #[error("Invalid upload: {0}")]
    InvalidUpload(String),

    #[error(transparent)]
    Bridge(#[from] BridgeError),
}

pub type CatalogResult<T> = std::result::Result<T, CatalogError>;

/// Byte stream for one song download.
pub struct SongStream {
    /// Length advertised by the transport, if any.
    pub content_length: Option<u64>,
    pub reader: Box<dyn core_async::io::AsyncRead + Send + Unpin>,
}

impl fmt::Debug for SongStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SongStream")
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

/// Source of the authoritative song list and song bytes.
///
/// Implementations perform no retries; the sync engine owns retry policy.
#[async_trait]
pub trait SongCatalog: Send + Sync {
    /// Fetch the full catalog listing.
    ///
    /// # Errors
    ///
    /// - [`CatalogError::Unreachable`] on network failure or timeout
    /// - [`CatalogError::Protocol`] on a bad status or malformed payload
    async fn fetch_catalog(&self) -> CatalogResult<Vec<RemoteSong>>;

    /// Open a byte stream for one song.
    ///
    /// # Errors
    ///
    /// [`CatalogError::DownloadFailed`] on a non-success status or transport
    /// failure.
    async fn fetch_bytes(&self, song: &RemoteSong) -> CatalogResult<SongStream>;
}
