//! Replica directory layout
//!
//! ```text
//! <root>/
//!   README.txt
//!   Music/                  visible songs
//!   .dj-app/
//!     manifest.json
//!     sync.log
//!     cache/                staged and retained copies
//!       .partial/           in-flight downloads
//! ```

use bridge_traits::catalog::is_safe_filename;
use bridge_traits::storage::FileSystemAccess;
use bytes::Bytes;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::{Result, SyncError};

pub const MUSIC_DIR: &str = "Music";
pub const APP_DIR: &str = ".dj-app";
pub const CACHE_DIR: &str = "cache";
pub const PARTIAL_DIR: &str = ".partial";
pub const MANIFEST_FILE: &str = "manifest.json";
pub const LOG_FILE: &str = "sync.log";
pub const README_FILE: &str = "README.txt";

const README_TEXT: &str =
    "DJ USB Drive\n\nThis drive is managed by DJ-USB-App. Do not modify files directly.\n";

/// Paths inside one replica root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicaLayout {
    root: PathBuf,
}

impl ReplicaLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn music_dir(&self) -> PathBuf {
        self.root.join(MUSIC_DIR)
    }

    pub fn app_dir(&self) -> PathBuf {
        self.root.join(APP_DIR)
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.app_dir().join(CACHE_DIR)
    }

    pub fn partial_dir(&self) -> PathBuf {
        self.cache_dir().join(PARTIAL_DIR)
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.app_dir().join(MANIFEST_FILE)
    }

    pub fn manifest_tmp_path(&self) -> PathBuf {
        self.app_dir().join(format!("{}.tmp", MANIFEST_FILE))
    }

    pub fn log_path(&self) -> PathBuf {
        self.app_dir().join(LOG_FILE)
    }

    pub fn readme_path(&self) -> PathBuf {
        self.root.join(README_FILE)
    }

    /// Visible path of a song.
    ///
    /// # Errors
    ///
    /// [`SyncError::UnsafeFilename`] if `filename` is not a single safe path
    /// segment.
    pub fn song_path(&self, filename: &str) -> Result<PathBuf> {
        if !is_safe_filename(filename) {
            return Err(SyncError::UnsafeFilename(filename.to_string()));
        }
        Ok(self.music_dir().join(filename))
    }

    /// Create the directory tree and the README. Existing content is kept.
    pub async fn initialize(&self, fs: &dyn FileSystemAccess) -> Result<()> {
        for dir in [self.music_dir(), self.cache_dir()] {
            fs.create_dir_all(&dir).await?;
        }

        let readme = self.readme_path();
        if !fs.exists(&readme).await? {
            fs.write_file(&readme, Bytes::from_static(README_TEXT.as_bytes()))
                .await?;
            debug!(path = ?readme, "Wrote replica README");
        }

        info!(root = ?self.root, "Replica layout ready");
        Ok(())
    }

    /// Whether the layout has been created under this root.
    pub async fn is_initialized(&self, fs: &dyn FileSystemAccess) -> Result<bool> {
        Ok(fs.exists(&self.app_dir()).await? && fs.exists(&self.music_dir()).await?)
    }

    /// Heuristic for removable media mount points.
    pub fn looks_removable(&self) -> bool {
        looks_removable(&self.root)
    }
}

/// Heuristic for removable media mount points (`/Volumes/X`, `/media/...`,
/// `/run/media/...`, `/mnt/...`, or a non-`C:` drive root on Windows).
pub fn looks_removable(path: &Path) -> bool {
    let text = path.to_string_lossy();
    if ["/Volumes/", "/media/", "/run/media/", "/mnt/"]
        .iter()
        .any(|prefix| text.starts_with(prefix))
    {
        return true;
    }

    let bytes = text.as_bytes();
    bytes.len() >= 2
        && bytes[1] == b':'
        && bytes[0].is_ascii_alphabetic()
        && !bytes[0].eq_ignore_ascii_case(&b'c')
}
