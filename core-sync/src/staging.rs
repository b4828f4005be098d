//! # Staging Cache
//!
//! Song bytes are streamed into `.dj-app/cache/.partial/<uuid>.part` and only
//! become visible in the music directory once the stream completed with the
//! expected length. Promotion is a rename on the same filesystem; when that
//! fails (cross-device cache) the file is copied to a hidden temp name next
//! to the destination, size-checked, and renamed into place.
//!
//! With [`CacheRetention::Keep`] a copy of every promoted song stays in the
//! cache, so a later add of the same filename and size skips the download.

use bridge_traits::error::BridgeError;
use bridge_traits::storage::FileSystemAccess;
use core_async::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use core_async::time::{timeout, Duration};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::layout::ReplicaLayout;
use crate::{Result, SyncError};

/// Read buffer size for staged downloads.
pub const CHUNK_SIZE: usize = 64 * 1024;

const PARTIAL_EXTENSION: &str = "part";

fn io_error(path: &Path, error: std::io::Error) -> BridgeError {
    match error.kind() {
        std::io::ErrorKind::PermissionDenied => {
            BridgeError::PermissionDenied(format!("{}: {}", path.display(), error))
        }
        _ => BridgeError::Io(error),
    }
}

/// What happens to staged bytes after promotion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheRetention {
    /// Move the staged file into place; nothing stays in the cache.
    #[default]
    Discard,
    /// Keep a copy per filename, evicting oldest-first above `max_bytes`.
    Keep { max_bytes: u64 },
}

/// Fully written bytes ready for promotion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedFile {
    pub filename: String,
    pub path: PathBuf,
    pub bytes: u64,
    /// Backed by a retained cache copy rather than a fresh partial.
    pub from_cache: bool,
}

/// Cache occupancy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct CacheUsage {
    pub files: u64,
    pub bytes: u64,
}

pub struct StagingCache {
    fs: Arc<dyn FileSystemAccess>,
    cache_dir: PathBuf,
    partial_dir: PathBuf,
    retention: CacheRetention,
    stall_timeout: Duration,
}

impl StagingCache {
    pub fn new(
        fs: Arc<dyn FileSystemAccess>,
        layout: &ReplicaLayout,
        retention: CacheRetention,
        stall_timeout: Duration,
    ) -> Self {
        Self {
            fs,
            cache_dir: layout.cache_dir(),
            partial_dir: layout.partial_dir(),
            retention,
            stall_timeout,
        }
    }

    pub fn retention(&self) -> CacheRetention {
        self.retention
    }

    /// Stream `reader` into a fresh partial file.
    ///
    /// # Errors
    ///
    /// [`SyncError::IncompleteDownload`] when the stream errors, stalls for
    /// longer than the stall timeout, or ends at a length other than
    /// `expected_size`, and when the partial file cannot be written (a full
    /// or FAT32-limited drive). [`SyncError::PermissionDenied`] when writing
    /// is refused. The partial file is removed in every failure case.
    pub async fn stage(
        &self,
        filename: &str,
        reader: &mut (dyn AsyncRead + Send + Unpin),
        expected_size: Option<u64>,
    ) -> Result<StagedFile> {
        let path = self
            .partial_dir
            .join(format!("{}.{}", Uuid::new_v4(), PARTIAL_EXTENSION));

        match self.write_partial(filename, &path, reader, expected_size).await {
            Ok(bytes) => {
                debug!(filename, bytes, path = ?path, "Staged download");
                Ok(StagedFile {
                    filename: filename.to_string(),
                    path,
                    bytes,
                    from_cache: false,
                })
            }
            Err(e) => {
                self.discard_path(&path).await;
                Err(e)
            }
        }
    }

    async fn write_partial(
        &self,
        filename: &str,
        path: &Path,
        reader: &mut (dyn AsyncRead + Send + Unpin),
        expected_size: Option<u64>,
    ) -> Result<u64> {
        let incomplete = |received: u64, reason: String| SyncError::IncompleteDownload {
            filename: filename.to_string(),
            expected: expected_size,
            received,
            reason,
        };
        // Local write failures only cost this song, unless access is refused.
        let write_failed = |received: u64, error: BridgeError| match error {
            BridgeError::PermissionDenied(msg) => SyncError::PermissionDenied(msg),
            other => incomplete(received, format!("write failed: {}", other)),
        };

        self.fs
            .create_dir_all(&self.partial_dir)
            .await
            .map_err(|e| write_failed(0, e))?;
        let mut writer = self
            .fs
            .open_write_stream(path)
            .await
            .map_err(|e| write_failed(0, e))?;
        let mut buf = vec![0u8; CHUNK_SIZE];
        let mut received = 0u64;

        loop {
            let n = match timeout(self.stall_timeout, reader.read(&mut buf)).await {
                Ok(Ok(n)) => n,
                Ok(Err(e)) => return Err(incomplete(received, e.to_string())),
                Err(_) => {
                    return Err(incomplete(
                        received,
                        format!("stalled for {:?}", self.stall_timeout),
                    ))
                }
            };
            if n == 0 {
                break;
            }

            writer
                .write_all(&buf[..n])
                .await
                .map_err(|e| write_failed(received, io_error(path, e)))?;
            received += n as u64;

            if let Some(expected) = expected_size {
                if received > expected {
                    return Err(incomplete(
                        received,
                        format!("stream longer than expected {} bytes", expected),
                    ));
                }
            }
        }

        writer
            .shutdown()
            .await
            .map_err(|e| write_failed(received, io_error(path, e)))?;
        drop(writer);

        if let Some(expected) = expected_size {
            if received != expected {
                return Err(incomplete(
                    received,
                    format!("stream ended before expected {} bytes", expected),
                ));
            }
        }

        // Bytes must be on the device before the manifest can point at them.
        self.fs
            .sync_file(path)
            .await
            .map_err(|e| write_failed(received, e))?;
        Ok(received)
    }

    /// A retained copy of `filename` usable instead of a download.
    ///
    /// Only available under [`CacheRetention::Keep`]; the size must match
    /// `expected_size` when one is known.
    pub async fn reusable(&self, filename: &str, expected_size: Option<u64>) -> Result<Option<StagedFile>> {
        if self.retention == CacheRetention::Discard {
            return Ok(None);
        }

        let path = self.cache_dir.join(filename);
        let metadata = match self.fs.metadata(&path).await {
            Ok(m) if !m.is_directory => m,
            Ok(_) => return Ok(None),
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        if expected_size.is_some_and(|expected| expected != metadata.size) {
            debug!(filename, cached = metadata.size, ?expected_size, "Cached copy is stale");
            return Ok(None);
        }

        Ok(Some(StagedFile {
            filename: filename.to_string(),
            path,
            bytes: metadata.size,
            from_cache: true,
        }))
    }

    /// Make `staged` visible at `dest`, replacing any existing file.
    pub async fn promote(&self, staged: StagedFile, dest: &Path) -> Result<u64> {
        match (self.retention, staged.from_cache) {
            (_, true) => self.copy_into_place(&staged.path, dest, staged.bytes).await?,
            (CacheRetention::Discard, false) => self.move_into_place(&staged, dest).await?,
            (CacheRetention::Keep { max_bytes }, false) => {
                let retained = self.cache_dir.join(&staged.filename);
                self.fs.rename(&staged.path, &retained).await?;
                self.copy_into_place(&retained, dest, staged.bytes).await?;
                // The song is already visible; a failed eviction must not undo that.
                if let Err(e) = self.evict_to(max_bytes).await {
                    warn!(error = %e, max_bytes, "Cache eviction failed");
                }
            }
        }

        debug!(filename = %staged.filename, dest = ?dest, bytes = staged.bytes, "Promoted");
        Ok(staged.bytes)
    }

    async fn move_into_place(&self, staged: &StagedFile, dest: &Path) -> Result<()> {
        match self.fs.rename(&staged.path, dest).await {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!(error = %e, dest = ?dest, "Rename failed, copying instead");
                self.copy_into_place(&staged.path, dest, staged.bytes).await?;
                self.discard_path(&staged.path).await;
                Ok(())
            }
        }
    }

    /// Copy to a hidden sibling of `dest`, check the size, rename over `dest`.
    async fn copy_into_place(&self, source: &Path, dest: &Path, expected: u64) -> Result<()> {
        let dir = dest
            .parent()
            .ok_or_else(|| SyncError::FileSystem(format!("{} has no parent", dest.display())))?;
        let name = dest
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let tmp = dir.join(format!(".{}.{}.tmp", name, Uuid::new_v4().simple()));

        let copied = match self.fs.copy_file(source, &tmp).await {
            Ok(n) => n,
            Err(e) => {
                self.discard_path(&tmp).await;
                return Err(e.into());
            }
        };
        if copied != expected {
            self.discard_path(&tmp).await;
            return Err(SyncError::IncompleteDownload {
                filename: name,
                expected: Some(expected),
                received: copied,
                reason: "short copy during promotion".to_string(),
            });
        }

        if let Err(e) = self.fs.rename(&tmp, dest).await {
            self.discard_path(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }

    /// Drop staged bytes that will not be promoted.
    pub async fn discard(&self, staged: StagedFile) {
        if !staged.from_cache {
            self.discard_path(&staged.path).await;
        }
    }

    async fn discard_path(&self, path: &Path) {
        if let Err(e) = self.fs.delete_file(path).await {
            if !e.is_not_found() {
                warn!(path = ?path, error = %e, "Failed to remove temporary file");
            }
        }
    }

    /// Remove orphaned `.part` files left by an interrupted cycle.
    pub async fn purge_partials(&self) -> Result<u64> {
        let entries = match self.fs.list_directory(&self.partial_dir).await {
            Ok(entries) => entries,
            Err(e) if e.is_not_found() => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut removed = 0;
        for path in entries {
            if path.extension().is_some_and(|ext| ext == PARTIAL_EXTENSION) {
                self.discard_path(&path).await;
                removed += 1;
            }
        }

        if removed > 0 {
            info!(removed, "Purged orphaned partial downloads");
        }
        Ok(removed)
    }

    /// Current cache occupancy, partials included.
    pub async fn usage(&self) -> Result<CacheUsage> {
        let mut usage = CacheUsage::default();
        for dir in [&self.cache_dir, &self.partial_dir] {
            let entries = match self.fs.list_directory(dir).await {
                Ok(entries) => entries,
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(e.into()),
            };
            for path in entries {
                let metadata = self.fs.metadata(&path).await?;
                if !metadata.is_directory {
                    usage.files += 1;
                    usage.bytes += metadata.size;
                }
            }
        }
        Ok(usage)
    }

    /// Empty the cache. Returns what was removed.
    pub async fn clear(&self) -> Result<CacheUsage> {
        let usage = self.usage().await?;
        match self.fs.delete_dir_all(&self.cache_dir).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e.into()),
        }
        self.fs.create_dir_all(&self.cache_dir).await?;

        info!(files = usage.files, bytes = usage.bytes, "Cleared cache");
        Ok(usage)
    }

    /// Evict retained copies oldest-first until the cache fits `max_bytes`.
    pub async fn evict_to(&self, max_bytes: u64) -> Result<u64> {
        let mut retained = Vec::new();
        for path in self.fs.list_directory(&self.cache_dir).await? {
            let metadata = self.fs.metadata(&path).await?;
            if !metadata.is_directory {
                retained.push((metadata.modified_at.unwrap_or(0), path, metadata.size));
            }
        }

        let mut total: u64 = retained.iter().map(|(_, _, size)| size).sum();
        if total <= max_bytes {
            return Ok(0);
        }

        retained.sort();
        let mut evicted = 0;
        for (_, path, size) in retained {
            if total <= max_bytes {
                break;
            }
            self.fs.delete_file(&path).await?;
            total = total.saturating_sub(size);
            evicted += 1;
        }

        debug!(evicted, remaining_bytes = total, "Evicted cached songs");
        Ok(evicted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_desktop::TokioFileSystem;
    use std::io::Cursor;

    fn cache(root: &Path, retention: CacheRetention) -> (StagingCache, ReplicaLayout) {
        let layout = ReplicaLayout::new(root);
        let cache = StagingCache::new(
            Arc::new(TokioFileSystem::new()),
            &layout,
            retention,
            Duration::from_secs(5),
        );
        (cache, layout)
    }

    /// Reader that yields some bytes and then never completes.
    struct Stalling {
        sent: bool,
    }

    impl AsyncRead for Stalling {
        fn poll_read(
            mut self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
            buf: &mut core_async::io::ReadBuf<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            if self.sent {
                std::task::Poll::Pending
            } else {
                self.sent = true;
                buf.put_slice(&[1u8; 10]);
                std::task::Poll::Ready(Ok(()))
            }
        }
    }

    #[core_async::test]
    async fn test_stage_and_promote() {
        let dir = tempfile::tempdir().unwrap();
        let (cache, layout) = cache(dir.path(), CacheRetention::Discard);
        std::fs::create_dir_all(layout.music_dir()).unwrap();

        let data = vec![9u8; CHUNK_SIZE * 2 + 17];
        let mut reader = Cursor::new(data.clone());
        let staged = cache
            .stage("a.mp3", &mut reader, Some(data.len() as u64))
            .await
            .unwrap();
        assert_eq!(staged.bytes, data.len() as u64);

        let dest = layout.music_dir().join("a.mp3");
        cache.promote(staged.clone(), &dest).await.unwrap();

        assert_eq!(std::fs::read(&dest).unwrap(), data);
        assert!(!staged.path.exists());
        assert_eq!(cache.usage().await.unwrap().files, 0);
    }

    #[core_async::test]
    async fn test_short_stream_is_incomplete_and_cleaned() {
        let dir = tempfile::tempdir().unwrap();
        let (cache, layout) = cache(dir.path(), CacheRetention::Discard);

        let mut reader = Cursor::new(vec![1u8; 40]);
        let err = cache.stage("a.mp3", &mut reader, Some(100)).await.unwrap_err();

        assert!(matches!(
            err,
            SyncError::IncompleteDownload { received: 40, .. }
        ));
        assert_eq!(std::fs::read_dir(layout.partial_dir()).unwrap().count(), 0);
    }

    #[core_async::test]
    async fn test_long_stream_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (cache, _) = cache(dir.path(), CacheRetention::Discard);

        let mut reader = Cursor::new(vec![1u8; 150]);
        let err = cache.stage("a.mp3", &mut reader, Some(100)).await.unwrap_err();
        assert!(matches!(err, SyncError::IncompleteDownload { .. }));
    }

    #[core_async::test]
    async fn test_unknown_size_accepts_any_length() {
        let dir = tempfile::tempdir().unwrap();
        let (cache, _) = cache(dir.path(), CacheRetention::Discard);

        let mut reader = Cursor::new(vec![1u8; 150]);
        let staged = cache.stage("a.mp3", &mut reader, None).await.unwrap();
        assert_eq!(staged.bytes, 150);
    }

    #[core_async::test]
    async fn test_stalled_stream_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let layout = ReplicaLayout::new(dir.path());
        let cache = StagingCache::new(
            Arc::new(TokioFileSystem::new()),
            &layout,
            CacheRetention::Discard,
            Duration::from_millis(50),
        );

        let mut reader = Stalling { sent: false };
        let err = cache.stage("a.mp3", &mut reader, Some(100)).await.unwrap_err();

        match err {
            SyncError::IncompleteDownload { received, reason, .. } => {
                assert_eq!(received, 10);
                assert!(reason.contains("stalled"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(std::fs::read_dir(layout.partial_dir()).unwrap().count(), 0);
    }

    #[core_async::test]
    async fn test_keep_retention_reuses_copy() {
        let dir = tempfile::tempdir().unwrap();
        let (cache, layout) = cache(dir.path(), CacheRetention::Keep { max_bytes: 1 << 20 });
        std::fs::create_dir_all(layout.music_dir()).unwrap();

        let mut reader = Cursor::new(vec![3u8; 100]);
        let staged = cache.stage("a.mp3", &mut reader, Some(100)).await.unwrap();
        let dest = layout.music_dir().join("a.mp3");
        cache.promote(staged, &dest).await.unwrap();
        std::fs::remove_file(&dest).unwrap();

        assert!(cache.reusable("a.mp3", Some(99)).await.unwrap().is_none());
        let reused = cache.reusable("a.mp3", Some(100)).await.unwrap().unwrap();
        assert!(reused.from_cache);

        cache.promote(reused, &dest).await.unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), vec![3u8; 100]);
        assert_eq!(cache.usage().await.unwrap(), CacheUsage { files: 1, bytes: 100 });
    }

    #[core_async::test]
    async fn test_discard_retention_never_reuses() {
        let dir = tempfile::tempdir().unwrap();
        let (cache, layout) = cache(dir.path(), CacheRetention::Discard);
        std::fs::create_dir_all(layout.cache_dir()).unwrap();
        std::fs::write(layout.cache_dir().join("a.mp3"), [0u8; 10]).unwrap();

        assert!(cache.reusable("a.mp3", Some(10)).await.unwrap().is_none());
    }

    #[core_async::test]
    async fn test_eviction_keeps_cache_bounded() {
        let dir = tempfile::tempdir().unwrap();
        let (cache, layout) = cache(dir.path(), CacheRetention::Keep { max_bytes: 250 });
        std::fs::create_dir_all(layout.music_dir()).unwrap();

        for name in ["a.mp3", "b.mp3", "c.mp3"] {
            let mut reader = Cursor::new(vec![1u8; 100]);
            let staged = cache.stage(name, &mut reader, Some(100)).await.unwrap();
            cache
                .promote(staged, &layout.music_dir().join(name))
                .await
                .unwrap();
        }

        let usage = cache.usage().await.unwrap();
        assert!(usage.bytes <= 250);
        assert_eq!(usage.files, 2);
        assert_eq!(std::fs::read_dir(layout.music_dir()).unwrap().count(), 3);
    }

    #[core_async::test]
    async fn test_purge_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let (cache, layout) = cache(dir.path(), CacheRetention::Discard);
        std::fs::create_dir_all(layout.partial_dir()).unwrap();
        std::fs::write(layout.partial_dir().join("x.part"), [0u8; 5]).unwrap();
        std::fs::write(layout.partial_dir().join("y.part"), [0u8; 5]).unwrap();

        assert_eq!(cache.purge_partials().await.unwrap(), 2);
        assert_eq!(cache.purge_partials().await.unwrap(), 0);

        std::fs::write(layout.cache_dir().join("kept.mp3"), [0u8; 7]).unwrap();
        let cleared = cache.clear().await.unwrap();
        assert_eq!(cleared, CacheUsage { files: 1, bytes: 7 });
        assert!(layout.cache_dir().exists());
        assert_eq!(cache.usage().await.unwrap(), CacheUsage::default());
    }
}
