//! # Reconciliation Engine
//!
//! Converges a replica's music directory to the catalog.
//!
//! ## Workflow
//!
//! 1. Validate the catalog (duplicate filenames abort, unsafe ones are
//!    per-file failures) and diff it against the manifest
//! 2. Download missing songs in filename order, up to
//!    `max_concurrent_downloads` at a time, each into the staging cache
//! 3. Promote each staged song, upsert its entry, persist the manifest
//! 4. Delete songs the catalog no longer lists, persisting after each
//! 5. Stamp `last_sync` and persist
//!
//! Downloads run concurrently but their results are consumed in order by a
//! single loop, so the manifest has exactly one writer. A failed song is
//! retried with exponential backoff, then recorded in the result; the cycle
//! carries on with the next one.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use core_sync::{ReconciliationEngine, SyncConfig, ReplicaLayout};
//! use core_async::sync::CancellationToken;
//!
//! let engine = ReconciliationEngine::new(
//!     SyncConfig::default(),
//!     ReplicaLayout::new("/Volumes/DJ"),
//!     catalog,
//!     file_system,
//!     clock,
//! )?;
//! let mut manifest = engine.store().load().await?;
//! let result = engine.sync_with_catalog(&mut manifest, &CancellationToken::new()).await?;
//! println!("added {} removed {} failed {}", result.added, result.removed, result.failed);
//! ```

use bridge_traits::catalog::{CatalogError, RemoteSong, SongCatalog};
use bridge_traits::storage::FileSystemAccess;
use bridge_traits::time::Clock;
use core_async::sync::CancellationToken;
use core_async::time::{backoff_delay, sleep, Duration, Instant};
use core_runtime::events::{CatalogEvent, CoreEvent, EventBus, FilePhase, SyncEvent};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

use crate::layout::ReplicaLayout;
use crate::manifest::{Manifest, ManifestStore, ReplicaEntry};
use crate::staging::{CacheRetention, StagedFile, StagingCache};
use crate::{Result, SyncError};

/// Upper bound for `max_concurrent_downloads`.
pub const MAX_CONCURRENT_DOWNLOADS: usize = 4;

/// Engine configuration
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Songs downloaded at once (1 to 4)
    pub max_concurrent_downloads: usize,

    /// Download attempts per song, including the first
    pub retry_attempts: u32,

    /// Delay before the first retry; doubles for each further retry
    pub retry_base_delay: Duration,

    /// Longest wait for the next chunk of a song stream
    pub stall_timeout: Duration,

    /// Re-download songs whose visible file is missing or has the wrong size
    pub verify_sizes: bool,

    pub cache_retention: CacheRetention,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_concurrent_downloads: 2,
            retry_attempts: 3,
            retry_base_delay: Duration::from_millis(100),
            stall_timeout: Duration::from_secs(30),
            verify_sizes: false,
            cache_retention: CacheRetention::Discard,
        }
    }
}

impl SyncConfig {
    pub fn validate(&self) -> Result<()> {
        if !(1..=MAX_CONCURRENT_DOWNLOADS).contains(&self.max_concurrent_downloads) {
            return Err(SyncError::InvalidConfig(format!(
                "max_concurrent_downloads must be between 1 and {}, got {}",
                MAX_CONCURRENT_DOWNLOADS, self.max_concurrent_downloads
            )));
        }
        if self.retry_attempts == 0 {
            return Err(SyncError::InvalidConfig(
                "retry_attempts must be at least 1".to_string(),
            ));
        }
        if self.stall_timeout.is_zero() {
            return Err(SyncError::InvalidConfig(
                "stall_timeout must be greater than zero".to_string(),
            ));
        }
        if let CacheRetention::Keep { max_bytes: 0 } = self.cache_retention {
            return Err(SyncError::InvalidConfig(
                "cache max_bytes must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// A song that could not be added or removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncFailure {
    pub filename: String,
    pub reason: String,
}

impl SyncFailure {
    fn new(filename: impl Into<String>, error: &SyncError) -> Self {
        Self {
            filename: filename.into(),
            reason: error.to_string(),
        }
    }
}

/// Outcome of one cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncResult {
    pub added: usize,
    pub removed: usize,
    pub failed: usize,
    /// Songs already present and left untouched.
    pub skipped_unchanged: usize,
    pub failures: Vec<SyncFailure>,
    /// The cycle stopped early; `last_sync` was not updated.
    pub cancelled: bool,
}

impl SyncResult {
    pub fn is_clean(&self) -> bool {
        self.failed == 0 && !self.cancelled
    }

    fn record_failure(&mut self, failure: SyncFailure) {
        self.failed += 1;
        self.failures.push(failure);
    }
}

/// What a cycle will do, computed before any file I/O on the replica.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncPlan {
    /// Ascending by filename.
    pub to_add: Vec<RemoteSong>,
    /// Ascending by filename.
    pub to_remove: Vec<String>,
    pub unchanged: usize,
    /// Songs with filenames that cannot be written safely.
    pub rejected: Vec<SyncFailure>,
}

impl SyncPlan {
    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty() && self.rejected.is_empty()
    }
}

/// Reconciles one replica root against the catalog.
pub struct ReconciliationEngine {
    config: SyncConfig,
    layout: ReplicaLayout,
    catalog: Arc<dyn SongCatalog>,
    fs: Arc<dyn FileSystemAccess>,
    clock: Arc<dyn Clock>,
    store: ManifestStore,
    cache: StagingCache,
    event_bus: Option<EventBus>,
}

impl ReconciliationEngine {
    /// Create an engine for the replica at `layout`.
    ///
    /// # Errors
    ///
    /// [`SyncError::InvalidConfig`] if `config` is out of range.
    pub fn new(
        config: SyncConfig,
        layout: ReplicaLayout,
        catalog: Arc<dyn SongCatalog>,
        fs: Arc<dyn FileSystemAccess>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;

        let store = ManifestStore::new(fs.clone(), &layout);
        let cache = StagingCache::new(
            fs.clone(),
            &layout,
            config.cache_retention,
            config.stall_timeout,
        );

        Ok(Self {
            config,
            layout,
            catalog,
            fs,
            clock,
            store,
            cache,
            event_bus: None,
        })
    }

    /// Publish progress on `bus`.
    pub fn with_event_bus(mut self, bus: EventBus) -> Self {
        self.event_bus = Some(bus);
        self
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn layout(&self) -> &ReplicaLayout {
        &self.layout
    }

    pub fn store(&self) -> &ManifestStore {
        &self.store
    }

    pub fn cache(&self) -> &StagingCache {
        &self.cache
    }

    fn emit(&self, event: SyncEvent) {
        if let Some(bus) = &self.event_bus {
            bus.emit(CoreEvent::Sync(event)).ok();
        }
    }

    fn emit_progress(&self, filename: &str, phase: FilePhase) {
        self.emit(SyncEvent::FileProgress {
            filename: filename.to_string(),
            phase,
        });
    }

    /// Diff `remote` against `manifest`.
    ///
    /// # Errors
    ///
    /// [`SyncError::DuplicateFilename`] if the catalog lists a filename twice.
    pub async fn plan(&self, manifest: &Manifest, remote: Vec<RemoteSong>) -> Result<SyncPlan> {
        let mut seen = HashSet::with_capacity(remote.len());
        for song in &remote {
            if !seen.insert(song.filename.as_str()) {
                return Err(SyncError::DuplicateFilename(song.filename.clone()));
            }
        }

        let mut plan = SyncPlan {
            to_remove: manifest
                .filenames()
                .filter(|name| !seen.contains(name))
                .map(str::to_string)
                .collect(),
            ..SyncPlan::default()
        };

        let mut candidates = BTreeMap::new();
        for song in remote {
            if song.has_safe_filename() {
                candidates.insert(song.filename.clone(), song);
            } else {
                let err = SyncError::UnsafeFilename(song.filename.clone());
                plan.rejected.push(SyncFailure::new(song.filename, &err));
            }
        }

        for (filename, song) in candidates {
            match manifest.get(&filename) {
                None => plan.to_add.push(song),
                Some(entry) if !entry.cached => plan.to_add.push(song),
                Some(entry) if self.config.verify_sizes => {
                    if self.needs_refresh(&song, entry).await? {
                        plan.to_add.push(song);
                    } else {
                        plan.unchanged += 1;
                    }
                }
                Some(_) => plan.unchanged += 1,
            }
        }

        Ok(plan)
    }

    async fn needs_refresh(&self, song: &RemoteSong, entry: &ReplicaEntry) -> Result<bool> {
        let path = self.layout.song_path(&song.filename)?;
        let on_disk = match self.fs.metadata(&path).await {
            Ok(metadata) => metadata.size,
            Err(e) if e.is_not_found() => {
                debug!(filename = %song.filename, "Visible file missing");
                return Ok(true);
            }
            Err(e) => return Err(e.into()),
        };

        let expected = song.size.unwrap_or(entry.size);
        if on_disk != expected {
            debug!(filename = %song.filename, on_disk, expected, "Size mismatch");
        }
        Ok(on_disk != expected)
    }

    /// Fetch the catalog, then [`sync`](Self::sync).
    ///
    /// A catalog failure aborts before the manifest is touched.
    #[instrument(skip_all, fields(root = ?self.layout.root()))]
    pub async fn sync_with_catalog(
        &self,
        manifest: &mut Manifest,
        cancel: &CancellationToken,
    ) -> Result<SyncResult> {
        let remote = match self.catalog.fetch_catalog().await {
            Ok(songs) => songs,
            Err(e) => {
                error!(error = %e, "Catalog fetch failed");
                if let (Some(bus), CatalogError::Unreachable(message)) = (&self.event_bus, &e) {
                    bus.emit(CoreEvent::Catalog(CatalogEvent::Unreachable {
                        message: message.clone(),
                    }))
                    .ok();
                }
                let err = SyncError::from(e);
                self.emit(SyncEvent::Failed {
                    message: err.to_string(),
                });
                return Err(err);
            }
        };

        if let Some(bus) = &self.event_bus {
            bus.emit(CoreEvent::Catalog(CatalogEvent::Fetched {
                song_count: remote.len() as u64,
            }))
            .ok();
        }

        self.sync(manifest, remote, cancel).await
    }

    /// Converge the replica to `remote`.
    ///
    /// `manifest` is updated and persisted after every added or removed
    /// song. `last_sync` is stamped only when the cycle ran to the end.
    #[instrument(skip_all, fields(root = ?self.layout.root(), songs = remote.len()))]
    pub async fn sync(
        &self,
        manifest: &mut Manifest,
        remote: Vec<RemoteSong>,
        cancel: &CancellationToken,
    ) -> Result<SyncResult> {
        match self.run_cycle(manifest, remote, cancel).await {
            Ok(result) => Ok(result),
            Err(e) => {
                error!(error = %e, "Sync aborted");
                self.emit(SyncEvent::Failed {
                    message: e.to_string(),
                });
                Err(e)
            }
        }
    }

    async fn run_cycle(
        &self,
        manifest: &mut Manifest,
        remote: Vec<RemoteSong>,
        cancel: &CancellationToken,
    ) -> Result<SyncResult> {
        let started = Instant::now();
        let plan = self.plan(manifest, remote).await?;

        let mut result = SyncResult {
            skipped_unchanged: plan.unchanged,
            ..SyncResult::default()
        };

        if cancel.is_cancelled() {
            info!("Sync cancelled before start");
            result.cancelled = true;
            self.emit(SyncEvent::Cancelled {
                added: 0,
                removed: 0,
            });
            return Ok(result);
        }

        self.layout.initialize(self.fs.as_ref()).await?;
        self.cache.purge_partials().await?;

        info!(
            to_add = plan.to_add.len(),
            to_remove = plan.to_remove.len(),
            unchanged = plan.unchanged,
            rejected = plan.rejected.len(),
            "Starting sync"
        );
        self.emit(SyncEvent::Started {
            root: self.layout.root().display().to_string(),
            to_add: plan.to_add.len() as u64,
            to_remove: plan.to_remove.len() as u64,
        });

        for failure in plan.rejected {
            warn!(filename = %failure.filename, "Skipping song with unsafe filename");
            self.emit_progress(
                &failure.filename,
                FilePhase::Failed {
                    reason: failure.reason.clone(),
                },
            );
            result.record_failure(failure);
        }

        // Deletions are skipped once cancellation is requested.
        let interrupted = self
            .apply_additions(manifest, plan.to_add, cancel, &mut result)
            .await?
            || cancel.is_cancelled()
            || self
                .apply_removals(manifest, plan.to_remove, cancel, &mut result)
                .await?;

        let duration_ms = started.elapsed().as_millis() as u64;
        if interrupted {
            result.cancelled = true;
            if let Err(e) = self.cache.purge_partials().await {
                warn!(error = %e, "Failed to purge partial downloads");
            }
            info!(added = result.added, removed = result.removed, "Sync cancelled");
            self.emit(SyncEvent::Cancelled {
                added: result.added as u64,
                removed: result.removed as u64,
            });
            return Ok(result);
        }

        manifest.last_sync = Some(self.clock.now());
        self.store.save(manifest).await?;

        info!(
            added = result.added,
            removed = result.removed,
            failed = result.failed,
            duration_ms,
            "Sync completed"
        );
        self.emit(SyncEvent::Completed {
            added: result.added as u64,
            removed: result.removed as u64,
            failed: result.failed as u64,
            duration_ms,
        });
        Ok(result)
    }

    /// Download, promote and commit each song. Returns whether any song was
    /// skipped because of cancellation.
    async fn apply_additions(
        &self,
        manifest: &mut Manifest,
        to_add: Vec<RemoteSong>,
        cancel: &CancellationToken,
        result: &mut SyncResult,
    ) -> Result<bool> {
        let mut interrupted = false;
        let mut downloads = std::pin::pin!(stream::iter(to_add)
            .map(|song| async move {
                if cancel.is_cancelled() {
                    return (song, None);
                }
                let staged = self.acquire(&song, cancel).await;
                (song, Some(staged))
            })
            .buffered(self.config.max_concurrent_downloads));

        while let Some((song, staged)) = downloads.next().await {
            let outcome = match staged {
                None => {
                    interrupted = true;
                    continue;
                }
                Some(Ok(staged)) => self.commit(manifest, &song, staged).await,
                Some(Err(e)) => Err(e),
            };

            match outcome {
                Ok(()) => result.added += 1,
                Err(e) if e.is_per_file() => {
                    warn!(filename = %song.filename, error = %e, "Failed to add song");
                    self.emit_progress(
                        &song.filename,
                        FilePhase::Failed {
                            reason: e.to_string(),
                        },
                    );
                    result.record_failure(SyncFailure::new(&song.filename, &e));
                    self.mark_stale(manifest, &song.filename).await?;
                }
                Err(e) => return Err(e),
            }
        }

        Ok(interrupted)
    }

    /// A song queued for refresh could not be replaced; its visible file is
    /// missing or wrong, so the next cycle must add it again.
    async fn mark_stale(&self, manifest: &mut Manifest, filename: &str) -> Result<()> {
        let Some(entry) = manifest.songs.get_mut(filename) else {
            return Ok(());
        };
        if !entry.cached {
            return Ok(());
        }
        entry.cached = false;
        debug!(%filename, "Marked entry as not cached");
        self.store.save(manifest).await
    }

    /// Staged bytes for `song`, from the cache or a download with retries.
    async fn acquire(&self, song: &RemoteSong, cancel: &CancellationToken) -> Result<StagedFile> {
        if let Some(staged) = self.cache.reusable(&song.filename, song.size).await? {
            self.emit_progress(
                &song.filename,
                FilePhase::ReusedFromCache {
                    bytes: staged.bytes,
                },
            );
            return Ok(staged);
        }

        let max_attempts = self.config.retry_attempts.max(1);
        let mut attempt = 1;
        loop {
            let phase = if attempt == 1 {
                FilePhase::Downloading
            } else {
                FilePhase::Retrying { attempt }
            };
            self.emit_progress(&song.filename, phase);

            match self.download(song).await {
                Ok(staged) => {
                    self.emit_progress(
                        &song.filename,
                        FilePhase::Staged {
                            bytes: staged.bytes,
                        },
                    );
                    return Ok(staged);
                }
                Err(e) if attempt < max_attempts && e.is_per_file() && !cancel.is_cancelled() => {
                    let delay = backoff_delay(self.config.retry_base_delay, attempt);
                    warn!(
                        filename = %song.filename,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Download failed, retrying"
                    );
                    sleep(delay).await;
                    if cancel.is_cancelled() {
                        return Err(e);
                    }
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn download(&self, song: &RemoteSong) -> Result<StagedFile> {
        let mut stream = self.catalog.fetch_bytes(song).await?;
        let expected = stream.content_length.or(song.size);
        self.cache
            .stage(&song.filename, stream.reader.as_mut(), expected)
            .await
    }

    async fn commit(&self, manifest: &mut Manifest, song: &RemoteSong, staged: StagedFile) -> Result<()> {
        let dest = match self.layout.song_path(&song.filename) {
            Ok(dest) => dest,
            Err(e) => {
                self.cache.discard(staged).await;
                return Err(e);
            }
        };

        let bytes = self
            .cache
            .promote(staged, &dest)
            .await
            .map_err(|e| match e {
                e if e.is_per_file() => e,
                other => SyncError::DownloadFailed {
                    filename: song.filename.clone(),
                    reason: format!("promotion failed: {}", other),
                },
            })?;
        manifest.upsert(song.filename.clone(), ReplicaEntry::promoted(song.id.clone(), bytes));
        self.store.save(manifest).await?;

        debug!(filename = %song.filename, bytes, "Added song");
        self.emit_progress(&song.filename, FilePhase::Promoted { bytes });
        Ok(())
    }

    /// Delete each song and its entry. Returns whether cancellation cut the
    /// phase short.
    async fn apply_removals(
        &self,
        manifest: &mut Manifest,
        to_remove: Vec<String>,
        cancel: &CancellationToken,
        result: &mut SyncResult,
    ) -> Result<bool> {
        for filename in to_remove {
            if cancel.is_cancelled() {
                return Ok(true);
            }
            self.emit_progress(&filename, FilePhase::Removing);

            match self.remove_file(&filename).await {
                Ok(()) => {
                    manifest.remove(&filename);
                    self.store.save(manifest).await?;
                    result.removed += 1;
                    debug!(%filename, "Removed song");
                    self.emit_progress(&filename, FilePhase::Removed);
                }
                Err(e) if e.is_per_file() => {
                    warn!(%filename, error = %e, "Failed to remove song");
                    self.emit_progress(
                        &filename,
                        FilePhase::Failed {
                            reason: e.to_string(),
                        },
                    );
                    result.record_failure(SyncFailure::new(&filename, &e));
                }
                Err(e) => return Err(e),
            }
        }
        Ok(false)
    }

    async fn remove_file(&self, filename: &str) -> Result<()> {
        let path = self.layout.song_path(filename)?;
        match self.fs.delete_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => {
                debug!(%filename, "Already absent");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}
