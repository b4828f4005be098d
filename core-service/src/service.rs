//! Replica operations exposed to front-ends.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use bridge_traits::catalog::{RemoteSong, SongCatalog};
use chrono::{DateTime, Utc};
use core_async::sync::CancellationToken;
use core_runtime::config::CoreConfig;
use core_runtime::events::{CatalogEvent, CoreEvent, EventBus, ReplicaEvent};
use core_sync::{
    CacheUsage, Manifest, ManifestStore, ReconciliationEngine, ReplicaLayout, StagingCache,
    SyncConfig, SyncResult,
};
use provider_catalog::{AccessToken, CatalogClient, UploadReceipt};
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::{CoreError, Result};

/// Outcome of [`ReplicaService::init`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InitReport {
    pub root: PathBuf,
    /// The root does not look like a removable drive.
    pub removable: bool,
    /// A manifest from an earlier init was found and kept.
    pub existing_manifest: bool,
    pub songs: usize,
}

/// One manifest entry as shown by `status`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SongStatus {
    pub filename: String,
    pub size: u64,
    pub last_played: Option<DateTime<Utc>>,
    /// The visible file is present on disk.
    pub present: bool,
}

/// Snapshot of a replica.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReplicaStatus {
    pub root: PathBuf,
    pub server_url: String,
    pub last_sync: Option<DateTime<Utc>>,
    pub songs: Vec<SongStatus>,
    pub total_bytes: u64,
    pub cache: CacheUsage,
}

/// Primary façade exposed to host applications.
#[derive(Clone)]
pub struct ReplicaService {
    config: Arc<CoreConfig>,
    sync_config: SyncConfig,
    client: Arc<CatalogClient>,
    catalog: Arc<dyn SongCatalog>,
    event_bus: EventBus,
}

impl ReplicaService {
    /// Create a service talking to `config.server_url`.
    ///
    /// # Errors
    ///
    /// [`CoreError::Sync`] when `sync_config` is out of range.
    pub fn new(config: CoreConfig, sync_config: SyncConfig) -> Result<Self> {
        sync_config.validate()?;

        let client = Arc::new(
            CatalogClient::new(config.http_client.clone(), config.server_url.clone())
                .with_catalog_timeout(config.catalog_timeout)
                .with_upload_timeout(config.upload_timeout),
        );
        let event_bus = EventBus::new(config.event_buffer_size);

        Ok(Self {
            config: Arc::new(config),
            sync_config,
            catalog: client.clone(),
            client,
            event_bus,
        })
    }

    /// Use another song source for listing and downloads.
    pub fn with_song_catalog(mut self, catalog: Arc<dyn SongCatalog>) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn layout(&self, operation: &str) -> Result<ReplicaLayout> {
        Ok(ReplicaLayout::new(
            self.config.require_replica_root(operation)?,
        ))
    }

    fn store(&self, layout: &ReplicaLayout) -> ManifestStore {
        ManifestStore::new(self.config.file_system.clone(), layout)
    }

    fn emit(&self, event: CoreEvent) {
        self.event_bus.emit(event).ok();
    }

    async fn initialized_layout(&self, operation: &str) -> Result<ReplicaLayout> {
        let layout = self.layout(operation)?;
        if !layout
            .is_initialized(self.config.file_system.as_ref())
            .await?
        {
            return Err(CoreError::NotInitialized(layout.root().to_path_buf()));
        }
        Ok(layout)
    }

    /// Create the replica layout and manifest. Existing songs and manifest
    /// entries are kept.
    ///
    /// # Errors
    ///
    /// A corrupt existing manifest is reported, never overwritten.
    #[instrument(skip(self), fields(root = ?self.config.replica_root))]
    pub async fn init(&self) -> Result<InitReport> {
        let layout = self.layout("init")?;
        let removable = layout.looks_removable();
        if !removable {
            warn!(root = ?layout.root(), "Replica root does not look like removable media");
        }

        layout.initialize(self.config.file_system.as_ref()).await?;

        let store = self.store(&layout);
        let existing_manifest = store.exists().await?;
        let mut manifest = store.load().await?;
        if manifest.server_url.is_empty() {
            manifest.server_url = self.config.server_url.clone();
        }
        store.save(&manifest).await?;

        info!(root = ?layout.root(), songs = manifest.len(), "Replica initialized");
        self.emit(CoreEvent::Replica(ReplicaEvent::Initialized {
            root: layout.root().display().to_string(),
        }));

        Ok(InitReport {
            root: layout.root().to_path_buf(),
            removable,
            existing_manifest,
            songs: manifest.len(),
        })
    }

    /// Run one reconciliation cycle against the catalog.
    #[instrument(skip(self, cancel), fields(root = ?self.config.replica_root))]
    pub async fn sync(&self, cancel: &CancellationToken) -> Result<SyncResult> {
        let layout = self.initialized_layout("sync").await?;
        let engine = ReconciliationEngine::new(
            self.sync_config.clone(),
            layout,
            self.catalog.clone(),
            self.config.file_system.clone(),
            self.config.clock.clone(),
        )?
        .with_event_bus(self.event_bus.clone());

        let mut manifest = engine.store().load().await?;
        manifest.server_url = self.config.server_url.clone();

        Ok(engine.sync_with_catalog(&mut manifest, cancel).await?)
    }

    /// Manifest contents plus on-disk presence of each song.
    pub async fn status(&self) -> Result<ReplicaStatus> {
        let layout = self.initialized_layout("status").await?;
        let manifest = self.store(&layout).load().await?;
        let fs = self.config.file_system.as_ref();

        let mut songs = Vec::with_capacity(manifest.len());
        for (filename, entry) in &manifest.songs {
            let present = match layout.song_path(filename) {
                Ok(path) => fs.exists(&path).await?,
                Err(_) => false,
            };
            songs.push(SongStatus {
                filename: filename.clone(),
                size: entry.size,
                last_played: entry.last_played,
                present,
            });
        }

        let cache = self.staging(&layout).usage().await?;

        Ok(ReplicaStatus {
            root: layout.root().to_path_buf(),
            server_url: manifest.server_url.clone(),
            last_sync: manifest.last_sync,
            total_bytes: manifest.total_bytes(),
            songs,
            cache,
        })
    }

    /// Record that `filename` was played now. Returns the song's path.
    #[instrument(skip(self))]
    pub async fn mark_played(&self, filename: &str) -> Result<PathBuf> {
        let layout = self.initialized_layout("play").await?;
        let path = layout.song_path(filename)?;
        let store = self.store(&layout);

        let mut manifest: Manifest = store.load().await?;
        manifest.mark_played(filename, self.config.clock.now())?;
        store.save(&manifest).await?;

        self.emit(CoreEvent::Replica(ReplicaEvent::SongPlayed {
            filename: filename.to_string(),
        }));
        Ok(path)
    }

    fn staging(&self, layout: &ReplicaLayout) -> StagingCache {
        StagingCache::new(
            self.config.file_system.clone(),
            layout,
            self.sync_config.cache_retention,
            self.sync_config.stall_timeout,
        )
    }

    /// Remove everything from the replica's cache directory.
    #[instrument(skip(self))]
    pub async fn clear_cache(&self) -> Result<CacheUsage> {
        let layout = self.initialized_layout("clear-cache").await?;
        let cleared = self.staging(&layout).clear().await?;

        self.emit(CoreEvent::Replica(ReplicaEvent::CacheCleared {
            files: cleared.files,
            bytes: cleared.bytes,
        }));
        Ok(cleared)
    }

    /// Songs currently offered by the catalog.
    pub async fn list_catalog(&self) -> Result<Vec<RemoteSong>> {
        let songs = self.catalog.fetch_catalog().await?;
        self.emit(CoreEvent::Catalog(CatalogEvent::Fetched {
            song_count: songs.len() as u64,
        }));
        Ok(songs)
    }

    /// Obtain a token with email and password.
    pub async fn login(&self, email: &str, password: &str) -> Result<AccessToken> {
        Ok(self.client.login(email, password).await?)
    }

    pub async fn signup(&self, email: &str, password: &str, name: &str) -> Result<AccessToken> {
        Ok(self.client.signup(email, password, name).await?)
    }

    /// Upload a local MP3 to the catalog.
    ///
    /// Without a `token` one is requested from `/auth/token` first.
    #[instrument(skip(self, token))]
    pub async fn upload(&self, path: &Path, token: Option<AccessToken>) -> Result<UploadReceipt> {
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| {
                CoreError::Catalog(bridge_traits::CatalogError::InvalidUpload(format!(
                    "{} has no file name",
                    path.display()
                )))
            })?;
        let data = self.config.file_system.read_file(path).await?;

        let token = match token {
            Some(token) => token,
            None => self.client.request_token().await?,
        };

        let receipt = self.client.upload(&filename, data, &token).await?;
        self.emit(CoreEvent::Catalog(CatalogEvent::Uploaded {
            filename: receipt.filename.clone().unwrap_or(filename),
            song_count: receipt.song_count.unwrap_or_default(),
            remaining: receipt.remaining,
        }));
        Ok(receipt)
    }
}
