//! End-to-end tests for `ReplicaService` against a temporary replica.

use async_trait::async_trait;
use bridge_desktop::TokioFileSystem;
use bridge_traits::{
    catalog::{CatalogError, CatalogResult, RemoteSong, SongCatalog, SongStream},
    error::Result as BridgeResult,
    http::{HttpClient, HttpMethod, HttpRequest, HttpResponse, HttpStream},
    storage::FileSystemAccess,
    time::Clock,
};
use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};
use core_async::sync::CancellationToken;
use core_runtime::config::CoreConfig;
use core_runtime::events::{CatalogEvent, CoreEvent, ReplicaEvent};
use core_service::{CacheRetention, CoreError, ReplicaService, SyncConfig};
use core_sync::{ManifestStore, ReplicaLayout, SyncError};
use mockall::mock;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

mock! {
    Http {}

    #[async_trait]
    impl HttpClient for Http {
        async fn execute(&self, request: HttpRequest) -> BridgeResult<HttpResponse>;
        async fn download_stream(&self, request: HttpRequest) -> BridgeResult<HttpStream>;
    }
}

/// Serves a fixed song list; song bytes are `size` zero bytes.
#[derive(Default)]
struct MemoryCatalog {
    songs: Mutex<Vec<RemoteSong>>,
    unreachable: Mutex<bool>,
}

impl MemoryCatalog {
    fn with(songs: &[(&str, u64)]) -> Arc<Self> {
        let catalog = Self::default();
        *catalog.songs.lock().unwrap() = songs
            .iter()
            .map(|(name, size)| RemoteSong {
                filename: name.to_string(),
                url: format!("/songs/{}", name),
                size: Some(*size),
                id: None,
                title: None,
                artist: None,
                album: None,
                duration: None,
            })
            .collect();
        Arc::new(catalog)
    }
}

#[async_trait]
impl SongCatalog for MemoryCatalog {
    async fn fetch_catalog(&self) -> CatalogResult<Vec<RemoteSong>> {
        if *self.unreachable.lock().unwrap() {
            return Err(CatalogError::Unreachable("connection refused".into()));
        }
        Ok(self.songs.lock().unwrap().clone())
    }

    async fn fetch_bytes(&self, song: &RemoteSong) -> CatalogResult<SongStream> {
        let size = song.size.unwrap_or_default() as usize;
        Ok(SongStream {
            content_length: song.size,
            reader: Box::new(std::io::Cursor::new(vec![0u8; size])),
        })
    }
}

struct FixedClock(DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

fn played_at() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 9, 22, 15, 0).unwrap()
}

fn config(root: &Path, http: MockHttp) -> CoreConfig {
    CoreConfig::builder()
        .server_url("http://catalog.test:8000")
        .replica_root(root)
        .http_client(Arc::new(http))
        .file_system(Arc::new(TokioFileSystem::new()))
        .clock(Arc::new(FixedClock(played_at())))
        .build()
        .unwrap()
}

fn service(root: &Path, catalog: Arc<MemoryCatalog>) -> ReplicaService {
    ReplicaService::new(config(root, MockHttp::new()), SyncConfig::default())
        .unwrap()
        .with_song_catalog(catalog)
}

fn response(status: u16, body: &'static str) -> BridgeResult<HttpResponse> {
    Ok(HttpResponse {
        status,
        headers: HashMap::new(),
        body: Bytes::from(body),
    })
}

#[core_async::test]
async fn test_init_creates_layout_and_manifest() {
    let dir = tempfile::tempdir().unwrap();
    let service = service(dir.path(), MemoryCatalog::with(&[]));
    let mut events = service.event_bus().subscribe();

    let report = service.init().await.unwrap();

    assert_eq!(report.root, dir.path());
    assert!(!report.existing_manifest);
    assert_eq!(report.songs, 0);
    assert!(dir.path().join("Music").is_dir());
    assert!(dir.path().join(".dj-app/cache").is_dir());
    assert!(dir.path().join("README.txt").is_file());

    let layout = ReplicaLayout::new(dir.path());
    let manifest = ManifestStore::new(Arc::new(TokioFileSystem::new()), &layout)
        .load()
        .await
        .unwrap();
    assert_eq!(manifest.server_url, "http://catalog.test:8000");
    assert!(manifest.last_sync.is_none());

    assert!(matches!(
        events.try_recv(),
        Ok(CoreEvent::Replica(ReplicaEvent::Initialized { .. }))
    ));
}

#[core_async::test]
async fn test_init_keeps_existing_songs() {
    let dir = tempfile::tempdir().unwrap();
    let service = service(dir.path(), MemoryCatalog::with(&[("a.mp3", 10)]));

    service.init().await.unwrap();
    service.sync(&CancellationToken::new()).await.unwrap();

    let report = service.init().await.unwrap();
    assert!(report.existing_manifest);
    assert_eq!(report.songs, 1);
    assert!(dir.path().join("Music/a.mp3").is_file());
}

#[core_async::test]
async fn test_operations_require_init() {
    let dir = tempfile::tempdir().unwrap();
    let service = service(dir.path(), MemoryCatalog::with(&[("a.mp3", 10)]));

    let err = service.sync(&CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, CoreError::NotInitialized(ref root) if root == dir.path()));

    assert!(matches!(
        service.status().await,
        Err(CoreError::NotInitialized(_))
    ));
    assert!(!dir.path().join("Music").exists());
}

#[core_async::test]
async fn test_missing_replica_root_is_reported() {
    let config = CoreConfig::builder()
        .server_url("http://catalog.test:8000")
        .http_client(Arc::new(MockHttp::new()))
        .file_system(Arc::new(TokioFileSystem::new()))
        .build()
        .unwrap();
    let service = ReplicaService::new(config, SyncConfig::default()).unwrap();

    let err = service.init().await.unwrap_err();
    assert!(matches!(err, CoreError::InitializationFailed(ref msg) if msg.contains("init")));
}

#[core_async::test]
async fn test_invalid_sync_config_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let sync_config = SyncConfig {
        max_concurrent_downloads: 9,
        ..SyncConfig::default()
    };

    let result = ReplicaService::new(config(dir.path(), MockHttp::new()), sync_config);
    assert!(matches!(
        result,
        Err(CoreError::Sync(SyncError::InvalidConfig(_)))
    ));
}

#[core_async::test]
async fn test_sync_then_status() {
    let dir = tempfile::tempdir().unwrap();
    let catalog = MemoryCatalog::with(&[("a.mp3", 100), ("b.mp3", 200)]);
    let service = service(dir.path(), catalog);

    service.init().await.unwrap();
    let result = service.sync(&CancellationToken::new()).await.unwrap();
    assert_eq!((result.added, result.removed, result.failed), (2, 0, 0));

    std::fs::remove_file(dir.path().join("Music/b.mp3")).unwrap();

    let status = service.status().await.unwrap();
    assert_eq!(status.server_url, "http://catalog.test:8000");
    assert_eq!(status.last_sync, Some(played_at()));
    assert_eq!(status.total_bytes, 300);
    let presence: Vec<_> = status
        .songs
        .iter()
        .map(|s| (s.filename.as_str(), s.present))
        .collect();
    assert_eq!(presence, vec![("a.mp3", true), ("b.mp3", false)]);
}

#[core_async::test]
async fn test_unreachable_catalog_surfaces_error() {
    let dir = tempfile::tempdir().unwrap();
    let catalog = MemoryCatalog::with(&[("a.mp3", 10)]);
    *catalog.unreachable.lock().unwrap() = true;
    let service = service(dir.path(), catalog);
    service.init().await.unwrap();

    let err = service.sync(&CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, CoreError::Sync(SyncError::CatalogUnreachable(_))));

    let status = service.status().await.unwrap();
    assert!(status.songs.is_empty());
    assert!(status.last_sync.is_none());
}

#[core_async::test]
async fn test_mark_played() {
    let dir = tempfile::tempdir().unwrap();
    let service = service(dir.path(), MemoryCatalog::with(&[("a.mp3", 10)]));
    service.init().await.unwrap();
    service.sync(&CancellationToken::new()).await.unwrap();

    let path = service.mark_played("a.mp3").await.unwrap();
    assert_eq!(path, dir.path().join("Music").join("a.mp3"));

    let status = service.status().await.unwrap();
    assert_eq!(status.songs[0].last_played, Some(played_at()));

    let err = service.mark_played("missing.mp3").await.unwrap_err();
    assert!(matches!(err, CoreError::Sync(SyncError::NotInManifest(_))));

    let err = service.mark_played("../escape.mp3").await.unwrap_err();
    assert!(matches!(err, CoreError::Sync(SyncError::UnsafeFilename(_))));
}

#[core_async::test]
async fn test_clear_cache_with_kept_copies() {
    let dir = tempfile::tempdir().unwrap();
    let sync_config = SyncConfig {
        cache_retention: CacheRetention::Keep {
            max_bytes: 1024 * 1024,
        },
        ..SyncConfig::default()
    };
    let service = ReplicaService::new(config(dir.path(), MockHttp::new()), sync_config)
        .unwrap()
        .with_song_catalog(MemoryCatalog::with(&[("a.mp3", 10), ("b.mp3", 20)]));
    let mut events = service.event_bus().subscribe();

    service.init().await.unwrap();
    service.sync(&CancellationToken::new()).await.unwrap();

    let status = service.status().await.unwrap();
    assert_eq!(status.cache.files, 2);
    assert_eq!(status.cache.bytes, 30);

    let cleared = service.clear_cache().await.unwrap();
    assert_eq!(cleared.files, 2);
    assert_eq!(cleared.bytes, 30);
    assert_eq!(service.status().await.unwrap().cache.files, 0);
    assert!(dir.path().join("Music/a.mp3").is_file());

    let mut saw_cleared = false;
    while let Ok(event) = events.try_recv() {
        if let CoreEvent::Replica(ReplicaEvent::CacheCleared { files, bytes }) = event {
            saw_cleared = files == 2 && bytes == 30;
        }
    }
    assert!(saw_cleared);
}

#[core_async::test]
async fn test_upload_requests_token_when_missing() {
    let dir = tempfile::tempdir().unwrap();
    let song = dir.path().join("set.mp3");
    std::fs::write(&song, b"ID3 fake audio").unwrap();

    let mut http = MockHttp::new();
    http.expect_execute()
        .withf(|req| req.url == "http://catalog.test:8000/auth/token")
        .times(1)
        .returning(|_| response(200, r#"{"access_token":"tok-1","token_type":"bearer"}"#));
    http.expect_execute()
        .withf(|req| req.url == "http://catalog.test:8000/upload")
        .times(1)
        .returning(|req| {
            assert_eq!(req.method, HttpMethod::Post);
            assert_eq!(
                req.headers.get("Authorization").map(String::as_str),
                Some("Bearer tok-1")
            );
            response(200, r#"{"song_count":4,"limit":25,"remaining":21}"#)
        });

    let service = ReplicaService::new(config(dir.path(), http), SyncConfig::default()).unwrap();
    let mut events = service.event_bus().subscribe();

    let receipt = service.upload(&song, None).await.unwrap();

    assert_eq!(receipt.filename.as_deref(), Some("set.mp3"));
    assert_eq!(receipt.song_count, Some(4));
    assert_eq!(receipt.remaining, Some(21));
    assert!(matches!(
        events.try_recv(),
        Ok(CoreEvent::Catalog(CatalogEvent::Uploaded { song_count: 4, remaining: Some(21), .. }))
    ));
}

#[core_async::test]
async fn test_upload_limit_reached() {
    let dir = tempfile::tempdir().unwrap();
    let song = dir.path().join("set.mp3");
    std::fs::write(&song, b"ID3 fake audio").unwrap();

    let mut http = MockHttp::new();
    http.expect_execute()
        .times(1)
        .returning(|_| response(402, r#"{"detail":"Free tier limit reached"}"#));

    let service = ReplicaService::new(config(dir.path(), http), SyncConfig::default()).unwrap();
    let err = service
        .upload(&song, Some(core_service::AccessToken::new("tok-2")))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        CoreError::Catalog(CatalogError::UploadLimitReached { limit: 25 })
    ));
}

#[core_async::test]
async fn test_list_catalog_emits_fetched() {
    let dir = tempfile::tempdir().unwrap();
    let service = service(dir.path(), MemoryCatalog::with(&[("a.mp3", 1), ("b.mp3", 2)]));
    let mut events = service.event_bus().subscribe();

    let songs = service.list_catalog().await.unwrap();

    assert_eq!(songs.len(), 2);
    assert!(matches!(
        events.try_recv(),
        Ok(CoreEvent::Catalog(CatalogEvent::Fetched { song_count: 2 }))
    ));
    // Listing never touches the replica.
    assert!(!TokioFileSystem::new()
        .exists(&dir.path().join(".dj-app"))
        .await
        .unwrap());
}
