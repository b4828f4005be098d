//! # Replica Manifest
//!
//! The persisted record of what a replica holds. One manifest per replica
//! root, stored at `.dj-app/manifest.json`:
//!
//! ```json
//! {
//!   "last_sync": "2024-05-01T12:00:00Z",
//!   "server_url": "https://catalog.example.com",
//!   "songs": {
//!     "a.mp3": { "id": 7, "size": 100, "last_played": null, "cached": true }
//!   }
//! }
//! ```
//!
//! Saves go through a temp file and a rename so a crash mid-write never
//! leaves a half-written manifest behind. A manifest that cannot be parsed
//! is reported as [`SyncError::ManifestCorrupt`] and never silently reset.

use bridge_traits::storage::FileSystemAccess;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::layout::ReplicaLayout;
use crate::{Result, SyncError};

/// One song present in the replica's music directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicaEntry {
    /// Opaque server identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<serde_json::Value>,

    /// Size in bytes; `null` loads as 0.
    #[serde(default, deserialize_with = "null_as_zero")]
    pub size: u64,

    #[serde(default, with = "lenient_timestamp")]
    pub last_played: Option<DateTime<Utc>>,

    /// The visible file exists and is fully written.
    #[serde(default)]
    pub cached: bool,
}

impl ReplicaEntry {
    /// Entry for a freshly promoted file.
    pub fn promoted(id: Option<serde_json::Value>, size: u64) -> Self {
        Self {
            id,
            size,
            last_played: None,
            cached: true,
        }
    }
}

/// Replica state keyed by filename.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default, with = "lenient_timestamp")]
    pub last_sync: Option<DateTime<Utc>>,

    #[serde(default)]
    pub server_url: String,

    #[serde(default)]
    pub songs: BTreeMap<String, ReplicaEntry>,
}

impl Manifest {
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            ..Self::default()
        }
    }

    pub fn len(&self) -> usize {
        self.songs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.songs.is_empty()
    }

    pub fn contains(&self, filename: &str) -> bool {
        self.songs.contains_key(filename)
    }

    pub fn get(&self, filename: &str) -> Option<&ReplicaEntry> {
        self.songs.get(filename)
    }

    /// Insert or replace an entry. An existing `last_played` is kept.
    pub fn upsert(&mut self, filename: impl Into<String>, mut entry: ReplicaEntry) {
        let filename = filename.into();
        if let Some(existing) = self.songs.get(&filename) {
            if entry.last_played.is_none() {
                entry.last_played = existing.last_played;
            }
        }
        self.songs.insert(filename, entry);
    }

    pub fn remove(&mut self, filename: &str) -> Option<ReplicaEntry> {
        self.songs.remove(filename)
    }

    /// Filenames in ascending order.
    pub fn filenames(&self) -> impl Iterator<Item = &str> {
        self.songs.keys().map(String::as_str)
    }

    /// Record a playback. Only `last_played` changes.
    pub fn mark_played(&mut self, filename: &str, at: DateTime<Utc>) -> Result<()> {
        let entry = self
            .songs
            .get_mut(filename)
            .ok_or_else(|| SyncError::NotInManifest(filename.to_string()))?;
        entry.last_played = Some(at);
        Ok(())
    }

    /// Total size of all entries in bytes.
    pub fn total_bytes(&self) -> u64 {
        self.songs.values().map(|e| e.size).sum()
    }
}

/// Loads and atomically saves the manifest of one replica.
#[derive(Clone)]
pub struct ManifestStore {
    fs: Arc<dyn FileSystemAccess>,
    path: PathBuf,
    tmp_path: PathBuf,
}

impl ManifestStore {
    pub fn new(fs: Arc<dyn FileSystemAccess>, layout: &ReplicaLayout) -> Self {
        Self {
            fs,
            path: layout.manifest_path(),
            tmp_path: layout.manifest_tmp_path(),
        }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    pub async fn exists(&self) -> Result<bool> {
        Ok(self.fs.exists(&self.path).await?)
    }

    /// Load the manifest. A missing file yields an empty manifest.
    ///
    /// # Errors
    ///
    /// [`SyncError::ManifestCorrupt`] when the file exists but cannot be
    /// parsed.
    pub async fn load(&self) -> Result<Manifest> {
        let data = match self.fs.read_file(&self.path).await {
            Ok(data) => data,
            Err(e) if e.is_not_found() => {
                debug!(path = ?self.path, "No manifest yet, starting empty");
                return Ok(Manifest::default());
            }
            Err(e) => return Err(e.into()),
        };

        serde_json::from_slice(&data).map_err(|e| {
            warn!(path = ?self.path, error = %e, "Manifest is corrupt");
            SyncError::ManifestCorrupt {
                path: self.path.clone(),
                reason: e.to_string(),
            }
        })
    }

    /// Persist the manifest: write `manifest.json.tmp`, flush, rename.
    pub async fn save(&self, manifest: &Manifest) -> Result<()> {
        let json = serde_json::to_vec_pretty(manifest)
            .map_err(|e| SyncError::FileSystem(format!("manifest serialization: {}", e)))?;

        if let Err(e) = self.fs.write_file(&self.tmp_path, Bytes::from(json)).await {
            if let Err(cleanup) = self.fs.delete_file(&self.tmp_path).await {
                if !cleanup.is_not_found() {
                    warn!(path = ?self.tmp_path, error = %cleanup, "Failed to remove manifest temp file");
                }
            }
            return Err(e.into());
        }
        self.fs.rename(&self.tmp_path, &self.path).await?;

        debug!(path = ?self.path, songs = manifest.len(), "Saved manifest");
        Ok(())
    }
}

fn null_as_zero<'de, D>(deserializer: D) -> std::result::Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<u64>::deserialize(deserializer)?.unwrap_or(0))
}

/// RFC 3339 on write; RFC 3339 or naive ISO-8601 (read as UTC) on load.
mod lenient_timestamp {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

    pub fn serialize<S>(value: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(ts) => serializer.serialize_str(&ts.to_rfc3339()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let Some(raw) = Option::<String>::deserialize(deserializer)? else {
            return Ok(None);
        };
        parse(&raw)
            .map(Some)
            .ok_or_else(|| D::Error::custom(format!("invalid timestamp: {}", raw)))
    }

    pub(super) fn parse(raw: &str) -> Option<DateTime<Utc>> {
        if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
            return Some(ts.with_timezone(&Utc));
        }
        NAIVE_FORMATS
            .iter()
            .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
            .map(|naive| naive.and_utc())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_desktop::TokioFileSystem;
    use chrono::TimeZone;

    fn store(dir: &std::path::Path) -> ManifestStore {
        ManifestStore::new(Arc::new(TokioFileSystem::new()), &ReplicaLayout::new(dir))
    }

    #[test]
    fn test_parses_legacy_naive_timestamps() {
        let json = r#"{
            "last_sync": "2024-03-09T21:15:04.123456",
            "server_url": "http://localhost:8000",
            "songs": {
                "a.mp3": {"size": null, "last_played": "2024-03-09 22:00:00", "cached": true},
                "b.mp3": {"id": 12, "size": 200, "last_played": null, "cached": false}
            }
        }"#;

        let manifest: Manifest = serde_json::from_str(json).unwrap();

        let last_sync = manifest.last_sync.unwrap();
        assert_eq!(
            last_sync.timestamp(),
            Utc.with_ymd_and_hms(2024, 3, 9, 21, 15, 4).unwrap().timestamp()
        );
        assert_eq!(manifest.get("a.mp3").unwrap().size, 0);
        assert!(manifest.get("a.mp3").unwrap().last_played.is_some());
        assert_eq!(
            manifest.get("b.mp3").unwrap().id,
            Some(serde_json::json!(12))
        );
    }

    #[test]
    fn test_timestamp_parse_rejects_garbage() {
        assert!(lenient_timestamp::parse("yesterday").is_none());
        assert!(lenient_timestamp::parse("2024-01-01T00:00:00+02:00").is_some());
    }

    #[test]
    fn test_upsert_keeps_last_played() {
        let mut manifest = Manifest::new("http://localhost:8000");
        let played = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

        manifest.upsert("a.mp3", ReplicaEntry::promoted(None, 10));
        manifest.mark_played("a.mp3", played).unwrap();
        manifest.upsert("a.mp3", ReplicaEntry::promoted(None, 12));

        let entry = manifest.get("a.mp3").unwrap();
        assert_eq!(entry.size, 12);
        assert_eq!(entry.last_played, Some(played));
        assert!(matches!(
            manifest.mark_played("missing.mp3", played),
            Err(SyncError::NotInManifest(_))
        ));
    }

    #[core_async::test]
    async fn test_missing_manifest_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = store(dir.path()).load().await.unwrap();
        assert!(manifest.is_empty());
        assert!(manifest.last_sync.is_none());
    }

    #[core_async::test]
    async fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());

        let mut manifest = Manifest::new("http://localhost:8000");
        manifest.upsert("a.mp3", ReplicaEntry::promoted(Some(serde_json::json!("x1")), 100));
        manifest.last_sync = Some(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap());
        store.save(&manifest).await.unwrap();

        assert_eq!(store.load().await.unwrap(), manifest);
        assert!(!dir
            .path()
            .join(".dj-app")
            .join("manifest.json.tmp")
            .exists());
    }

    #[core_async::test]
    async fn test_truncated_manifest_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        std::fs::create_dir_all(dir.path().join(".dj-app")).unwrap();
        std::fs::write(store.path(), b"{\"songs\": {\"a.mp3\": {\"si").unwrap();

        match store.load().await {
            Err(SyncError::ManifestCorrupt { path, .. }) => assert_eq!(path, store.path()),
            other => panic!("expected ManifestCorrupt, got {:?}", other),
        }
    }

    #[core_async::test]
    async fn test_stale_temp_file_does_not_affect_committed_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());

        let mut manifest = Manifest::new("http://localhost:8000");
        manifest.upsert("a.mp3", ReplicaEntry::promoted(None, 1));
        store.save(&manifest).await.unwrap();

        std::fs::write(
            dir.path().join(".dj-app").join("manifest.json.tmp"),
            b"garbage from an interrupted save",
        )
        .unwrap();

        assert_eq!(store.load().await.unwrap(), manifest);

        manifest.upsert("b.mp3", ReplicaEntry::promoted(None, 2));
        store.save(&manifest).await.unwrap();
        assert_eq!(store.load().await.unwrap().len(), 2);
    }

    #[core_async::test]
    async fn test_failed_temp_write_keeps_committed_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());

        let mut manifest = Manifest::new("http://localhost:8000");
        manifest.upsert("a.mp3", ReplicaEntry::promoted(None, 1));
        store.save(&manifest).await.unwrap();

        // A directory in the temp file's place: the write fails and so does
        // the cleanup, which is logged rather than masking the write error.
        let tmp = dir.path().join(".dj-app").join("manifest.json.tmp");
        std::fs::create_dir(&tmp).unwrap();

        let mut next = manifest.clone();
        next.upsert("b.mp3", ReplicaEntry::promoted(None, 2));
        assert!(store.save(&next).await.is_err());
        assert!(tmp.is_dir());
        assert_eq!(store.load().await.unwrap(), manifest);
    }
}
