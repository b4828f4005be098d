//! # Replica Sync
//!
//! Keeps a replica (USB drive or cache directory) converged to the song
//! catalog.
//!
//! ## Components
//!
//! - **Layout** (`layout`): where songs, the manifest, the cache and the log live under a replica root
//! - **Manifest** (`manifest`): persisted replica state with atomic saves
//! - **Staging Cache** (`staging`): streams downloads to partial files and promotes them into view
//! - **Reconciliation Engine** (`engine`): diffs catalog and manifest and applies the changes

pub mod engine;
pub mod error;
pub mod layout;
pub mod manifest;
pub mod staging;

pub use engine::{
    ReconciliationEngine, SyncConfig, SyncFailure, SyncPlan, SyncResult, MAX_CONCURRENT_DOWNLOADS,
};
pub use error::{Result, SyncError};
pub use layout::{looks_removable, ReplicaLayout};
pub use manifest::{Manifest, ManifestStore, ReplicaEntry};
pub use staging::{CacheRetention, CacheUsage, StagedFile, StagingCache};
