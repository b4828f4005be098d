//! Core service façade.
//!
//! Wires a [`CoreConfig`](core_runtime::config::CoreConfig) (server URL,
//! replica root and host bridges) to the catalog client and the
//! reconciliation engine. Front-ends (the `dj-usb` CLI, a GUI, a virtual
//! drive daemon) talk to [`ReplicaService`] and subscribe to its event bus
//! for progress. Desktop hosts enable the `desktop-shims` feature so the
//! config builder falls back to the `bridge-desktop` adapters.

pub mod error;
pub mod service;

pub use error::{CoreError, Result};
pub use service::{InitReport, ReplicaService, ReplicaStatus, SongStatus};

pub use core_sync::{
    CacheRetention, CacheUsage, ReplicaLayout, SyncConfig, SyncFailure, SyncResult,
};
pub use provider_catalog::{AccessToken, UploadReceipt, DEFAULT_SERVER_URL};
