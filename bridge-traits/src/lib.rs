//! # Host Bridge Traits
//!
//! Capability traits the sync core needs from its host.
//!
//! ## Traits
//!
//! - [`HttpClient`](http::HttpClient): async HTTP with per-request timeouts and streaming bodies
//! - [`FileSystemAccess`](storage::FileSystemAccess): file I/O on the replica root
//! - [`SongCatalog`](catalog::SongCatalog): the authoritative song listing and song bytes
//! - [`Clock`](time::Clock): time source for deterministic testing
//! - [`LoggerSink`](time::LoggerSink): mirror structured logs to a host destination
//!
//! The desktop adapters live in `bridge-desktop`. Hosts that cannot supply a
//! capability should make the core fail fast with a descriptive
//! `CapabilityMissing` error rather than substituting a no-op.
//!
//! ## Error Handling
//!
//! Bridge traits report failures as [`BridgeError`](error::BridgeError),
//! except the catalog, which reports the richer
//! [`CatalogError`](catalog::CatalogError).
//!
//! ## Thread Safety
//!
//! All traits require `Send + Sync` so they can be shared as `Arc<dyn Trait>`
//! across tasks.

pub mod catalog;
pub mod error;
pub mod http;
pub mod storage;
pub mod time;

pub use error::BridgeError;

pub use catalog::{is_safe_filename, CatalogError, RemoteSong, SongCatalog, SongStream};
pub use http::{HttpClient, HttpMethod, HttpRequest, HttpResponse, HttpStream, RetryPolicy};
pub use storage::{FileMetadata, FileSystemAccess};
pub use time::{Clock, ConsoleLogger, LogEntry, LogLevel, LoggerSink, SystemClock};
