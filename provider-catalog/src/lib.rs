//! # Song Catalog Provider
//!
//! HTTP client for the DJ USB catalog server.
//!
//! ## Overview
//!
//! This crate provides:
//! - [`CatalogClient`], the `SongCatalog` implementation used by the sync engine
//! - Song listing with a bounded timeout and strict payload validation
//! - Streaming song downloads with server-side URL resolution
//! - Token issuance, login and multipart song upload for the upload path
//!
//! The client performs no retries. Retry policy belongs to the sync engine.

pub mod connector;
pub mod error;
pub mod types;

pub use connector::{resolve_song_url, CatalogClient, DEFAULT_SERVER_URL, FREE_TIER_LIMIT};
pub use error::Result;
pub use types::{AccessToken, UploadReceipt};
