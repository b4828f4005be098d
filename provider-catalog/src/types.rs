//! Catalog server wire types
//!
//! Data structures for the JSON payloads exchanged with the catalog server.

use serde::{Deserialize, Serialize};
use std::fmt;

/// `GET /songs` response body
#[derive(Debug, Clone, Deserialize)]
pub struct SongsResponse {
    #[serde(default)]
    pub songs: Vec<WireSong>,
}

/// A song as listed by the server.
///
/// `filename` and `url` are optional here so a missing field can be reported
/// as a protocol error naming the offending entry.
#[derive(Debug, Clone, Deserialize)]
pub struct WireSong {
    #[serde(default)]
    pub id: Option<serde_json::Value>,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub artist: Option<String>,
    #[serde(default)]
    pub album: Option<String>,
    /// Seconds; the server sends integers today.
    #[serde(default)]
    pub duration: Option<f64>,
}

/// Token endpoint response (`/auth/token`, `/auth/login`, `/auth/signup`)
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
}

/// Signup request body
#[derive(Debug, Serialize)]
pub struct SignupRequest<'a> {
    pub email: &'a str,
    pub password: &'a str,
    pub name: &'a str,
}

/// Opaque bearer token.
///
/// Never decoded or validated client-side. `Debug` and `Display` are redacted.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// The raw token, for building the `Authorization` header.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessToken(***)")
    }
}

impl fmt::Display for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

/// Result of a successful upload.
///
/// Fields the server omits stay `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadReceipt {
    #[serde(default)]
    pub filename: Option<String>,
    /// Songs the account holds after this upload.
    #[serde(default)]
    pub song_count: Option<u64>,
    #[serde(default)]
    pub limit: Option<u64>,
    #[serde(default)]
    pub remaining: Option<u64>,
}
