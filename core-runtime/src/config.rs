//! # Core Configuration Module
//!
//! A builder-constructed [`CoreConfig`] carrying everything a front-end must
//! decide before talking to a catalog server or a replica: the server base
//! URL, the replica root, network timeouts, and the host bridges.
//!
//! ## Bridges
//!
//! - `HttpClient`: required (desktop default: reqwest)
//! - `FileSystemAccess`: required (desktop default: tokio fs)
//! - `Clock`: optional, defaults to the system clock
//!
//! With the `desktop-shims` feature enabled, missing HTTP and filesystem
//! bridges are filled with the desktop adapters. Without it, `build()` fails
//! fast with [`Error::CapabilityMissing`].
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::CoreConfig;
//!
//! let config = CoreConfig::builder()
//!     .server_url("https://dj-usb.example.com")
//!     .replica_root("/media/usb")
//!     .build()?;
//! ```

use crate::error::{Error, Result};
use bridge_traits::{Clock, FileSystemAccess, HttpClient, SystemClock};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Default bound on the catalog listing request.
pub const DEFAULT_CATALOG_TIMEOUT: Duration = Duration::from_secs(10);

/// Default bound on a single upload request.
pub const DEFAULT_UPLOAD_TIMEOUT: Duration = Duration::from_secs(120);

const MAX_TIMEOUT: Duration = Duration::from_secs(600);

/// Core configuration.
///
/// Use [`CoreConfigBuilder`] to construct instances.
#[derive(Clone)]
pub struct CoreConfig {
    /// Catalog server base URL without a trailing slash
    pub server_url: String,

    /// Root of the replica (a USB mount point or a cache directory). Only
    /// operations that touch a replica need it.
    pub replica_root: Option<PathBuf>,

    /// Timeout for the catalog listing request
    pub catalog_timeout: Duration,

    /// Timeout for an upload request
    pub upload_timeout: Duration,

    /// Capacity of the event bus channel
    pub event_buffer_size: usize,

    pub http_client: Arc<dyn HttpClient>,

    pub file_system: Arc<dyn FileSystemAccess>,

    pub clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for CoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreConfig")
            .field("server_url", &self.server_url)
            .field("replica_root", &self.replica_root)
            .field("catalog_timeout", &self.catalog_timeout)
            .field("upload_timeout", &self.upload_timeout)
            .field("event_buffer_size", &self.event_buffer_size)
            .finish_non_exhaustive()
    }
}

impl CoreConfig {
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::default()
    }

    /// The replica root, or a configuration error naming the operation that
    /// needed it.
    pub fn require_replica_root(&self, operation: &str) -> Result<&Path> {
        self.replica_root.as_deref().ok_or_else(|| {
            Error::Config(format!(
                "'{}' needs a replica root. Use .replica_root() to set it.",
                operation
            ))
        })
    }

    /// Validates the configuration and returns an error if invalid.
    pub fn validate(&self) -> Result<()> {
        validate_server_url(&self.server_url)?;

        if let Some(root) = &self.replica_root {
            if root.as_os_str().is_empty() {
                return Err(Error::Config("Replica root cannot be empty".to_string()));
            }
        }

        for (name, value) in [
            ("Catalog timeout", self.catalog_timeout),
            ("Upload timeout", self.upload_timeout),
        ] {
            if value.is_zero() {
                return Err(Error::Config(format!("{} must be greater than 0", name)));
            }
            if value > MAX_TIMEOUT {
                return Err(Error::Config(format!(
                    "{} exceeds maximum of {} seconds",
                    name,
                    MAX_TIMEOUT.as_secs()
                )));
            }
        }

        if self.event_buffer_size == 0 {
            return Err(Error::Config(
                "Event buffer size must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

/// Checks that `url` is an absolute http(s) URL with a host.
pub fn validate_server_url(url: &str) -> Result<()> {
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .ok_or_else(|| {
            Error::Config(format!(
                "Server URL '{}' must start with http:// or https://",
                url
            ))
        })?;

    let host = rest.split(['/', '?', '#']).next().unwrap_or_default();
    if host.is_empty() {
        return Err(Error::Config(format!("Server URL '{}' has no host", url)));
    }

    Ok(())
}

#[cfg(feature = "desktop-shims")]
fn provide_default_http_client() -> Result<Arc<dyn HttpClient>> {
    Ok(Arc::new(bridge_desktop::ReqwestHttpClient::new()))
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_http_client() -> Result<Arc<dyn HttpClient>> {
    Err(Error::CapabilityMissing {
        capability: "HttpClient".to_string(),
        message: "An HttpClient implementation is required to reach the catalog server. \
                  Desktop: enable the 'desktop-shims' feature to use ReqwestHttpClient. \
                  Other hosts: inject a native adapter with .http_client()."
            .to_string(),
    })
}

#[cfg(feature = "desktop-shims")]
fn provide_default_file_system() -> Result<Arc<dyn FileSystemAccess>> {
    Ok(Arc::new(bridge_desktop::TokioFileSystem::new()))
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_file_system() -> Result<Arc<dyn FileSystemAccess>> {
    Err(Error::CapabilityMissing {
        capability: "FileSystemAccess".to_string(),
        message: "A FileSystemAccess implementation is required to manage the replica. \
                  Desktop: enable the 'desktop-shims' feature to use TokioFileSystem. \
                  Other hosts: inject a native adapter with .file_system()."
            .to_string(),
    })
}

/// Builder for [`CoreConfig`].
#[derive(Default)]
pub struct CoreConfigBuilder {
    server_url: Option<String>,
    replica_root: Option<PathBuf>,
    catalog_timeout: Option<Duration>,
    upload_timeout: Option<Duration>,
    event_buffer_size: Option<usize>,
    http_client: Option<Arc<dyn HttpClient>>,
    file_system: Option<Arc<dyn FileSystemAccess>>,
    clock: Option<Arc<dyn Clock>>,
}

impl CoreConfigBuilder {
    /// Catalog server base URL. A trailing slash is stripped.
    pub fn server_url(mut self, url: impl Into<String>) -> Self {
        self.server_url = Some(url.into().trim_end_matches('/').to_string());
        self
    }

    pub fn replica_root<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.replica_root = Some(path.into());
        self
    }

    pub fn catalog_timeout(mut self, timeout: Duration) -> Self {
        self.catalog_timeout = Some(timeout);
        self
    }

    pub fn upload_timeout(mut self, timeout: Duration) -> Self {
        self.upload_timeout = Some(timeout);
        self
    }

    pub fn event_buffer_size(mut self, size: usize) -> Self {
        self.event_buffer_size = Some(size);
        self
    }

    pub fn http_client(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.http_client = Some(client);
        self
    }

    pub fn file_system(mut self, fs: Arc<dyn FileSystemAccess>) -> Self {
        self.file_system = Some(fs);
        self
    }

    /// Override the time source (tests pin this).
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Builds and validates the configuration.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] when the server URL is missing or malformed or a
    ///   value is out of range
    /// - [`Error::CapabilityMissing`] when a bridge is absent and no desktop
    ///   default is compiled in
    pub fn build(self) -> Result<CoreConfig> {
        let server_url = self.server_url.ok_or_else(|| {
            Error::Config("Server URL is required. Use .server_url() to set it.".to_string())
        })?;

        let http_client = match self.http_client {
            Some(client) => client,
            None => provide_default_http_client()?,
        };

        let file_system = match self.file_system {
            Some(fs) => fs,
            None => provide_default_file_system()?,
        };

        let config = CoreConfig {
            server_url,
            replica_root: self.replica_root,
            catalog_timeout: self.catalog_timeout.unwrap_or(DEFAULT_CATALOG_TIMEOUT),
            upload_timeout: self.upload_timeout.unwrap_or(DEFAULT_UPLOAD_TIMEOUT),
            event_buffer_size: self
                .event_buffer_size
                .unwrap_or(crate::events::DEFAULT_EVENT_BUFFER_SIZE),
            http_client,
            file_system,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
        };

        config.validate()?;
        Ok(config)
    }
}
