//! # Desktop Bridge Implementations
//!
//! Default bridge adapters for macOS, Windows and Linux:
//! - `HttpClient` using `reqwest`
//! - `FileSystemAccess` using `tokio::fs`
//! - `LoggerSink` appending to a log file on the replica
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::{ReqwestHttpClient, TokioFileSystem};
//! use std::sync::Arc;
//!
//! let http = Arc::new(ReqwestHttpClient::new());
//! let fs = Arc::new(TokioFileSystem::new());
//! ```

mod filesystem;
mod http;
mod logger;

pub use filesystem::TokioFileSystem;
pub use http::ReqwestHttpClient;
pub use logger::FileLoggerSink;
