//! # Core Runtime Module
//!
//! Ambient infrastructure shared by every crate in the workspace:
//! - Logging and tracing setup
//! - Configuration ([`config::CoreConfig`])
//! - The event bus carrying sync progress to front-ends

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use error::{Error, Result};
