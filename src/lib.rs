//! Workspace umbrella crate.
//!
//! Re-exports the `core-service` façade so host applications can depend on a
//! single crate and pick bridges with the `desktop-shims` feature.

#[cfg(feature = "desktop-shims")]
pub use core_service::*;
