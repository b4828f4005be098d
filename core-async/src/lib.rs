//! Async runtime layer for the DJ USB replica workspace.
//!
//! Every other crate in the workspace goes through this crate instead of
//! naming Tokio directly, so the executor can be swapped in one place.
//!
//! # Modules
//!
//! - `task`: task spawning
//! - `time`: sleep, timeouts and retry backoff
//! - `sync`: locks, semaphores, channels and cancellation tokens
//! - `io`: async I/O traits
//! - `signal`: process signals for front-ends
//!
//! ```rust
//! use core_async::sync::CancellationToken;
//! use core_async::time::{sleep, Duration};
//!
//! async fn example(cancel: CancellationToken) {
//!     core_async::task::spawn(async move {
//!         sleep(Duration::from_millis(10)).await;
//!         cancel.cancel();
//!     });
//! }
//! ```

pub use core_async_macros::{main, test};

pub mod io;
pub mod runtime;
pub mod signal;
pub mod sync;
pub mod task;
pub mod time;

pub use task::spawn;
pub use time::{sleep, Duration, Instant};
