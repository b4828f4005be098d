//! Synchronization primitives.
//!
//! Re-exports the Tokio primitives the sync engine relies on: async-aware
//! locks, the download semaphore, broadcast channels for progress events,
//! and the cooperative `CancellationToken` handed into each sync run.
//!
//! ```rust
//! use core_async::sync::{CancellationToken, Mutex};
//!
//! async fn example() {
//!     let counter = Mutex::new(0u32);
//!     *counter.lock().await += 1;
//!
//!     let token = CancellationToken::new();
//!     let child = token.child_token();
//!     token.cancel();
//!     assert!(child.is_cancelled());
//! }
//! ```

pub use tokio::sync::{
    broadcast, mpsc, oneshot, watch, Mutex, MutexGuard, Notify, OwnedSemaphorePermit, RwLock,
    RwLockReadGuard, RwLockWriteGuard, Semaphore, SemaphorePermit,
};

pub use tokio_util::sync::{CancellationToken, DropGuard, WaitForCancellationFuture};
