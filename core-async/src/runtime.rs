//! Runtime construction helpers.
//!
//! `block_on` is what `#[core_async::main]` and `#[core_async::test]`
//! expand to.

pub use tokio::runtime::{Builder, Handle, Runtime};

/// Runs the provided future to completion on a fresh current-thread runtime.
///
/// # Panics
///
/// Panics if the runtime cannot be constructed (for example when the OS
/// refuses to create the I/O driver).
pub fn block_on<F>(future: F) -> F::Output
where
    F: std::future::Future,
{
    match Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime.block_on(future),
        Err(err) => panic!("core_async::runtime::block_on: failed to build runtime: {err}"),
    }
}
