//! Time utilities: sleeping, timeouts and retry backoff.

pub use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
pub use tokio::time::{error::Elapsed, interval, sleep, sleep_until, timeout, Interval, Sleep};

/// Largest delay `backoff_delay` will ever return.
pub const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Exponential backoff delay for the given 1-based retry attempt.
///
/// Attempt 1 waits `base`, attempt 2 waits `2 * base`, and so on, capped at
/// [`MAX_BACKOFF`].
///
/// ```rust
/// use core_async::time::{backoff_delay, Duration};
///
/// let base = Duration::from_millis(100);
/// assert_eq!(backoff_delay(base, 1), Duration::from_millis(100));
/// assert_eq!(backoff_delay(base, 3), Duration::from_millis(400));
/// ```
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(16);
    base.checked_mul(1u32 << exponent)
        .map(|delay| delay.min(MAX_BACKOFF))
        .unwrap_or(MAX_BACKOFF)
}

/// Milliseconds since the Unix epoch, or 0 if the clock is before it.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Seconds since the Unix epoch, or 0 if the clock is before it.
pub fn now_secs() -> u64 {
    now_millis() / 1000
}
