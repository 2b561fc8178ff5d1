//! Test assertion helpers.
//!
//! Provides polling-based assertions for async test scenarios such as
//! background topology refreshes, where the exact timing is not observable.

use std::time::Duration;

use tokio::time::{Instant, sleep};

/// Default polling interval for [`assert_eventually`].
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Polls a condition until it returns true or the timeout expires.
///
/// Works under a paused tokio clock: each poll sleeps, which lets the
/// runtime auto-advance time and run other tasks.
///
/// Returns `true` if the condition became true before the timeout.
///
/// # Example
///
/// ```no_run
/// use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
/// use std::time::Duration;
/// use meridian_test_utils::assert_eventually;
///
/// # async fn example() {
/// let refreshes = Arc::new(AtomicUsize::new(0));
/// let counter = Arc::clone(&refreshes);
/// tokio::spawn(async move {
///     tokio::time::sleep(Duration::from_millis(50)).await;
///     counter.fetch_add(1, Ordering::SeqCst);
/// });
///
/// let refreshed = assert_eventually(Duration::from_secs(1), || {
///     refreshes.load(Ordering::SeqCst) >= 1
/// })
/// .await;
/// assert!(refreshed, "background refresh should have run");
/// # }
/// ```
pub async fn assert_eventually<F>(timeout: Duration, condition: F) -> bool
where
    F: Fn() -> bool,
{
    let deadline = Instant::now() + timeout;

    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        sleep(DEFAULT_POLL_INTERVAL).await;
    }

    condition()
}
