//! Polling assertions for asynchronous volume tests.

use std::time::Duration;

use tokio::time::{Instant, sleep};

/// Interval between condition checks.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Polls `condition` until it holds or `timeout` elapses.
///
/// Returns whether the condition held. The condition is checked once more
/// after the deadline, so a zero timeout still evaluates it.
///
/// # Example
///
/// ```no_run
/// use std::sync::{
///     Arc,
///     atomic::{AtomicBool, Ordering},
/// };
/// use std::time::Duration;
///
/// use blockvol_test_utils::assert_eventually;
///
/// # async fn example() {
/// let replied = Arc::new(AtomicBool::new(false));
/// let flag = Arc::clone(&replied);
/// tokio::spawn(async move { flag.store(true, Ordering::SeqCst) });
///
/// assert!(assert_eventually(Duration::from_millis(200), || replied.load(Ordering::SeqCst)).await);
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
        sleep(POLL_INTERVAL).await;
    }
    condition()
}
