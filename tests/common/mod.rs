//! Shared helpers for the end-to-end scenario tests (spec.md §8): each
//! scenario spins up real `Node`s over loopback UDP and waits for suspect
//! sets / consensus values to converge rather than sleeping for a fixed
//! duration, so a slow CI box doesn't turn a real failure into a flaky pass.

use std::future::Future;
use std::time::Duration;

/// Poll `cond` every `poll_interval` until it returns true or `timeout`
/// elapses. Returns whether `cond` was observed true.
pub async fn wait_until<F, Fut>(timeout: Duration, poll_interval: Duration, mut cond: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if cond().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(poll_interval).await;
    }
}
