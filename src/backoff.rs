//! Bounded retry with a fixed interval.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::Result;

/// Run `attempt` until it succeeds or `timeout` elapses, sleeping `interval`
/// between attempts.
///
/// The first attempt runs immediately. A zero `timeout` still makes exactly
/// one attempt.
///
/// # Errors
///
/// Returns the error of the last attempt when the deadline passes.
pub async fn wait_for<T, F, Fut>(mut attempt: F, timeout: Duration, interval: Duration) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let deadline = Instant::now() + timeout;
    let mut attempts = 0_u32;

    loop {
        attempts += 1;
        let err = match attempt().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        let now = Instant::now();
        if now >= deadline {
            debug!(attempts, %err, "backoff deadline reached");
            return Err(err);
        }

        tokio::time::sleep(interval.min(deadline - now)).await;
    }
}
