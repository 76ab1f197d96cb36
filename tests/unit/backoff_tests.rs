//! Unit tests for bounded retry.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use desktop_runner::backoff::wait_for;
use desktop_runner::AppError;

#[tokio::test]
async fn first_success_returns_immediately() {
    let attempts = AtomicU32::new(0);
    let result = wait_for(
        || async {
            attempts.fetch_add(1, Ordering::SeqCst);
            Ok::<_, AppError>(42)
        },
        Duration::from_secs(5),
        Duration::from_secs(1),
    )
    .await;

    assert_eq!(result.unwrap(), 42);
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn retries_until_success() {
    let attempts = AtomicU32::new(0);
    let result = wait_for(
        || async {
            let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
            if n < 3 {
                Err(AppError::Ipc(format!("attempt {n} failed")))
            } else {
                Ok(n)
            }
        },
        Duration::from_secs(10),
        Duration::from_secs(1),
    )
    .await;

    assert_eq!(result.unwrap(), 3);
}

#[tokio::test(start_paused = true)]
async fn timeout_returns_last_error() {
    let attempts = AtomicU32::new(0);
    let started = tokio::time::Instant::now();

    let result: desktop_runner::Result<()> = wait_for(
        || async {
            let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
            Err(AppError::Ipc(format!("attempt {n} failed")))
        },
        Duration::from_secs(3),
        Duration::from_secs(1),
    )
    .await;

    let err = result.unwrap_err();
    let total = attempts.load(Ordering::SeqCst);
    assert_eq!(total, 4, "attempts at t=0,1,2,3");
    assert_eq!(err.to_string(), format!("ipc: attempt {total} failed"));
    assert!(started.elapsed() >= Duration::from_secs(3));
}

#[tokio::test]
async fn zero_timeout_makes_one_attempt() {
    let attempts = AtomicU32::new(0);
    let result: desktop_runner::Result<()> = wait_for(
        || async {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err(AppError::Ipc("nope".into()))
        },
        Duration::ZERO,
        Duration::from_secs(1),
    )
    .await;

    assert!(result.is_err());
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
}
