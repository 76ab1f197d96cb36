//! Unit tests for the one-shot interrupt.

use std::sync::Arc;

use desktop_runner::supervisor::{Supervisor, SupervisorDeps, SupervisorSettings};
use desktop_runner::GlobalConfig;

fn handle() -> desktop_runner::supervisor::SupervisorHandle {
    let settings = SupervisorSettings::from_config(&GlobalConfig::default());
    let (_supervisor, handle) = Supervisor::new(settings, SupervisorDeps::platform());
    handle
}

#[test]
fn first_interrupt_wins() {
    let handle = handle();
    assert!(!handle.is_interrupted());
    assert!(handle.interrupt("first"));
    assert!(handle.is_interrupted());
    assert!(!handle.interrupt("second"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_interrupts_trigger_once() {
    let handle = Arc::new(handle());

    let tasks: Vec<_> = (0..64)
        .map(|i| {
            let handle = Arc::clone(&handle);
            tokio::spawn(async move { handle.interrupt(&format!("caller {i}")) })
        })
        .collect();

    let mut winners = 0;
    for task in tasks {
        if task.await.unwrap() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
    assert!(handle.is_interrupted());
}

#[test]
fn settings_get_unique_tokens() {
    let config = GlobalConfig::default();
    let a = SupervisorSettings::from_config(&config);
    let b = SupervisorSettings::from_config(&config);
    assert_ne!(a.auth_token, b.auth_token);
    assert!(uuid::Uuid::parse_str(&a.auth_token).is_ok());
}
