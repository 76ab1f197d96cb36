//! Unit tests for helper exit formatting.

use desktop_runner::models::exit::ExitOutcome;

#[test]
fn zero_code_is_success() {
    let outcome = ExitOutcome { code: Some(0) };
    assert!(outcome.success());
    assert_eq!(outcome.to_string(), "exited normally (code 0)");
}

#[test]
fn nonzero_code_is_failure() {
    let outcome = ExitOutcome { code: Some(3) };
    assert!(!outcome.success());
    assert_eq!(outcome.to_string(), "exited with code 3");
}

#[test]
fn missing_code_means_signal() {
    let outcome = ExitOutcome { code: None };
    assert!(!outcome.success());
    assert_eq!(outcome.to_string(), "terminated by signal");
}

#[cfg(unix)]
#[test]
fn converts_from_exit_status() {
    use std::os::unix::process::ExitStatusExt;

    let status = std::process::ExitStatus::from_raw(2 << 8);
    assert_eq!(ExitOutcome::from(status).code, Some(2));

    let killed = std::process::ExitStatus::from_raw(9);
    assert_eq!(ExitOutcome::from(killed).code, None);
}
