//! How the supervisor starts a helper: subcommand and environment.

use std::path::Path;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use desktop_runner::launcher::{
    LaunchSpec, ENV_AUTH_TOKEN, ENV_HOSTNAME, ENV_PARENT_PID, ENV_SOCKET_DIR, ENV_STATUS_PATH,
    HELPER_SUBCOMMAND,
};

const BIN: &str = env!("CARGO_BIN_EXE_desktop-runner");

#[test]
fn environment_names_are_stable() {
    assert_eq!(ENV_AUTH_TOKEN, "DESKTOP_RUNNER_AUTH_TOKEN");
    assert_eq!(ENV_SOCKET_DIR, "DESKTOP_RUNNER_SOCKET_DIR");
    assert_eq!(ENV_HOSTNAME, "DESKTOP_RUNNER_HOSTNAME");
    assert_eq!(ENV_PARENT_PID, "DESKTOP_RUNNER_PARENT_PID");
    assert_eq!(ENV_STATUS_PATH, "DESKTOP_RUNNER_STATUS_PATH");
    assert_eq!(HELPER_SUBCOMMAND, "desktop");
}

#[test]
fn helper_spec_carries_only_the_contract() {
    let spec = LaunchSpec::helper(
        BIN.into(),
        "tok",
        Path::new("/tmp/d"),
        Path::new("/tmp/status.json"),
        "host",
        1,
    );
    let keys: Vec<&str> = spec.env.keys().map(String::as_str).collect();
    assert_eq!(
        keys,
        [
            ENV_AUTH_TOKEN,
            ENV_HOSTNAME,
            ENV_PARENT_PID,
            ENV_SOCKET_DIR,
            ENV_STATUS_PATH
        ]
    );
}

#[test]
fn binary_lists_both_roles() {
    let output = Command::new(BIN).arg("--help").output().unwrap();
    assert!(output.status.success());
    let help = String::from_utf8_lossy(&output.stdout);
    assert!(help.contains("supervise"), "{help}");
    assert!(help.contains(HELPER_SUBCOMMAND), "{help}");
}

#[test]
fn helper_requires_a_token() {
    let dir = tempfile::tempdir().unwrap();
    let output = Command::new(BIN)
        .arg(HELPER_SUBCOMMAND)
        .env_clear()
        .env(ENV_SOCKET_DIR, dir.path())
        .output()
        .unwrap();
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("auth-token"));
}

#[cfg(unix)]
#[test]
fn helper_reads_the_contract_from_its_environment() {
    let dir = tempfile::tempdir().unwrap();

    let mut gone = Command::new("true").spawn().unwrap();
    let dead_parent = gone.id();
    gone.wait().unwrap();

    let status = dir.path().join("status.json");
    let spec = LaunchSpec::helper(BIN.into(), "tok", dir.path(), &status, "host", dead_parent);
    let mut helper = Command::new(&spec.executable)
        .args(&spec.args)
        .env_clear()
        .envs(&spec.env)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .unwrap();

    // With its parent already gone the helper shuts itself down.
    let deadline = Instant::now() + Duration::from_secs(15);
    let status = loop {
        if let Some(status) = helper.try_wait().unwrap() {
            break status;
        }
        if Instant::now() > deadline {
            helper.kill().unwrap();
            panic!("helper ignored its parent pid");
        }
        std::thread::sleep(Duration::from_millis(50));
    };
    assert!(status.success());
}
