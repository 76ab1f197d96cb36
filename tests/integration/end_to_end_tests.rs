//! The real binary supervised end to end for the current user.

use std::path::PathBuf;
use std::time::Duration;

use desktop_runner::launcher::platform_launcher;
use desktop_runner::supervisor::registry::{LivenessProbe, SysinfoProbe};
use desktop_runner::supervisor::{Supervisor, SupervisorDeps};

use super::fake_launcher::{test_settings, FakeEnumerator};
use super::test_helpers::wait_until;

const WAIT: Duration = Duration::from_secs(20);

fn current_uid() -> String {
    nix::unistd::geteuid().as_raw().to_string()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn supervisor_runs_and_drains_the_real_helper() {
    let root = tempfile::tempdir().unwrap();
    let uid = current_uid();
    let enumerator = FakeEnumerator::with_sessions(&[uid.as_str()]);

    let mut settings = test_settings(root.path());
    settings.executable_path = Some(PathBuf::from(env!("CARGO_BIN_EXE_desktop-runner")));
    settings.startup_ping_timeout = Some(Duration::from_secs(10));
    settings.update_interval = Duration::from_millis(250);
    settings.interrupt_timeout = Duration::from_secs(5);

    let deps = SupervisorDeps {
        enumerator: Box::new(enumerator),
        launcher: platform_launcher(),
        probe: Box::new(SysinfoProbe::new()),
    };
    let (supervisor, handle) = Supervisor::new(settings, deps);
    let task = tokio::spawn(supervisor.run());

    assert!(
        wait_until(WAIT, || async {
            handle.snapshot().await.is_ok_and(|records| records.len() == 1)
        })
        .await
    );
    let record = handle.snapshot().await.unwrap().remove(0);
    assert_eq!(record.identity.as_str(), uid);

    // Still the same helper a few polls later.
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(handle.snapshot().await.unwrap()[0].pid, record.pid);

    handle.refresh_all().await.unwrap();

    // The operator CLI reaches the same helper.
    let ctl = tokio::process::Command::new(env!("CARGO_BIN_EXE_desktop-runner-ctl"))
        .arg("--socket-dir")
        .arg(record.ipc_address.path().parent().unwrap())
        .arg("--pid")
        .arg(record.pid.to_string())
        .arg("--token")
        .arg(handle.auth_token())
        .arg("ping")
        .output()
        .await
        .unwrap();
    assert!(ctl.status.success(), "ctl ping failed: {ctl:?}");
    assert!(String::from_utf8_lossy(&ctl.stdout).contains("desktop-runner"));

    let bad_ctl = tokio::process::Command::new(env!("CARGO_BIN_EXE_desktop-runner-ctl"))
        .arg("--socket-dir")
        .arg(record.ipc_address.path().parent().unwrap())
        .arg("--pid")
        .arg(record.pid.to_string())
        .arg("--token")
        .arg("wrong")
        .arg("ping")
        .output()
        .await
        .unwrap();
    assert!(!bad_ctl.status.success());

    assert!(handle.interrupt("end to end"));
    let outcome = task.await.unwrap().unwrap();
    assert_eq!(outcome.requested, 1);
    assert!(outcome.forced.is_empty(), "helper should exit on IPC shutdown");
    assert!(!outcome.timed_out);

    assert!(SysinfoProbe::new().executable_path(record.pid).is_none());
    assert!(!record.ipc_address.path().exists());
}
