//! Shuts the helper down once the supervisor that launched it is gone.

use std::time::Duration;

use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Interval between parent checks.
pub const PARENT_CHECK_INTERVAL: Duration = Duration::from_secs(2);

/// Whether a process with `pid` currently exists.
#[must_use]
pub fn process_exists(pid: u32) -> bool {
    let pid = Pid::from_u32(pid);
    let mut system = System::new();
    system.refresh_processes_specifics(
        ProcessesToUpdate::Some(&[pid]),
        true,
        ProcessRefreshKind::nothing(),
    );
    system
        .process(pid)
        .is_some_and(|process| !matches!(process.status(), sysinfo::ProcessStatus::Zombie))
}

/// Poll `parent_pid` every `interval` and cancel `shutdown` when it exits.
///
/// Returns when the parent is gone or `shutdown` fires for another reason.
pub async fn monitor_parent(parent_pid: u32, interval: Duration, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            () = shutdown.cancelled() => {
                debug!("parent monitor stopping");
                return;
            }
            _ = ticker.tick() => {
                if !process_exists(parent_pid) {
                    warn!(parent_pid, "parent process is gone, shutting down");
                    shutdown.cancel();
                    return;
                }
            }
        }
    }
}
