//! Per-helper exit-watcher.

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

use crate::launcher::ChildProcess;
use crate::models::session::SessionIdentity;

/// Wait for `child` to exit on `tracker`, killing it first if `kill` fires.
///
/// The task always reaps the child, so a helper never lingers as a zombie.
pub(super) fn spawn_exit_watcher(
    tracker: &TaskTracker,
    identity: SessionIdentity,
    mut child: Box<dyn ChildProcess>,
    kill: CancellationToken,
) {
    tracker.spawn(async move {
        let pid = child.id();

        let result = tokio::select! {
            result = child.wait() => result,
            () = kill.cancelled() => {
                if let Err(err) = child.start_kill() {
                    warn!(uid = %identity, pid, %err, "could not kill desktop helper");
                }
                child.wait().await
            }
        };

        match result {
            Ok(outcome) if outcome.success() => {
                info!(uid = %identity, pid, %outcome, "desktop helper exited");
            }
            Ok(outcome) => {
                warn!(uid = %identity, pid, %outcome, "desktop helper exited");
            }
            Err(err) => {
                warn!(uid = %identity, pid, %err, "error waiting for desktop helper");
            }
        }
    });
}
