//! Interrupt signalling and the graceful-then-forced helper drain.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::future::join_all;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use super::registry::{LivenessProbe, ProcessRegistry};
use crate::ipc::client::HelperClient;
use crate::models::session::SessionIdentity;
use crate::AppError;

/// How long killed helpers get to be reaped after a timed-out drain.
pub const REAP_GRACE: Duration = Duration::from_secs(1);

/// One-shot, idempotent stop signal.
#[derive(Debug, Default)]
pub(crate) struct Interrupter {
    interrupted: AtomicBool,
    token: CancellationToken,
}

impl Interrupter {
    /// Trigger the stop. Returns `true` only for the call that flipped the
    /// flag.
    pub(crate) fn interrupt(&self, reason: &str) -> bool {
        if self
            .interrupted
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!(reason, "interrupt already in progress");
            return false;
        }

        info!(reason, "interrupt received, shutting down desktop helpers");
        self.token.cancel();
        true
    }

    pub(crate) fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }

    pub(crate) fn token(&self) -> CancellationToken {
        self.token.clone()
    }
}

/// What a drain did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainOutcome {
    /// Helpers that were sent an IPC `shutdown`.
    pub requested: usize,
    /// Helpers that had to be killed.
    pub forced: Vec<SessionIdentity>,
    /// Whether the exit wait hit the interrupt timeout.
    pub timed_out: bool,
}

/// Timing and credentials used by [`drain`].
pub(crate) struct DrainParams<'a> {
    pub(crate) auth_token: &'a str,
    pub(crate) ipc_timeout: Duration,
    pub(crate) interrupt_timeout: Duration,
}

/// Stop every tracked helper and empty the registry.
///
/// Each helper is asked to exit over IPC, concurrently. A helper whose request
/// fails is killed straight away if it is still alive. The exit-watchers then
/// get `interrupt_timeout` to finish; on timeout every still-live helper is
/// killed. Failures are logged and never stop the remaining steps.
pub(crate) async fn drain(
    registry: &mut ProcessRegistry,
    watchers: &TaskTracker,
    probe: &dyn LivenessProbe,
    params: &DrainParams<'_>,
) -> DrainOutcome {
    let records = registry.snapshot();
    let mut outcome = DrainOutcome {
        requested: records.len(),
        ..DrainOutcome::default()
    };

    let requests = records.iter().map(|record| async move {
        let client = HelperClient::new(params.auth_token, record.ipc_address.clone())
            .with_timeout(params.ipc_timeout);
        (record, client.shutdown().await)
    });

    for (record, result) in join_all(requests).await {
        let Err(err) = result else {
            debug!(uid = %record.identity, pid = record.pid, "helper acknowledged shutdown");
            continue;
        };

        warn!(uid = %record.identity, pid = record.pid, %err, "error sending shutdown command to helper");
        if probe.is_alive(record) {
            info!(uid = %record.identity, pid = record.pid, "killing helper after failed shutdown request");
            record.kill.cancel();
            outcome.forced.push(record.identity.clone());
        }
    }

    watchers.close();
    if tokio::time::timeout(params.interrupt_timeout, watchers.wait())
        .await
        .is_err()
    {
        outcome.timed_out = true;
        let err = AppError::ShutdownTimeout(format!(
            "helpers did not exit within {}s",
            params.interrupt_timeout.as_secs_f64()
        ));
        warn!(%err, "forcing helper shutdown");

        for record in &records {
            if !record.kill.is_cancelled() && probe.is_alive(record) {
                info!(uid = %record.identity, pid = record.pid, "killing helper");
                record.kill.cancel();
                outcome.forced.push(record.identity.clone());
            }
        }

        if tokio::time::timeout(REAP_GRACE, watchers.wait()).await.is_err() {
            warn!("exit-watchers still running after forced kill");
        }
    }
    watchers.reopen();

    registry.clear();
    info!(
        requested = outcome.requested,
        forced = outcome.forced.len(),
        timed_out = outcome.timed_out,
        "desktop helpers drained"
    );
    outcome
}
