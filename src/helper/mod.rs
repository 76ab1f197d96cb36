//! The helper-role process (`desktop-runner desktop`).
//!
//! Runs inside the user's session, serves the supervisor's IPC requests, and
//! exits on IPC `shutdown`, loss of its parent, or a termination signal.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::ipc::address::IpcAddress;
use crate::ipc::server::HelperServer;
use crate::notifier::Notifier;
use crate::signals::shutdown_signal;
use crate::status::StatusCache;
use crate::{AppError, Result};

pub mod parent_monitor;

use parent_monitor::{monitor_parent, PARENT_CHECK_INTERVAL};

/// Spawn-contract inputs of a helper.
#[derive(Debug, Clone)]
pub struct HelperOptions {
    /// Token every IPC request must present.
    pub auth_token: String,
    /// Per-user directory the IPC socket lives in.
    pub socket_dir: PathBuf,
    /// Hostname of the agent, shown in status.
    pub hostname: String,
    /// Supervisor PID to watch; `None` disables the parent monitor.
    pub parent_pid: Option<u32>,
    /// Shared status document re-read on every `refresh`.
    pub status_path: Option<PathBuf>,
}

/// Serve IPC until told to stop.
///
/// # Errors
///
/// Returns `AppError::Ipc` if the socket address is invalid or the server
/// cannot bind.
pub async fn run_helper(options: HelperOptions, notifier: Arc<dyn Notifier>) -> Result<()> {
    let pid = std::process::id();
    let span = info_span!("desktop_helper", pid, hostname = %options.hostname);

    async move {
        let address = IpcAddress::for_pid(&options.socket_dir, pid)?;
        let shutdown = CancellationToken::new();

        let mut server =
            HelperServer::bind(address, options.auth_token, shutdown.clone(), notifier).await?;

        let status = options.status_path.map(|path| Arc::new(StatusCache::new(path)));
        if let Some(status) = &status {
            // A missing document is normal until the supervisor writes one.
            if let Err(err) = status.reload() {
                debug!(%err, "no status document yet");
            }
        }

        let refreshes = Arc::new(AtomicU64::new(0));
        let hostname = options.hostname.clone();
        server.register_refresh_listener(move || {
            let count = refreshes.fetch_add(1, Ordering::Relaxed) + 1;
            info!(%hostname, count, "refreshing desktop status");
            if let Some(status) = &status {
                match status.reload() {
                    Ok(()) => debug!(path = %status.path().display(), "status document reloaded"),
                    Err(err) => warn!(%err, "status refresh failed"),
                }
            }
        });

        let server_ct = CancellationToken::new();
        let server_task = server.spawn(server_ct.clone());

        if let Some(parent_pid) = options.parent_pid {
            tokio::spawn(monitor_parent(parent_pid, PARENT_CHECK_INTERVAL, shutdown.clone()));
        }

        info!("desktop helper ready");

        tokio::select! {
            () = shutdown.cancelled() => {
                info!("desktop helper shutting down");
            }
            () = shutdown_signal() => {
                info!("shutdown signal received");
                shutdown.cancel();
            }
        }

        server_ct.cancel();
        server_task
            .await
            .map_err(|err| AppError::Ipc(format!("ipc server task failed: {err}")))?;

        info!("desktop helper stopped");
        Ok(())
    }
    .instrument(span)
    .await
}
