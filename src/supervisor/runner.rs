//! The supervisor loop: polling, launching, and handle commands.

use std::path::{Path, PathBuf};

use futures_util::future::join_all;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use super::registry::ProcessRecord;
use super::shutdown::{drain, DrainOutcome, DrainParams};
use super::watcher::spawn_exit_watcher;
use super::{Command, Supervisor};
use crate::backoff;
use crate::ipc::address::{prepare_socket_dir, IpcAddress};
use crate::ipc::client::HelperClient;
use crate::launcher::LaunchSpec;
use crate::models::notification::Notification;
use crate::models::session::SessionIdentity;
use crate::status::{status_path, write_default_status, write_status, TemplateData};
use crate::{AppError, Result};

impl Supervisor {
    /// Run until interrupted, then drain every helper.
    ///
    /// Polls immediately, then every `update_interval`. Handle commands are
    /// served between polls.
    ///
    /// # Errors
    ///
    /// Currently infallible once started; poll and launch failures are logged
    /// and retried on the next tick.
    pub async fn run(mut self) -> Result<DrainOutcome> {
        let interrupted = self.interrupter.token();
        let mut ticker = tokio::time::interval(self.settings.update_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let status = status_path(&self.settings.users_files_root);
        match write_default_status(&status, &TemplateData::new(&self.settings.hostname)) {
            Ok(true) => info!(path = %status.display(), "default status document written"),
            Ok(false) => {}
            Err(err) => error!(path = %status.display(), %err, "could not write default status document"),
        }

        info!(
            interval_secs = self.settings.update_interval.as_secs_f64(),
            spawning_enabled = self.spawning_enabled,
            "desktop runner started"
        );

        loop {
            tokio::select! {
                biased;
                () = interrupted.cancelled() => break,
                _ = ticker.tick() => {
                    tokio::select! {
                        () = interrupted.cancelled() => break,
                        () = self.poll(&interrupted).instrument(info_span!("poll")) => {}
                    }
                }
                Some(command) = self.commands.recv() => {
                    self.handle_command(command).await;
                }
            }
        }

        info!("desktop runner interrupted");
        let outcome = self.drain_all().await;
        Ok(outcome)
    }

    /// One pass: make sure every interactive user has a live helper.
    async fn poll(&mut self, interrupted: &CancellationToken) {
        if !self.spawning_enabled {
            if !self.registry.is_empty() {
                info!("process spawning disabled, stopping desktop helpers");
                self.drain_all().await;
            }
            return;
        }

        let executable = match self.executable() {
            Ok(executable) => executable,
            Err(err) => {
                error!(%err, "cannot resolve helper executable, skipping poll");
                return;
            }
        };

        let sessions = match self.deps.enumerator.list_interactive_sessions().await {
            Ok(sessions) => sessions,
            Err(err) => {
                warn!(%err, "could not list interactive sessions, skipping poll");
                return;
            }
        };
        debug!(count = sessions.len(), "interactive sessions found");

        for identity in sessions {
            if interrupted.is_cancelled() {
                return;
            }
            if self.registry.has_live_process(&identity, self.deps.probe.as_ref()) {
                continue;
            }
            if let Err(err) = self.launch_for(&identity, &executable).await {
                error!(uid = %identity, %err, "failed to start desktop helper");
            }
        }
    }

    /// Launch, record, watch, then confirm a helper answers pings.
    async fn launch_for(&mut self, identity: &SessionIdentity, executable: &Path) -> Result<()> {
        // A record that failed the liveness check may still own a running
        // child; its watcher kills that child handle, never a raw pid.
        if let Some(prior) = self.registry.get(identity) {
            if !prior.kill.is_cancelled() {
                info!(uid = %identity, pid = prior.pid, "stopping superseded desktop helper");
                prior.kill.cancel();
            }
        }

        let socket_dir = prepare_socket_dir(&self.settings.users_files_root, identity)
            .map_err(|err| AppError::Launch(format!("preparing socket dir for {identity}: {err}")))?;

        let spec = LaunchSpec::helper(
            executable.to_path_buf(),
            &self.settings.auth_token,
            &socket_dir,
            &status_path(&self.settings.users_files_root),
            &self.settings.hostname,
            std::process::id(),
        );

        let mut child = self.deps.launcher.launch(identity, &spec).await?;
        let pid = child.id();

        let ipc_address = match IpcAddress::for_pid(&socket_dir, pid) {
            Ok(address) => address,
            Err(err) => {
                if let Err(kill_err) = child.start_kill() {
                    warn!(uid = %identity, pid, err = %kill_err, "could not kill unusable helper");
                }
                return Err(AppError::Launch(format!("helper for {identity}: {err}")));
            }
        };

        let exe_path = self
            .deps
            .probe
            .executable_path(pid)
            .or_else(|| executable.canonicalize().ok())
            .unwrap_or_else(|| executable.to_path_buf());

        let kill = CancellationToken::new();
        self.registry.record(ProcessRecord {
            identity: identity.clone(),
            pid,
            exe_path: exe_path.clone(),
            ipc_address: ipc_address.clone(),
            kill: kill.clone(),
        });
        spawn_exit_watcher(&self.watchers, identity.clone(), child, kill.clone());

        info!(uid = %identity, pid, path = %exe_path.display(), address = %ipc_address, "desktop helper launched");

        let Some(ping_timeout) = self.settings.startup_ping_timeout else {
            return Ok(());
        };

        let client = HelperClient::new(self.settings.auth_token.as_str(), ipc_address)
            .with_timeout(self.settings.ipc_timeout.min(ping_timeout));
        let client = &client;
        if let Err(err) = backoff::wait_for(
            move || async move { client.ping().await },
            ping_timeout,
            self.settings.startup_ping_interval,
        )
        .await
        {
            kill.cancel();
            return Err(AppError::Launch(format!(
                "helper for {identity} (pid {pid}) did not answer ping: {err}"
            )));
        }

        debug!(uid = %identity, pid, "desktop helper answered ping");
        Ok(())
    }

    fn executable(&self) -> Result<PathBuf> {
        match &self.settings.executable_path {
            Some(path) => Ok(path.clone()),
            None => std::env::current_exe()
                .map_err(|err| AppError::Launch(format!("resolving current executable: {err}"))),
        }
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Notify {
                notification,
                reply,
            } => {
                let result = self.broadcast_notification(&notification).await;
                let _ = reply.send(result);
            }
            Command::Refresh { reply } => {
                self.refresh_all().await;
                let _ = reply.send(());
            }
            Command::UpdateStatus { raw, reply } => {
                let result = self.update_status(&raw).await;
                let _ = reply.send(result);
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(self.registry.snapshot());
            }
            Command::SetSpawningEnabled { enabled, reply } => {
                if self.spawning_enabled != enabled {
                    info!(enabled, "process spawning toggled");
                }
                self.spawning_enabled = enabled;
                if !enabled && !self.registry.is_empty() {
                    self.drain_all().await;
                }
                let _ = reply.send(());
            }
        }
    }

    fn clients(&self) -> Vec<(SessionIdentity, HelperClient)> {
        self.registry
            .snapshot()
            .into_iter()
            .map(|record| {
                let client = HelperClient::new(self.settings.auth_token.as_str(), record.ipc_address)
                    .with_timeout(self.settings.ipc_timeout);
                (record.identity, client)
            })
            .collect()
    }

    async fn broadcast_notification(&self, notification: &Notification) -> Result<()> {
        let clients = self.clients();
        let sends = clients.iter().map(|(identity, client)| async move {
            (identity, client.send_notification(notification).await)
        });

        let failures: Vec<String> = join_all(sends)
            .await
            .into_iter()
            .filter_map(|(identity, result)| {
                result.err().map(|err| {
                    warn!(uid = %identity, %err, "error sending notification to desktop helper");
                    format!("{identity}: {err}")
                })
            })
            .collect();

        if failures.is_empty() {
            Ok(())
        } else {
            Err(AppError::Ipc(format!(
                "notification failed for {} of {} helpers: {}",
                failures.len(),
                clients.len(),
                failures.join("; ")
            )))
        }
    }

    /// Replace the status document, then tell every helper to re-read it.
    async fn update_status(&self, raw: &str) -> Result<()> {
        let path = status_path(&self.settings.users_files_root);
        write_status(&path, raw, &TemplateData::new(&self.settings.hostname))?;
        info!(path = %path.display(), "status document updated");
        self.refresh_all().await;
        Ok(())
    }

    async fn refresh_all(&self) {
        let clients = self.clients();
        let refreshes = clients.iter().map(|(identity, client)| async move {
            if let Err(err) = client.refresh().await {
                warn!(uid = %identity, %err, "error refreshing desktop helper");
            }
        });
        join_all(refreshes).await;
    }

    async fn drain_all(&mut self) -> DrainOutcome {
        let params = DrainParams {
            auth_token: &self.settings.auth_token,
            ipc_timeout: self.settings.ipc_timeout,
            interrupt_timeout: self.settings.interrupt_timeout,
        };
        drain(
            &mut self.registry,
            &self.watchers,
            self.deps.probe.as_ref(),
            &params,
        )
        .await
    }
}
