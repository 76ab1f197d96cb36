//! `desktop-runner` binary.
//!
//! `supervise` runs the privileged supervisor that keeps one desktop helper
//! per interactive user alive. `desktop` is the helper role itself, started
//! by the supervisor with the spawn-contract environment.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use desktop_runner::helper::{run_helper, HelperOptions};
use desktop_runner::notifier::DesktopNotifier;
use desktop_runner::signals::shutdown_signal;
use desktop_runner::supervisor::{Supervisor, SupervisorDeps, SupervisorSettings};
use desktop_runner::{AppError, GlobalConfig, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "desktop-runner", about = "Per-user desktop helper supervisor", version, long_about = None)]
struct Cli {
    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Keep a desktop helper running for every interactive user.
    Supervise {
        /// Path to the TOML configuration file; defaults apply when omitted.
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Run as a desktop helper inside a user session.
    Desktop {
        /// Bearer token the supervisor will present.
        #[arg(long, env = "DESKTOP_RUNNER_AUTH_TOKEN", hide_env_values = true)]
        auth_token: String,

        /// Directory holding this user's helper sockets.
        #[arg(long, env = "DESKTOP_RUNNER_SOCKET_DIR")]
        socket_dir: PathBuf,

        /// Agent hostname shown in status.
        #[arg(long, env = "DESKTOP_RUNNER_HOSTNAME", default_value = "")]
        hostname: String,

        /// Supervisor PID; the helper exits when it disappears.
        #[arg(long, env = "DESKTOP_RUNNER_PARENT_PID")]
        parent_pid: Option<u32>,

        /// Shared status document re-read on refresh.
        #[arg(long, env = "DESKTOP_RUNNER_STATUS_PATH")]
        status_path: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args.command))
}

async fn run(command: Command) -> Result<()> {
    match command {
        Command::Supervise { config } => supervise(config).await,
        Command::Desktop {
            auth_token,
            socket_dir,
            hostname,
            parent_pid,
            status_path,
        } => {
            let options = HelperOptions {
                auth_token,
                socket_dir,
                hostname,
                parent_pid,
                status_path,
            };
            run_helper(options, Arc::new(DesktopNotifier::new())).await
        }
    }
}

async fn supervise(config_path: Option<PathBuf>) -> Result<()> {
    let config = match config_path {
        Some(path) => {
            let config = GlobalConfig::load_from_path(&path)?;
            info!(config_path = %path.display(), "configuration loaded");
            config
        }
        None => GlobalConfig::default(),
    };

    let settings = SupervisorSettings::from_config(&config);
    let (supervisor, handle) = Supervisor::new(settings, SupervisorDeps::platform());
    let mut supervisor_task = tokio::spawn(supervisor.run());

    tokio::select! {
        () = shutdown_signal() => {
            info!("shutdown signal received");
            handle.interrupt("signal received");
        }
        result = &mut supervisor_task => {
            return match result {
                Ok(outcome) => outcome.map(|_| ()),
                Err(err) => Err(AppError::Supervisor(format!("supervisor task failed: {err}"))),
            };
        }
    }

    match supervisor_task.await {
        Ok(Ok(outcome)) => {
            info!(
                forced = outcome.forced.len(),
                timed_out = outcome.timed_out,
                "desktop-runner shutdown complete"
            );
            Ok(())
        }
        Ok(Err(err)) => {
            error!(%err, "supervisor stopped with error");
            Err(err)
        }
        Err(err) => Err(AppError::Supervisor(format!("supervisor task failed: {err}"))),
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
