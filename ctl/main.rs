//! `desktop-runner-ctl`: local CLI companion for `desktop-runner` helpers.
//!
//! Speaks the helper IPC protocol to one running helper, addressed by its
//! socket directory and PID.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};

use desktop_runner::ipc::address::IpcAddress;
use desktop_runner::ipc::client::HelperClient;
use desktop_runner::ipc::protocol::{Route, Status};
use desktop_runner::models::notification::Notification;

#[derive(Debug, Parser)]
#[command(
    name = "desktop-runner-ctl",
    about = "Local CLI for desktop-runner helpers",
    version,
    long_about = None
)]
struct Cli {
    /// The helper's socket directory (`<users_files_root>/desktop_<uid>`).
    #[arg(long)]
    socket_dir: PathBuf,

    /// PID of the helper process.
    #[arg(long)]
    pid: u32,

    /// Bearer token of the supervisor run that started the helper.
    #[arg(long, env = "DESKTOP_RUNNER_AUTH_TOKEN", hide_env_values = true)]
    token: String,

    /// Request timeout in seconds.
    #[arg(long, default_value_t = 30)]
    timeout: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Check that the helper answers.
    Ping,

    /// Ask the helper to exit.
    Shutdown,

    /// Ask the helper to refresh its displayed status.
    Refresh,

    /// Show a desktop notification through the helper.
    Notify {
        /// Notification title.
        title: String,
        /// Notification body.
        #[arg(default_value = "")]
        body: String,
        /// URI opened when the notification is clicked.
        #[arg(long)]
        action_uri: Option<String>,
    },
}

fn main() {
    let args = Cli::parse();

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("Failed to start runtime: {err}");
            std::process::exit(1);
        }
    };

    let address = match IpcAddress::for_pid(&args.socket_dir, args.pid) {
        Ok(address) => address,
        Err(err) => {
            eprintln!("Error: {err}");
            std::process::exit(1);
        }
    };

    let client =
        HelperClient::new(args.token, address.clone()).with_timeout(Duration::from_secs(args.timeout));

    let (route, body) = match args.command {
        Command::Ping => (Route::Ping, None),
        Command::Shutdown => (Route::Shutdown, None),
        Command::Refresh => (Route::Refresh, None),
        Command::Notify {
            title,
            body,
            action_uri,
        } => {
            let notification = Notification {
                title,
                body,
                action_uri,
            };
            match serde_json::to_value(&notification) {
                Ok(value) => (Route::Notification, Some(value)),
                Err(err) => {
                    eprintln!("Error: {err}");
                    std::process::exit(1);
                }
            }
        }
    };

    match runtime.block_on(client.request(route, body)) {
        Ok(response) if response.status == Status::Ok => {
            if let Some(data) = response.data {
                println!("{}", serde_json::to_string_pretty(&data).unwrap_or_default());
            } else {
                println!("OK");
            }
        }
        Ok(response) => {
            eprintln!(
                "Error ({}): {}",
                response.status,
                response.error.as_deref().unwrap_or("unknown error")
            );
            std::process::exit(1);
        }
        Err(err) => {
            eprintln!("Failed to connect to helper: {err}");
            eprintln!("Is a desktop helper with pid {} listening at '{address}'?", args.pid);
            std::process::exit(1);
        }
    }
}
