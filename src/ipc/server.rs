//! IPC server hosted inside each helper process.
//!
//! Listens on a Unix domain socket (Linux/macOS) or named pipe (Windows)
//! using the `interprocess` crate, and serves the routes in
//! [`Route`]. Every request passes the bearer-token check before any
//! handler runs.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use interprocess::local_socket::{tokio::prelude::*, ListenerOptions};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::backoff;
use crate::ipc::address::IpcAddress;
use crate::ipc::protocol::{parse_bearer, IpcRequest, IpcResponse, Route, Status};
use crate::models::notification::Notification;
use crate::notifier::Notifier;
use crate::{AppError, Result};

/// How long to keep retrying removal of a previous instance's socket.
const STALE_SOCKET_TIMEOUT: Duration = Duration::from_secs(5);

/// Interval between stale socket removal attempts.
const STALE_SOCKET_INTERVAL: Duration = Duration::from_secs(1);

/// Longest request line accepted, newline included.
pub const MAX_REQUEST_BYTES: u64 = 64 * 1024;

/// Payload returned by the `ping` route.
pub const PONG: &str = "desktop-runner";

/// Callback invoked on every `refresh` request.
pub type RefreshListener = Arc<dyn Fn() + Send + Sync>;

/// A bound, not yet serving, helper IPC server.
pub struct HelperServer {
    address: IpcAddress,
    listener: interprocess::local_socket::tokio::Listener,
    auth_token: String,
    shutdown: CancellationToken,
    notifier: Arc<dyn Notifier>,
    refresh_listeners: Vec<RefreshListener>,
}

struct ServerState {
    auth_token: String,
    shutdown: CancellationToken,
    notifier: Arc<dyn Notifier>,
    refresh_listeners: Vec<RefreshListener>,
}

/// What the connection handler does once the response is written.
enum AfterResponse {
    Nothing,
    SignalShutdown,
    Close,
}

impl HelperServer {
    /// Remove any stale socket at `address` and bind a listener there.
    ///
    /// `shutdown` is the helper's own shutdown signal; the `shutdown` route
    /// cancels it after replying.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Ipc` if the stale socket cannot be removed or the
    /// listener cannot be created within the retry window.
    pub async fn bind(
        address: IpcAddress,
        auth_token: impl Into<String>,
        shutdown: CancellationToken,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self> {
        let addr = &address;
        let listener = backoff::wait_for(
            move || async move {
                remove_socket(addr.path())?;
                let name = addr.to_name().map_err(|err| {
                    AppError::Ipc(format!("invalid ipc socket name '{addr}': {err}"))
                })?;
                ListenerOptions::new()
                    .name(name)
                    .create_tokio()
                    .map_err(|err| AppError::Ipc(format!("failed to create ipc listener: {err}")))
            },
            STALE_SOCKET_TIMEOUT,
            STALE_SOCKET_INTERVAL,
        )
        .await?;

        info!(address = %address, "helper IPC server listening");

        Ok(Self {
            address,
            listener,
            auth_token: auth_token.into(),
            shutdown,
            notifier,
            refresh_listeners: Vec::new(),
        })
    }

    /// Register a callback run on every `refresh` request.
    pub fn register_refresh_listener(&mut self, listener: impl Fn() + Send + Sync + 'static) {
        self.refresh_listeners.push(Arc::new(listener));
    }

    /// Address the server is bound to.
    #[must_use]
    pub fn address(&self) -> &IpcAddress {
        &self.address
    }

    /// Start accepting connections until `ct` fires.
    ///
    /// The socket file is removed when the accept loop exits.
    #[must_use]
    pub fn spawn(self, ct: CancellationToken) -> tokio::task::JoinHandle<()> {
        let Self {
            address,
            listener,
            auth_token,
            shutdown,
            notifier,
            refresh_listeners,
        } = self;

        let state = Arc::new(ServerState {
            auth_token,
            shutdown,
            notifier,
            refresh_listeners,
        });

        tokio::spawn(async move {
            let span = info_span!("helper_ipc_server", address = %address);
            async move {
                loop {
                    tokio::select! {
                        () = ct.cancelled() => {
                            info!("helper IPC server shutting down");
                            break;
                        }
                        accept_result = listener.accept() => {
                            match accept_result {
                                Ok(stream) => {
                                    let state = Arc::clone(&state);
                                    tokio::spawn(handle_connection(stream, state));
                                }
                                Err(err) => {
                                    warn!(%err, "IPC accept failed");
                                }
                            }
                        }
                    }
                }

                drop(listener);
                if let Err(err) = remove_socket(address.path()) {
                    error!(%err, "removing socket on shutdown");
                }
            }
            .instrument(span)
            .await;
        })
    }
}

/// Delete a socket file left behind by a previous instance.
#[cfg(unix)]
fn remove_socket(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(AppError::Ipc(format!(
            "removing socket {}: {err}",
            path.display()
        ))),
    }
}

/// Named pipes vanish with their last handle; a busy name surfaces as a bind
/// error and is retried by the caller.
#[cfg(windows)]
fn remove_socket(_path: &Path) -> Result<()> {
    Ok(())
}

/// Handle a single client connection.
async fn handle_connection(
    stream: interprocess::local_socket::tokio::Stream,
    state: Arc<ServerState>,
) {
    let span = info_span!("ipc_conn");
    async move {
        let (reader, mut writer) = stream.split();
        let mut buf_reader = BufReader::new(reader);
        let mut line = String::new();

        loop {
            line.clear();
            let mut limited = (&mut buf_reader).take(MAX_REQUEST_BYTES);
            match limited.read_line(&mut line).await {
                Ok(0) => break,
                Ok(read) => {
                    let oversized = u64::try_from(read).unwrap_or(u64::MAX) >= MAX_REQUEST_BYTES
                        && !line.ends_with('\n');
                    let trimmed = line.trim();
                    if trimmed.is_empty() && !oversized {
                        continue;
                    }

                    let (response, after) = if oversized {
                        warn!(limit = MAX_REQUEST_BYTES, "ipc request too large, closing connection");
                        (
                            IpcResponse::error(
                                Status::BadRequest,
                                format!("request exceeds {MAX_REQUEST_BYTES} bytes"),
                            ),
                            AfterResponse::Close,
                        )
                    } else {
                        dispatch(trimmed, &state).await
                    };

                    let mut response_line = serde_json::to_string(&response).unwrap_or_else(|_| {
                        r#"{"status":"server_error","error":"serialization failed"}"#.to_owned()
                    });
                    response_line.push('\n');

                    let written = match writer.write_all(response_line.as_bytes()).await {
                        Ok(()) => writer.flush().await,
                        Err(err) => Err(err),
                    };

                    if let AfterResponse::SignalShutdown = after {
                        info!("shutdown requested over IPC");
                        state.shutdown.cancel();
                    }

                    if let Err(err) = written {
                        warn!(%err, "failed to write ipc response");
                        break;
                    }
                    if let AfterResponse::Close = after {
                        break;
                    }
                }
                Err(err) => {
                    warn!(%err, "ipc read error");
                    break;
                }
            }
        }

        debug!("IPC connection closed");
    }
    .instrument(span)
    .await;
}

/// Authenticate and route one request line.
async fn dispatch(line: &str, state: &ServerState) -> (IpcResponse, AfterResponse) {
    let request = match serde_json::from_str::<IpcRequest>(line) {
        Ok(request) => request,
        Err(err) => {
            debug!(%err, "malformed ipc request");
            return (
                IpcResponse::error(Status::BadRequest, format!("invalid request: {err}")),
                AfterResponse::Nothing,
            );
        }
    };

    if let Err(response) = authorize(&request, &state.auth_token) {
        return (response, AfterResponse::Nothing);
    }

    match Route::parse(&request.route) {
        Some(Route::Ping) => (
            IpcResponse::success(serde_json::json!({ "pong": PONG })),
            AfterResponse::Nothing,
        ),
        Some(Route::Shutdown) => (
            IpcResponse::success(serde_json::json!({ "msg": "shutting down" })),
            AfterResponse::SignalShutdown,
        ),
        Some(Route::Refresh) => {
            for listener in &state.refresh_listeners {
                listener();
            }
            (IpcResponse::empty(), AfterResponse::Nothing)
        }
        Some(Route::Notification) => (
            handle_notification(request.body, state).await,
            AfterResponse::Nothing,
        ),
        None => (
            IpcResponse::error(Status::NotFound, format!("unknown route: {}", request.route)),
            AfterResponse::Nothing,
        ),
    }
}

/// Bearer-token middleware.
fn authorize(request: &IpcRequest, expected: &str) -> std::result::Result<(), IpcResponse> {
    let Some(token) = parse_bearer(request.authorization.as_deref()) else {
        debug!(route = %request.route, "malformed authorization header");
        return Err(IpcResponse::error(
            Status::Unauthorized,
            "malformed authorization header",
        ));
    };

    if !tokens_match(token, expected) {
        debug!(route = %request.route, "invalid authorization token");
        return Err(IpcResponse::error(
            Status::Unauthorized,
            "invalid authorization token",
        ));
    }

    Ok(())
}

/// Compare tokens without short-circuiting on the first differing byte.
fn tokens_match(provided: &str, expected: &str) -> bool {
    let (a, b) = (provided.as_bytes(), expected.as_bytes());
    a.len() == b.len() && a.iter().zip(b).fold(0_u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

async fn handle_notification(body: Option<serde_json::Value>, state: &ServerState) -> IpcResponse {
    let Some(body) = body else {
        return IpcResponse::error(Status::BadRequest, "missing notification body");
    };

    let notification: Notification = match serde_json::from_value(body) {
        Ok(notification) => notification,
        Err(err) => {
            error!(%err, "could not decode notification request");
            return IpcResponse::error(Status::BadRequest, format!("invalid notification: {err}"));
        }
    };

    match state.notifier.send_notification(&notification).await {
        Ok(()) => IpcResponse::empty(),
        Err(err) => {
            error!(%err, "could not send notification");
            IpcResponse::error(Status::ServerError, err.to_string())
        }
    }
}
