//! IPC client used by the supervisor (and `desktop-runner-ctl`) to talk to a
//! helper's server.

use std::time::Duration;

use interprocess::local_socket::tokio::{prelude::*, Stream};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::debug;

use crate::ipc::address::IpcAddress;
use crate::ipc::protocol::{IpcRequest, IpcResponse, Route, Status};
use crate::models::notification::Notification;
use crate::{AppError, Result};

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Authenticated client for one helper.
#[derive(Debug, Clone)]
pub struct HelperClient {
    auth_token: String,
    address: IpcAddress,
    timeout: Duration,
}

impl HelperClient {
    /// Create a client for the helper at `address`.
    #[must_use]
    pub fn new(auth_token: impl Into<String>, address: IpcAddress) -> Self {
        Self {
            auth_token: auth_token.into(),
            address,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Override the per-request timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Helper address this client targets.
    #[must_use]
    pub fn address(&self) -> &IpcAddress {
        &self.address
    }

    /// Liveness probe.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Ipc` on transport failure or a non-`ok` status.
    pub async fn ping(&self) -> Result<()> {
        self.call(Route::Ping, None).await.map(|_| ())
    }

    /// Ask the helper to exit.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Ipc` on transport failure or a non-`ok` status.
    pub async fn shutdown(&self) -> Result<()> {
        self.call(Route::Shutdown, None).await.map(|_| ())
    }

    /// Ask the helper to recompute its displayed status.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Ipc` on transport failure or a non-`ok` status.
    pub async fn refresh(&self) -> Result<()> {
        self.call(Route::Refresh, None).await.map(|_| ())
    }

    /// Deliver a desktop notification through the helper.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Ipc` on transport failure or a non-`ok` status.
    pub async fn send_notification(&self, notification: &Notification) -> Result<()> {
        let body = serde_json::to_value(notification)?;
        self.call(Route::Notification, Some(body)).await.map(|_| ())
    }

    /// Send an authenticated request and return the raw response, whatever
    /// its status.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Ipc` on transport failure only.
    pub async fn request(&self, route: Route, body: Option<Value>) -> Result<IpcResponse> {
        let request = IpcRequest::new(route, &self.auth_token, body);
        send_raw(&self.address, &request, self.timeout).await
    }

    async fn call(&self, route: Route, body: Option<Value>) -> Result<Option<Value>> {
        let response = self.request(route, body).await?;
        if response.status == Status::Ok {
            return Ok(response.data);
        }

        Err(AppError::Ipc(format!(
            "{route} on {} returned {}: {}",
            self.address,
            response.status,
            response.error.as_deref().unwrap_or("no detail")
        )))
    }
}

/// Send a caller-built envelope to `address` and read one response line.
///
/// # Errors
///
/// Returns `AppError::Ipc` if the connection fails, the peer closes without
/// answering, the response is not valid JSON, or `timeout` elapses.
pub async fn send_raw(
    address: &IpcAddress,
    request: &IpcRequest,
    timeout: Duration,
) -> Result<IpcResponse> {
    tokio::time::timeout(timeout, exchange(address, request))
        .await
        .map_err(|_| {
            AppError::Ipc(format!(
                "{} request to {address} timed out after {}s",
                request.route,
                timeout.as_secs()
            ))
        })?
}

async fn exchange(address: &IpcAddress, request: &IpcRequest) -> Result<IpcResponse> {
    let name = address
        .to_name()
        .map_err(|err| AppError::Ipc(format!("invalid ipc socket name '{address}': {err}")))?;
    let stream = Stream::connect(name)
        .await
        .map_err(|err| AppError::Ipc(format!("connecting to {address}: {err}")))?;

    let (reader, mut writer) = stream.split();

    let mut request_line = serde_json::to_string(request)?;
    request_line.push('\n');
    writer
        .write_all(request_line.as_bytes())
        .await
        .map_err(|err| AppError::Ipc(format!("writing request to {address}: {err}")))?;
    writer
        .flush()
        .await
        .map_err(|err| AppError::Ipc(format!("flushing request to {address}: {err}")))?;

    let mut buf_reader = BufReader::new(reader);
    let mut response_line = String::new();
    let read = buf_reader
        .read_line(&mut response_line)
        .await
        .map_err(|err| AppError::Ipc(format!("reading response from {address}: {err}")))?;
    if read == 0 {
        return Err(AppError::Ipc(format!(
            "{address} closed the connection without responding"
        )));
    }

    debug!(route = %request.route, %address, "ipc response received");
    Ok(serde_json::from_str(response_line.trim())?)
}
