//! Wire types for the helper control channel.
//!
//! Request (one JSON object per line):
//! ```json
//! {"route": "ping", "authorization": "Bearer 5f0c..."}
//! {"route": "notification", "authorization": "Bearer 5f0c...", "body": {"title": "Hi", "body": "..."}}
//! ```
//!
//! Response (one JSON object per line):
//! ```json
//! {"status": "ok", "data": {"pong": "desktop-runner"}}
//! {"status": "unauthorized", "error": "invalid authorization token"}
//! ```

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

/// Authorization scheme prefix expected in every request.
pub const BEARER_PREFIX: &str = "Bearer ";

/// Routes served by the helper.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Liveness probe.
    Ping,
    /// Ask the helper to exit.
    Shutdown,
    /// Ask the helper to recompute displayed status.
    Refresh,
    /// Deliver a desktop notification.
    Notification,
}

impl Route {
    /// Wire name of the route.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ping => "ping",
            Self::Shutdown => "shutdown",
            Self::Refresh => "refresh",
            Self::Notification => "notification",
        }
    }

    /// Look up a route by wire name.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "ping" => Some(Self::Ping),
            "shutdown" => Some(Self::Shutdown),
            "refresh" => Some(Self::Refresh),
            "notification" => Some(Self::Notification),
            _ => None,
        }
    }
}

impl Display for Route {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inbound request envelope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IpcRequest {
    /// Route name.
    pub route: String,
    /// `Bearer <token>` authorization header.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorization: Option<String>,
    /// JSON body, for routes that take one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<serde_json::Value>,
}

impl IpcRequest {
    /// Build an authenticated request for `route`.
    #[must_use]
    pub fn new(route: Route, auth_token: &str, body: Option<serde_json::Value>) -> Self {
        Self {
            route: route.as_str().to_owned(),
            authorization: Some(bearer(auth_token)),
            body,
        }
    }
}

/// Outcome class of a request, mirroring HTTP status semantics.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// Request handled.
    Ok,
    /// Missing, malformed, or wrong bearer token.
    Unauthorized,
    /// Malformed envelope or body.
    BadRequest,
    /// Unknown route.
    NotFound,
    /// Handler failed.
    ServerError,
}

impl Display for Status {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::Ok => "ok",
            Self::Unauthorized => "unauthorized",
            Self::BadRequest => "bad_request",
            Self::NotFound => "not_found",
            Self::ServerError => "server_error",
        };
        f.write_str(text)
    }
}

/// Outbound response envelope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IpcResponse {
    /// Outcome class.
    pub status: Status,
    /// Payload on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    /// Error message on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl IpcResponse {
    /// Successful response with a payload.
    #[must_use]
    pub fn success(data: serde_json::Value) -> Self {
        Self {
            status: Status::Ok,
            data: Some(data),
            error: None,
        }
    }

    /// Successful response without a payload.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            status: Status::Ok,
            data: None,
            error: None,
        }
    }

    /// Failed response.
    #[must_use]
    pub fn error(status: Status, message: impl Into<String>) -> Self {
        Self {
            status,
            data: None,
            error: Some(message.into()),
        }
    }
}

/// Format a bearer authorization header for `token`.
#[must_use]
pub fn bearer(token: &str) -> String {
    format!("{BEARER_PREFIX}{token}")
}

/// Extract the token from a `Bearer <token>` header.
///
/// Returns `None` for a missing header, a different scheme, or an empty token.
#[must_use]
pub fn parse_bearer(header: Option<&str>) -> Option<&str> {
    header
        .and_then(|value| value.strip_prefix(BEARER_PREFIX))
        .filter(|token| !token.is_empty())
}
