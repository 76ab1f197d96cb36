//! Error types shared across the supervisor, the helper, and the IPC layer.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all domain failure modes.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Listing interactive sessions failed; the poll is skipped.
    SessionEnumeration(String),
    /// Starting a helper for one session failed; retried next poll.
    Launch(String),
    /// Local IPC transport failure or non-success response.
    Ipc(String),
    /// Helpers did not exit within the shutdown window and were killed.
    ShutdownTimeout(String),
    /// Caller presented a missing or wrong bearer token.
    Unauthorized(String),
    /// Desktop notification could not be delivered.
    Notify(String),
    /// The supervisor loop is not running or dropped the request.
    Supervisor(String),
    /// The shared status document is not a valid JSON object.
    Status(String),
    /// File-system or I/O operation failure.
    Io(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::SessionEnumeration(msg) => write!(f, "session enumeration: {msg}"),
            Self::Launch(msg) => write!(f, "launch: {msg}"),
            Self::Ipc(msg) => write!(f, "ipc: {msg}"),
            Self::ShutdownTimeout(msg) => write!(f, "shutdown timeout: {msg}"),
            Self::Unauthorized(msg) => write!(f, "unauthorized: {msg}"),
            Self::Notify(msg) => write!(f, "notify: {msg}"),
            Self::Supervisor(msg) => write!(f, "supervisor: {msg}"),
            Self::Status(msg) => write!(f, "status: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Ipc(format!("invalid json: {err}"))
    }
}
