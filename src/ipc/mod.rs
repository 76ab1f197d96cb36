//! Local control-plane IPC between the supervisor and its helpers.
//!
//! Each helper serves a named pipe (Windows) or Unix domain socket
//! (Linux/macOS) that accepts authenticated JSON-line requests.

pub mod address;
pub mod client;
pub mod protocol;
pub mod server;
