pub mod backoff;
pub mod config;
pub mod errors;
pub mod helper;
pub mod ipc;
pub mod launcher;
pub mod models;
pub mod notifier;
pub mod session;
pub mod signals;
pub mod status;
pub mod supervisor;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
