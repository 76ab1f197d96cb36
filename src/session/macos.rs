//! `scutil`-backed enumeration (console-owner model).

use std::future::Future;
use std::pin::Pin;

use super::parse::parse_scutil_console_users;
use super::{run_tool, SessionEnumerator};
use crate::models::session::SessionIdentity;
use crate::Result;

/// The user that currently owns the console, if any.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScutilEnumerator;

impl ScutilEnumerator {
    /// Create the enumerator.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl SessionEnumerator for ScutilEnumerator {
    fn list_interactive_sessions(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<SessionIdentity>>> + Send + '_>> {
        Box::pin(async move {
            let output = run_tool("scutil", &[], Some("show State:/Users/ConsoleUser")).await?;
            Ok(parse_scutil_console_users(&output))
        })
    }
}
