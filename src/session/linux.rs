//! `loginctl`-backed enumeration (multi-user model).

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;

use tracing::debug;

use super::parse::{
    is_interactive_session, is_valid_display, parse_loginctl_sessions, parse_properties,
};
use super::{run_tool, SessionEnumerator};
use crate::models::session::SessionIdentity;
use crate::Result;

/// Every local, active, graphical systemd-logind session, one per uid.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoginctlEnumerator;

impl LoginctlEnumerator {
    /// Create the enumerator.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    async fn list(&self) -> Result<Vec<SessionIdentity>> {
        let listing = run_tool("loginctl", &["list-sessions", "--no-legend", "--no-pager"], None).await?;

        let mut identities: Vec<SessionIdentity> = Vec::new();
        for session in parse_loginctl_sessions(&listing) {
            let identity = SessionIdentity::new(session.uid.clone());
            if identities.contains(&identity) {
                continue;
            }

            let props = run_tool(
                "loginctl",
                &[
                    "show-session",
                    &session.id,
                    "--property=Active",
                    "--property=Remote",
                    "--property=Class",
                    "--property=Type",
                ],
                None,
            )
            .await?;

            if is_interactive_session(&parse_properties(&props)) {
                identities.push(identity);
            } else {
                debug!(session = %session.id, uid = %session.uid, "skipping non-graphical session");
            }
        }

        Ok(identities)
    }
}

impl SessionEnumerator for LoginctlEnumerator {
    fn list_interactive_sessions(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<SessionIdentity>>> + Send + '_>> {
        Box::pin(self.list())
    }
}

/// Fallback X display.
const DEFAULT_DISPLAY: &str = ":0";

/// Fallback Wayland socket name.
const DEFAULT_WAYLAND_DISPLAY: &str = "wayland-0";

/// Display variables of the user's graphical session, as reported by logind.
///
/// `DISPLAY` falls back to `:0` when logind has no valid value.
/// `WAYLAND_DISPLAY` is set only for Wayland sessions.
pub(crate) async fn display_env_for_uid(uid: u32) -> BTreeMap<String, String> {
    let mut env = BTreeMap::from([("DISPLAY".to_owned(), DEFAULT_DISPLAY.to_owned())]);

    let Ok(listing) = run_tool("loginctl", &["list-sessions", "--no-legend", "--no-pager"], None).await
    else {
        return env;
    };
    let uid = uid.to_string();

    for session in parse_loginctl_sessions(&listing)
        .into_iter()
        .filter(|s| s.uid == uid)
    {
        let Ok(output) = run_tool(
            "loginctl",
            &["show-session", &session.id, "--property=Type", "--property=Display"],
            None,
        )
        .await
        else {
            continue;
        };

        let mut props = parse_properties(&output);
        let session_type = props.remove("Type").unwrap_or_default();
        if session_type != "x11" && session_type != "wayland" {
            continue;
        }

        if let Some(display) = props.remove("Display").filter(|d| is_valid_display(d)) {
            env.insert("DISPLAY".to_owned(), display);
        }
        if session_type == "wayland" {
            env.insert("WAYLAND_DISPLAY".to_owned(), DEFAULT_WAYLAND_DISPLAY.to_owned());
        }
        debug!(uid = %uid, session = %session.id, %session_type, "resolved graphical session");
        break;
    }

    env
}
