//! Parsers for the text output of platform session tools.
//!
//! Kept platform-independent so they can be tested everywhere.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;

use crate::models::session::SessionIdentity;

/// Lowest uid macOS assigns to human accounts.
pub const MIN_CONSOLE_USER_UID: u32 = 501;

/// Graphical session types accepted from `loginctl`.
const GRAPHICAL_TYPES: [&str; 3] = ["x11", "wayland", "mir"];

/// One row of `loginctl list-sessions --no-legend`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginSession {
    /// Session id (first column).
    pub id: String,
    /// Owner uid (second column).
    pub uid: String,
}

/// Parse `loginctl list-sessions --no-legend` output.
///
/// Rows whose second column is not numeric are skipped; that drops header and
/// footer lines when the legend is not suppressed.
#[must_use]
pub fn parse_loginctl_sessions(output: &str) -> Vec<LoginSession> {
    output
        .lines()
        .filter_map(|line| {
            let mut cols = line.split_whitespace();
            let id = cols.next()?;
            let uid = cols.next()?;
            uid.parse::<u32>().ok()?;
            Some(LoginSession {
                id: id.to_owned(),
                uid: uid.to_owned(),
            })
        })
        .collect()
}

/// Parse `loginctl show-session <id>` `KEY=VALUE` output.
#[must_use]
pub fn parse_properties(output: &str) -> BTreeMap<String, String> {
    output
        .lines()
        .filter_map(|line| line.split_once('='))
        .map(|(key, value)| (key.trim().to_owned(), value.trim().to_owned()))
        .collect()
}

/// Whether a `show-session` property set describes a local, active, graphical
/// user session.
#[must_use]
pub fn is_interactive_session(props: &BTreeMap<String, String>) -> bool {
    let is = |key: &str, expected: &str| props.get(key).is_some_and(|v| v == expected);

    is("Active", "yes")
        && is("Remote", "no")
        && is("Class", "user")
        && props
            .get("Type")
            .is_some_and(|t| GRAPHICAL_TYPES.contains(&t.as_str()))
}

/// Parse `scutil` output for `show State:/Users/ConsoleUser`.
///
/// Returns the uids of on-console sessions with uid at least
/// [`MIN_CONSOLE_USER_UID`]. The login window yields no users. So does an
/// outer `UID` that disagrees with the on-console session, which happens while
/// a fast-switched user completes their first login.
#[must_use]
pub fn parse_scutil_console_users(output: &str) -> Vec<SessionIdentity> {
    let mut uids: Vec<SessionIdentity> = Vec::new();
    let mut on_console: Option<&str> = None;
    let mut session_uid: Option<&str> = None;
    let mut last_on_console: Option<&str> = None;
    let mut outer_uid: Option<&str> = None;

    for line in output.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let (key, value) = (key.trim(), value.trim());

        match key {
            "Name" if value == "loginwindow" => return Vec::new(),
            "UID" => outer_uid = Some(value),
            "kCGSSessionOnConsoleKey" => on_console = Some(value),
            "kCGSSessionUserIDKey" => session_uid = Some(value),
            _ => continue,
        }

        let (Some(console), Some(uid)) = (on_console, session_uid) else {
            continue;
        };

        if uid
            .parse::<u32>()
            .is_ok_and(|parsed| parsed >= MIN_CONSOLE_USER_UID)
            && console == "TRUE"
        {
            uids.push(SessionIdentity::from(uid));
            last_on_console = Some(uid);
        }

        on_console = None;
        session_uid = None;
    }

    match (outer_uid, last_on_console) {
        (Some(outer), Some(last)) if outer != last => Vec::new(),
        _ => uids,
    }
}

/// Whether a `DISPLAY` value looks like `[host]:display[.screen]`.
#[must_use]
pub fn is_valid_display(value: &str) -> bool {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^[a-z]*:\d+.?\d*$").ok())
        .as_ref()
        .is_some_and(|pattern| pattern.is_match(value))
}
