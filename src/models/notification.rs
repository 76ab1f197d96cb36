//! Notification payload pushed from the supervisor to helpers.

use serde::{Deserialize, Serialize};

/// Desktop notification request.
///
/// The content is opaque to the supervisor; the helper only checks that the
/// body deserializes into this shape.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct Notification {
    /// Notification title.
    pub title: String,
    /// Notification body text.
    #[serde(default)]
    pub body: String,
    /// Optional URI opened when the notification is activated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_uri: Option<String>,
}

impl Notification {
    /// Build a notification without an action URI.
    #[must_use]
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            action_uri: None,
        }
    }
}
