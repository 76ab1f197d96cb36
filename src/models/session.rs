//! Interactive session identity.

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::{AppError, Result};

/// Opaque OS-user identifier for an interactive desktop session.
///
/// A POSIX uid (`"501"`) or a Windows SID string (`"S-1-5-21-..."`).
/// Stable for the lifetime of a login session; the supervisor tracks at
/// most one helper per identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionIdentity(String);

impl SessionIdentity {
    /// Wrap an OS-reported user identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The raw identifier string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Parse the identity as a numeric POSIX uid.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Launch` if the identity is not a valid uid.
    pub fn as_uid(&self) -> Result<u32> {
        self.0
            .parse::<u32>()
            .map_err(|err| AppError::Launch(format!("converting uid {} to int: {err}", self.0)))
    }
}

impl Display for SessionIdentity {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionIdentity {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for SessionIdentity {
    fn from(value: String) -> Self {
        Self(value)
    }
}
