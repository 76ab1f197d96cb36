//! Helper process exit outcome.

use std::fmt::{Display, Formatter};

/// How a helper process ended, as observed by its exit-watcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitOutcome {
    /// Exit code, `None` when the process was terminated by a signal.
    pub code: Option<i32>,
}

impl ExitOutcome {
    /// Whether the process exited with code 0.
    #[must_use]
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl From<std::process::ExitStatus> for ExitOutcome {
    fn from(status: std::process::ExitStatus) -> Self {
        Self {
            code: status.code(),
        }
    }
}

impl Display for ExitOutcome {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.code {
            Some(0) => f.write_str("exited normally (code 0)"),
            Some(code) => write!(f, "exited with code {code}"),
            None => f.write_str("terminated by signal"),
        }
    }
}
