//! Shared status document.
//!
//! The supervisor writes one JSON document under the users-files root and
//! tells helpers to `refresh`; each helper then re-reads it. The document is
//! opaque here apart from being a JSON object, with `{{version}}` and
//! `{{hostname}}` expanded before validation.

use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use serde_json::Value;
use tracing::{debug, warn};

use crate::{AppError, Result};

/// File name of the status document under the users-files root.
pub const STATUS_FILE_NAME: &str = "desktop-status.json";

/// Written on first run when no status document exists yet.
pub const DEFAULT_STATUS: &str = r#"{
  "tooltip": "Desktop Runner",
  "items": [
    { "label": "Version: {{version}}", "disabled": true },
    { "label": "Host: {{hostname}}", "disabled": true }
  ]
}"#;

/// Location of the status document.
#[must_use]
pub fn status_path(users_files_root: &Path) -> PathBuf {
    users_files_root.join(STATUS_FILE_NAME)
}

/// Values substituted into status templates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateData {
    /// Replaces `{{version}}`.
    pub version: String,
    /// Replaces `{{hostname}}`.
    pub hostname: String,
}

impl TemplateData {
    /// Template data for this build and `hostname`.
    #[must_use]
    pub fn new(hostname: &str) -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_owned(),
            hostname: hostname.to_owned(),
        }
    }

    /// Replace placeholders in `raw`. Values are JSON-escaped, so placeholders
    /// must sit inside string literals.
    #[must_use]
    pub fn expand(&self, raw: &str) -> String {
        raw.replace("{{version}}", &escape(&self.version))
            .replace("{{hostname}}", &escape(&self.hostname))
    }
}

fn escape(value: &str) -> String {
    let quoted = Value::String(value.to_owned()).to_string();
    quoted[1..quoted.len() - 1].to_owned()
}

/// Expand and validate a status document.
///
/// # Errors
///
/// Returns `AppError::Status` if the expanded text is not a JSON object.
pub fn render_status(raw: &str, data: &TemplateData) -> Result<Value> {
    let value: Value = serde_json::from_str(&data.expand(raw))
        .map_err(|err| AppError::Status(format!("invalid status json: {err}")))?;
    if !value.is_object() {
        return Err(AppError::Status("status document must be a json object".into()));
    }
    Ok(value)
}

/// Validate `raw` and replace the document at `path`, readable by every user.
///
/// # Errors
///
/// Returns `AppError::Status` for an invalid document and `AppError::Io` if
/// the file cannot be written. The previous document is kept on error.
pub fn write_status(path: &Path, raw: &str, data: &TemplateData) -> Result<()> {
    let value = render_status(raw, data)?;
    let bytes = serde_json::to_vec_pretty(&value)
        .map_err(|err| AppError::Status(format!("encoding status: {err}")))?;

    let staging = path.with_extension("json.tmp");
    std::fs::write(&staging, bytes)
        .map_err(|err| AppError::Io(format!("writing {}: {err}", staging.display())))?;
    set_shared_permissions(&staging)?;
    std::fs::rename(&staging, path)
        .map_err(|err| AppError::Io(format!("replacing {}: {err}", path.display())))?;

    debug!(path = %path.display(), "status document written");
    Ok(())
}

/// Write [`DEFAULT_STATUS`] unless a document already exists. Returns whether
/// it wrote one.
///
/// # Errors
///
/// Same as [`write_status`].
pub fn write_default_status(path: &Path, data: &TemplateData) -> Result<bool> {
    if path.exists() {
        return Ok(false);
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|err| AppError::Io(format!("creating {}: {err}", parent.display())))?;
    }
    write_status(path, DEFAULT_STATUS, data)?;
    Ok(true)
}

#[cfg(unix)]
fn set_shared_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o644))
        .map_err(|err| AppError::Io(format!("chmod {}: {err}", path.display())))
}

#[cfg(windows)]
#[allow(clippy::unnecessary_wraps)]
fn set_shared_permissions(_path: &Path) -> Result<()> {
    Ok(())
}

/// Read and parse the document at `path`.
///
/// # Errors
///
/// Returns `AppError::Io` if the file cannot be read and `AppError::Status`
/// if it is not a JSON object.
pub fn read_status(path: &Path) -> Result<Value> {
    let text = std::fs::read_to_string(path)
        .map_err(|err| AppError::Io(format!("reading {}: {err}", path.display())))?;
    let value: Value = serde_json::from_str(&text)
        .map_err(|err| AppError::Status(format!("invalid status json in {}: {err}", path.display())))?;
    if !value.is_object() {
        return Err(AppError::Status(format!(
            "{} does not hold a json object",
            path.display()
        )));
    }
    Ok(value)
}

/// A helper's copy of the last good status document.
#[derive(Debug)]
pub struct StatusCache {
    path: PathBuf,
    current: RwLock<Option<Value>>,
}

impl StatusCache {
    /// Empty cache for the document at `path`; call [`reload`](Self::reload)
    /// to fill it.
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            current: RwLock::new(None),
        }
    }

    /// Document location.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Re-read the document. A failed read keeps the previous copy.
    ///
    /// # Errors
    ///
    /// Same as [`read_status`].
    pub fn reload(&self) -> Result<()> {
        match read_status(&self.path) {
            Ok(value) => {
                *self.current.write().unwrap_or_else(PoisonError::into_inner) = Some(value);
                Ok(())
            }
            Err(err) => {
                warn!(path = %self.path.display(), %err, "keeping previous status");
                Err(err)
            }
        }
    }

    /// Last successfully loaded document.
    #[must_use]
    pub fn current(&self) -> Option<Value> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
