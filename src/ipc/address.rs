//! Deterministic local-socket addressing for helper processes.
//!
//! Every helper listens on an address derived from its own PID, so helpers
//! running for different users never collide. On Unix the address is a
//! socket file inside a per-user directory owned by that user; on Windows it
//! is a named pipe.

use std::fmt::{Display, Formatter};
use std::io;
use std::path::{Path, PathBuf};

use interprocess::local_socket::{GenericFilePath, Name, ToFsName};

use crate::models::session::SessionIdentity;
use crate::{AppError, Result};

/// Common prefix for helper socket and pipe names.
pub const SOCKET_PREFIX: &str = "desktop-runner";

/// Longest socket path accepted by `sun_path` on every supported Unix.
#[cfg(unix)]
const MAX_SOCKET_PATH_LEN: usize = 103;

/// Address of one helper's IPC server.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IpcAddress {
    path: PathBuf,
}

impl IpcAddress {
    /// Address of the helper with process id `pid`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Ipc` if the resulting socket path is too long.
    #[cfg(unix)]
    pub fn for_pid(socket_dir: &Path, pid: u32) -> Result<Self> {
        let path = socket_dir.join(format!("{SOCKET_PREFIX}-{pid}.sock"));
        let len = path.as_os_str().len();
        if len > MAX_SOCKET_PATH_LEN {
            return Err(AppError::Ipc(format!(
                "socket path {} (length {len}) is too long, max is {MAX_SOCKET_PATH_LEN}",
                path.display()
            )));
        }
        Ok(Self { path })
    }

    /// Address of the helper with process id `pid`.
    ///
    /// # Errors
    ///
    /// Never fails on Windows; the signature matches the Unix variant.
    #[cfg(windows)]
    pub fn for_pid(_socket_dir: &Path, pid: u32) -> Result<Self> {
        Ok(Self {
            path: PathBuf::from(format!(r"\\.\pipe\{SOCKET_PREFIX}-{pid}")),
        })
    }

    /// Wrap an explicit socket path or pipe path.
    #[must_use]
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Socket file or pipe path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn to_name(&self) -> io::Result<Name<'_>> {
        self.path.as_path().to_fs_name::<GenericFilePath>()
    }
}

impl Display for IpcAddress {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.path.display())
    }
}

/// Per-user directory holding that user's helper sockets.
#[must_use]
pub fn socket_dir_for(users_files_root: &Path, identity: &SessionIdentity) -> PathBuf {
    users_files_root.join(format!("desktop_{identity}"))
}

/// Create the per-user socket directory, readable only by its owner.
///
/// When the caller is root the directory is handed to the target user so the
/// helper, running with that user's credentials, can bind inside it.
///
/// # Errors
///
/// Returns `AppError::Io` if the directory cannot be created or chowned.
#[cfg(unix)]
pub fn prepare_socket_dir(users_files_root: &Path, identity: &SessionIdentity) -> Result<PathBuf> {
    use std::os::unix::fs::PermissionsExt;

    let dir = socket_dir_for(users_files_root, identity);
    std::fs::create_dir_all(&dir)
        .map_err(|err| AppError::Io(format!("creating user folder {}: {err}", dir.display())))?;
    std::fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o700))
        .map_err(|err| AppError::Io(format!("restricting user folder {}: {err}", dir.display())))?;

    if nix::unistd::geteuid().is_root() {
        let uid = nix::unistd::Uid::from_raw(identity.as_uid()?);
        nix::unistd::chown(&dir, Some(uid), None)
            .map_err(|err| AppError::Io(format!("chowning user folder {}: {err}", dir.display())))?;
    }

    Ok(dir)
}

/// Create the per-user socket directory.
///
/// Named pipes do not live on the filesystem; the directory only keeps the
/// layout identical across platforms.
///
/// # Errors
///
/// Returns `AppError::Io` if the directory cannot be created.
#[cfg(windows)]
pub fn prepare_socket_dir(users_files_root: &Path, identity: &SessionIdentity) -> Result<PathBuf> {
    let dir = socket_dir_for(users_files_root, identity);
    std::fs::create_dir_all(&dir)
        .map_err(|err| AppError::Io(format!("creating user folder {}: {err}", dir.display())))?;
    Ok(dir)
}
