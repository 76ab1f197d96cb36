//! Explorer-owner enumeration and the Win32 token helpers shared with the
//! launcher.
#![allow(unsafe_code)]

use std::ffi::c_void;
use std::future::Future;
use std::io;
use std::os::windows::io::{AsRawHandle, FromRawHandle, OwnedHandle};
use std::pin::Pin;
use std::ptr;

use sysinfo::{ProcessRefreshKind, ProcessesToUpdate, System};
use tracing::debug;
use windows_sys::Win32::Foundation::{LocalFree, HLOCAL};
use windows_sys::Win32::Security::Authorization::ConvertSidToStringSidW;
use windows_sys::Win32::Security::{
    GetTokenInformation, TokenUser, TOKEN_ACCESS_MASK, TOKEN_QUERY, TOKEN_USER,
};
use windows_sys::Win32::System::Threading::{
    OpenProcess, OpenProcessToken, PROCESS_ACCESS_RIGHTS, PROCESS_QUERY_LIMITED_INFORMATION,
};

use super::{SessionEnumerator, ENUMERATION_TIMEOUT};
use crate::models::session::SessionIdentity;
use crate::{AppError, Result};

/// Executable name of the interactive shell.
const SHELL_PROCESS: &str = "explorer.exe";

/// Owners of running `explorer.exe` processes, one per SID.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExplorerEnumerator;

impl ExplorerEnumerator {
    /// Create the enumerator.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl SessionEnumerator for ExplorerEnumerator {
    fn list_interactive_sessions(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<SessionIdentity>>> + Send + '_>> {
        Box::pin(async move {
            let task = tokio::task::spawn_blocking(|| {
                let mut identities: Vec<SessionIdentity> = Vec::new();
                for (pid, sid) in shell_owners() {
                    let identity = SessionIdentity::new(sid);
                    if !identities.contains(&identity) {
                        debug!(pid, uid = %identity, "found interactive shell");
                        identities.push(identity);
                    }
                }
                identities
            });

            tokio::time::timeout(ENUMERATION_TIMEOUT, task)
                .await
                .map_err(|_| {
                    AppError::SessionEnumeration(format!(
                        "enumerating {SHELL_PROCESS} owners exceeded {}s",
                        ENUMERATION_TIMEOUT.as_secs()
                    ))
                })?
                .map_err(|err| AppError::SessionEnumeration(format!("enumeration task: {err}")))
        })
    }
}

/// `(pid, owner SID)` of every shell process whose token can be read.
fn shell_owners() -> Vec<(u32, String)> {
    let mut system = System::new();
    system.refresh_processes_specifics(ProcessesToUpdate::All, true, ProcessRefreshKind::nothing());

    system
        .processes()
        .iter()
        .filter(|(_, process)| process.name().eq_ignore_ascii_case(SHELL_PROCESS))
        .filter_map(|(pid, _)| {
            let pid = pid.as_u32();
            match process_owner_sid(pid) {
                Ok(sid) => Some((pid, sid)),
                Err(err) => {
                    debug!(pid, %err, "cannot read shell process owner");
                    None
                }
            }
        })
        .collect()
}

/// PID of a shell process owned by `identity`.
pub(crate) fn shell_process_for(identity: &SessionIdentity) -> Option<u32> {
    shell_owners()
        .into_iter()
        .find(|(_, sid)| sid == identity.as_str())
        .map(|(pid, _)| pid)
}

/// SID string of the user running the current process.
pub(crate) fn current_user_sid() -> io::Result<String> {
    process_owner_sid(std::process::id())
}

fn process_owner_sid(pid: u32) -> io::Result<String> {
    let process = open_process(pid, PROCESS_QUERY_LIMITED_INFORMATION)?;
    let token = open_process_token(&process, TOKEN_QUERY)?;
    token_user_sid(&token)
}

/// Open a process handle with `access` rights.
pub(crate) fn open_process(pid: u32, access: PROCESS_ACCESS_RIGHTS) -> io::Result<OwnedHandle> {
    // SAFETY: plain FFI call; a null return is checked before wrapping.
    let handle = unsafe { OpenProcess(access, 0, pid) };
    if handle.is_null() {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: `handle` is a fresh, owned, non-null process handle.
    Ok(unsafe { OwnedHandle::from_raw_handle(handle) })
}

/// Open the access token of `process`.
pub(crate) fn open_process_token(
    process: &OwnedHandle,
    access: TOKEN_ACCESS_MASK,
) -> io::Result<OwnedHandle> {
    let mut token = ptr::null_mut();
    // SAFETY: `process` is a valid handle and `token` is a valid out pointer.
    let ok = unsafe { OpenProcessToken(process.as_raw_handle(), access, &mut token) };
    if ok == 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: `token` is a fresh, owned token handle.
    Ok(unsafe { OwnedHandle::from_raw_handle(token) })
}

fn token_user_sid(token: &OwnedHandle) -> io::Result<String> {
    let mut len: u32 = 0;
    // SAFETY: size query with a null buffer; only `len` is written.
    unsafe {
        GetTokenInformation(token.as_raw_handle(), TokenUser, ptr::null_mut(), 0, &mut len);
    }
    if len == 0 {
        return Err(io::Error::last_os_error());
    }

    let mut buf: Vec<u8> = vec![0_u8; len as usize];
    // SAFETY: `buf` holds `len` writable bytes.
    let ok = unsafe {
        GetTokenInformation(
            token.as_raw_handle(),
            TokenUser,
            buf.as_mut_ptr().cast::<c_void>(),
            len,
            &mut len,
        )
    };
    if ok == 0 {
        return Err(io::Error::last_os_error());
    }

    // SAFETY: on success the buffer starts with a TOKEN_USER whose SID points
    // into the same buffer; read_unaligned avoids alignment assumptions.
    let token_user = unsafe { ptr::read_unaligned(buf.as_ptr().cast::<TOKEN_USER>()) };

    let mut wide: *mut u16 = ptr::null_mut();
    // SAFETY: the SID is valid while `buf` lives; `wide` is an out pointer.
    let ok = unsafe { ConvertSidToStringSidW(token_user.User.Sid, &mut wide) };
    if ok == 0 || wide.is_null() {
        return Err(io::Error::last_os_error());
    }

    // SAFETY: `wide` is a NUL-terminated UTF-16 string allocated by the system.
    let sid = unsafe {
        let mut len = 0;
        while *wide.add(len) != 0 {
            len += 1;
        }
        let sid = String::from_utf16_lossy(std::slice::from_raw_parts(wide, len));
        LocalFree(wide as HLOCAL);
        sid
    };

    Ok(sid)
}
