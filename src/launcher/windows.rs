//! Token-impersonating launcher for Windows services.
//!
//! A service cannot switch users the Unix way. Instead it borrows the primary
//! token of the target user's `explorer.exe`, builds that user's environment
//! block, and calls `CreateProcessAsUserW` on the interactive desktop.
#![allow(unsafe_code)]

use std::collections::BTreeMap;
use std::ffi::c_void;
use std::future::Future;
use std::io;
use std::os::windows::io::{AsRawHandle, FromRawHandle, OwnedHandle};
use std::pin::Pin;
use std::process::Stdio;
use std::ptr;
use std::sync::Arc;

use tokio::process::Command;
use tracing::info;
use windows_sys::Win32::Foundation::{CloseHandle, WAIT_OBJECT_0};
use windows_sys::Win32::Security::{
    DuplicateTokenEx, SecurityImpersonation, TokenPrimary, TOKEN_ALL_ACCESS, TOKEN_ASSIGN_PRIMARY,
    TOKEN_DUPLICATE, TOKEN_QUERY,
};
use windows_sys::Win32::System::Environment::{CreateEnvironmentBlock, DestroyEnvironmentBlock};
use windows_sys::Win32::System::Threading::{
    CreateProcessAsUserW, GetExitCodeProcess, TerminateProcess, WaitForSingleObject,
    CREATE_NO_WINDOW, CREATE_UNICODE_ENVIRONMENT, INFINITE, PROCESS_INFORMATION,
    PROCESS_QUERY_INFORMATION, STARTUPINFOW,
};

use super::{forward_output, ChildProcess, LaunchSpec, ProcessLauncher, TokioChild, ALLOWED_ENV_VARS};
use crate::models::exit::ExitOutcome;
use crate::models::session::SessionIdentity;
use crate::session::windows::{current_user_sid, open_process, open_process_token, shell_process_for};
use crate::{AppError, Result};

/// Profile variables inherited when launching for oneself.
const PROFILE_ENV_VARS: &[&str] = &["USERPROFILE", "USERNAME", "APPDATA", "LOCALAPPDATA", "HOMEDRIVE", "HOMEPATH"];

/// Interactive window station and desktop.
const INTERACTIVE_DESKTOP: &str = "winsta0\\default";

/// Exit code used for forced termination.
const KILLED_EXIT_CODE: u32 = 1;

/// Launches helpers under the target user's shell token.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenLauncher;

impl TokenLauncher {
    /// Create the launcher.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl ProcessLauncher for TokenLauncher {
    fn launch<'a>(
        &'a self,
        identity: &'a SessionIdentity,
        spec: &'a LaunchSpec,
    ) -> Pin<Box<dyn Future<Output = Result<Box<dyn ChildProcess>>> + Send + 'a>> {
        Box::pin(async move {
            let same_user = current_user_sid().is_ok_and(|sid| sid == identity.as_str());
            if same_user {
                return spawn_direct(identity, spec);
            }

            let identity_owned = identity.clone();
            let spec_owned = spec.clone();
            let child = tokio::task::spawn_blocking(move || create_as_user(&identity_owned, &spec_owned))
                .await
                .map_err(|err| AppError::Launch(format!("launch task: {err}")))??;

            info!(uid = %identity, pid = child.pid, "helper process started");
            Ok(Box::new(child) as Box<dyn ChildProcess>)
        })
    }
}

fn spawn_direct(identity: &SessionIdentity, spec: &LaunchSpec) -> Result<Box<dyn ChildProcess>> {
    let mut cmd = Command::new(&spec.executable);
    cmd.args(&spec.args).env_clear();
    for &key in ALLOWED_ENV_VARS.iter().chain(PROFILE_ENV_VARS) {
        if let Ok(val) = std::env::var(key) {
            cmd.env(key, val);
        }
    }
    cmd.envs(&spec.env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd
        .spawn()
        .map_err(|err| AppError::Launch(format!("starting helper for {identity}: {err}")))?;
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let child = TokioChild::new(child)?;
    let pid = child.id();

    if let Some(stdout) = stdout {
        forward_output(stdout, identity.to_string(), pid, "stdout");
    }
    if let Some(stderr) = stderr {
        forward_output(stderr, identity.to_string(), pid, "stderr");
    }

    info!(uid = %identity, pid, "helper process started");
    Ok(Box::new(child))
}

fn create_as_user(identity: &SessionIdentity, spec: &LaunchSpec) -> Result<WindowsChild> {
    let shell_pid = shell_process_for(identity)
        .ok_or_else(|| AppError::Launch(format!("no interactive shell process for {identity}")))?;

    let shell = open_process(shell_pid, PROCESS_QUERY_INFORMATION)
        .map_err(|err| AppError::Launch(format!("opening shell process {shell_pid}: {err}")))?;
    let shell_token = open_process_token(&shell, TOKEN_DUPLICATE | TOKEN_QUERY | TOKEN_ASSIGN_PRIMARY)
        .map_err(|err| AppError::Launch(format!("opening token of {identity}: {err}")))?;
    let token = duplicate_primary(&shell_token)
        .map_err(|err| AppError::Launch(format!("duplicating token of {identity}: {err}")))?;

    let mut env = user_environment(&token)
        .map_err(|err| AppError::Launch(format!("building environment of {identity}: {err}")))?;
    env.extend(spec.env.clone());
    let mut env_block = encode_environment(&env);

    let mut command_line = to_wide(&command_line(spec));
    let mut desktop = to_wide(INTERACTIVE_DESKTOP);

    // SAFETY: STARTUPINFOW and PROCESS_INFORMATION are plain C structs for
    // which all-zero is a valid initial state.
    let mut startup: STARTUPINFOW = unsafe { std::mem::zeroed() };
    startup.cb = u32::try_from(std::mem::size_of::<STARTUPINFOW>()).unwrap_or(u32::MAX);
    startup.lpDesktop = desktop.as_mut_ptr();
    let mut info: PROCESS_INFORMATION = unsafe { std::mem::zeroed() };

    // SAFETY: every pointer refers to a live, NUL-terminated buffer owned by
    // this frame; `info` receives owned handles on success.
    let ok = unsafe {
        CreateProcessAsUserW(
            token.as_raw_handle(),
            ptr::null(),
            command_line.as_mut_ptr(),
            ptr::null(),
            ptr::null(),
            0,
            CREATE_UNICODE_ENVIRONMENT | CREATE_NO_WINDOW,
            env_block.as_mut_ptr().cast::<c_void>(),
            ptr::null(),
            &startup,
            &mut info,
        )
    };
    if ok == 0 {
        return Err(AppError::Launch(format!(
            "starting helper for {identity}: {}",
            io::Error::last_os_error()
        )));
    }

    // SAFETY: the thread handle is owned by us and not used further.
    unsafe {
        CloseHandle(info.hThread);
    }
    // SAFETY: the process handle is fresh and owned by us.
    let process = unsafe { OwnedHandle::from_raw_handle(info.hProcess) };

    Ok(WindowsChild {
        pid: info.dwProcessId,
        process: Arc::new(process),
    })
}

fn duplicate_primary(token: &OwnedHandle) -> io::Result<OwnedHandle> {
    let mut duplicate = ptr::null_mut();
    // SAFETY: `token` is valid and `duplicate` is an out pointer.
    let ok = unsafe {
        DuplicateTokenEx(
            token.as_raw_handle(),
            TOKEN_ALL_ACCESS,
            ptr::null(),
            SecurityImpersonation,
            TokenPrimary,
            &mut duplicate,
        )
    };
    if ok == 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: `duplicate` is a fresh, owned token handle.
    Ok(unsafe { OwnedHandle::from_raw_handle(duplicate) })
}

/// The user's default environment, as the shell would see it.
fn user_environment(token: &OwnedHandle) -> io::Result<BTreeMap<String, String>> {
    let mut block: *mut c_void = ptr::null_mut();
    // SAFETY: `token` is a valid primary token and `block` is an out pointer.
    let ok = unsafe { CreateEnvironmentBlock(&mut block, token.as_raw_handle(), 0) };
    if ok == 0 || block.is_null() {
        return Err(io::Error::last_os_error());
    }

    let mut env = BTreeMap::new();
    // SAFETY: the block is a sequence of NUL-terminated UTF-16 strings ended
    // by an empty string, valid until destroyed below.
    unsafe {
        let mut cursor = block.cast::<u16>().cast_const();
        loop {
            let mut len = 0;
            while *cursor.add(len) != 0 {
                len += 1;
            }
            if len == 0 {
                break;
            }
            let entry = String::from_utf16_lossy(std::slice::from_raw_parts(cursor, len));
            // Entries like "=C:=C:\" carry per-drive state; skip them.
            if let Some((key, value)) = entry.split_once('=').filter(|(key, _)| !key.is_empty()) {
                env.insert(key.to_owned(), value.to_owned());
            }
            cursor = cursor.add(len + 1);
        }
        DestroyEnvironmentBlock(block);
    }

    Ok(env)
}

/// Encode `KEY=VALUE` pairs as a double-NUL-terminated UTF-16 block.
fn encode_environment(env: &BTreeMap<String, String>) -> Vec<u16> {
    let mut block: Vec<u16> = Vec::new();
    for (key, value) in env {
        block.extend(format!("{key}={value}").encode_utf16());
        block.push(0);
    }
    block.push(0);
    block
}

fn command_line(spec: &LaunchSpec) -> String {
    std::iter::once(spec.executable.display().to_string())
        .chain(spec.args.iter().cloned())
        .map(|part| format!("\"{}\"", part.replace('"', "\\\"")))
        .collect::<Vec<_>>()
        .join(" ")
}

fn to_wide(value: &str) -> Vec<u16> {
    value.encode_utf16().chain(std::iter::once(0)).collect()
}

/// A process created with `CreateProcessAsUserW`.
#[derive(Debug, Clone)]
struct WindowsChild {
    pid: u32,
    process: Arc<OwnedHandle>,
}

impl ChildProcess for WindowsChild {
    fn id(&self) -> u32 {
        self.pid
    }

    fn wait(&mut self) -> Pin<Box<dyn Future<Output = Result<ExitOutcome>> + Send + '_>> {
        let process = Arc::clone(&self.process);
        let pid = self.pid;
        Box::pin(async move {
            tokio::task::spawn_blocking(move || {
                // SAFETY: `process` stays open for the duration of the call.
                let waited = unsafe { WaitForSingleObject(process.as_raw_handle(), INFINITE) };
                if waited != WAIT_OBJECT_0 {
                    return Err(AppError::Io(format!(
                        "waiting for pid {pid}: {}",
                        io::Error::last_os_error()
                    )));
                }

                let mut code: u32 = 0;
                // SAFETY: `process` is valid and `code` is an out pointer.
                let ok = unsafe { GetExitCodeProcess(process.as_raw_handle(), &mut code) };
                if ok == 0 {
                    return Err(AppError::Io(format!(
                        "reading exit code of pid {pid}: {}",
                        io::Error::last_os_error()
                    )));
                }

                Ok(ExitOutcome {
                    code: Some(i32::from_ne_bytes(code.to_ne_bytes())),
                })
            })
            .await
            .map_err(|err| AppError::Io(format!("wait task for pid {pid}: {err}")))?
        })
    }

    fn start_kill(&mut self) -> Result<()> {
        // SAFETY: `process` is a valid process handle with terminate rights.
        let ok = unsafe { TerminateProcess(self.process.as_raw_handle(), KILLED_EXIT_CODE) };
        if ok == 0 {
            return Err(AppError::Io(format!(
                "killing pid {}: {}",
                self.pid,
                io::Error::last_os_error()
            )));
        }
        Ok(())
    }
}
