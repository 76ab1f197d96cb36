//! Identity → helper bookkeeping with a PID-reuse-safe liveness check.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System, UpdateKind};
use tokio_util::sync::CancellationToken;

use crate::ipc::address::IpcAddress;
use crate::models::session::SessionIdentity;

/// One tracked helper.
#[derive(Debug, Clone)]
pub struct ProcessRecord {
    /// User the helper runs for.
    pub identity: SessionIdentity,
    /// OS process id at launch.
    pub pid: u32,
    /// Executable path of `pid` when it was launched.
    pub exe_path: PathBuf,
    /// Where the helper's IPC server listens.
    pub ipc_address: IpcAddress,
    /// Cancelling this makes the exit-watcher kill and reap the helper.
    pub kill: CancellationToken,
}

/// Answers "is this PID still the process we launched?".
pub trait LivenessProbe: Send + Sync {
    /// Current executable path of `pid`, or `None` when no such process
    /// exists or it cannot be inspected.
    fn executable_path(&self, pid: u32) -> Option<PathBuf>;

    /// Whether `record`'s PID is alive and still runs the recorded
    /// executable.
    fn is_alive(&self, record: &ProcessRecord) -> bool {
        self.executable_path(record.pid)
            .is_some_and(|path| same_path(&path, &record.exe_path))
    }
}

fn same_path(current: &Path, recorded: &Path) -> bool {
    if current == recorded {
        return true;
    }
    match (current.canonicalize(), recorded.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// [`LivenessProbe`] reading the OS process table through `sysinfo`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SysinfoProbe;

impl SysinfoProbe {
    /// Create the probe.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl LivenessProbe for SysinfoProbe {
    fn executable_path(&self, pid: u32) -> Option<PathBuf> {
        let pid = Pid::from_u32(pid);
        let mut system = System::new();
        system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[pid]),
            true,
            ProcessRefreshKind::nothing().with_exe(UpdateKind::Always),
        );

        let process = system.process(pid)?;
        // A zombie still has a table entry but is no longer running the helper.
        if matches!(process.status(), sysinfo::ProcessStatus::Zombie | sysinfo::ProcessStatus::Dead) {
            return None;
        }
        process.exe().map(Path::to_path_buf)
    }
}

/// Tracked helpers, keyed by identity.
///
/// Owned by the supervisor loop task; nothing else mutates it.
#[derive(Debug, Default)]
pub struct ProcessRegistry {
    records: BTreeMap<SessionIdentity, ProcessRecord>,
}

impl ProcessRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `identity` has a recorded helper that is still alive.
    #[must_use]
    pub fn has_live_process(&self, identity: &SessionIdentity, probe: &dyn LivenessProbe) -> bool {
        self.records
            .get(identity)
            .is_some_and(|record| probe.is_alive(record))
    }

    /// Track `record`, replacing any previous entry for the same identity.
    ///
    /// The caller stops the previous entry's helper first; the registry only
    /// forgets it.
    pub fn record(&mut self, record: ProcessRecord) {
        self.records.insert(record.identity.clone(), record);
    }

    /// Entry for `identity`, alive or not.
    #[must_use]
    pub fn get(&self, identity: &SessionIdentity) -> Option<&ProcessRecord> {
        self.records.get(identity)
    }

    /// Copy of every entry.
    #[must_use]
    pub fn snapshot(&self) -> Vec<ProcessRecord> {
        self.records.values().cloned().collect()
    }

    /// Drop every entry.
    pub fn clear(&mut self) {
        self.records.clear();
    }

    /// Number of tracked identities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether nothing is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
