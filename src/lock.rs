//! Reconciles pacman's lock file with the pid of the last launch.
//!
//! pacman refuses to run while `db.lck` exists. A lock left behind by a
//! crashed run has to be removed before anything else can happen, but a lock
//! owned by a live run must never be touched: deleting it lets two
//! transactions write the package database at once.

use crate::{
    error::{RelayError, RelayResult},
    utils::ensure_directory,
};
use log::{debug, info, warn};
use std::fs::File;
use std::io;
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    Absent,
    HeldByLiveProcess(u32),
    HeldByDeadProcess(u32),
    HeldWithUnknownOwner,
}

impl LockState {
    pub fn classify(
        lock_present: bool,
        recorded_pid: Option<u32>,
        processes: &dyn ProcessTable,
    ) -> Self {
        if !lock_present {
            return LockState::Absent;
        }
        match recorded_pid {
            None => LockState::HeldWithUnknownOwner,
            Some(pid) if processes.is_alive(pid) => LockState::HeldByLiveProcess(pid),
            Some(pid) => LockState::HeldByDeadProcess(pid),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockDecision {
    Proceed,
    Abort(String),
}

pub trait LockHandle {
    fn is_held(&self) -> bool;
    fn release(&self) -> io::Result<()>;
}

pub trait ProcessTable {
    fn is_alive(&self, pid: u32) -> bool;
}

/// pacman's own lock file.
#[derive(Debug, Clone)]
pub struct LockFile {
    path: PathBuf,
}

impl LockFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl LockHandle for LockFile {
    fn is_held(&self) -> bool {
        self.path.exists()
    }

    fn release(&self) -> io::Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            // someone else already cleaned it up
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemProcesses;

impl ProcessTable for SystemProcesses {
    fn is_alive(&self, pid: u32) -> bool {
        let Ok(pid) = libc::pid_t::try_from(pid) else {
            return false;
        };
        if pid <= 0 {
            return false;
        }
        // SAFETY: signal 0 only checks for existence.
        let rc = unsafe { libc::kill(pid, 0) };
        if rc == 0 {
            return true;
        }
        // EPERM: exists but belongs to someone else
        io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
    }
}

/// Exclusive `flock` on a file next to the run record, held for a whole
/// launch. Unlike pacman's `db.lck` it exists before the child does and is
/// dropped by the kernel if its holder dies.
#[derive(Debug)]
pub struct RunGuard {
    _file: File,
}

impl RunGuard {
    pub fn try_acquire(path: &Path) -> RelayResult<Self> {
        if let Some(parent) = path.parent() {
            ensure_directory(parent)?;
        }
        let file = File::options()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)?;

        // SAFETY: the descriptor is owned by `file` and stays open.
        let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        if rc != 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EWOULDBLOCK) {
                return Err(RelayError::LockBusy(format!(
                    "another pacrelay run holds {}",
                    path.display()
                )));
            }
            return Err(err.into());
        }
        debug!("Acquired run guard {:?}", path);
        Ok(Self { _file: file })
    }
}

/// Decides whether a new package-manager run may start.
///
/// Stale locks (no recorded owner, or a dead one) are deleted and the run may
/// proceed. A lock whose recorded owner is alive yields
/// [`LockDecision::Abort`] and is left exactly as found.
pub fn reconcile(
    lock: &dyn LockHandle,
    recorded_pid: Option<u32>,
    processes: &dyn ProcessTable,
) -> RelayResult<LockDecision> {
    let state = LockState::classify(lock.is_held(), recorded_pid, processes);
    debug!("Lock state: {:?}", state);

    match state {
        LockState::Absent => Ok(LockDecision::Proceed),
        LockState::HeldWithUnknownOwner => {
            info!("Removing orphaned package manager lock with no recorded owner");
            lock.release()?;
            Ok(LockDecision::Proceed)
        }
        LockState::HeldByDeadProcess(pid) => {
            info!("Removing stale package manager lock left by dead pid {}", pid);
            lock.release()?;
            Ok(LockDecision::Proceed)
        }
        LockState::HeldByLiveProcess(pid) => {
            warn!("Package manager lock held by live pid {}", pid);
            Ok(LockDecision::Abort(format!(
                "package manager busy (pid {} holds the lock), operator intervention required",
                pid
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::collections::HashSet;

    struct FakeLock {
        held: Cell<bool>,
        releases: Cell<usize>,
    }

    impl FakeLock {
        fn new(held: bool) -> Self {
            Self {
                held: Cell::new(held),
                releases: Cell::new(0),
            }
        }
    }

    impl LockHandle for FakeLock {
        fn is_held(&self) -> bool {
            self.held.get()
        }

        fn release(&self) -> io::Result<()> {
            self.releases.set(self.releases.get() + 1);
            self.held.set(false);
            Ok(())
        }
    }

    struct FakeProcesses(HashSet<u32>);

    impl ProcessTable for FakeProcesses {
        fn is_alive(&self, pid: u32) -> bool {
            self.0.contains(&pid)
        }
    }

    fn alive(pids: &[u32]) -> FakeProcesses {
        FakeProcesses(pids.iter().copied().collect())
    }

    #[test]
    fn test_absent_lock_proceeds_untouched() {
        let lock = FakeLock::new(false);
        let decision = reconcile(&lock, Some(7), &alive(&[7])).unwrap();
        assert_eq!(decision, LockDecision::Proceed);
        assert_eq!(lock.releases.get(), 0);
    }

    #[test]
    fn test_unknown_owner_lock_is_removed() {
        let lock = FakeLock::new(true);
        let decision = reconcile(&lock, None, &alive(&[])).unwrap();
        assert_eq!(decision, LockDecision::Proceed);
        assert!(!lock.is_held());
    }

    #[test]
    fn test_dead_owner_lock_is_removed() {
        let lock = FakeLock::new(true);
        let decision = reconcile(&lock, Some(300), &alive(&[1, 2])).unwrap();
        assert_eq!(decision, LockDecision::Proceed);
        assert!(!lock.is_held());
        assert_eq!(lock.releases.get(), 1);
    }

    #[test]
    fn test_live_owner_aborts_without_deleting() {
        let lock = FakeLock::new(true);
        let decision = reconcile(&lock, Some(300), &alive(&[300])).unwrap();
        match decision {
            LockDecision::Abort(reason) => assert!(reason.contains("300")),
            other => panic!("expected abort, got {:?}", other),
        }
        assert!(lock.is_held());
        assert_eq!(lock.releases.get(), 0);
    }

    #[test]
    fn test_no_abort_path_ever_deletes() {
        for held in [false, true] {
            for pid in [None, Some(10), Some(11)] {
                let lock = FakeLock::new(held);
                let decision = reconcile(&lock, pid, &alive(&[10])).unwrap();
                if matches!(decision, LockDecision::Abort(_)) {
                    assert_eq!(lock.releases.get(), 0);
                    assert!(lock.is_held());
                }
            }
        }
    }

    #[test]
    fn test_classify() {
        let procs = alive(&[5]);
        assert_eq!(LockState::classify(false, Some(5), &procs), LockState::Absent);
        assert_eq!(
            LockState::classify(true, None, &procs),
            LockState::HeldWithUnknownOwner
        );
        assert_eq!(
            LockState::classify(true, Some(5), &procs),
            LockState::HeldByLiveProcess(5)
        );
        assert_eq!(
            LockState::classify(true, Some(6), &procs),
            LockState::HeldByDeadProcess(6)
        );
    }

    #[test]
    fn test_lock_file_on_disk_with_dead_pid() {
        let dir = tempfile::tempdir().unwrap();
        let lock = LockFile::new(dir.path().join("db.lck"));
        std::fs::write(lock.path(), "").unwrap();

        let decision = reconcile(&lock, Some(999_999), &alive(&[])).unwrap();
        assert_eq!(decision, LockDecision::Proceed);
        assert!(!lock.path().exists());
    }

    #[test]
    fn test_release_missing_lock_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let lock = LockFile::new(dir.path().join("db.lck"));
        assert!(lock.release().is_ok());
    }

    #[test]
    fn test_run_guard_is_exclusive_until_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("pacman.run");

        let first = RunGuard::try_acquire(&path).unwrap();
        let err = RunGuard::try_acquire(&path).unwrap_err();
        assert!(err.is_lock_error());

        drop(first);
        assert!(RunGuard::try_acquire(&path).is_ok());
    }

    #[test]
    fn test_system_processes_sees_self() {
        let table = SystemProcesses;
        assert!(table.is_alive(std::process::id()));
        assert!(!table.is_alive(0));
    }
}
