use crate::{
    error::{RelayError, RelayResult},
    utils::{ensure_directory, read_to_string_or_empty},
};
use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::{Path, PathBuf};

pub const SUCCESS_CODE: i32 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunResult {
    Unset,
    Success,
    Failure,
}

impl RunResult {
    pub fn from_exit_code(code: Option<i32>) -> Self {
        match code {
            None => RunResult::Unset,
            Some(SUCCESS_CODE) => RunResult::Success,
            Some(_) => RunResult::Failure,
        }
    }
}

/// The most recent package-manager run. Every invocation overwrites it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRecord {
    pub command: Vec<String>,
    pub stdout: String,
    pub stderr: String,
    pub pid: Option<u32>,
    pub exit_code: Option<i32>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl RunRecord {
    pub fn result(&self) -> RunResult {
        RunResult::from_exit_code(self.exit_code)
    }

    pub fn succeeded(&self) -> bool {
        self.result() == RunResult::Success
    }

    /// A pid is on record but no result yet.
    pub fn in_flight(&self) -> bool {
        self.pid.is_some() && self.exit_code.is_none()
    }
}

/// Output files handed to the child process.
#[derive(Debug)]
pub struct CaptureSinks {
    pub stdout: File,
    pub stderr: File,
}

/// On-disk slots backing the [`RunRecord`] across restarts.
#[derive(Debug, Clone)]
pub struct RunRecordStore {
    state_dir: PathBuf,
    command_path: PathBuf,
    stdout_path: PathBuf,
    stderr_path: PathBuf,
    pid_path: PathBuf,
    result_path: PathBuf,
    guard_path: PathBuf,
}

impl RunRecordStore {
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        let state_dir = state_dir.into();
        Self {
            command_path: state_dir.join("pacman.cmd"),
            stdout_path: state_dir.join("pacman.out"),
            stderr_path: state_dir.join("pacman.err"),
            pid_path: state_dir.join("pacman.pid"),
            result_path: state_dir.join("pacman.res"),
            guard_path: state_dir.join("pacman.run"),
            state_dir,
        }
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    /// File locked for the duration of a launch, see [`RunGuard`](crate::lock::RunGuard).
    pub fn guard_path(&self) -> &Path {
        &self.guard_path
    }

    /// Truncates every slot and records the command about to run.
    /// The result slot stays empty until [`record_result`](Self::record_result).
    pub fn begin(&self, command: &[String]) -> RelayResult<CaptureSinks> {
        ensure_directory(&self.state_dir)?;
        std::fs::write(&self.command_path, command.join(" "))?;
        File::create(&self.pid_path)?;
        File::create(&self.result_path)?;
        let sinks = CaptureSinks {
            stdout: File::create(&self.stdout_path)?,
            stderr: File::create(&self.stderr_path)?,
        };
        debug!("Run record reset in {:?}", self.state_dir);
        Ok(sinks)
    }

    pub fn record_pid(&self, pid: u32) -> RelayResult<()> {
        std::fs::write(&self.pid_path, pid.to_string())?;
        Ok(())
    }

    pub fn record_stderr(&self, text: &str) -> RelayResult<()> {
        std::fs::write(&self.stderr_path, text)?;
        Ok(())
    }

    pub fn record_result(&self, code: i32) -> RelayResult<()> {
        std::fs::write(&self.result_path, code.to_string())?;
        Ok(())
    }

    /// The pid of the last launch. Missing, empty and garbage records all
    /// read as `None`, which the lock reconciler treats as an unknown owner.
    pub fn recorded_pid(&self) -> Option<u32> {
        let text = match read_to_string_or_empty(&self.pid_path) {
            Ok(text) => text,
            Err(e) => {
                warn!("Cannot read pid record {:?}: {}", self.pid_path, e);
                return None;
            }
        };
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return None;
        }
        match trimmed.parse::<u32>() {
            Ok(pid) if pid > 0 => Some(pid),
            _ => {
                warn!("Ignoring malformed pid record: {:?}", trimmed);
                None
            }
        }
    }

    pub fn recorded_exit_code(&self) -> RelayResult<i32> {
        let text = read_to_string_or_empty(&self.result_path)?;
        text.trim()
            .parse::<i32>()
            .map_err(|_| RelayError::EmptyResultRecord)
    }

    pub fn read_stdout(&self) -> RelayResult<String> {
        read_to_string_or_empty(&self.stdout_path)
    }

    pub fn read_stderr(&self) -> RelayResult<String> {
        read_to_string_or_empty(&self.stderr_path)
    }

    /// Reassembles the last run from disk.
    pub fn load(&self) -> RelayResult<RunRecord> {
        let command = read_to_string_or_empty(&self.command_path)?
            .split_whitespace()
            .map(str::to_string)
            .collect();
        let exit_code = self.recorded_exit_code().ok();
        let finished_at = match exit_code {
            Some(_) => std::fs::metadata(&self.result_path)
                .and_then(|meta| meta.modified())
                .ok()
                .map(DateTime::<Utc>::from),
            None => None,
        };

        Ok(RunRecord {
            command,
            stdout: self.read_stdout()?,
            stderr: self.read_stderr()?,
            pid: self.recorded_pid(),
            exit_code,
            finished_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn command(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_fresh_store_is_unset() {
        let dir = tempfile::tempdir().unwrap();
        let store = RunRecordStore::new(dir.path());
        let record = store.load().unwrap();
        assert_eq!(record.result(), RunResult::Unset);
        assert_eq!(record.pid, None);
        assert!(record.command.is_empty());
        assert!(matches!(
            store.recorded_exit_code(),
            Err(RelayError::EmptyResultRecord)
        ));
    }

    #[test]
    fn test_begin_overwrites_previous_run() {
        let dir = tempfile::tempdir().unwrap();
        let store = RunRecordStore::new(dir.path());

        let mut sinks = store
            .begin(&command(&["/usr/bin/pacman", "--noconfirm", "-Sy"]))
            .unwrap();
        sinks.stdout.write_all(b"first run output").unwrap();
        store.record_pid(100).unwrap();
        store.record_result(1).unwrap();

        let mut sinks = store
            .begin(&command(&["/usr/bin/pacman", "--noconfirm", "-Su"]))
            .unwrap();
        sinks.stdout.write_all(b"second").unwrap();
        drop(sinks);

        let record = store.load().unwrap();
        assert_eq!(record.stdout, "second");
        assert_eq!(record.command, command(&["/usr/bin/pacman", "--noconfirm", "-Su"]));
        assert_eq!(record.pid, None);
        assert_eq!(record.result(), RunResult::Unset);
    }

    #[test]
    fn test_in_flight_until_result_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let store = RunRecordStore::new(dir.path());
        store.begin(&command(&["pacman", "-S", "mod-host"])).unwrap();
        store.record_pid(4242).unwrap();

        let record = store.load().unwrap();
        assert!(record.in_flight());
        assert_eq!(record.pid, Some(4242));
        assert!(record.finished_at.is_none());

        store.record_result(0).unwrap();
        let record = store.load().unwrap();
        assert!(!record.in_flight());
        assert!(record.succeeded());
        assert!(record.finished_at.is_some());
    }

    #[test]
    fn test_malformed_pid_reads_as_unknown() {
        let dir = tempfile::tempdir().unwrap();
        let store = RunRecordStore::new(dir.path());
        std::fs::write(dir.path().join("pacman.pid"), "not-a-pid\n").unwrap();
        assert_eq!(store.recorded_pid(), None);

        std::fs::write(dir.path().join("pacman.pid"), " 317\n").unwrap();
        assert_eq!(store.recorded_pid(), Some(317));
    }

    #[test]
    fn test_result_from_exit_code() {
        assert_eq!(RunResult::from_exit_code(None), RunResult::Unset);
        assert_eq!(RunResult::from_exit_code(Some(0)), RunResult::Success);
        assert_eq!(RunResult::from_exit_code(Some(1)), RunResult::Failure);
        assert_eq!(RunResult::from_exit_code(Some(-1)), RunResult::Failure);
    }
}
