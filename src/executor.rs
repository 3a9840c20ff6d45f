use crate::{
    config::Config,
    error::{RelayError, RelayResult},
    lock::{reconcile, LockDecision, LockFile, ProcessTable, RunGuard, SystemProcesses},
    run_record::{RunRecord, RunRecordStore},
    utils::{format_duration, validate_package_name},
};
use chrono::Utc;
use log::{debug, error, info, warn};
use std::os::unix::process::ExitStatusExt;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Instant;
use tokio::process::Command;

/// Recorded when the binary could not be started at all.
pub const SPAWN_FAILURE_CODE: i32 = 127;
/// Recorded when the child was lost before its status could be collected.
pub const LOST_CHILD_CODE: i32 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacmanAction {
    SyncDatabase,
    PlanUpgrade,
    PlanPackage,
    ApplyUpgrade,
    InstallPackage,
}

impl PacmanAction {
    pub fn flag(&self) -> &'static str {
        match self {
            PacmanAction::SyncDatabase => "-Sy",
            PacmanAction::PlanUpgrade => "-Sup",
            PacmanAction::PlanPackage => "-Sp",
            PacmanAction::ApplyUpgrade => "-Su",
            PacmanAction::InstallPackage => "-S",
        }
    }

    pub fn requires_target(&self) -> bool {
        matches!(self, PacmanAction::PlanPackage | PacmanAction::InstallPackage)
    }
}

/// Runs pacman one invocation at a time, mirroring everything into the
/// durable run record.
pub struct CommandExecutor {
    binary: PathBuf,
    confirm_flag: String,
    store: RunRecordStore,
    lock: LockFile,
    processes: Box<dyn ProcessTable + Send + Sync>,
}

impl CommandExecutor {
    pub fn new(config: &Config) -> Self {
        Self {
            binary: config.pacman_command.clone(),
            confirm_flag: config.confirm_flag.clone(),
            store: RunRecordStore::new(&config.state_dir),
            lock: LockFile::new(&config.lock_file),
            processes: Box::new(SystemProcesses),
        }
    }

    pub fn with_process_table(mut self, processes: Box<dyn ProcessTable + Send + Sync>) -> Self {
        self.processes = processes;
        self
    }

    pub fn store(&self) -> &RunRecordStore {
        &self.store
    }

    pub fn lock(&self) -> &LockFile {
        &self.lock
    }

    pub fn command_line(&self, action: PacmanAction, target: Option<&str>) -> Vec<String> {
        let mut command = vec![
            self.binary.to_string_lossy().into_owned(),
            self.confirm_flag.clone(),
            action.flag().to_string(),
        ];
        if let Some(target) = target {
            command.push(target.to_string());
        }
        command
    }

    /// Launches pacman and waits for it to exit.
    ///
    /// Fails with [`RelayError::LockBusy`] before touching anything when a
    /// live process owns the lock or another launch holds the run guard. A
    /// completed run is returned as `Ok` even when pacman reported an error;
    /// callers check [`RunRecord::succeeded`]. Errors once the child exists
    /// come back as [`RelayError::Unrecorded`].
    pub async fn execute(
        &self,
        action: PacmanAction,
        target: Option<&str>,
    ) -> RelayResult<RunRecord> {
        match target {
            Some(target) => validate_package_name(target)?,
            None if action.requires_target() => {
                return Err(RelayError::InvalidPackageName(format!(
                    "{} requires a package name",
                    action.flag()
                )));
            }
            None => {}
        }

        let _guard = RunGuard::try_acquire(self.store.guard_path())?;
        let recorded_pid = self.store.recorded_pid();
        if let LockDecision::Abort(reason) =
            reconcile(&self.lock, recorded_pid, self.processes.as_ref())?
        {
            return Err(RelayError::LockBusy(reason));
        }

        let command = self.command_line(action, target);
        let command_text = command.join(" ");
        let sinks = self.store.begin(&command)?;

        info!("Running {}", command_text);
        let started = Instant::now();
        let spawned = Command::new(&self.binary)
            .args(&command[1..])
            .stdin(Stdio::null())
            .stdout(Stdio::from(sinks.stdout))
            .stderr(Stdio::from(sinks.stderr))
            .spawn();

        let mut child = match spawned {
            Ok(child) => child,
            Err(e) => {
                let reason = e.to_string();
                error!("Failed to launch {}: {}", command_text, reason);
                self.store.record_stderr(&reason)?;
                self.store.record_result(SPAWN_FAILURE_CODE)?;
                return Err(RelayError::SpawnFailure {
                    command: command_text,
                    reason,
                });
            }
        };

        let pid = child.id();
        match pid {
            Some(pid) => {
                if let Err(e) = self.store.record_pid(pid) {
                    warn!("Could not record pid {}: {}", pid, e);
                }
                debug!("{} running as pid {}", action.flag(), pid);
            }
            None => warn!("Child exited before its pid could be recorded"),
        }

        let exit_code = match child.wait().await {
            Ok(status) => status
                .code()
                .or_else(|| status.signal().map(|signal| 128 + signal))
                .unwrap_or(LOST_CHILD_CODE),
            Err(e) => {
                error!("Lost track of {}: {}", command_text, e);
                if let Err(record_err) = self.store.record_result(LOST_CHILD_CODE) {
                    warn!("Could not record result: {}", record_err);
                }
                return Err(RelayError::Unrecorded {
                    exit_code: None,
                    reason: e.to_string(),
                });
            }
        };

        let elapsed = format_duration(started.elapsed().as_secs());
        if exit_code == 0 {
            info!("{} finished in {}", action.flag(), elapsed);
        } else {
            warn!("{} exited with code {} after {}", action.flag(), exit_code, elapsed);
        }

        self.complete(command, pid, exit_code).map_err(|e| {
            error!("{} ran but its record is incomplete: {}", action.flag(), e);
            RelayError::Unrecorded {
                exit_code: Some(exit_code),
                reason: e.to_string(),
            }
        })
    }

    fn complete(&self, command: Vec<String>, pid: Option<u32>, exit_code: i32) -> RelayResult<RunRecord> {
        self.store.record_result(exit_code)?;
        Ok(RunRecord {
            command,
            stdout: self.store.read_stdout()?,
            stderr: self.store.read_stderr()?,
            pid,
            exit_code: Some(exit_code),
            finished_at: Some(Utc::now()),
        })
    }
}
