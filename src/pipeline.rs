//! Entry points the front-end calls, one per update step.
//!
//! Every step runs behind a single in-process gate and, below it, the pacman
//! lock reconciliation. No update step returns an error: each yields an
//! [`OperationReport`] whose value is what the caller shows (a boolean or a
//! package list) and whose `failure` explains a negative answer.

use crate::{
    cache::RepositoryCache,
    config::Config,
    error::{RelayError, RelayResult},
    executor::{CommandExecutor, PacmanAction},
    interpreter::{parse_fetch_list, PackageRef},
    run_record::{RunRecord, RunRecordStore},
    service::RestartRequest,
};
use log::{error, info, warn};
use std::path::Path;
use tokio::sync::Mutex;

#[derive(Debug)]
pub struct OperationReport<T> {
    pub value: T,
    pub failure: Option<RelayError>,
    pub restart: Option<RestartRequest>,
}

impl<T> OperationReport<T> {
    fn ok(value: T) -> Self {
        Self {
            value,
            failure: None,
            restart: None,
        }
    }

    fn failed(value: T, failure: RelayError) -> Self {
        Self {
            value,
            failure: Some(failure),
            restart: None,
        }
    }

    fn from_result(value: T, result: RelayResult<()>) -> Self {
        match result {
            Ok(()) => Self::ok(value),
            Err(e) => Self::failed(value, e),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.failure.is_none()
    }

    /// Captured stderr of the failed run, for logs rather than end users.
    pub fn diagnostics(&self) -> Option<&str> {
        self.failure.as_ref().and_then(RelayError::diagnostics)
    }
}

/// Only stdout of a successful run is meaningful.
pub fn interpret(record: &RunRecord) -> RelayResult<Vec<PackageRef>> {
    if !record.succeeded() {
        return Err(RelayError::ParseSkipped);
    }
    Ok(parse_fetch_list(&record.stdout))
}

pub struct Orchestrator {
    executor: CommandExecutor,
    cache: RepositoryCache,
    service_name: String,
    gate: Mutex<()>,
}

impl Orchestrator {
    pub fn new(config: &Config) -> RelayResult<Self> {
        let cache = RepositoryCache::new(
            &config.repository_dir,
            &config.database_archive,
            &config.artifact_pattern,
        )?;
        Ok(Self::from_parts(
            CommandExecutor::new(config),
            cache,
            config.service_name.clone(),
        ))
    }

    pub fn from_parts(
        executor: CommandExecutor,
        cache: RepositoryCache,
        service_name: impl Into<String>,
    ) -> Self {
        Self {
            executor,
            cache,
            service_name: service_name.into(),
            gate: Mutex::new(()),
        }
    }

    pub fn cache(&self) -> &RepositoryCache {
        &self.cache
    }

    pub fn store(&self) -> &RunRecordStore {
        self.executor.store()
    }

    /// Front-end boot: any database archive left over is stale.
    pub fn startup(&self) -> RelayResult<()> {
        if self.cache.clear_database()? {
            info!("Discarded stale repository database from previous session");
        }
        Ok(())
    }

    pub async fn sync_repository(&self) -> OperationReport<bool> {
        let Some(_guard) = self.enter() else {
            return OperationReport::failed(false, busy());
        };
        self.sync_locked().await
    }

    pub async fn list_upgrade_dependencies(&self) -> OperationReport<Vec<PackageRef>> {
        let Some(_guard) = self.enter() else {
            return OperationReport::failed(Vec::new(), busy());
        };
        self.plan_locked(PacmanAction::PlanUpgrade, None).await
    }

    pub async fn list_package_dependencies(&self, target: &str) -> OperationReport<Vec<PackageRef>> {
        let Some(_guard) = self.enter() else {
            return OperationReport::failed(Vec::new(), busy());
        };
        self.plan_locked(PacmanAction::PlanPackage, Some(target)).await
    }

    /// Accepts a verified package file into the cache. No pacman run.
    pub fn receive_artifact(&self, received: &Path) -> OperationReport<bool> {
        match self.cache.store_artifact(received) {
            Ok(path) => {
                info!("Received artifact {:?}", path);
                OperationReport::ok(true)
            }
            Err(e) => {
                error!("Could not accept artifact {:?}: {}", received, e);
                OperationReport::failed(false, e)
            }
        }
    }

    /// Installs a verified repository database, syncs against it and drops
    /// the archive again whatever the sync's outcome.
    pub async fn receive_repository_database(&self, received: &Path) -> OperationReport<bool> {
        let Some(_guard) = self.enter() else {
            return OperationReport::failed(false, busy());
        };
        if let Err(e) = self.cache.store_database(received) {
            error!("Could not accept repository database {:?}: {}", received, e);
            return OperationReport::failed(false, e);
        }

        let report = self.sync_locked().await;
        if let Err(e) = self.cache.clear_database() {
            warn!("Failed to clear repository database: {}", e);
        }
        report
    }

    pub async fn upgrade(&self) -> OperationReport<bool> {
        let Some(_guard) = self.enter() else {
            return OperationReport::failed(false, busy());
        };
        self.apply_locked(PacmanAction::ApplyUpgrade, None).await
    }

    pub async fn install_package(&self, target: &str) -> OperationReport<bool> {
        let Some(_guard) = self.enter() else {
            return OperationReport::failed(false, busy());
        };
        self.apply_locked(PacmanAction::InstallPackage, Some(target)).await
    }

    /// Outcome of the last run, straight from the result record. Never waits
    /// for a running operation.
    pub fn query_last_result(&self) -> OperationReport<bool> {
        let store = self.executor.store();
        match store.recorded_exit_code() {
            Ok(0) => OperationReport::ok(true),
            Ok(code) => OperationReport::failed(
                false,
                RelayError::NonZeroExit {
                    code,
                    stderr: store.read_stderr().unwrap_or_default(),
                },
            ),
            Err(e) => {
                warn!("Result record unusable: {}", e);
                OperationReport::failed(false, RelayError::EmptyResultRecord)
            }
        }
    }

    pub fn last_run(&self) -> RelayResult<RunRecord> {
        self.executor.store().load()
    }

    fn enter(&self) -> Option<tokio::sync::MutexGuard<'_, ()>> {
        self.gate.try_lock().ok()
    }

    async fn run(&self, action: PacmanAction, target: Option<&str>) -> RelayResult<RunRecord> {
        let record = self.executor.execute(action, target).await?;
        if record.succeeded() {
            return Ok(record);
        }
        Err(RelayError::NonZeroExit {
            code: record.exit_code.unwrap_or_default(),
            stderr: record.stderr,
        })
    }

    async fn sync_locked(&self) -> OperationReport<bool> {
        if let Err(e) = self.run(PacmanAction::SyncDatabase, None).await {
            warn!("Repository sync failed: {}", e);
            return OperationReport::failed(false, e);
        }
        if let Err(e) = self.cache.clear_database() {
            warn!("Failed to clear repository database: {}", e);
        }
        OperationReport::ok(true)
    }

    async fn plan_locked(
        &self,
        action: PacmanAction,
        target: Option<&str>,
    ) -> OperationReport<Vec<PackageRef>> {
        let outcome = self
            .run(action, target)
            .await
            .and_then(|record| interpret(&record));

        let (packages, failure) = match outcome {
            Ok(packages) => (packages, None),
            Err(e) => (Vec::new(), Some(e)),
        };

        // an empty plan means nothing is pending, so leftovers are useless
        let reached_pacman = failure.as_ref().is_none_or(RelayError::is_process_error);
        if packages.is_empty() && reached_pacman {
            if let Err(e) = self.cache.purge_artifacts() {
                warn!("Failed to purge repository cache: {}", e);
            }
        }

        match failure {
            None => {
                info!("{} package(s) to fetch", packages.len());
                OperationReport::ok(packages)
            }
            Some(e) => {
                warn!("Dependency listing failed: {}", e);
                OperationReport::failed(packages, e)
            }
        }
    }

    async fn apply_locked(&self, action: PacmanAction, target: Option<&str>) -> OperationReport<bool> {
        let outcome = match self.run(action, target).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_process_error() => {
                warn!("{} failed: {}", action.flag(), e);
                Err(e)
            }
            Err(e) => {
                // pacman never ran; leave the cache and the service alone
                warn!("{} not started: {}", action.flag(), e);
                return OperationReport::failed(false, e);
            }
        };

        if let Err(e) = self.cache.purge_artifacts() {
            warn!("Failed to purge repository cache: {}", e);
        }

        let mut report = OperationReport::from_result(outcome.is_ok(), outcome);
        report.restart = Some(RestartRequest {
            service: self.service_name.clone(),
        });
        report
    }
}

fn busy() -> RelayError {
    RelayError::LockBusy("another update operation is already running".into())
}
