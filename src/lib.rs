pub mod cache;
pub mod config;
pub mod error;
pub mod executor;
pub mod interpreter;
pub mod lock;
pub mod pipeline;
pub mod run_record;
pub mod service;
pub mod utils;

#[cfg(test)]
mod testing;

pub use cache::RepositoryCache;
pub use config::Config;
pub use error::{RelayError, RelayResult};
pub use executor::{CommandExecutor, PacmanAction};
pub use interpreter::{parse_fetch_list, PackageRef};
pub use lock::{reconcile, LockDecision, LockState};
pub use pipeline::{OperationReport, Orchestrator};
pub use run_record::{RunRecord, RunRecordStore, RunResult};
pub use service::{RestartRequest, ServiceRestarter};

pub const PACRELAY_VERSION: &str = env!("CARGO_PKG_VERSION");

use lazy_static::lazy_static;
use std::path::PathBuf;

lazy_static! {
    pub static ref PACRELAY_CONFIG: PathBuf = {
        if let Ok(path) = std::env::var("PACRELAY_CONFIG") {
            PathBuf::from(path)
        } else {
            PathBuf::from("/etc/pacrelay/pacrelay.toml")
        }
    };
}
