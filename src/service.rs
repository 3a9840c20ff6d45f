use crate::{
    config::Config,
    error::{RelayError, RelayResult},
};
use log::info;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::process::Command;

/// Handed back by install and upgrade: the dependent runtime service must be
/// restarted before the new packages take effect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestartRequest {
    pub service: String,
}

#[derive(Debug, Clone)]
pub struct ServiceRestarter {
    systemctl: PathBuf,
}

impl ServiceRestarter {
    pub fn new(config: &Config) -> Self {
        Self {
            systemctl: config.systemctl_command.clone(),
        }
    }

    pub async fn restart(&self, request: &RestartRequest) -> RelayResult<()> {
        info!("Restarting {}", request.service);
        let status = Command::new(&self.systemctl)
            .arg("restart")
            .arg(&request.service)
            .status()
            .await
            .map_err(|e| {
                RelayError::ServiceRestart(format!("{}: {}", self.systemctl.display(), e))
            })?;

        if !status.success() {
            return Err(RelayError::ServiceRestart(format!(
                "systemctl restart {} exited with {}",
                request.service, status
            )));
        }
        Ok(())
    }
}
