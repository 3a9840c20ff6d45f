use crate::{
    error::{RelayError, RelayResult},
    PACRELAY_CONFIG,
};
use log::debug;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_pacman_command")]
    pub pacman_command: PathBuf,

    #[serde(default = "default_confirm_flag")]
    pub confirm_flag: String,

    #[serde(default = "default_lock_file")]
    pub lock_file: PathBuf,

    /// Directory holding the durable run record files
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    #[serde(default = "default_repository_dir")]
    pub repository_dir: PathBuf,

    #[serde(default = "default_database_archive")]
    pub database_archive: String,

    #[serde(default = "default_artifact_pattern")]
    pub artifact_pattern: String,

    #[serde(default = "default_service_name")]
    pub service_name: String,

    #[serde(default = "default_systemctl_command")]
    pub systemctl_command: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            pacman_command: default_pacman_command(),
            confirm_flag: default_confirm_flag(),
            lock_file: default_lock_file(),
            state_dir: default_state_dir(),
            repository_dir: default_repository_dir(),
            database_archive: default_database_archive(),
            artifact_pattern: default_artifact_pattern(),
            service_name: default_service_name(),
            systemctl_command: default_systemctl_command(),
        }
    }
}

impl Config {
    pub fn load(config_path: Option<&str>) -> RelayResult<Self> {
        let config_path = match config_path {
            Some(path) => PathBuf::from(path),
            None => PACRELAY_CONFIG.clone(),
        };

        let config = if config_path.is_file() {
            let content = std::fs::read_to_string(&config_path)?;
            toml::from_str::<Config>(&content)?
        } else {
            debug!("No config at {:?}, using defaults", config_path);
            Config::default()
        };

        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> RelayResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> RelayResult<()> {
        if self.pacman_command.as_os_str().is_empty() {
            return Err(RelayError::Config("pacman_command cannot be empty".into()));
        }
        if self.confirm_flag.trim().is_empty() {
            return Err(RelayError::Config("confirm_flag cannot be empty".into()));
        }
        if self.database_archive.is_empty() || self.database_archive.contains('/') {
            return Err(RelayError::Config(format!(
                "database_archive must be a bare file name, got {:?}",
                self.database_archive
            )));
        }
        if self.artifact_pattern.is_empty() {
            return Err(RelayError::Config("artifact_pattern cannot be empty".into()));
        }
        if self.service_name.trim().is_empty() {
            return Err(RelayError::Config("service_name cannot be empty".into()));
        }
        Ok(())
    }
}

fn default_pacman_command() -> PathBuf {
    PathBuf::from("/usr/bin/pacman")
}

fn default_confirm_flag() -> String {
    "--noconfirm".to_string()
}

fn default_lock_file() -> PathBuf {
    PathBuf::from("/var/lib/pacman/db.lck")
}

fn default_state_dir() -> PathBuf {
    PathBuf::from("/tmp")
}

fn default_repository_dir() -> PathBuf {
    PathBuf::from("/var/cache/pacrelay/repository")
}

fn default_database_archive() -> String {
    "mod.db.tar.gz".to_string()
}

fn default_artifact_pattern() -> String {
    "*tar*".to_string()
}

fn default_service_name() -> String {
    "mod-ui.service".to_string()
}

fn default_systemctl_command() -> PathBuf {
    PathBuf::from("systemctl")
}
