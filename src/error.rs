use thiserror::Error;

pub type RelayResult<T> = Result<T, RelayError>;

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid package name: {0}")]
    InvalidPackageName(String),

    /// Another package-manager run genuinely holds the lock
    #[error("Package manager busy: {0}")]
    LockBusy(String),

    /// The package-manager binary could not be launched
    #[error("Failed to launch {command}: {reason}")]
    SpawnFailure { command: String, reason: String },

    /// The package manager ran and reported an error
    #[error("Package manager exited with code {code}")]
    NonZeroExit { code: i32, stderr: String },

    /// pacman was started but its run could not be fully recorded
    #[error("Package manager run not recorded (exit code {exit_code:?}): {reason}")]
    Unrecorded { exit_code: Option<i32>, reason: String },

    /// Result record missing, empty or unreadable
    #[error("No usable result recorded for the last run")]
    EmptyResultRecord,

    #[error("Refusing to interpret output of a failed run")]
    ParseSkipped,

    #[error("Repository cache error: {0}")]
    Cache(String),

    #[error("Service restart failed: {0}")]
    ServiceRestart(String),
}

impl RelayError {
    pub fn is_lock_error(&self) -> bool {
        matches!(self, RelayError::LockBusy(_))
    }

    /// The failure happened at or after the launch of pacman, so the
    /// package manager may have changed the system.
    pub fn is_process_error(&self) -> bool {
        matches!(
            self,
            RelayError::SpawnFailure { .. }
                | RelayError::NonZeroExit { .. }
                | RelayError::Unrecorded { .. }
        )
    }

    /// Errors a caller may simply retry once the device is idle.
    /// A busy lock needs an operator, not a retry.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            RelayError::NonZeroExit { .. }
                | RelayError::EmptyResultRecord
                | RelayError::Cache(_)
                | RelayError::Io(_)
        )
    }

    /// Captured stderr of the failed run, when there is one.
    pub fn diagnostics(&self) -> Option<&str> {
        match self {
            RelayError::NonZeroExit { stderr, .. } if !stderr.is_empty() => Some(stderr.as_str()),
            RelayError::SpawnFailure { reason, .. } => Some(reason.as_str()),
            RelayError::Unrecorded { reason, .. } => Some(reason.as_str()),
            _ => None,
        }
    }
}
