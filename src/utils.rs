use crate::error::{RelayError, RelayResult};
use std::path::Path;

/// Checks a pacman target before it lands on a command line.
pub fn validate_package_name(name: &str) -> RelayResult<()> {
    if name.is_empty() {
        return Err(RelayError::InvalidPackageName("Package name cannot be empty".into()));
    }
    if name.starts_with('-') {
        return Err(RelayError::InvalidPackageName(format!(
            "Package name cannot start with '-': {}",
            name
        )));
    }
    for c in name.chars() {
        if !c.is_ascii_alphanumeric() && !matches!(c, '-' | '_' | '.' | '+' | '@') {
            return Err(RelayError::InvalidPackageName(format!(
                "Package name contains invalid character: {:?}",
                c
            )));
        }
    }
    if name.len() > 100 {
        return Err(RelayError::InvalidPackageName(
            "Package name too long (max 100 characters)".into(),
        ));
    }
    Ok(())
}

pub fn format_duration(seconds: u64) -> String {
    if seconds < 60 {
        format!("{}s", seconds)
    } else if seconds < 3600 {
        format!("{}m {}s", seconds / 60, seconds % 60)
    } else {
        format!("{}h {}m", seconds / 3600, (seconds % 3600) / 60)
    }
}

pub fn ensure_directory(path: &Path) -> RelayResult<()> {
    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }
    Ok(())
}

/// Reads a file as text, treating an absent file as empty.
pub fn read_to_string_or_empty(path: &Path) -> RelayResult<String> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
        Err(e) => Err(e.into()),
    }
}
