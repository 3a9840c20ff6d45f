use crate::{
    error::{RelayError, RelayResult},
    utils::ensure_directory,
};
use globset::{Glob, GlobMatcher};
use log::{debug, info, warn};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Local repository directory pacman is pointed at.
#[derive(Debug, Clone)]
pub struct RepositoryCache {
    dir: PathBuf,
    database_archive: String,
    artifacts: GlobMatcher,
}

impl RepositoryCache {
    pub fn new(
        dir: impl Into<PathBuf>,
        database_archive: impl Into<String>,
        artifact_pattern: &str,
    ) -> RelayResult<Self> {
        let artifacts = Glob::new(artifact_pattern)
            .map_err(|e| RelayError::Config(format!("bad artifact pattern: {}", e)))?
            .compile_matcher();
        Ok(Self {
            dir: dir.into(),
            database_archive: database_archive.into(),
            artifacts,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn database_path(&self) -> PathBuf {
        self.dir.join(&self.database_archive)
    }

    /// Archive files currently sitting in the cache, sorted by name.
    pub fn artifacts(&self) -> RelayResult<Vec<PathBuf>> {
        if !self.dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut found = Vec::new();
        for entry in WalkDir::new(&self.dir).min_depth(1).max_depth(1) {
            let entry = entry.map_err(|e| RelayError::Cache(e.to_string()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            if self.artifacts.is_match(entry.file_name()) {
                found.push(entry.into_path());
            }
        }
        found.sort();
        Ok(found)
    }

    /// Deletes every archive in the cache. Returns how many went away.
    pub fn purge_artifacts(&self) -> RelayResult<usize> {
        let mut removed = 0;
        for path in self.artifacts()? {
            match std::fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!("Failed to remove {:?}: {}", path, e);
                    return Err(e.into());
                }
            }
        }
        if removed > 0 {
            info!("Purged {} artifact(s) from {:?}", removed, self.dir);
        }
        Ok(removed)
    }

    /// Removes the repository database archive so a fresh one is fetched.
    pub fn clear_database(&self) -> RelayResult<bool> {
        let path = self.database_path();
        match std::fs::remove_file(&path) {
            Ok(()) => {
                debug!("Removed repository database {:?}", path);
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Moves a received package into the cache under its own file name.
    pub fn store_artifact(&self, received: &Path) -> RelayResult<PathBuf> {
        let name = received
            .file_name()
            .ok_or_else(|| RelayError::Cache(format!("{:?} has no file name", received)))?;
        self.place(received, &self.dir.join(name))
    }

    /// Moves a received repository database into place.
    pub fn store_database(&self, received: &Path) -> RelayResult<PathBuf> {
        self.place(received, &self.database_path())
    }

    fn place(&self, source: &Path, destination: &Path) -> RelayResult<PathBuf> {
        if !source.is_file() {
            return Err(RelayError::Cache(format!(
                "received file {:?} does not exist",
                source
            )));
        }
        ensure_directory(&self.dir)?;
        if std::fs::rename(source, destination).is_err() {
            // different filesystem
            std::fs::copy(source, destination)?;
            std::fs::remove_file(source)?;
        }
        debug!("Stored {:?} as {:?}", source, destination);
        Ok(destination.to_path_buf())
    }
}
