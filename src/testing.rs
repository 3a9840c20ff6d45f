//! Throwaway device layout with a scripted stand-in for pacman.

use crate::config::Config;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub struct Fixture {
    dir: TempDir,
    pub config: Config,
}

impl Fixture {
    /// `body` is a POSIX shell script; `$1` is the pacman action flag and
    /// `$2` the optional target.
    pub fn new(body: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let script = root.join("fake-pacman.sh");
        std::fs::write(&script, format!("#!/bin/sh\n{}\n", body)).unwrap();

        let state_dir = root.join("state");
        let repository_dir = root.join("repository");
        std::fs::create_dir_all(&state_dir).unwrap();
        std::fs::create_dir_all(&repository_dir).unwrap();

        // The script is handed to sh instead of being exec'd directly, which
        // avoids ETXTBSY when tests spawn concurrently.
        let config = Config {
            pacman_command: PathBuf::from("/bin/sh"),
            confirm_flag: script.to_string_lossy().into_owned(),
            lock_file: root.join("db.lck"),
            state_dir,
            repository_dir,
            systemctl_command: PathBuf::from("true"),
            ..Config::default()
        };

        Self { dir, config }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn add_artifact(&self, name: &str) -> PathBuf {
        let path = self.config.repository_dir.join(name);
        std::fs::write(&path, b"artifact").unwrap();
        path
    }
}
