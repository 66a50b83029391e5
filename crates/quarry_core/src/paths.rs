use std::path::{Path, PathBuf};

use crate::error::{QuarryError, Result};

/// Name of the per-user and per-project state directories.
pub const STATE_DIR_NAME: &str = ".quarry";
pub const CONFIG_FILE_NAME: &str = "config.json";

/// Per-user locations: `~/.quarry/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuarryDirs {
    root: PathBuf,
}

impl QuarryDirs {
    /// Resolves `~/.quarry/` from the current user's home directory.
    pub fn from_home() -> Result<Self> {
        let home = dirs::home_dir()
            .ok_or_else(|| QuarryError::Storage("Could not determine home directory".into()))?;
        Ok(Self::new(home.join(STATE_DIR_NAME)))
    }

    /// Uses an arbitrary directory as the global root (tests, sandboxes).
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `~/.quarry/config.json`
    pub fn config_path(&self) -> PathBuf {
        self.root.join(CONFIG_FILE_NAME)
    }

    /// `~/.quarry/keys/`, the default keyring path.
    pub fn keys_dir(&self) -> PathBuf {
        self.root.join("keys")
    }

    /// `~/.quarry/logs/`
    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }
}

/// Project-local locations: `<project>/.quarry/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectDirs {
    project_root: PathBuf,
}

impl ProjectDirs {
    pub fn new(project_root: impl Into<PathBuf>) -> Self {
        Self {
            project_root: project_root.into(),
        }
    }

    /// Walks up from `start` looking for a directory that holds
    /// `.quarry/config.json`.
    pub fn discover(start: &Path) -> Option<Self> {
        start
            .ancestors()
            .find(|dir| dir.join(STATE_DIR_NAME).join(CONFIG_FILE_NAME).is_file())
            .map(Self::new)
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    /// `<project>/.quarry/`
    pub fn state_dir(&self) -> PathBuf {
        self.project_root.join(STATE_DIR_NAME)
    }

    /// `<project>/.quarry/config.json`
    pub fn config_path(&self) -> PathBuf {
        self.state_dir().join(CONFIG_FILE_NAME)
    }

    /// `<project>/.quarry/chains/`, one `<chain_id>.json` per imported chain.
    pub fn chains_dir(&self) -> PathBuf {
        self.state_dir().join("chains")
    }

    /// `<project>/.quarry/deployments/`, one `<chain_id>.json` per chain.
    pub fn deployments_dir(&self) -> PathBuf {
        self.state_dir().join("deployments")
    }
}

/// Creates `dir` and its parents if missing.
pub fn ensure_dir(dir: &Path) -> Result<()> {
    if !dir.exists() {
        std::fs::create_dir_all(dir).map_err(|e| QuarryError::io(dir, e))?;
    }
    Ok(())
}
