//! Opaque secret storage keyed by [`Tag`].
//!
//! Every backend honours the same contract: `save` overwrites, `get` returns
//! `None` for an unknown tag, `list` returns every key it holds (including
//! ones that are not valid tags) and tolerates a missing backing store, and
//! `remove` of an unknown tag is `NotFound`.

mod file;
mod os;
mod plain;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use quarry_core::{KeyringBackend, QuarryError, Result};

pub use file::{FileBackend, KdfParams};
pub use os::{DEFAULT_SERVICE, OsBackend};
pub use plain::PlainBackend;

use crate::tag::Tag;

#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Whether `save` and `get` need a caller-supplied password.
    fn requires_password(&self) -> bool {
        false
    }

    async fn save(&self, tag: &Tag, payload: &str, password: Option<&str>) -> Result<()>;

    async fn get(&self, tag: &Tag, password: Option<&str>) -> Result<Option<String>>;

    async fn list(&self) -> Result<Vec<String>>;

    async fn remove(&self, tag: &Tag) -> Result<()>;
}

/// The closed set of keyring backends selectable through `keyring-backend`.
#[derive(Debug)]
pub enum Backend {
    Os(OsBackend),
    File(FileBackend),
    Test(PlainBackend),
}

impl Backend {
    /// Builds the backend named by the resolved config. `path` is ignored by
    /// the OS backend.
    pub fn from_config(kind: KeyringBackend, path: impl Into<PathBuf>) -> Self {
        match kind {
            KeyringBackend::Os => Self::Os(OsBackend::new(DEFAULT_SERVICE)),
            KeyringBackend::File => Self::File(FileBackend::new(path)),
            KeyringBackend::Test => Self::Test(PlainBackend::new(path)),
        }
    }

    pub fn kind(&self) -> KeyringBackend {
        match self {
            Self::Os(_) => KeyringBackend::Os,
            Self::File(_) => KeyringBackend::File,
            Self::Test(_) => KeyringBackend::Test,
        }
    }

    fn inner(&self) -> &dyn StorageBackend {
        match self {
            Self::Os(b) => b,
            Self::File(b) => b,
            Self::Test(b) => b,
        }
    }
}

#[async_trait]
impl StorageBackend for Backend {
    fn requires_password(&self) -> bool {
        self.inner().requires_password()
    }

    async fn save(&self, tag: &Tag, payload: &str, password: Option<&str>) -> Result<()> {
        self.inner().save(tag, payload, password).await
    }

    async fn get(&self, tag: &Tag, password: Option<&str>) -> Result<Option<String>> {
        self.inner().get(tag, password).await
    }

    async fn list(&self) -> Result<Vec<String>> {
        self.inner().list().await
    }

    async fn remove(&self, tag: &Tag) -> Result<()> {
        self.inner().remove(tag).await
    }
}

// ---------------------------------------------------------------------------
// Directory helpers shared by the file-based backends
// ---------------------------------------------------------------------------

fn entry_path(dir: &Path, tag: &Tag) -> PathBuf {
    dir.join(tag.as_str())
}

/// File names of every regular file in `dir`; empty if `dir` is missing.
async fn list_dir(dir: &Path) -> Result<Vec<String>> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(QuarryError::io(dir, e)),
    };

    let mut names = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| QuarryError::io(dir, e))?
    {
        let is_file = entry
            .file_type()
            .await
            .map(|t| t.is_file())
            .unwrap_or(false);
        if !is_file {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            names.push(name.to_string());
        }
    }
    names.sort();
    Ok(names)
}

async fn remove_file(dir: &Path, tag: &Tag) -> Result<()> {
    let path = entry_path(dir, tag);
    match tokio::fs::remove_file(&path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(QuarryError::not_found("Keyring entry", tag.as_str()))
        }
        Err(e) => Err(QuarryError::io(path, e)),
    }
}

/// Writes `contents` and restricts the file to its owner on Unix.
fn write_private(path: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| QuarryError::io(parent, e))?;
    }
    std::fs::write(path, contents).map_err(|e| QuarryError::io(path, e))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
            .map_err(|e| QuarryError::io(path, e))?;
    }
    Ok(())
}
