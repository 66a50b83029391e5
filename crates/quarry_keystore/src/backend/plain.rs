use std::path::{Path, PathBuf};

use async_trait::async_trait;
use quarry_core::{QuarryError, Result};
use tracing::debug;

use super::{StorageBackend, entry_path, list_dir, remove_file, write_private};
use crate::tag::Tag;

/// Unencrypted payloads, one file per tag. For tests and throwaway keys.
#[derive(Debug, Clone)]
pub struct PlainBackend {
    dir: PathBuf,
}

impl PlainBackend {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[async_trait]
impl StorageBackend for PlainBackend {
    async fn save(&self, tag: &Tag, payload: &str, _password: Option<&str>) -> Result<()> {
        let path = entry_path(&self.dir, tag);
        let contents = payload.as_bytes().to_vec();
        tokio::task::spawn_blocking(move || write_private(&path, &contents))
            .await
            .map_err(|e| QuarryError::Storage(format!("write task failed: {e}")))??;
        debug!(tag = %tag, "plain keyring entry written");
        Ok(())
    }

    async fn get(&self, tag: &Tag, _password: Option<&str>) -> Result<Option<String>> {
        let path = entry_path(&self.dir, tag);
        match tokio::fs::read_to_string(&path).await {
            Ok(payload) => Ok(Some(payload)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(QuarryError::io(path, e)),
        }
    }

    async fn list(&self) -> Result<Vec<String>> {
        list_dir(&self.dir).await
    }

    async fn remove(&self, tag: &Tag) -> Result<()> {
        remove_file(&self.dir, tag).await?;
        debug!(tag = %tag, "plain keyring entry removed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::{AccountBase, AccountType};

    fn tag(name: &str) -> Tag {
        Tag::encode(&AccountBase::new(name, "archway1xyz", AccountType::Local))
    }

    #[tokio::test]
    async fn missing_directory_lists_empty() {
        let dir = tempfile::tempdir().unwrap();
        let backend = PlainBackend::new(dir.path().join("never-created"));
        assert!(backend.list().await.unwrap().is_empty());
        assert!(backend.get(&tag("alice"), None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn save_creates_directory_and_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let backend = PlainBackend::new(dir.path().join("keys"));

        backend.save(&tag("alice"), "v1", None).await.unwrap();
        backend.save(&tag("alice"), "v2", None).await.unwrap();

        assert_eq!(
            backend.get(&tag("alice"), None).await.unwrap().as_deref(),
            Some("v2")
        );
        assert_eq!(backend.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn remove_unknown_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let backend = PlainBackend::new(dir.path());
        let err = backend.remove(&tag("ghost")).await.unwrap_err();
        assert!(matches!(err, QuarryError::NotFound { .. }));
    }
}
