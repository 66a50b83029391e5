use async_trait::async_trait;
use quarry_core::{QuarryError, Result};
use tracing::{debug, warn};

use super::StorageBackend;
use crate::tag::Tag;

pub const DEFAULT_SERVICE: &str = "quarry";

/// Credential holding the JSON list of stored tags. Platform keychains have
/// no portable enumeration, so the backend keeps its own index.
const INDEX_USER: &str = "keyring-index";

/// Phrases platform keychains use when the user refuses the unlock prompt.
const DENIAL_MARKERS: [&str; 4] = [
    "denied",
    "user canceled",
    "user cancelled",
    "interaction not allowed",
];

/// Payloads stored in the host's secret service (macOS Keychain, Windows
/// Credential Manager, Secret Service on Linux).
#[derive(Debug, Clone)]
pub struct OsBackend {
    service: String,
}

impl OsBackend {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    async fn with_entry<T, F>(&self, user: String, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&keyring::Entry) -> std::result::Result<T, keyring::Error> + Send + 'static,
    {
        let service = self.service.clone();
        tokio::task::spawn_blocking(move || {
            let entry = keyring::Entry::new(&service, &user)
                .map_err(|e| map_keyring_error(e, &user))?;
            f(&entry).map_err(|e| map_keyring_error(e, &user))
        })
        .await
        .map_err(|e| QuarryError::Storage(format!("keyring task failed: {e}")))?
    }

    async fn read_index(&self) -> Result<Vec<String>> {
        let raw = self
            .with_entry(INDEX_USER.into(), |entry| match entry.get_password() {
                Ok(raw) => Ok(Some(raw)),
                Err(keyring::Error::NoEntry) => Ok(None),
                Err(e) => Err(e),
            })
            .await?;
        Ok(raw.map(|r| parse_index(&r)).unwrap_or_default())
    }

    async fn write_index(&self, tags: Vec<String>) -> Result<()> {
        let raw = serde_json::to_string(&tags)?;
        self.with_entry(INDEX_USER.into(), move |entry| entry.set_password(&raw))
            .await
    }
}

/// Tolerates a damaged index by treating it as empty.
fn parse_index(raw: &str) -> Vec<String> {
    serde_json::from_str(raw).unwrap_or_else(|e| {
        warn!(error = %e, "keyring index is unreadable, ignoring it");
        Vec::new()
    })
}

/// Maps platform failures into the error taxonomy. Refused access becomes
/// [`QuarryError::InvalidPassword`] so callers never match on platform text.
fn map_keyring_error(err: keyring::Error, user: &str) -> QuarryError {
    match err {
        keyring::Error::NoEntry => QuarryError::not_found("Keyring entry", user),
        keyring::Error::NoStorageAccess(inner) => QuarryError::InvalidPassword(inner.to_string()),
        keyring::Error::PlatformFailure(inner) if is_denial(&inner.to_string()) => {
            QuarryError::InvalidPassword(inner.to_string())
        }
        other => QuarryError::Storage(format!("os keyring: {other}")),
    }
}

fn is_denial(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    DENIAL_MARKERS.iter().any(|m| message.contains(m))
}

#[async_trait]
impl StorageBackend for OsBackend {
    async fn save(&self, tag: &Tag, payload: &str, _password: Option<&str>) -> Result<()> {
        let payload = payload.to_owned();
        self.with_entry(tag.to_string(), move |entry| entry.set_password(&payload))
            .await?;

        let mut index = self.read_index().await?;
        if !index.iter().any(|t| t == tag.as_str()) {
            index.push(tag.to_string());
            self.write_index(index).await?;
        }
        debug!(tag = %tag, "os keyring entry written");
        Ok(())
    }

    async fn get(&self, tag: &Tag, _password: Option<&str>) -> Result<Option<String>> {
        self.with_entry(tag.to_string(), |entry| match entry.get_password() {
            Ok(payload) => Ok(Some(payload)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e),
        })
        .await
    }

    async fn list(&self) -> Result<Vec<String>> {
        self.read_index().await
    }

    async fn remove(&self, tag: &Tag) -> Result<()> {
        let result = self
            .with_entry(tag.to_string(), |entry| entry.delete_credential())
            .await;

        // Drop the tag from the index even when the credential was already
        // gone, so a stale index heals itself.
        let mut index = self.read_index().await?;
        let before = index.len();
        index.retain(|t| t != tag.as_str());
        if index.len() != before {
            self.write_index(index).await?;
        }

        result?;
        debug!(tag = %tag, "os keyring entry removed");
        Ok(())
    }
}
