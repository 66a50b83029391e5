use std::path::{Path, PathBuf};

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use argon2::{Algorithm, Argon2, Params, Version};
use async_trait::async_trait;
use quarry_core::json::parse_document;
use quarry_core::{QuarryError, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{StorageBackend, entry_path, list_dir, remove_file, write_private};
use crate::account::b64;
use crate::tag::Tag;

const ENVELOPE_VERSION: u32 = 1;
const AES_NONCE_LEN: usize = 12;
const SALT_LEN: usize = 16;
const KEY_LEN: usize = 32;

/// Argon2id cost parameters. Stored alongside each entry so entries written
/// with older parameters stay readable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KdfParams {
    pub memory_kib: u32,
    pub iterations: u32,
    pub lanes: u32,
}

impl Default for KdfParams {
    /// m=19456 KiB (~19 MB), t=2, p=1.
    fn default() -> Self {
        Self {
            memory_kib: 19_456,
            iterations: 2,
            lanes: 1,
        }
    }
}

/// On-disk shape of one encrypted entry.
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope {
    version: u32,
    kdf: KdfParams,
    #[serde(with = "b64")]
    salt: Vec<u8>,
    #[serde(with = "b64")]
    nonce: Vec<u8>,
    #[serde(with = "b64")]
    ciphertext: Vec<u8>,
}

/// Password-encrypted payloads, one file per tag. AES-256-GCM with a key
/// derived through Argon2id from the password and a per-entry salt.
#[derive(Debug, Clone)]
pub struct FileBackend {
    dir: PathBuf,
    kdf: KdfParams,
}

impl FileBackend {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            kdf: KdfParams::default(),
        }
    }

    /// Overrides the cost used for newly written entries.
    pub fn with_kdf_params(mut self, kdf: KdfParams) -> Self {
        self.kdf = kdf;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// All entries of one directory share a password: a new password is
    /// accepted only if it opens an entry other than `tag`.
    async fn check_password(&self, tag: &Tag, password: &str) -> Result<()> {
        let existing = list_dir(&self.dir)
            .await?
            .into_iter()
            .find(|name| name != tag.as_str() && Tag::decode(name).is_ok());
        let Some(existing) = existing else {
            return Ok(());
        };

        let path = self.dir.join(existing);
        let raw = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| QuarryError::io(&path, e))?;
        let envelope = parse_envelope(&raw, &path)?;
        let password = password.to_owned();
        run_blocking(move || open(&envelope, &password).map(|_| ())).await
    }
}

fn require_password(password: Option<&str>) -> Result<String> {
    password.map(str::to_owned).ok_or_else(|| {
        QuarryError::InvalidPassword("a password is required for the file keyring".into())
    })
}

fn derive_key(password: &str, salt: &[u8], kdf: KdfParams) -> Result<[u8; KEY_LEN]> {
    let params = Params::new(kdf.memory_kib, kdf.iterations, kdf.lanes, Some(KEY_LEN))
        .map_err(|e| QuarryError::Storage(format!("invalid argon2 params: {e}")))?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let mut key = [0u8; KEY_LEN];
    argon2
        .hash_password_into(password.as_bytes(), salt, &mut key)
        .map_err(|e| QuarryError::Storage(format!("argon2 key derivation failed: {e}")))?;
    Ok(key)
}

fn seal(payload: &str, password: &str, kdf: KdfParams) -> Result<Envelope> {
    let salt: [u8; SALT_LEN] = rand::random();
    let nonce_bytes: [u8; AES_NONCE_LEN] = rand::random();

    let key_bytes = derive_key(password, &salt, kdf)?;
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key_bytes));
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce_bytes), payload.as_bytes())
        .map_err(|e| QuarryError::Storage(format!("encryption failed: {e}")))?;

    Ok(Envelope {
        version: ENVELOPE_VERSION,
        kdf,
        salt: salt.to_vec(),
        nonce: nonce_bytes.to_vec(),
        ciphertext,
    })
}

/// A failed integrity check means the password is wrong; the entry itself
/// was found.
fn open(envelope: &Envelope, password: &str) -> Result<String> {
    let key_bytes = derive_key(password, &envelope.salt, envelope.kdf)?;
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key_bytes));
    let plaintext = cipher
        .decrypt(Nonce::from_slice(&envelope.nonce), envelope.ciphertext.as_slice())
        .map_err(|_| QuarryError::InvalidPassword("the keyring password is incorrect".into()))?;

    String::from_utf8(plaintext)
        .map_err(|_| QuarryError::Storage("decrypted payload is not valid UTF-8".into()))
}

fn parse_envelope(raw: &str, path: &Path) -> Result<Envelope> {
    let source = path.display().to_string();
    let invalid = |message: String| QuarryError::malformed(&source, message);

    let envelope: Envelope = parse_document(raw, &source)?;
    if envelope.version != ENVELOPE_VERSION {
        return Err(invalid(format!("unsupported version {}", envelope.version)));
    }
    if envelope.nonce.len() != AES_NONCE_LEN {
        return Err(invalid(format!("nonce must be {AES_NONCE_LEN} bytes")));
    }
    Ok(envelope)
}

async fn run_blocking<T: Send + 'static>(
    f: impl FnOnce() -> Result<T> + Send + 'static,
) -> Result<T> {
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| QuarryError::Storage(format!("keyring task failed: {e}")))?
}

#[async_trait]
impl StorageBackend for FileBackend {
    fn requires_password(&self) -> bool {
        true
    }

    async fn save(&self, tag: &Tag, payload: &str, password: Option<&str>) -> Result<()> {
        let password = require_password(password)?;
        self.check_password(tag, &password).await?;
        let path = entry_path(&self.dir, tag);
        let payload = payload.to_owned();
        let kdf = self.kdf;

        run_blocking(move || {
            let envelope = seal(&payload, &password, kdf)?;
            let contents = serde_json::to_vec_pretty(&envelope)?;
            write_private(&path, &contents)
        })
        .await?;
        debug!(tag = %tag, "encrypted keyring entry written");
        Ok(())
    }

    async fn get(&self, tag: &Tag, password: Option<&str>) -> Result<Option<String>> {
        let path = entry_path(&self.dir, tag);
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(QuarryError::io(path, e)),
        };
        let password = require_password(password)?;
        let envelope = parse_envelope(&raw, &path)?;

        run_blocking(move || open(&envelope, &password)).await.map(Some)
    }

    async fn list(&self) -> Result<Vec<String>> {
        list_dir(&self.dir).await
    }

    async fn remove(&self, tag: &Tag) -> Result<()> {
        remove_file(&self.dir, tag).await?;
        debug!(tag = %tag, "encrypted keyring entry removed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::{AccountBase, AccountType};

    const FAST: KdfParams = KdfParams {
        memory_kib: 64,
        iterations: 1,
        lanes: 1,
    };

    fn tag(name: &str) -> Tag {
        Tag::encode(&AccountBase::new(name, "archway1xyz", AccountType::Local))
    }

    fn backend(dir: &Path) -> FileBackend {
        FileBackend::new(dir).with_kdf_params(FAST)
    }

    #[tokio::test]
    async fn round_trip_with_password() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend(dir.path());

        backend
            .save(&tag("alice"), "{\"secret\":1}", Some("hunter2"))
            .await
            .unwrap();
        let payload = backend.get(&tag("alice"), Some("hunter2")).await.unwrap();
        assert_eq!(payload.as_deref(), Some("{\"secret\":1}"));
    }

    #[tokio::test]
    async fn payload_is_not_stored_in_clear() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend(dir.path());
        backend
            .save(&tag("alice"), "very-secret-payload", Some("pw"))
            .await
            .unwrap();

        let raw = std::fs::read_to_string(dir.path().join(tag("alice").as_str())).unwrap();
        assert!(!raw.contains("very-secret-payload"));
        assert!(raw.contains("\"ciphertext\""));
    }

    #[tokio::test]
    async fn wrong_password_is_invalid_password_not_missing() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend(dir.path());
        backend.save(&tag("alice"), "payload", Some("right")).await.unwrap();

        let err = backend.get(&tag("alice"), Some("wrong")).await.unwrap_err();
        assert!(matches!(err, QuarryError::InvalidPassword(_)));
    }

    #[tokio::test]
    async fn second_password_cannot_join_keyring() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend(dir.path());
        backend.save(&tag("alice"), "a", Some("first")).await.unwrap();

        let err = backend.save(&tag("bob"), "b", Some("second")).await.unwrap_err();
        assert!(matches!(err, QuarryError::InvalidPassword(_)));
        assert_eq!(backend.list().await.unwrap(), [tag("alice").as_str()]);

        backend.save(&tag("bob"), "b", Some("first")).await.unwrap();
        backend.save(&tag("alice"), "a2", Some("first")).await.unwrap();
        assert_eq!(backend.list().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn unknown_tag_is_absent_without_password() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend(dir.path());
        assert!(backend.get(&tag("ghost"), None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn missing_password_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend(dir.path());
        let err = backend.save(&tag("alice"), "payload", None).await.unwrap_err();
        assert!(matches!(err, QuarryError::InvalidPassword(_)));
    }

    #[tokio::test]
    async fn corrupt_entry_is_invalid_format() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend(dir.path());
        std::fs::write(dir.path().join(tag("alice").as_str()), "not json").unwrap();

        let err = backend.get(&tag("alice"), Some("pw")).await.unwrap_err();
        assert!(matches!(err, QuarryError::InvalidFormat { .. }));
    }

    #[tokio::test]
    async fn entries_remember_their_kdf_cost() {
        let dir = tempfile::tempdir().unwrap();
        backend(dir.path())
            .save(&tag("alice"), "payload", Some("pw"))
            .await
            .unwrap();

        // A backend configured with the default cost still reads it.
        let payload = FileBackend::new(dir.path())
            .get(&tag("alice"), Some("pw"))
            .await
            .unwrap();
        assert_eq!(payload.as_deref(), Some("payload"));
    }

    #[tokio::test]
    async fn missing_directory_lists_empty() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend(&dir.path().join("absent"));
        assert!(backend.list().await.unwrap().is_empty());
    }
}
