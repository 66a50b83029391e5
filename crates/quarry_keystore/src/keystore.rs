use std::sync::Arc;

use parking_lot::Mutex;
use quarry_core::json::parse_document;
use quarry_core::{FieldErrors, Prompter, QuarryError, Result};
use serde::Deserialize;
use tracing::{debug, info};

use crate::account::{Account, AccountBase, AccountSecret};
use crate::backend::{Backend, StorageBackend};
use crate::keys::{AddressFormat, DEFAULT_HD_PATH, KeyPair, parse_mnemonic};
use crate::tag::{Tag, decode_all};

const PASSWORD_PROMPT: &str = "Enter the keyring password";

/// Payload shape written by earlier releases: only the mnemonic, with the
/// identity carried by the tag.
#[derive(Deserialize)]
struct LegacyPayload {
    mnemonic: String,
}

/// Account persistence over one [`Backend`].
///
/// Every mutation re-checks existence against the backend's current tag
/// list, so uniqueness holds regardless of which caller reaches it.
pub struct Keystore {
    backend: Backend,
    prompter: Arc<dyn Prompter>,
    password: Mutex<Option<String>>,
}

impl Keystore {
    pub fn new(backend: Backend, prompter: Arc<dyn Prompter>) -> Self {
        Self {
            backend,
            prompter,
            password: Mutex::new(None),
        }
    }

    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    /// Identity of every stored account, decoded from tags only.
    pub async fn list_bases(&self) -> Result<Vec<AccountBase>> {
        let raw = self.backend.list().await?;
        Ok(decode_all(raw.iter().map(String::as_str)))
    }

    pub async fn find(&self, name_or_address: &str) -> Result<Option<AccountBase>> {
        Ok(self
            .list_bases()
            .await?
            .into_iter()
            .find(|b| b.matches(name_or_address)))
    }

    pub async fn exists(&self, name_or_address: &str) -> Result<bool> {
        Ok(self.find(name_or_address).await?.is_some())
    }

    pub async fn assert_exists(&self, name_or_address: &str) -> Result<AccountBase> {
        self.find(name_or_address)
            .await?
            .ok_or_else(|| QuarryError::not_found("Account", name_or_address))
    }

    /// Fails if any stored account shares the name or the address of `base`.
    /// Names and addresses share one lookup space, so a name equal to a
    /// stored address (or the reverse) is a clash as well.
    pub async fn assert_not_exists(&self, base: &AccountBase) -> Result<()> {
        let stored = self.list_bases().await?;
        if let Some(clash) = stored
            .iter()
            .find(|s| s.matches(&base.name) || s.matches(&base.address))
        {
            let id = if clash.matches(&base.name) {
                &base.name
            } else {
                &base.address
            };
            return Err(QuarryError::already_exists("Account", id));
        }
        Ok(())
    }

    pub async fn save(&self, account: &Account) -> Result<()> {
        let base = account.base();
        self.assert_not_exists(&base).await?;

        let tag = Tag::encode(&base);
        let payload = account.to_payload()?;
        self.write(&tag, &payload).await?;
        info!(account = %base.name, address = %base.address, "account saved");
        Ok(())
    }

    pub async fn get(&self, name_or_address: &str) -> Result<Account> {
        let base = self.assert_exists(name_or_address).await?;
        self.get_base(&base).await.map(|(account, _)| account)
    }

    /// Reads the account stored under `base`. The flag reports a legacy
    /// payload that [`Keystore::migrate`] would rewrite.
    pub(crate) async fn get_base(&self, base: &AccountBase) -> Result<(Account, bool)> {
        let tag = Tag::encode(base);
        let raw = self
            .read(&tag)
            .await?
            .ok_or_else(|| QuarryError::not_found("Account", &base.name))?;
        decode_payload(base, &raw)
    }

    pub async fn remove(&self, name_or_address: &str) -> Result<AccountBase> {
        let base = self.assert_exists(name_or_address).await?;
        self.backend.remove(&Tag::encode(&base)).await?;
        info!(account = %base.name, address = %base.address, "account removed");
        Ok(base)
    }

    /// Rewrites every legacy payload in the current shape. Returns the
    /// accounts that were rewritten.
    pub async fn migrate(&self) -> Result<Vec<AccountBase>> {
        let mut migrated = Vec::new();
        for base in self.list_bases().await? {
            let (account, legacy) = self.get_base(&base).await?;
            if !legacy {
                continue;
            }
            let tag = Tag::encode(&base);
            self.write(&tag, &account.to_payload()?).await?;
            info!(account = %base.name, "legacy keyring entry migrated");
            migrated.push(base);
        }
        Ok(migrated)
    }

    /// Obtains the backend password up front. No-op for backends that do
    /// not need one.
    pub async fn unlock(&self) -> Result<()> {
        self.password().await.map(|_| ())
    }

    /// Password for the current backend, prompting once per process.
    async fn password(&self) -> Result<Option<String>> {
        if !self.backend.requires_password() {
            return Ok(None);
        }
        let cached = self.password.lock().clone();
        if cached.is_some() {
            return Ok(cached);
        }
        let password = self.prompter.password(PASSWORD_PROMPT).await?;
        *self.password.lock() = Some(password.clone());
        Ok(Some(password))
    }

    fn forget_password_on_rejection<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(QuarryError::InvalidPassword(_)) = &result {
            debug!("clearing cached keyring password after rejection");
            self.password.lock().take();
        }
        result
    }

    async fn read(&self, tag: &Tag) -> Result<Option<String>> {
        let password = self.password().await?;
        let result = self.backend.get(tag, password.as_deref()).await;
        self.forget_password_on_rejection(result)
    }

    async fn write(&self, tag: &Tag, payload: &str) -> Result<()> {
        let password = self.password().await?;
        let result = self.backend.save(tag, payload, password.as_deref()).await;
        self.forget_password_on_rejection(result)
    }
}

fn decode_payload(base: &AccountBase, raw: &str) -> Result<(Account, bool)> {
    let value: serde_json::Value = parse_document(raw, "account payload")?;

    let is_legacy = value.get("mnemonic").is_some() && value.get("publicKey").is_none();
    if is_legacy {
        let legacy: LegacyPayload = serde_json::from_value(value)?;
        let mnemonic = parse_mnemonic(&legacy.mnemonic)?;
        let keys = KeyPair::from_mnemonic(&mnemonic, DEFAULT_HD_PATH)?;
        let derived = AddressFormat::of_address(&base.address)
            .and_then(|format| format.address_for(&keys.public_key().key));
        if derived.ok().as_deref() != Some(base.address.as_str()) {
            let mut errors = FieldErrors::new();
            errors.insert(
                "mnemonic".into(),
                vec![format!("does not derive the address \"{}\"", base.address)],
            );
            return Err(QuarryError::invalid_format("account payload", errors));
        }
        let account = Account {
            name: base.name.clone(),
            address: base.address.clone(),
            public_key: keys.public_key(),
            secret: AccountSecret::PrivateKey(keys.private_key()),
        };
        return Ok((account, true));
    }

    let account = Account::from_payload(raw)?;
    if account.base() != *base {
        let mut errors = FieldErrors::new();
        errors.insert(
            "name".into(),
            vec![format!("payload does not match its entry \"{}\"", base.name)],
        );
        return Err(QuarryError::invalid_format("account payload", errors));
    }
    Ok((account, false))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::{AccountType, KeyAlgorithm, PublicKey};
    use crate::backend::{FileBackend, KdfParams, PlainBackend};
    use quarry_core::StaticPrompter;

    const MNEMONIC: &str = "abandon abandon abandon abandon abandon abandon \
                            abandon abandon abandon abandon abandon about";

    fn account(name: &str, seed: u8) -> Account {
        let keys = KeyPair::from_private_key_bytes(&[seed; 32]).unwrap();
        let address = AddressFormat::new("archway")
            .address_for(&keys.public_key().key)
            .unwrap();
        Account {
            name: name.into(),
            address,
            public_key: keys.public_key(),
            secret: AccountSecret::PrivateKey(keys.private_key()),
        }
    }

    fn plain(dir: &std::path::Path) -> Keystore {
        Keystore::new(
            Backend::Test(PlainBackend::new(dir)),
            Arc::new(StaticPrompter::cancelling()),
        )
    }

    /// Counts password prompts and answers each with the next scripted value.
    struct ScriptedPrompter {
        answers: Mutex<Vec<String>>,
        asked: Mutex<usize>,
    }

    impl ScriptedPrompter {
        fn new(answers: &[&str]) -> Self {
            Self {
                answers: Mutex::new(answers.iter().rev().map(|s| s.to_string()).collect()),
                asked: Mutex::new(0),
            }
        }
    }

    #[async_trait::async_trait]
    impl Prompter for ScriptedPrompter {
        async fn password(&self, _message: &str) -> Result<String> {
            *self.asked.lock() += 1;
            self.answers.lock().pop().ok_or(QuarryError::Cancelled)
        }

        async fn confirm(&self, _message: &str) -> Result<bool> {
            Ok(true)
        }
    }

    fn encrypted(dir: &std::path::Path, prompter: Arc<ScriptedPrompter>) -> Keystore {
        let backend = FileBackend::new(dir).with_kdf_params(KdfParams {
            memory_kib: 64,
            iterations: 1,
            lanes: 1,
        });
        Keystore::new(Backend::File(backend), prompter)
    }

    #[tokio::test]
    async fn save_then_get_by_name_or_address() {
        let dir = tempfile::tempdir().unwrap();
        let keystore = plain(dir.path());
        let alice = account("alice", 1);

        keystore.save(&alice).await.unwrap();

        assert_eq!(keystore.get("alice").await.unwrap(), alice);
        assert_eq!(keystore.get(&alice.address).await.unwrap(), alice);
        assert!(keystore.exists("alice").await.unwrap());
    }

    #[tokio::test]
    async fn duplicate_name_or_address_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let keystore = plain(dir.path());
        keystore.save(&account("alice", 1)).await.unwrap();

        let same_name = keystore.save(&account("alice", 2)).await.unwrap_err();
        assert!(matches!(same_name, QuarryError::AlreadyExists { .. }));

        let same_address = keystore.save(&account("bob", 1)).await.unwrap_err();
        assert!(matches!(same_address, QuarryError::AlreadyExists { .. }));

        assert_eq!(keystore.list_bases().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn names_and_addresses_cannot_collide() {
        let dir = tempfile::tempdir().unwrap();
        let keystore = plain(dir.path());
        let bob = account("bob", 1);
        keystore.save(&bob).await.unwrap();

        let impostor = account(&bob.address, 2);
        let err = keystore.save(&impostor).await.unwrap_err();
        assert!(matches!(err, QuarryError::AlreadyExists { .. }));

        let carol = account("carol", 3);
        let named_after_carol = Account {
            name: "dave".into(),
            ..carol.clone()
        };
        keystore.save(&named_after_carol).await.unwrap();
        let by_address = Account {
            name: carol.address.clone(),
            ..account("x", 4)
        };
        assert!(keystore.save(&by_address).await.is_err());

        assert_eq!(keystore.get(&bob.address).await.unwrap(), bob);
        assert_eq!(keystore.remove(&bob.address).await.unwrap().name, "bob");
        assert!(keystore.exists("dave").await.unwrap());
    }

    #[tokio::test]
    async fn unknown_accounts_are_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let keystore = plain(dir.path());

        assert!(matches!(
            keystore.get("unknown").await,
            Err(QuarryError::NotFound { .. })
        ));
        assert!(matches!(
            keystore.remove("unknown").await,
            Err(QuarryError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn remove_deletes_entry() {
        let dir = tempfile::tempdir().unwrap();
        let keystore = plain(dir.path());
        keystore.save(&account("alice", 1)).await.unwrap();

        let removed = keystore.remove("alice").await.unwrap();
        assert_eq!(removed.name, "alice");
        assert!(!keystore.exists("alice").await.unwrap());
    }

    #[tokio::test]
    async fn malformed_entries_do_not_break_listing() {
        let dir = tempfile::tempdir().unwrap();
        let keystore = plain(dir.path());
        keystore.save(&account("alice", 1)).await.unwrap();
        keystore.save(&account("bob", 2)).await.unwrap();
        std::fs::write(dir.path().join("bogus.account"), "{}").unwrap();
        std::fs::write(dir.path().join("README"), "notes").unwrap();

        let names: Vec<_> = keystore
            .list_bases()
            .await
            .unwrap()
            .into_iter()
            .map(|b| b.name)
            .collect();
        assert_eq!(names.len(), 2);
        assert!(names.contains(&"alice".to_string()));
        assert!(names.contains(&"bob".to_string()));
    }

    #[tokio::test]
    async fn payload_must_match_its_tag() {
        let dir = tempfile::tempdir().unwrap();
        let keystore = plain(dir.path());
        let alice = account("alice", 1);
        let mallory = Account {
            name: "mallory".into(),
            ..alice.clone()
        };
        let tag = Tag::encode(&alice.base());
        std::fs::write(dir.path().join(tag.as_str()), mallory.to_payload().unwrap()).unwrap();

        let err = keystore.get("alice").await.unwrap_err();
        assert!(matches!(err, QuarryError::InvalidFormat { .. }));
    }

    #[tokio::test]
    async fn legacy_payloads_read_purely_and_migrate_explicitly() {
        let dir = tempfile::tempdir().unwrap();
        let keystore = plain(dir.path());

        let keys =
            KeyPair::from_mnemonic(&parse_mnemonic(MNEMONIC).unwrap(), DEFAULT_HD_PATH).unwrap();
        let address = AddressFormat::new("archway")
            .address_for(&keys.public_key().key)
            .unwrap();
        let base = AccountBase::new("old", &address, AccountType::Local);
        let path = dir.path().join(Tag::encode(&base).as_str());
        let legacy = serde_json::json!({ "mnemonic": MNEMONIC }).to_string();
        std::fs::write(&path, &legacy).unwrap();

        let account = keystore.get("old").await.unwrap();
        assert_eq!(account.public_key, keys.public_key());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), legacy);

        let migrated = keystore.migrate().await.unwrap();
        assert_eq!(migrated, [base]);
        let rewritten = std::fs::read_to_string(&path).unwrap();
        assert!(rewritten.contains("privateKey"));
        assert!(!rewritten.contains("mnemonic"));

        assert!(keystore.migrate().await.unwrap().is_empty());
        assert_eq!(keystore.get("old").await.unwrap(), account);
    }

    #[tokio::test]
    async fn legacy_payload_under_foreign_address_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let keystore = plain(dir.path());

        let foreign = account("x", 9).address;
        let base = AccountBase::new("old", &foreign, AccountType::Local);
        let path = dir.path().join(Tag::encode(&base).as_str());
        let legacy = serde_json::json!({ "mnemonic": MNEMONIC }).to_string();
        std::fs::write(&path, &legacy).unwrap();

        let err = keystore.get("old").await.unwrap_err();
        assert!(matches!(err, QuarryError::InvalidFormat { .. }));
        assert!(keystore.migrate().await.is_err());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), legacy);
    }

    #[tokio::test]
    async fn password_is_prompted_once() {
        let dir = tempfile::tempdir().unwrap();
        let prompter = Arc::new(ScriptedPrompter::new(&["pw"]));
        let keystore = encrypted(dir.path(), prompter.clone());

        keystore.save(&account("alice", 1)).await.unwrap();
        keystore.save(&account("bob", 2)).await.unwrap();
        keystore.get("alice").await.unwrap();

        assert_eq!(*prompter.asked.lock(), 1);
    }

    #[tokio::test]
    async fn wrong_password_is_distinct_and_clears_cache() {
        let dir = tempfile::tempdir().unwrap();
        let writer = encrypted(dir.path(), Arc::new(ScriptedPrompter::new(&["right"])));
        writer.save(&account("alice", 1)).await.unwrap();

        let prompter = Arc::new(ScriptedPrompter::new(&["wrong", "right"]));
        let reader = encrypted(dir.path(), prompter.clone());

        let err = reader.get("alice").await.unwrap_err();
        assert!(matches!(err, QuarryError::InvalidPassword(_)));

        // The rejected password is not reused.
        reader.get("alice").await.unwrap();
        assert_eq!(*prompter.asked.lock(), 2);
    }

    #[tokio::test]
    async fn cancelled_prompt_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let keystore = encrypted(dir.path(), Arc::new(ScriptedPrompter::new(&[])));

        let err = keystore.save(&account("alice", 1)).await.unwrap_err();
        assert!(err.is_cancelled());
        assert!(keystore.list_bases().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn plain_backend_never_prompts() {
        let dir = tempfile::tempdir().unwrap();
        // A cancelling prompter would fail any prompt.
        let keystore = plain(dir.path());
        keystore.save(&account("alice", 1)).await.unwrap();
        keystore.get("alice").await.unwrap();
        keystore.unlock().await.unwrap();
    }

    #[tokio::test]
    async fn ledger_accounts_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let keystore = plain(dir.path());
        let ledger = Account {
            name: "hw".into(),
            address: account("x", 3).address,
            public_key: PublicKey {
                algo: KeyAlgorithm::Secp256k1,
                key: account("x", 3).public_key.key,
            },
            secret: AccountSecret::HdPath(DEFAULT_HD_PATH.into()),
        };

        keystore.save(&ledger).await.unwrap();
        let stored = keystore.get("hw").await.unwrap();
        assert_eq!(stored.account_type(), AccountType::Ledger);
        assert_eq!(stored.hd_path(), Some(DEFAULT_HD_PATH));
    }
}
