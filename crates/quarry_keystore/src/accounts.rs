use std::fmt;

use async_trait::async_trait;
use futures::future::try_join_all;
use quarry_core::json::u128_string;
use quarry_core::{KeyringBackend, QuarryError, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::account::{
    Account, AccountBase, AccountSecret, AccountType, KeyAlgorithm, PublicKey,
    validate_account_name,
};
use crate::keys::{
    AddressFormat, DEFAULT_HD_PATH, KeyPair, generate_mnemonic, parse_hd_path, parse_mnemonic,
};
use crate::keystore::Keystore;

/// How `list` reads stored accounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadMode {
    /// One account at a time, in order. Keeps OS unlock prompts from
    /// stacking up.
    Sequential,
    /// All accounts at once.
    Concurrent,
}

impl ReadMode {
    pub fn default_for(backend: KeyringBackend) -> Self {
        match backend {
            KeyringBackend::Os => Self::Sequential,
            KeyringBackend::File | KeyringBackend::Test => Self::Concurrent,
        }
    }
}

/// Key material of a hardware-held account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerKey {
    /// Compressed secp256k1 public key reported by the device.
    pub public_key: Vec<u8>,
    pub hd_path: Option<String>,
}

/// Inputs of `Accounts::create`. At most one key source may be set; with
/// none, a fresh mnemonic is generated.
#[derive(Clone, Default)]
pub struct NewAccountOptions {
    pub mnemonic: Option<String>,
    pub private_key: Option<String>,
    pub ledger: Option<LedgerKey>,
}

impl fmt::Debug for NewAccountOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NewAccountOptions")
            .field("mnemonic", &self.mnemonic.as_ref().map(|_| "<redacted>"))
            .field("private_key", &self.private_key.as_ref().map(|_| "<redacted>"))
            .field("ledger", &self.ledger)
            .finish()
    }
}

enum KeySource {
    Generate,
    Mnemonic(String),
    PrivateKey(String),
    Ledger(LedgerKey),
}

impl NewAccountOptions {
    fn key_source(self) -> Result<KeySource> {
        let provided: Vec<String> = [
            ("mnemonic", self.mnemonic.is_some()),
            ("private-key", self.private_key.is_some()),
            ("ledger", self.ledger.is_some()),
        ]
        .into_iter()
        .filter(|(_, set)| *set)
        .map(|(name, _)| name.to_string())
        .collect();
        if provided.len() > 1 {
            return Err(QuarryError::OnlyOneArgSource(provided));
        }

        Ok(match (self.mnemonic, self.private_key, self.ledger) {
            (Some(words), _, _) => KeySource::Mnemonic(words),
            (_, Some(hex_key), _) => KeySource::PrivateKey(hex_key),
            (_, _, Some(ledger)) => KeySource::Ledger(ledger),
            _ => KeySource::Generate,
        })
    }
}

/// A newly stored account. `mnemonic` is set only when one was generated;
/// it is never persisted and must be shown to the user once.
#[derive(Clone)]
pub struct CreatedAccount {
    pub account: Account,
    pub mnemonic: Option<String>,
}

impl fmt::Debug for CreatedAccount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CreatedAccount")
            .field("account", &self.account)
            .field("mnemonic", &self.mnemonic.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coin {
    pub denom: String,
    #[serde(with = "u128_string")]
    pub amount: u128,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountBalance {
    pub account: AccountBase,
    pub coins: Vec<Coin>,
}

/// Bank balance lookup, provided by the chain client.
#[async_trait]
pub trait BalanceQuery: Send + Sync {
    async fn balances(&self, address: &str) -> Result<Vec<Coin>>;
}

/// User-facing account lifecycle over a [`Keystore`].
pub struct Accounts {
    keystore: Keystore,
    format: AddressFormat,
    read_mode: ReadMode,
}

impl Accounts {
    pub fn new(keystore: Keystore, format: AddressFormat) -> Self {
        let read_mode = ReadMode::default_for(keystore.backend().kind());
        Self {
            keystore,
            format,
            read_mode,
        }
    }

    pub fn with_read_mode(mut self, read_mode: ReadMode) -> Self {
        self.read_mode = read_mode;
        self
    }

    pub fn keystore(&self) -> &Keystore {
        &self.keystore
    }

    pub fn address_format(&self) -> &AddressFormat {
        &self.format
    }

    pub fn read_mode(&self) -> ReadMode {
        self.read_mode
    }

    /// Creates and stores an account from the single key source in `options`.
    pub async fn create(&self, name: &str, options: NewAccountOptions) -> Result<CreatedAccount> {
        validate_account_name(name)?;
        if self.format.validate(name).is_ok() {
            return Err(QuarryError::invalid_value(
                "account name",
                name,
                "must not be an address",
            ));
        }

        let (account, mnemonic) = match options.key_source()? {
            KeySource::Generate => {
                let mnemonic = generate_mnemonic()?;
                let keys = KeyPair::from_mnemonic(&mnemonic, DEFAULT_HD_PATH)?;
                (self.local_account(name, &keys)?, Some(mnemonic.to_string()))
            }
            KeySource::Mnemonic(words) => {
                let keys = KeyPair::from_mnemonic(&parse_mnemonic(&words)?, DEFAULT_HD_PATH)?;
                (self.local_account(name, &keys)?, None)
            }
            KeySource::PrivateKey(hex_key) => {
                let keys = KeyPair::from_private_key_hex(&hex_key)?;
                (self.local_account(name, &keys)?, None)
            }
            KeySource::Ledger(ledger) => (self.ledger_account(name, ledger)?, None),
        };

        self.keystore.save(&account).await?;
        info!(
            account = %account.name,
            address = %account.address,
            account_type = %account.account_type(),
            "account created"
        );
        Ok(CreatedAccount { account, mnemonic })
    }

    fn local_account(&self, name: &str, keys: &KeyPair) -> Result<Account> {
        let public_key = keys.public_key();
        Ok(Account {
            name: name.to_string(),
            address: self.format.address_for(&public_key.key)?,
            public_key,
            secret: AccountSecret::PrivateKey(keys.private_key()),
        })
    }

    fn ledger_account(&self, name: &str, ledger: LedgerKey) -> Result<Account> {
        let hd_path = ledger.hd_path.unwrap_or_else(|| DEFAULT_HD_PATH.to_string());
        parse_hd_path(&hd_path)?;
        if ledger.public_key.len() != 33 {
            return Err(QuarryError::invalid_value(
                "ledger public key",
                hex::encode(&ledger.public_key),
                "expected a 33-byte compressed secp256k1 key",
            ));
        }
        Ok(Account {
            name: name.to_string(),
            address: self.format.address_for(&ledger.public_key)?,
            public_key: PublicKey {
                algo: KeyAlgorithm::Secp256k1,
                key: ledger.public_key,
            },
            secret: AccountSecret::HdPath(hd_path),
        })
    }

    pub async fn get(&self, name_or_address: &str) -> Result<Account> {
        self.keystore.get(name_or_address).await
    }

    /// Every stored account, read according to the configured [`ReadMode`].
    pub async fn list(&self) -> Result<Vec<Account>> {
        let bases = self.keystore.list_bases().await?;
        match self.read_mode {
            ReadMode::Sequential => {
                let mut accounts = Vec::with_capacity(bases.len());
                for base in &bases {
                    let (account, _) = self.keystore.get_base(base).await?;
                    accounts.push(account);
                }
                Ok(accounts)
            }
            ReadMode::Concurrent => {
                // One prompt up front rather than one per read.
                self.keystore.unlock().await?;
                let reads = bases.iter().map(|base| self.keystore.get_base(base));
                let accounts = try_join_all(reads).await?;
                Ok(accounts.into_iter().map(|(account, _)| account).collect())
            }
        }
    }

    /// Identity of every stored account without reading any secret.
    pub async fn list_name_and_address(&self) -> Result<Vec<AccountBase>> {
        self.keystore.list_bases().await
    }

    pub async fn remove(&self, name_or_address: &str) -> Result<AccountBase> {
        self.keystore.remove(name_or_address).await
    }

    /// The stored account at `address`, or a nameless record for a
    /// well-formed address the keystore does not hold.
    pub async fn account_base_from_address(&self, address: &str) -> Result<AccountBase> {
        self.format.validate(address)?;
        Ok(self
            .keystore
            .find(address)
            .await?
            .filter(|b| b.address == address)
            .unwrap_or_else(|| AccountBase::new("", address, AccountType::Local)))
    }

    /// Hex-encoded private key of a local account.
    pub async fn export(&self, name_or_address: &str) -> Result<String> {
        let account = self.get(name_or_address).await?;
        let key = account.private_key().ok_or_else(|| {
            QuarryError::invalid_value(
                "account",
                &account.name,
                "ledger accounts have no exportable private key",
            )
        })?;
        Ok(hex::encode(&key.key))
    }

    /// Balances of a stored account, or of any well-formed address.
    pub async fn balance(
        &self,
        name_or_address: &str,
        query: &dyn BalanceQuery,
    ) -> Result<AccountBalance> {
        let account = match self.keystore.find(name_or_address).await? {
            Some(base) => base,
            None => self.account_base_from_address(name_or_address).await?,
        };
        let coins = query.balances(&account.address).await?;
        Ok(AccountBalance { account, coins })
    }
}
