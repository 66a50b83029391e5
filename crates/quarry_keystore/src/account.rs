use std::fmt;
use std::str::FromStr;

use once_cell::sync::Lazy;
use quarry_core::json::parse_document;
use quarry_core::{FieldErrors, QuarryError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};

static ACCOUNT_NAME_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z][A-Za-z0-9_.-]{0,63}$").expect("valid account name regex")
});

/// Where an account's signing key lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountType {
    /// Private key held in the keystore.
    Local,
    /// Key held on a hardware device; only the HD path is stored.
    Ledger,
}

impl AccountType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Ledger => "ledger",
        }
    }
}

impl fmt::Display for AccountType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccountType {
    type Err = QuarryError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "local" => Ok(Self::Local),
            "ledger" => Ok(Self::Ledger),
            other => Err(QuarryError::invalid_value(
                "account type",
                other,
                "must be local or ledger",
            )),
        }
    }
}

/// Identity triple of an account. This is everything the keystore index
/// knows without reading the stored secret.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccountBase {
    pub name: String,
    pub address: String,
    #[serde(rename = "type")]
    pub account_type: AccountType,
}

impl AccountBase {
    pub fn new(
        name: impl Into<String>,
        address: impl Into<String>,
        account_type: AccountType,
    ) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            account_type,
        }
    }

    /// Whether `name_or_address` names this account.
    pub fn matches(&self, name_or_address: &str) -> bool {
        self.name == name_or_address || self.address == name_or_address
    }
}

/// Rejects names that do not fit the account name pattern.
pub fn validate_account_name(name: &str) -> Result<()> {
    if ACCOUNT_NAME_PATTERN.is_match(name) {
        Ok(())
    } else {
        Err(QuarryError::invalid_value(
            "account name",
            name,
            "must start with a letter and contain only letters, digits, '_', '.' or '-' (max 64)",
        ))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyAlgorithm {
    Secp256k1,
}

/// Compressed public key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKey {
    pub algo: KeyAlgorithm,
    #[serde(with = "b64")]
    pub key: Vec<u8>,
}

/// Raw private key bytes. `Debug` never prints the key.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivateKey {
    pub algo: KeyAlgorithm,
    #[serde(with = "b64")]
    pub key: Vec<u8>,
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrivateKey")
            .field("algo", &self.algo)
            .field("key", &"<redacted>")
            .finish()
    }
}

/// The durable secret of an account: a private key for local accounts, an
/// HD derivation path for ledger accounts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccountSecret {
    PrivateKey(PrivateKey),
    HdPath(String),
}

/// A complete stored account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub name: String,
    pub address: String,
    pub public_key: PublicKey,
    pub secret: AccountSecret,
}

impl Account {
    pub fn account_type(&self) -> AccountType {
        match self.secret {
            AccountSecret::PrivateKey(_) => AccountType::Local,
            AccountSecret::HdPath(_) => AccountType::Ledger,
        }
    }

    pub fn base(&self) -> AccountBase {
        AccountBase::new(&self.name, &self.address, self.account_type())
    }

    pub fn private_key(&self) -> Option<&PrivateKey> {
        match &self.secret {
            AccountSecret::PrivateKey(k) => Some(k),
            AccountSecret::HdPath(_) => None,
        }
    }

    pub fn hd_path(&self) -> Option<&str> {
        match &self.secret {
            AccountSecret::HdPath(p) => Some(p),
            AccountSecret::PrivateKey(_) => None,
        }
    }

    /// Serializes into the opaque payload handed to a storage backend.
    pub fn to_payload(&self) -> Result<String> {
        let (private_key, hd_path) = match &self.secret {
            AccountSecret::PrivateKey(k) => (Some(k.clone()), None),
            AccountSecret::HdPath(p) => (None, Some(p.clone())),
        };
        let payload = AccountPayload {
            name: self.name.clone(),
            address: self.address.clone(),
            account_type: self.account_type(),
            public_key: self.public_key.clone(),
            private_key,
            hd_path,
        };
        Ok(serde_json::to_string(&payload)?)
    }

    /// Parses a payload written by [`Account::to_payload`].
    pub fn from_payload(raw: &str) -> Result<Self> {
        let payload: AccountPayload = parse_document(raw, "account payload")?;
        payload.try_into()
    }
}

/// Wire shape of a stored account.
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountPayload {
    name: String,
    address: String,
    #[serde(rename = "type")]
    account_type: AccountType,
    public_key: PublicKey,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    private_key: Option<PrivateKey>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    hd_path: Option<String>,
}

impl TryFrom<AccountPayload> for Account {
    type Error = QuarryError;

    fn try_from(p: AccountPayload) -> Result<Self> {
        let secret = match (p.account_type, p.private_key, p.hd_path) {
            (AccountType::Local, Some(key), None) => AccountSecret::PrivateKey(key),
            (AccountType::Ledger, None, Some(path)) => AccountSecret::HdPath(path),
            (account_type, _, _) => {
                let mut errors = FieldErrors::new();
                let expected = match account_type {
                    AccountType::Local => "local accounts carry privateKey and no hdPath",
                    AccountType::Ledger => "ledger accounts carry hdPath and no privateKey",
                };
                errors.insert("type".into(), vec![expected.into()]);
                return Err(QuarryError::invalid_format("account payload", errors));
            }
        };
        Ok(Self {
            name: p.name,
            address: p.address,
            public_key: p.public_key,
            secret,
        })
    }
}

/// Base64 (standard alphabet) encoding for binary key material.
pub(crate) mod b64 {
    use base64::Engine as _;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(s.as_bytes()).map_err(serde::de::Error::custom)
    }
}
