//! Storage tags: the only index into a backend.
//!
//! A tag is `base64url(name ":" type ":" address) + ".account"`. The suffix
//! keeps account entries distinguishable from anything else sharing the
//! backend namespace (the OS backend's index entry, stray files in a keyring
//! directory). Valid account names and bech32 addresses never contain the
//! separator, so decoding is the exact inverse of encoding.

use std::fmt;

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use thiserror::Error;

use crate::account::{AccountBase, AccountType};

pub const TAG_SUFFIX: &str = ".account";
const SEPARATOR: char = ':';

/// Why a string is not a valid tag.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidTag {
    #[error("missing \".account\" suffix")]
    MissingSuffix,
    #[error("body is not base64url")]
    Encoding,
    #[error("expected 3 fields, found {0}")]
    FieldCount(usize),
    #[error("unknown account type \"{0}\"")]
    AccountType(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Tag(String);

impl Tag {
    pub fn encode(base: &AccountBase) -> Self {
        let joined = format!(
            "{}{SEPARATOR}{}{SEPARATOR}{}",
            base.name,
            base.account_type.as_str(),
            base.address
        );
        Self(format!("{}{TAG_SUFFIX}", URL_SAFE_NO_PAD.encode(joined)))
    }

    /// Decodes a raw backend key. Never panics; malformed input yields
    /// [`InvalidTag`] so listing code can skip it.
    pub fn decode(raw: &str) -> Result<AccountBase, InvalidTag> {
        let body = raw.strip_suffix(TAG_SUFFIX).ok_or(InvalidTag::MissingSuffix)?;
        let bytes = URL_SAFE_NO_PAD
            .decode(body.as_bytes())
            .map_err(|_| InvalidTag::Encoding)?;
        let joined = String::from_utf8(bytes).map_err(|_| InvalidTag::Encoding)?;

        let fields: Vec<&str> = joined.split(SEPARATOR).collect();
        let [name, account_type, address] = fields[..] else {
            return Err(InvalidTag::FieldCount(fields.len()));
        };
        let account_type = account_type
            .parse::<AccountType>()
            .map_err(|_| InvalidTag::AccountType(account_type.to_string()))?;

        Ok(AccountBase::new(name, address, account_type))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&AccountBase> for Tag {
    fn from(base: &AccountBase) -> Self {
        Self::encode(base)
    }
}

/// Decodes every well-formed tag in `raw`, skipping the rest.
pub fn decode_all<'a>(raw: impl IntoIterator<Item = &'a str>) -> Vec<AccountBase> {
    raw.into_iter()
        .filter_map(|t| match Tag::decode(t) {
            Ok(base) => Some(base),
            Err(reason) => {
                tracing::debug!(tag = t, %reason, "skipping malformed keystore entry");
                None
            }
        })
        .collect()
}
