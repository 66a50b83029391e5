//! Account keystore: key derivation, tag-indexed storage backends and the
//! account lifecycle built on top of them.

pub mod account;
pub mod accounts;
pub mod backend;
pub mod keys;
pub mod keystore;
pub mod tag;

pub use account::{
    Account, AccountBase, AccountSecret, AccountType, KeyAlgorithm, PrivateKey, PublicKey,
    validate_account_name,
};
pub use accounts::{
    AccountBalance, Accounts, BalanceQuery, Coin, CreatedAccount, LedgerKey, NewAccountOptions,
    ReadMode,
};
pub use backend::{Backend, FileBackend, KdfParams, OsBackend, PlainBackend, StorageBackend};
pub use keys::{AddressFormat, DEFAULT_HD_PATH, KeyPair};
pub use keystore::Keystore;
pub use tag::{InvalidTag, Tag};
