use std::str::FromStr;

use bip39::Mnemonic;
use bitcoin::bech32::{self, Bech32, Hrp};
use bitcoin::bip32::{DerivationPath, Xpriv};
use bitcoin::hashes::{Hash, hash160};
use bitcoin::secp256k1::{PublicKey as SecpPublicKey, Secp256k1, SecretKey};
use quarry_core::{QuarryError, Result};

use crate::account::{KeyAlgorithm, PrivateKey, PublicKey};

/// Cosmos SDK default derivation path (coin type 118).
pub const DEFAULT_HD_PATH: &str = "m/44'/118'/0'/0/0";

const MNEMONIC_ENTROPY_LEN: usize = 32;
const ADDRESS_LEN: usize = 20;
const CONTRACT_ADDRESS_LEN: usize = 32;

/// A secp256k1 key pair derived for an account.
#[derive(Clone)]
pub struct KeyPair {
    secret: SecretKey,
    public: [u8; 33],
}

impl KeyPair {
    pub fn from_secret(secret: SecretKey) -> Self {
        let secp = Secp256k1::signing_only();
        let public = SecpPublicKey::from_secret_key(&secp, &secret).serialize();
        Self { secret, public }
    }

    pub fn from_private_key_bytes(bytes: &[u8]) -> Result<Self> {
        let secret = SecretKey::from_slice(bytes).map_err(|e| {
            QuarryError::invalid_value("private key", "<redacted>", e.to_string())
        })?;
        Ok(Self::from_secret(secret))
    }

    pub fn from_private_key_hex(hex_key: &str) -> Result<Self> {
        let bytes = hex::decode(hex_key.trim().trim_start_matches("0x")).map_err(|_| {
            QuarryError::invalid_value("private key", "<redacted>", "must be hex encoded")
        })?;
        Self::from_private_key_bytes(&bytes)
    }

    /// Derives the key at `hd_path` from a BIP-39 mnemonic (empty passphrase).
    pub fn from_mnemonic(mnemonic: &Mnemonic, hd_path: &str) -> Result<Self> {
        let path = parse_hd_path(hd_path)?;
        let seed = mnemonic.to_seed("");
        let secp = Secp256k1::new();
        let master = Xpriv::new_master(bitcoin::Network::Bitcoin, &seed)
            .map_err(|e| QuarryError::Storage(format!("key derivation failed: {e}")))?;
        let child = master
            .derive_priv(&secp, &path)
            .map_err(|e| QuarryError::Storage(format!("key derivation failed: {e}")))?;
        Ok(Self::from_secret(child.private_key))
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey {
            algo: KeyAlgorithm::Secp256k1,
            key: self.public.to_vec(),
        }
    }

    pub fn private_key(&self) -> PrivateKey {
        PrivateKey {
            algo: KeyAlgorithm::Secp256k1,
            key: self.secret.secret_bytes().to_vec(),
        }
    }
}

/// Generates a fresh 24-word mnemonic.
pub fn generate_mnemonic() -> Result<Mnemonic> {
    let entropy: [u8; MNEMONIC_ENTROPY_LEN] = rand::random();
    Mnemonic::from_entropy(&entropy)
        .map_err(|e| QuarryError::Storage(format!("mnemonic generation failed: {e}")))
}

pub fn parse_mnemonic(words: &str) -> Result<Mnemonic> {
    Mnemonic::parse(words.trim())
        .map_err(|e| QuarryError::invalid_value("mnemonic", "<redacted>", e.to_string()))
}

pub fn parse_hd_path(hd_path: &str) -> Result<DerivationPath> {
    DerivationPath::from_str(hd_path)
        .map_err(|e| QuarryError::invalid_value("hd path", hd_path, e.to_string()))
}

/// Bech32 address format of a chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressFormat {
    prefix: String,
}

impl AddressFormat {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Format of an existing address, taken from its human-readable part.
    pub fn of_address(address: &str) -> Result<Self> {
        let (hrp, _) = bech32::decode(address)
            .map_err(|e| QuarryError::invalid_value("address", address, e.to_string()))?;
        Ok(Self::new(hrp.to_lowercase()))
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// `bech32(prefix, RIPEMD160(SHA256(compressed_pubkey)))`
    pub fn address_for(&self, public_key: &[u8]) -> Result<String> {
        let hrp = Hrp::parse(&self.prefix).map_err(|e| {
            QuarryError::invalid_value("bech32 prefix", &self.prefix, e.to_string())
        })?;
        let hash = hash160::Hash::hash(public_key).to_byte_array();
        bech32::encode::<Bech32>(hrp, &hash)
            .map_err(|e| QuarryError::Storage(format!("address encoding failed: {e}")))
    }

    /// Accepts account (20-byte) and contract (32-byte) addresses carrying
    /// this chain's prefix.
    pub fn validate(&self, address: &str) -> Result<()> {
        let invalid = |reason: String| QuarryError::invalid_value("address", address, reason);

        let (hrp, data) = bech32::decode(address).map_err(|e| invalid(e.to_string()))?;
        if hrp.to_lowercase() != self.prefix {
            return Err(invalid(format!("expected prefix \"{}\"", self.prefix)));
        }
        if data.len() != ADDRESS_LEN && data.len() != CONTRACT_ADDRESS_LEN {
            return Err(invalid(format!(
                "expected {ADDRESS_LEN} or {CONTRACT_ADDRESS_LEN} bytes, found {}",
                data.len()
            )));
        }
        Ok(())
    }
}
