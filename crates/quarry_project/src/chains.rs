use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use quarry_core::config::is_valid_chain_id;
use quarry_core::json::{self, parse_document};
use quarry_core::{QuarryError, Result};
use quarry_keystore::AddressFormat;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{info, warn};

/// Rejects ids that cannot be used as `<chain_id>.json` file names.
pub fn validate_chain_id(chain_id: &str) -> Result<()> {
    if is_valid_chain_id(chain_id) {
        Ok(())
    } else {
        Err(QuarryError::invalid_value(
            "chain id",
            chain_id,
            "must start with a letter or digit and contain only letters, digits, '.', '_' or '-'",
        ))
    }
}

/// Validate that a URL is well-formed and uses HTTP or HTTPS.
pub fn validate_url(url: &str) -> bool {
    match url::Url::parse(url) {
        Ok(parsed) => {
            let scheme = parsed.scheme();
            (scheme == "http" || scheme == "https") && parsed.host().is_some()
        }
        Err(_) => false,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkType {
    Mainnet,
    Testnet,
    Devnet,
    Localnet,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeeToken {
    pub denom: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Fees {
    #[serde(default)]
    pub fee_tokens: Vec<FeeToken>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Endpoint {
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Apis {
    #[serde(default)]
    pub rpc: Vec<Endpoint>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rest: Vec<Endpoint>,
}

/// Chain descriptor in the cosmos chain-registry layout. Fields this crate
/// does not model are kept in `extra` and written back on import.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CosmosChain {
    pub chain_id: String,
    pub chain_name: String,
    #[serde(default)]
    pub pretty_name: String,
    pub network_type: NetworkType,
    pub bech32_prefix: String,
    #[serde(default)]
    pub fees: Fees,
    #[serde(default)]
    pub apis: Apis,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl CosmosChain {
    pub fn address_format(&self) -> AddressFormat {
        AddressFormat::new(&self.bech32_prefix)
    }

    /// First listed fee denom.
    pub fn fee_denom(&self) -> Option<&str> {
        self.fees.fee_tokens.first().map(|t| t.denom.as_str())
    }

    /// First listed RPC endpoint.
    pub fn rpc_endpoint(&self) -> Option<&str> {
        self.apis.rpc.first().map(|e| e.address.as_str())
    }

    /// Checks the fields the rest of the tool relies on.
    pub fn validate(&self) -> Result<()> {
        validate_chain_id(&self.chain_id)?;
        if self.chain_name.trim().is_empty() {
            return Err(QuarryError::invalid_value(
                "chain name",
                &self.chain_name,
                "must not be empty",
            ));
        }
        // Rejects prefixes bech32 cannot encode.
        self.address_format().address_for(&[2; 33])?;
        for endpoint in self.apis.rpc.iter().chain(&self.apis.rest) {
            if !validate_url(&endpoint.address) {
                return Err(QuarryError::invalid_value(
                    "endpoint",
                    &endpoint.address,
                    "must be an http(s) URL",
                ));
            }
        }
        Ok(())
    }
}

fn builtin(
    chain_id: &str,
    network_type: NetworkType,
    pretty_name: &str,
    denom: &str,
    rpc: &str,
) -> CosmosChain {
    CosmosChain {
        chain_id: chain_id.into(),
        chain_name: "archway".into(),
        pretty_name: pretty_name.into(),
        network_type,
        bech32_prefix: "archway".into(),
        fees: Fees {
            fee_tokens: vec![FeeToken {
                denom: denom.into(),
                extra: Map::new(),
            }],
        },
        apis: Apis {
            rpc: vec![Endpoint {
                address: rpc.into(),
                provider: None,
            }],
            rest: Vec::new(),
        },
        extra: Map::new(),
    }
}

/// Chains known without any imported file.
pub fn builtin_chains() -> Vec<CosmosChain> {
    vec![
        builtin(
            "archway-1",
            NetworkType::Mainnet,
            "Archway",
            "aarch",
            "https://rpc.mainnet.archway.io",
        ),
        builtin(
            "constantine-3",
            NetworkType::Testnet,
            "Archway Constantine",
            "aconst",
            "https://rpc.constantine.archway.io",
        ),
        builtin(
            "titus-4",
            NetworkType::Devnet,
            "Archway Titus",
            "atitus",
            "https://rpc.titus.archway.io",
        ),
    ]
}

/// An imported file whose name disagrees with the chain id it declares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainWarning {
    pub chain_id: String,
    pub file: PathBuf,
}

impl fmt::Display for ChainWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} declares chain_id \"{}\"; rename it to {}.json",
            self.file.display(),
            self.chain_id,
            self.chain_id
        )
    }
}

/// Built-in chains overlaid with the chain files imported into a project.
#[derive(Debug, Clone)]
pub struct ChainRegistry {
    dir: PathBuf,
    chains: BTreeMap<String, CosmosChain>,
    warnings: BTreeMap<String, ChainWarning>,
}

impl ChainRegistry {
    /// Loads the built-ins, then every `*.json` in `dir` (which may be
    /// absent). A file whose name differs from its `chain_id` is still
    /// loaded but produces a warning; a correctly named file for the same
    /// id takes precedence and suppresses the warning.
    pub fn load(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        let mut chains: BTreeMap<String, CosmosChain> = builtin_chains()
            .into_iter()
            .map(|c| (c.chain_id.clone(), c))
            .collect();

        let mut matching = Vec::new();
        let mut mismatched = Vec::new();
        for path in chain_files(&dir)? {
            let content =
                std::fs::read_to_string(&path).map_err(|e| QuarryError::io(&path, e))?;
            let chain: CosmosChain = parse_document(&content, &path.display().to_string())?;
            let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
            if stem == chain.chain_id {
                matching.push(chain);
            } else {
                mismatched.push((path, chain));
            }
        }

        let mut warnings = BTreeMap::new();
        for (file, chain) in mismatched {
            let chain_id = chain.chain_id.clone();
            warn!(
                file = %file.display(),
                chain_id = %chain_id,
                "chain file name does not match chain_id"
            );
            warnings.insert(
                chain_id.clone(),
                ChainWarning {
                    chain_id: chain_id.clone(),
                    file,
                },
            );
            chains.insert(chain_id, chain);
        }
        for chain in matching {
            warnings.remove(&chain.chain_id);
            chains.insert(chain.chain_id.clone(), chain);
        }

        Ok(Self {
            dir,
            chains,
            warnings,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Writes `chain` to `<dir>/<chain_id>.json` and registers it, replacing
    /// any entry with the same id. Returns whether an entry was replaced.
    pub fn import(&mut self, chain: CosmosChain) -> Result<bool> {
        chain.validate()?;
        let path = self.dir.join(format!("{}.json", chain.chain_id));
        json::write_file(&path, &chain)?;

        let chain_id = chain.chain_id.clone();
        self.warnings.remove(&chain_id);
        let replaced = self.chains.insert(chain_id.clone(), chain).is_some();
        info!(chain_id = %chain_id, replaced, "chain imported");
        Ok(replaced)
    }

    pub fn get(&self, chain_id: &str) -> Option<&CosmosChain> {
        self.chains.get(chain_id)
    }

    pub fn assert_get(&self, chain_id: &str) -> Result<&CosmosChain> {
        self.get(chain_id)
            .ok_or_else(|| QuarryError::not_found("Chain", chain_id))
    }

    /// All chains, sorted by id.
    pub fn list(&self) -> Vec<&CosmosChain> {
        self.chains.values().collect()
    }

    pub fn is_builtin(chain_id: &str) -> bool {
        builtin_chains().iter().any(|c| c.chain_id == chain_id)
    }

    pub fn warnings(&self) -> Vec<&ChainWarning> {
        self.warnings.values().collect()
    }

    pub fn warning(&self, chain_id: &str) -> Option<&ChainWarning> {
        self.warnings.get(chain_id)
    }
}

fn chain_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(QuarryError::io(dir, e)),
    };

    let mut files = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| QuarryError::io(dir, e))?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "json") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}
