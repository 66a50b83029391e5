//! Per-chain, append-only history of contract lifecycle actions.
//!
//! Each chain's history lives in `<dir>/<chain_id>.json` as
//! `{ "deployments": [...] }`, newest first. Records are never edited;
//! a correction is a new record.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use quarry_core::json::{self, parse_document};
use quarry_core::{MergeMode, QuarryError, Result, deep_merge};
use quarry_keystore::Coin;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::chains::validate_chain_id;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentAction {
    Store,
    Instantiate,
    Metadata,
    Migrate,
    Premium,
}

impl DeploymentAction {
    pub const ALL: [DeploymentAction; 5] = [
        Self::Store,
        Self::Instantiate,
        Self::Metadata,
        Self::Migrate,
        Self::Premium,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Store => "store",
            Self::Instantiate => "instantiate",
            Self::Metadata => "metadata",
            Self::Migrate => "migrate",
            Self::Premium => "premium",
        }
    }
}

impl fmt::Display for DeploymentAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeploymentAction {
    type Err = QuarryError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| {
                QuarryError::invalid_value(
                    "deployment action",
                    s,
                    "must be one of store, instantiate, metadata, migrate, premium",
                )
            })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractRef {
    pub name: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WasmRef {
    pub code_id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

/// Rewards metadata registered for a contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractMetadata {
    pub contract_address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rewards_address: Option<String>,
}

/// The action of a record together with its action-specific payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum DeploymentDetails {
    Store,
    Instantiate {
        msg: Value,
    },
    Metadata {
        metadata: ContractMetadata,
    },
    Migrate {
        msg: Value,
    },
    Premium {
        #[serde(rename = "flatFee")]
        flat_fee: Coin,
    },
}

impl DeploymentDetails {
    pub fn action(&self) -> DeploymentAction {
        match self {
            Self::Store => DeploymentAction::Store,
            Self::Instantiate { .. } => DeploymentAction::Instantiate,
            Self::Metadata { .. } => DeploymentAction::Metadata,
            Self::Migrate { .. } => DeploymentAction::Migrate,
            Self::Premium { .. } => DeploymentAction::Premium,
        }
    }
}

/// One recorded on-chain action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deployment {
    #[serde(flatten)]
    pub details: DeploymentDetails,
    pub contract: ContractRef,
    pub wasm: WasmRef,
    pub txhash: String,
}

impl Deployment {
    pub fn action(&self) -> DeploymentAction {
        self.details.action()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeploymentFile {
    #[serde(default)]
    pub deployments: Vec<Deployment>,
}

/// A record tagged with the chain it belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainDeployment {
    #[serde(rename = "chainId")]
    pub chain_id: String,
    #[serde(flatten)]
    pub deployment: Deployment,
}

/// Export shape covering several chains.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SingleDeploymentFile {
    pub deployments: Vec<ChainDeployment>,
}

/// Which records a query selects. Every unset field matches everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeploymentFilter<'a> {
    pub chain_id: Option<&'a str>,
    pub action: Option<DeploymentAction>,
    pub contract_name: Option<&'a str>,
}

impl DeploymentFilter<'_> {
    fn matches(&self, chain_id: &str, deployment: &Deployment) -> bool {
        self.chain_id.is_none_or(|c| c == chain_id)
            && self.action.is_none_or(|a| a == deployment.action())
            && self
                .contract_name
                .is_none_or(|n| n == deployment.contract.name)
    }
}

#[derive(Debug, Clone)]
pub struct DeploymentLedger {
    dir: PathBuf,
    chains: BTreeMap<String, Vec<Deployment>>,
}

impl DeploymentLedger {
    /// Loads every `<chain_id>.json` in `dir`. A missing directory is an
    /// empty ledger.
    pub fn load(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        let mut chains = BTreeMap::new();

        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => Some(entries),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(QuarryError::io(&dir, e)),
        };
        for entry in entries.into_iter().flatten() {
            let path = entry.map_err(|e| QuarryError::io(&dir, e))?.path();
            if !path.is_file() || path.extension().is_none_or(|ext| ext != "json") {
                continue;
            }
            let Some(chain_id) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let chain_id = chain_id.to_string();
            let file = read_chain_file(&path)?;
            debug!(chain_id = %chain_id, count = file.deployments.len(), "deployments loaded");
            chains.insert(chain_id, file.deployments);
        }

        Ok(Self { dir, chains })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn chain_path(&self, chain_id: &str) -> PathBuf {
        self.dir.join(format!("{chain_id}.json"))
    }

    /// Prepends `deployment` to `chain_id`'s history and persists it. The
    /// file is rewritten only once the whole new document is assembled.
    pub fn add_deployment(&mut self, deployment: Deployment, chain_id: &str) -> Result<()> {
        validate_chain_id(chain_id)?;
        let path = self.chain_path(chain_id);

        let current = read_chain_file(&path)?;
        let overlay = DeploymentFile {
            deployments: vec![deployment.clone()],
        };
        let merged = deep_merge(
            serde_json::to_value(&current)?,
            serde_json::to_value(&overlay)?,
            MergeMode::Prepend,
        );
        let updated: DeploymentFile = serde_json::from_value(merged)?;
        json::write_file(&path, &updated)?;

        info!(
            chain_id = %chain_id,
            action = %deployment.action(),
            contract = %deployment.contract.name,
            txhash = %deployment.txhash,
            "deployment recorded"
        );
        self.chains.insert(chain_id.to_string(), updated.deployments);
        Ok(())
    }

    /// History of one chain, newest first.
    pub fn deployments(&self, chain_id: &str) -> &[Deployment] {
        self.chains.get(chain_id).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn chain_ids(&self) -> impl Iterator<Item = &str> {
        self.chains.keys().map(String::as_str)
    }

    /// Matching records across chains; chains in id order, each newest first.
    pub fn filter(&self, filter: DeploymentFilter<'_>) -> Vec<ChainDeployment> {
        self.chains
            .iter()
            .flat_map(|(chain_id, deployments)| {
                deployments
                    .iter()
                    .filter(move |d| filter.matches(chain_id, d))
                    .map(move |d| ChainDeployment {
                        chain_id: chain_id.clone(),
                        deployment: d.clone(),
                    })
            })
            .collect()
    }

    /// Most recent record of `action` for `contract_name` on `chain_id`.
    pub fn find_last(
        &self,
        action: DeploymentAction,
        contract_name: &str,
        chain_id: &str,
    ) -> Option<&Deployment> {
        self.deployments(chain_id)
            .iter()
            .find(|d| d.action() == action && d.contract.name == contract_name)
    }

    pub fn find_store_deployment(
        &self,
        contract_name: &str,
        chain_id: &str,
    ) -> Option<&Deployment> {
        self.find_last(DeploymentAction::Store, contract_name, chain_id)
    }

    pub fn find_instantiate_deployment(
        &self,
        contract_name: &str,
        chain_id: &str,
    ) -> Option<&Deployment> {
        self.find_last(DeploymentAction::Instantiate, contract_name, chain_id)
    }

    pub fn find_migrate_deployment(
        &self,
        contract_name: &str,
        chain_id: &str,
    ) -> Option<&Deployment> {
        self.find_last(DeploymentAction::Migrate, contract_name, chain_id)
    }

    pub fn find_metadata_deployment(
        &self,
        contract_name: &str,
        chain_id: &str,
    ) -> Option<&Deployment> {
        self.find_last(DeploymentAction::Metadata, contract_name, chain_id)
    }

    pub fn find_premium_deployment(
        &self,
        contract_name: &str,
        chain_id: &str,
    ) -> Option<&Deployment> {
        self.find_last(DeploymentAction::Premium, contract_name, chain_id)
    }

    /// Address of `contract_name` on `chain_id`, taken from the most recent
    /// instantiate or migrate record.
    pub fn contract_address(&self, contract_name: &str, chain_id: &str) -> Result<String> {
        self.deployments(chain_id)
            .iter()
            .filter(|d| d.contract.name == contract_name)
            .filter(|d| {
                matches!(
                    d.action(),
                    DeploymentAction::Instantiate | DeploymentAction::Migrate
                )
            })
            .find_map(|d| d.contract.address.clone())
            .ok_or_else(|| {
                QuarryError::not_found(
                    "Contract address",
                    format!("{contract_name} on {chain_id}"),
                )
            })
    }

    /// Flattens the filtered view into one exportable document.
    pub fn to_single_deployment_file(&self, filter: DeploymentFilter<'_>) -> SingleDeploymentFile {
        SingleDeploymentFile {
            deployments: self.filter(filter),
        }
    }
}

fn read_chain_file(path: &Path) -> Result<DeploymentFile> {
    match std::fs::read_to_string(path) {
        Ok(content) => parse_document(&content, &path.display().to_string()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(DeploymentFile::default()),
        Err(e) => Err(QuarryError::io(path, e)),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    const CHAIN: &str = "constantine-3";

    fn store(name: &str, code_id: u64) -> Deployment {
        Deployment {
            details: DeploymentDetails::Store,
            contract: ContractRef {
                name: name.into(),
                version: "0.1.0".into(),
                address: None,
                admin: None,
            },
            wasm: WasmRef {
                code_id,
                checksum: Some("abc123".into()),
            },
            txhash: format!("TX{code_id}"),
        }
    }

    fn instantiate(name: &str, code_id: u64, address: &str) -> Deployment {
        Deployment {
            details: DeploymentDetails::Instantiate {
                msg: json!({ "count": 0 }),
            },
            contract: ContractRef {
                name: name.into(),
                version: "0.1.0".into(),
                address: Some(address.into()),
                admin: Some("archway1admin".into()),
            },
            wasm: WasmRef {
                code_id,
                checksum: None,
            },
            txhash: format!("TXI{code_id}"),
        }
    }

    #[test]
    fn missing_directory_is_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let ledger = DeploymentLedger::load(tmp.path().join("deployments")).unwrap();
        assert!(ledger.deployments(CHAIN).is_empty());
        assert!(ledger.find_store_deployment("counter", CHAIN).is_none());
    }

    #[test]
    fn newest_record_wins() {
        let tmp = tempfile::tempdir().unwrap();
        let mut ledger = DeploymentLedger::load(tmp.path()).unwrap();

        ledger.add_deployment(store("counter", 1), CHAIN).unwrap();
        ledger.add_deployment(store("counter", 2), CHAIN).unwrap();

        let found = ledger.find_store_deployment("counter", CHAIN).unwrap();
        assert_eq!(found.wasm.code_id, 2);

        let codes: Vec<_> = ledger.deployments(CHAIN).iter().map(|d| d.wasm.code_id).collect();
        assert_eq!(codes, [2, 1]);
    }

    #[test]
    fn records_persist_newest_first() {
        let tmp = tempfile::tempdir().unwrap();
        let mut ledger = DeploymentLedger::load(tmp.path()).unwrap();
        ledger.add_deployment(store("counter", 1), CHAIN).unwrap();
        ledger
            .add_deployment(instantiate("counter", 1, "archway1counter"), CHAIN)
            .unwrap();

        let raw: Value = serde_json::from_str(
            &std::fs::read_to_string(tmp.path().join("constantine-3.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(raw["deployments"][0]["action"], "instantiate");
        assert_eq!(raw["deployments"][0]["msg"]["count"], 0);
        assert_eq!(raw["deployments"][1]["action"], "store");
        assert_eq!(raw["deployments"][1]["wasm"]["codeId"], 1);

        let reloaded = DeploymentLedger::load(tmp.path()).unwrap();
        assert_eq!(reloaded.deployments(CHAIN), ledger.deployments(CHAIN));
    }

    #[test]
    fn finders_match_action_contract_and_chain() {
        let tmp = tempfile::tempdir().unwrap();
        let mut ledger = DeploymentLedger::load(tmp.path()).unwrap();
        ledger.add_deployment(store("counter", 1), CHAIN).unwrap();
        ledger.add_deployment(store("other", 5), CHAIN).unwrap();
        ledger.add_deployment(store("counter", 9), "titus-4").unwrap();

        assert_eq!(
            ledger.find_store_deployment("counter", CHAIN).unwrap().wasm.code_id,
            1
        );
        assert_eq!(
            ledger.find_store_deployment("counter", "titus-4").unwrap().wasm.code_id,
            9
        );
        assert!(ledger.find_instantiate_deployment("counter", CHAIN).is_none());
        assert!(ledger.find_store_deployment("missing", CHAIN).is_none());
    }

    #[test]
    fn contract_address_from_latest_instantiate_or_migrate() {
        let tmp = tempfile::tempdir().unwrap();
        let mut ledger = DeploymentLedger::load(tmp.path()).unwrap();
        assert!(matches!(
            ledger.contract_address("counter", CHAIN),
            Err(QuarryError::NotFound { .. })
        ));

        ledger
            .add_deployment(instantiate("counter", 1, "archway1first"), CHAIN)
            .unwrap();
        ledger
            .add_deployment(instantiate("counter", 2, "archway1second"), CHAIN)
            .unwrap();
        assert_eq!(ledger.contract_address("counter", CHAIN).unwrap(), "archway1second");

        let mut migrate = instantiate("counter", 3, "archway1second");
        migrate.details = DeploymentDetails::Migrate {
            msg: json!({}),
        };
        ledger.add_deployment(migrate, CHAIN).unwrap();
        assert_eq!(
            ledger.find_migrate_deployment("counter", CHAIN).unwrap().wasm.code_id,
            3
        );
        assert_eq!(ledger.contract_address("counter", CHAIN).unwrap(), "archway1second");
    }

    #[test]
    fn metadata_and_premium_payloads() {
        let tmp = tempfile::tempdir().unwrap();
        let mut ledger = DeploymentLedger::load(tmp.path()).unwrap();

        let mut metadata = instantiate("counter", 1, "archway1counter");
        metadata.details = DeploymentDetails::Metadata {
            metadata: ContractMetadata {
                contract_address: "archway1counter".into(),
                owner_address: Some("archway1owner".into()),
                rewards_address: None,
            },
        };
        let mut premium = instantiate("counter", 1, "archway1counter");
        premium.details = DeploymentDetails::Premium {
            flat_fee: Coin {
                denom: "aconst".into(),
                amount: 1_000_000_000_000_000_000_000,
            },
        };
        ledger.add_deployment(metadata, CHAIN).unwrap();
        ledger.add_deployment(premium, CHAIN).unwrap();

        let raw: Value = serde_json::from_str(
            &std::fs::read_to_string(tmp.path().join("constantine-3.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(raw["deployments"][0]["flatFee"]["amount"], "1000000000000000000000");
        assert_eq!(
            raw["deployments"][1]["metadata"]["ownerAddress"],
            "archway1owner"
        );

        let reloaded = DeploymentLedger::load(tmp.path()).unwrap();
        let found = reloaded.find_premium_deployment("counter", CHAIN).unwrap();
        match &found.details {
            DeploymentDetails::Premium { flat_fee } => {
                assert_eq!(flat_fee.amount, 1_000_000_000_000_000_000_000)
            }
            other => panic!("unexpected details: {other:?}"),
        }
        assert!(reloaded.find_metadata_deployment("counter", CHAIN).is_some());
    }

    #[test]
    fn filter_and_export_across_chains() {
        let tmp = tempfile::tempdir().unwrap();
        let mut ledger = DeploymentLedger::load(tmp.path()).unwrap();
        ledger.add_deployment(store("counter", 1), CHAIN).unwrap();
        ledger
            .add_deployment(instantiate("counter", 1, "archway1c"), CHAIN)
            .unwrap();
        ledger.add_deployment(store("counter", 7), "titus-4").unwrap();
        ledger.add_deployment(store("other", 8), "titus-4").unwrap();

        let stores = ledger.filter(DeploymentFilter {
            action: Some(DeploymentAction::Store),
            contract_name: Some("counter"),
            ..Default::default()
        });
        let pairs: Vec<_> = stores
            .iter()
            .map(|d| (d.chain_id.as_str(), d.deployment.wasm.code_id))
            .collect();
        assert_eq!(pairs, [(CHAIN, 1), ("titus-4", 7)]);

        let all_titus = ledger.filter(DeploymentFilter {
            chain_id: Some("titus-4"),
            ..Default::default()
        });
        assert_eq!(all_titus.len(), 2);

        let export = ledger.to_single_deployment_file(DeploymentFilter {
            chain_id: Some(CHAIN),
            ..Default::default()
        });
        let value = serde_json::to_value(&export).unwrap();
        assert_eq!(value["deployments"].as_array().unwrap().len(), 2);
        assert_eq!(value["deployments"][0]["chainId"], CHAIN);
        assert_eq!(value["deployments"][0]["action"], "instantiate");
    }

    #[test]
    fn malformed_file_is_invalid_format() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join("constantine-3.json"),
            r#"{"deployments":[{"action":"teleport"}]}"#,
        )
        .unwrap();
        assert!(matches!(
            DeploymentLedger::load(tmp.path()),
            Err(QuarryError::InvalidFormat { .. })
        ));
    }

    #[test]
    fn invalid_chain_id_writes_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let mut ledger = DeploymentLedger::load(tmp.path()).unwrap();
        assert!(ledger.add_deployment(store("counter", 1), "../up").is_err());
        assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 0);
    }

    #[test]
    fn action_names_parse() {
        for action in DeploymentAction::ALL {
            assert_eq!(action.as_str().parse::<DeploymentAction>().unwrap(), action);
        }
        assert!("teleport".parse::<DeploymentAction>().is_err());
    }
}
