use std::path::PathBuf;
use std::sync::Arc;

use quarry_core::{Config, ConfigData, ProjectDirs, Prompter, QuarryDirs, Result};
use quarry_keystore::{Accounts, Backend, Keystore};
use tracing::info;

use crate::chains::{ChainRegistry, CosmosChain};
use crate::deployments::{Deployment, DeploymentLedger};

/// A contracts project: resolved config plus the chain registry and the
/// deployment ledger stored under `<project>/.quarry/`.
#[derive(Debug)]
pub struct Project {
    dirs: ProjectDirs,
    config: Config,
    chains: ChainRegistry,
    deployments: DeploymentLedger,
}

impl Project {
    /// Opens the project at `project_root`. `overrides` sit above every
    /// config file and are not persisted.
    pub fn open(
        project_root: impl Into<PathBuf>,
        global: QuarryDirs,
        overrides: ConfigData,
    ) -> Result<Self> {
        let dirs = ProjectDirs::new(project_root);
        let config = Config::load(global, Some(dirs.clone()))?.with_override(overrides)?;
        let chains = ChainRegistry::load(dirs.chains_dir())?;
        let deployments = DeploymentLedger::load(dirs.deployments_dir())?;

        info!(
            project = %dirs.project_root().display(),
            chain_id = %config.chain_id(),
            "project opened"
        );
        Ok(Self {
            dirs,
            config,
            chains,
            deployments,
        })
    }

    pub fn dirs(&self) -> &ProjectDirs {
        &self.dirs
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut Config {
        &mut self.config
    }

    pub fn chains(&self) -> &ChainRegistry {
        &self.chains
    }

    pub fn chains_mut(&mut self) -> &mut ChainRegistry {
        &mut self.chains
    }

    pub fn deployments(&self) -> &DeploymentLedger {
        &self.deployments
    }

    /// Definition of the configured chain.
    pub fn active_chain(&self) -> Result<&CosmosChain> {
        self.chains.assert_get(self.config.chain_id())
    }

    /// Accounts on the configured keyring backend, with addresses in the
    /// active chain's format.
    pub fn accounts(&self, prompter: Arc<dyn Prompter>) -> Result<Accounts> {
        let resolved = self.config.resolved();
        let backend = Backend::from_config(resolved.keyring_backend, &resolved.keyring_path);
        let keystore = Keystore::new(backend, prompter);
        Ok(Accounts::new(keystore, self.active_chain()?.address_format()))
    }

    /// Records `deployment` against the configured chain.
    pub fn record_deployment(&mut self, deployment: Deployment) -> Result<()> {
        let chain_id = self.active_chain()?.chain_id.clone();
        self.deployments.add_deployment(deployment, &chain_id)
    }

    /// Address of `contract_name` on the configured chain.
    pub fn contract_address(&self, contract_name: &str) -> Result<String> {
        self.deployments
            .contract_address(contract_name, self.config.chain_id())
    }
}
