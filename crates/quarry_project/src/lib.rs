//! Project state: chain definitions, the deployment ledger and the facade that
//! ties them to the resolved configuration.
//!
//! A command starts logging, opens the project it runs in and works from
//! there:
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use quarry_core::{ConfigData, LogOptions, QuarryDirs, TerminalPrompter, init_logging};
//! use quarry_project::Project;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let dirs = QuarryDirs::from_home()?;
//! let _guard = init_logging(&dirs, &LogOptions::default())?;
//!
//! let project = Project::open(".", dirs, ConfigData::default())?;
//! let accounts = project.accounts(Arc::new(TerminalPrompter))?;
//! for base in accounts.list_name_and_address().await? {
//!     println!("{} {}", base.name, base.address);
//! }
//! # Ok(())
//! # }
//! ```

pub mod chains;
pub mod deployments;
pub mod project;

pub use chains::{ChainRegistry, ChainWarning, CosmosChain, NetworkType, builtin_chains};
pub use deployments::{
    ChainDeployment, ContractMetadata, ContractRef, Deployment, DeploymentAction,
    DeploymentDetails, DeploymentFile, DeploymentFilter, DeploymentLedger, SingleDeploymentFile,
    WasmRef,
};
pub use project::Project;
