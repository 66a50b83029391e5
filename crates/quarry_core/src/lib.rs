pub mod config;
pub mod error;
pub mod json;
pub mod logging;
pub mod paths;
pub mod prompt;

pub use config::{
    Config, ConfigData, ConfigFile, ConfigKey, ConfigScope, KeyringBackend, MergeMode,
    ResolvedConfig, deep_merge, merge_layers,
};
pub use error::{ErrorCategory, FieldErrors, QuarryError, Result};
pub use logging::{LogOptions, init_logging};
pub use paths::{ProjectDirs, QuarryDirs};
pub use prompt::{Prompter, StaticPrompter, TerminalPrompter};
