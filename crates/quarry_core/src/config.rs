use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::error::{FieldErrors, QuarryError, Result};
use crate::json;
use crate::paths::{ProjectDirs, QuarryDirs};

pub const DEFAULT_CHAIN_ID: &str = "constantine-3";
pub const DEFAULT_CONTRACTS_PATH: &str = "./contracts";

static CHAIN_ID_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]{0,63}$").expect("valid chain id regex"));

/// Chain ids double as file names, so they are restricted to a safe set.
pub fn is_valid_chain_id(chain_id: &str) -> bool {
    CHAIN_ID_PATTERN.is_match(chain_id)
}

// ---------------------------------------------------------------------------
// Keyring backend selection
// ---------------------------------------------------------------------------

/// Which secret store holds account keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyringBackend {
    /// Host keychain (macOS Keychain, Windows Credential Manager, Linux keyutils).
    Os,
    /// Password-encrypted files.
    File,
    /// Unencrypted files. Never use for real funds.
    Test,
}

impl KeyringBackend {
    pub const ALL: [KeyringBackend; 3] = [Self::Os, Self::File, Self::Test];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Os => "os",
            Self::File => "file",
            Self::Test => "test",
        }
    }
}

impl fmt::Display for KeyringBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KeyringBackend {
    type Err = QuarryError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "os" => Ok(Self::Os),
            "file" => Ok(Self::File),
            "test" => Ok(Self::Test),
            other => Err(QuarryError::invalid_value(
                ConfigKey::KeyringBackend.as_str(),
                other,
                "must be one of os, file, test",
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// One config layer
// ---------------------------------------------------------------------------

/// Contents of a single config file. Every field is optional; absent fields
/// fall through to the layer below.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ConfigData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chain_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contracts_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keyring_backend: Option<KeyringBackend>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keyring_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_account: Option<String>,
}

impl ConfigData {
    /// Compiled-in defaults. `keyring-path` depends on the user's home.
    pub fn defaults(dirs: &QuarryDirs) -> Self {
        Self {
            chain_id: Some(DEFAULT_CHAIN_ID.into()),
            contracts_path: Some(DEFAULT_CONTRACTS_PATH.into()),
            keyring_backend: Some(KeyringBackend::Os),
            keyring_path: Some(dirs.keys_dir().to_string_lossy().into_owned()),
            default_account: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn get(&self, key: ConfigKey) -> Option<String> {
        match key {
            ConfigKey::ChainId => self.chain_id.clone(),
            ConfigKey::ContractsPath => self.contracts_path.clone(),
            ConfigKey::KeyringBackend => self.keyring_backend.map(|b| b.to_string()),
            ConfigKey::KeyringPath => self.keyring_path.clone(),
            ConfigKey::DefaultAccount => self.default_account.clone(),
        }
    }

    /// Returns a copy with `key` set to `value` (or cleared when `None`),
    /// after validating the value.
    pub fn with(&self, key: ConfigKey, value: Option<&str>) -> Result<Self> {
        let mut next = self.clone();
        let value = value.map(str::to_string);
        if let Some(v) = &value {
            if let Some(violation) = validate_field(key, &Value::String(v.clone())) {
                return Err(QuarryError::invalid_value(key.as_str(), v, violation));
            }
        }
        match key {
            ConfigKey::ChainId => next.chain_id = value,
            ConfigKey::ContractsPath => next.contracts_path = value,
            ConfigKey::KeyringBackend => {
                next.keyring_backend = value.as_deref().map(KeyringBackend::from_str).transpose()?
            }
            ConfigKey::KeyringPath => next.keyring_path = value,
            ConfigKey::DefaultAccount => next.default_account = value,
        }
        Ok(next)
    }

    fn to_value(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }
}

/// Wire names of the config fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigKey {
    ChainId,
    ContractsPath,
    KeyringBackend,
    KeyringPath,
    DefaultAccount,
}

impl ConfigKey {
    pub const ALL: [ConfigKey; 5] = [
        Self::ChainId,
        Self::ContractsPath,
        Self::KeyringBackend,
        Self::KeyringPath,
        Self::DefaultAccount,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ChainId => "chain-id",
            Self::ContractsPath => "contracts-path",
            Self::KeyringBackend => "keyring-backend",
            Self::KeyringPath => "keyring-path",
            Self::DefaultAccount => "default-account",
        }
    }
}

impl fmt::Display for ConfigKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConfigKey {
    type Err = QuarryError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| QuarryError::invalid_value("config key", s, "unknown config key"))
    }
}

// ---------------------------------------------------------------------------
// Merging
// ---------------------------------------------------------------------------

/// How array values combine when two layers both define them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MergeMode {
    /// The higher layer replaces the lower one.
    #[default]
    Overwrite,
    /// Lower-layer items first, then higher-layer items.
    Append,
    /// Higher-layer items first, then lower-layer items (newest first).
    Prepend,
}

/// Deep-merges `overlay` on top of `base`.
///
/// Objects merge key by key, arrays follow `mode`, any other value is
/// replaced by the overlay. A `null` in the overlay never erases `base`.
pub fn deep_merge(base: Value, overlay: Value, mode: MergeMode) -> Value {
    match (base, overlay) {
        (base, Value::Null) => base,
        (Value::Object(mut base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                let merged = match base.remove(&key) {
                    Some(existing) => deep_merge(existing, value, mode),
                    None => value,
                };
                if !merged.is_null() {
                    base.insert(key, merged);
                }
            }
            Value::Object(base)
        }
        (Value::Array(base), Value::Array(overlay)) => match mode {
            MergeMode::Overwrite => Value::Array(overlay),
            MergeMode::Append => Value::Array(base.into_iter().chain(overlay).collect()),
            MergeMode::Prepend => Value::Array(overlay.into_iter().chain(base).collect()),
        },
        (_, overlay) => overlay,
    }
}

/// Folds `layers` from lowest to highest precedence.
pub fn merge_layers(layers: impl IntoIterator<Item = Value>, mode: MergeMode) -> Value {
    layers
        .into_iter()
        .fold(Value::Object(Map::new()), |acc, layer| deep_merge(acc, layer, mode))
}

// ---------------------------------------------------------------------------
// Config files
// ---------------------------------------------------------------------------

/// Reading, validating and writing a single config file.
pub struct ConfigFile;

impl ConfigFile {
    /// Reads `path` into a [`ConfigData`]. A missing file is an empty layer;
    /// a file that fails validation raises `InvalidFormat` with the
    /// violations of every offending field.
    pub fn read(path: &Path) -> Result<ConfigData> {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "config file absent, using empty layer");
                return Ok(ConfigData::default());
            }
            Err(e) => return Err(QuarryError::io(path, e)),
        };

        let source = path.display().to_string();
        let value: Value = serde_json::from_str(&content)
            .map_err(|e| QuarryError::malformed(&source, format!("not valid JSON: {e}")))?;
        Self::validate(&value, &source)
    }

    /// Validates a parsed JSON document against the config schema.
    pub fn validate(value: &Value, source: &str) -> Result<ConfigData> {
        let Some(object) = value.as_object() else {
            return Err(QuarryError::malformed(source, "must be a JSON object"));
        };

        let mut errors = FieldErrors::new();
        for (field, field_value) in object {
            match ConfigKey::from_str(field) {
                Ok(key) => {
                    if let Some(violation) = validate_field(key, field_value) {
                        errors.entry(field.clone()).or_default().push(violation);
                    }
                }
                Err(_) => errors
                    .entry(field.clone())
                    .or_default()
                    .push("unknown field".into()),
            }
        }
        if !errors.is_empty() {
            return Err(QuarryError::invalid_format(source, errors));
        }

        Ok(serde_json::from_value(value.clone())?)
    }

    /// Writes `data` to `path`, replacing the previous content.
    pub fn write(path: &Path, data: &ConfigData) -> Result<()> {
        json::write_file(path, data)?;
        info!(path = %path.display(), "config saved");
        Ok(())
    }

    /// Creates a new project config. Fails if one already exists.
    pub fn init(project: &ProjectDirs, data: &ConfigData) -> Result<()> {
        let path = project.config_path();
        if path.exists() {
            return Err(QuarryError::already_exists(
                "Project config",
                path.display().to_string(),
            ));
        }
        Self::write(&path, data)
    }
}

/// Returns the violation for one field, or `None` when the value is valid.
fn validate_field(key: ConfigKey, value: &Value) -> Option<String> {
    if value.is_null() {
        return None;
    }
    let Some(s) = value.as_str() else {
        return Some("must be a string".into());
    };
    match key {
        ConfigKey::ChainId if !is_valid_chain_id(s) => {
            Some("must be a valid chain id (letters, digits, '.', '_' or '-')".into())
        }
        ConfigKey::KeyringBackend if KeyringBackend::from_str(s).is_err() => {
            Some("must be one of os, file, test".into())
        }
        ConfigKey::ContractsPath | ConfigKey::KeyringPath | ConfigKey::DefaultAccount
            if s.trim().is_empty() =>
        {
            Some("must not be empty".into())
        }
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Resolved config
// ---------------------------------------------------------------------------

/// Fully resolved configuration: every field has a value except
/// `default_account`, which has no meaningful default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedConfig {
    pub chain_id: String,
    pub contracts_path: PathBuf,
    pub keyring_backend: KeyringBackend,
    pub keyring_path: PathBuf,
    pub default_account: Option<String>,
}

/// Which file a mutation is written to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigScope {
    Global,
    Local,
}

/// Layered configuration: defaults < global < local < in-memory override.
#[derive(Debug, Clone)]
pub struct Config {
    dirs: QuarryDirs,
    project: Option<ProjectDirs>,
    global: ConfigData,
    local: ConfigData,
    overrides: ConfigData,
    resolved: ResolvedConfig,
}

impl Config {
    /// Loads the global and (if a project is given) local layers.
    pub fn load(dirs: QuarryDirs, project: Option<ProjectDirs>) -> Result<Self> {
        let global = ConfigFile::read(&dirs.config_path())?;
        let local = match &project {
            Some(p) => ConfigFile::read(&p.config_path())?,
            None => ConfigData::default(),
        };
        Self::from_layers(dirs, project, global, local, ConfigData::default())
    }

    /// Builds a config from already-loaded layers.
    pub fn from_layers(
        dirs: QuarryDirs,
        project: Option<ProjectDirs>,
        global: ConfigData,
        local: ConfigData,
        overrides: ConfigData,
    ) -> Result<Self> {
        let resolved = resolve(&dirs, project.as_ref(), &global, &local, &overrides)?;
        Ok(Self {
            dirs,
            project,
            global,
            local,
            overrides,
            resolved,
        })
    }

    /// Applies a command-line override in memory only.
    pub fn with_override(self, overrides: ConfigData) -> Result<Self> {
        Self::from_layers(self.dirs, self.project, self.global, self.local, overrides)
    }

    pub fn resolved(&self) -> &ResolvedConfig {
        &self.resolved
    }

    pub fn chain_id(&self) -> &str {
        &self.resolved.chain_id
    }

    pub fn dirs(&self) -> &QuarryDirs {
        &self.dirs
    }

    pub fn project(&self) -> Option<&ProjectDirs> {
        self.project.as_ref()
    }

    pub fn layer(&self, scope: ConfigScope) -> &ConfigData {
        match scope {
            ConfigScope::Global => &self.global,
            ConfigScope::Local => &self.local,
        }
    }

    /// Sets or clears `key` in the chosen layer and persists that layer.
    pub fn set(&mut self, key: ConfigKey, value: Option<&str>, scope: ConfigScope) -> Result<()> {
        let updated = self.layer(scope).with(key, value)?;
        self.replace_layer(scope, updated)
    }

    /// Writes the current in-memory override into the chosen layer.
    pub fn persist_override(&mut self, scope: ConfigScope) -> Result<()> {
        if self.overrides.is_empty() {
            return Ok(());
        }
        let base = self.layer(scope).to_value()?;
        let merged = deep_merge(base, self.overrides.to_value()?, MergeMode::Overwrite);
        let updated: ConfigData = serde_json::from_value(merged)?;
        self.replace_layer(scope, updated)
    }

    fn replace_layer(&mut self, scope: ConfigScope, updated: ConfigData) -> Result<()> {
        let path = self.scope_path(scope)?;
        let (global, local) = match scope {
            ConfigScope::Global => (&updated, &self.local),
            ConfigScope::Local => (&self.global, &updated),
        };
        let resolved = resolve(
            &self.dirs,
            self.project.as_ref(),
            global,
            local,
            &self.overrides,
        )?;

        ConfigFile::write(&path, &updated)?;
        match scope {
            ConfigScope::Global => self.global = updated,
            ConfigScope::Local => self.local = updated,
        }
        self.resolved = resolved;
        Ok(())
    }

    fn scope_path(&self, scope: ConfigScope) -> Result<PathBuf> {
        match scope {
            ConfigScope::Global => Ok(self.dirs.config_path()),
            ConfigScope::Local => self
                .project
                .as_ref()
                .map(ProjectDirs::config_path)
                .ok_or_else(|| QuarryError::not_found("Project", "no project config found")),
        }
    }
}

fn resolve(
    dirs: &QuarryDirs,
    project: Option<&ProjectDirs>,
    global: &ConfigData,
    local: &ConfigData,
    overrides: &ConfigData,
) -> Result<ResolvedConfig> {
    let defaults = ConfigData::defaults(dirs);
    let merged = merge_layers(
        [
            defaults.to_value()?,
            global.to_value()?,
            local.to_value()?,
            overrides.to_value()?,
        ],
        MergeMode::Overwrite,
    );
    let data: ConfigData = serde_json::from_value(merged)?;

    let base = project.map(ProjectDirs::project_root);
    let anchor = |p: String| -> PathBuf {
        let path = PathBuf::from(p);
        match base {
            Some(root) if path.is_relative() => root.join(path),
            _ => path,
        }
    };

    Ok(ResolvedConfig {
        chain_id: data.chain_id.unwrap_or_else(|| DEFAULT_CHAIN_ID.into()),
        contracts_path: anchor(
            data.contracts_path
                .unwrap_or_else(|| DEFAULT_CONTRACTS_PATH.into()),
        ),
        keyring_backend: data.keyring_backend.unwrap_or(KeyringBackend::Os),
        keyring_path: data
            .keyring_path
            .map(anchor)
            .unwrap_or_else(|| dirs.keys_dir()),
        default_account: data.default_account,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
