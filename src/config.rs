//! Run configuration.
//!
//! A run is described by a JSON file whose every field has a default, so an
//! empty `{}` reproduces the stock five-client batch. Command-line flags are
//! applied on top of the loaded file.
use crate::cache::DEFAULT_CACHE_TTL_SECONDS;
use crate::credentials::DEFAULT_CREDENTIAL_NAME;
use crate::materialize::ProfileTransport;
use crate::profile::{DEFAULT_PROFILE_NAME, SERVICE_ACCOUNT_TARGET};
use crate::retry::RetryPolicy;
use anyhow::{anyhow, Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

pub const CONFIG_SCHEMA_VERSION: u32 = 1;
pub const DEFAULT_PROJECT: &str = "holistic-money";
pub const DEFAULT_DBT_EXECUTABLE: &str = "dbt";
pub const DEFAULT_STATIC_PROFILES_DIR: &str = "~/.dbt";

/// Clients built by a stock run, in run order.
pub const DEFAULT_CLIENTS: [&str; 5] = [
    "golden_hour",
    "austin_lifestyler",
    "bb_design",
    "child_life_on_call",
    "western_holistic_med",
];

/// Per-client retry: two retries one minute apart.
pub const DEFAULT_CLIENT_RETRY: RetryPolicy = RetryPolicy::new(2, 60);
/// Whole-batch retry: one retry after five minutes.
pub const DEFAULT_BATCH_RETRY: RetryPolicy = RetryPolicy::new(1, 300);

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfig {
    pub schema_version: u32,
    /// Client ids, which double as dataset names.
    pub clients: Vec<String>,
    /// Warehouse project id.
    pub project: String,
    /// dbt project root (contains `dbt_project.yml`); defaults to the
    /// current directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_dir: Option<PathBuf>,
    pub dbt_executable: String,
    pub dbt_command: Vec<String>,
    pub extra_args: Vec<String>,
    pub profile_name: String,
    pub target: String,
    pub transport: ProfileTransport,
    pub credential_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credential_store: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temp_root: Option<PathBuf>,
    pub static_profiles_dir: PathBuf,
    pub client_retry: RetryPolicy,
    pub batch_retry: RetryPolicy,
    pub cache_ttl_seconds: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_path: Option<PathBuf>,
}

impl Default for RunConfig {
    fn default() -> Self {
        default_config()
    }
}

/// The stock batch configuration.
pub fn default_config() -> RunConfig {
    RunConfig {
        schema_version: CONFIG_SCHEMA_VERSION,
        clients: DEFAULT_CLIENTS.iter().map(|client| client.to_string()).collect(),
        project: DEFAULT_PROJECT.to_string(),
        project_dir: None,
        dbt_executable: DEFAULT_DBT_EXECUTABLE.to_string(),
        dbt_command: vec!["run".to_string()],
        extra_args: Vec::new(),
        profile_name: DEFAULT_PROFILE_NAME.to_string(),
        target: SERVICE_ACCOUNT_TARGET.to_string(),
        transport: ProfileTransport::Directory,
        credential_name: DEFAULT_CREDENTIAL_NAME.to_string(),
        credential_store: None,
        temp_root: None,
        static_profiles_dir: PathBuf::from(DEFAULT_STATIC_PROFILES_DIR),
        client_retry: DEFAULT_CLIENT_RETRY,
        batch_retry: DEFAULT_BATCH_RETRY,
        cache_ttl_seconds: DEFAULT_CACHE_TTL_SECONDS,
        cache_path: None,
    }
}

/// Pretty JSON stub of the defaults, for `config` output.
pub fn config_stub() -> Result<String> {
    serde_json::to_string_pretty(&default_config()).context("serialize config stub")
}

pub fn load_config(path: &Path) -> Result<RunConfig> {
    let bytes = fs::read(path).with_context(|| format!("read config {}", path.display()))?;
    let config: RunConfig = serde_json::from_slice(&bytes)
        .with_context(|| format!("parse run config {}", path.display()))?;
    Ok(config)
}

/// Reject configs the batch loop cannot run.
pub fn validate_config(config: &RunConfig) -> Result<()> {
    if config.schema_version != CONFIG_SCHEMA_VERSION {
        return Err(anyhow!(
            "unsupported run config schema_version {}",
            config.schema_version
        ));
    }
    if config.clients.is_empty() {
        return Err(anyhow!("clients must list at least one client"));
    }
    let mut seen = BTreeSet::new();
    for client in &config.clients {
        validate_client_id(client)?;
        if !seen.insert(client.as_str()) {
            return Err(anyhow!("client {client:?} is listed more than once"));
        }
    }
    for (label, value) in [
        ("project", &config.project),
        ("dbt_executable", &config.dbt_executable),
        ("profile_name", &config.profile_name),
        ("target", &config.target),
        ("credential_name", &config.credential_name),
    ] {
        if value.trim().is_empty() {
            return Err(anyhow!("{label} must be non-empty"));
        }
    }
    if config.dbt_command.is_empty() {
        return Err(anyhow!("dbt_command must name a dbt command"));
    }
    Ok(())
}

/// Client ids double as dataset names, so they follow dataset naming rules.
pub fn validate_client_id(client: &str) -> Result<()> {
    let dataset = Regex::new(r"^[A-Za-z0-9_]{1,1024}$").context("compile dataset name pattern")?;
    if dataset.is_match(client) {
        Ok(())
    } else {
        Err(anyhow!(
            "client {client:?} is not a valid dataset name (letters, digits, underscores)"
        ))
    }
}

/// Default location of the invocation cache index.
pub fn default_cache_path() -> Result<PathBuf> {
    let data_dir = dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .ok_or_else(|| anyhow!("cannot determine home directory"))?;
    Ok(data_dir.join("dbt-clients").join("invocation_cache.json"))
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
