//! dbt connection profiles and the `profiles.yml` format.
//!
//! On disk a profiles file maps profile name to `{target, outputs}`. In memory
//! each profile is a [`ConnectionProfile`] carrying its own name.
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Profile name declared in the dbt project's `dbt_project.yml`.
pub const DEFAULT_PROFILE_NAME: &str = "holistic_money_dw";
pub const SERVICE_ACCOUNT_TARGET: &str = "service_account";
pub const DEV_TARGET: &str = "dev";
pub const PROFILES_FILE_NAME: &str = "profiles.yml";

pub const DEFAULT_THREADS: u32 = 4;
pub const DEFAULT_TIMEOUT_SECONDS: u32 = 300;
pub const DEFAULT_LOCATION: &str = "US";
pub const DEFAULT_PRIORITY: &str = "interactive";
pub const DEFAULT_DATASET: &str = "default_client";

/// Child environment variables the static profile is templated on.
pub const ENV_CLIENT_DATASET: &str = "DBT_CLIENT_DATASET";
pub const ENV_BIGQUERY_PROJECT: &str = "DBT_BIGQUERY_PROJECT";
pub const ENV_KEYFILE: &str = "DBT_KEYFILE";

/// Connection parameters of one named target.
///
/// dbt treats `schema` as an alias of `dataset` for BigQuery and rejects files
/// that set both, so only `dataset` is written.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct TargetConfig {
    #[serde(rename = "type")]
    pub kind: String,
    pub method: String,
    pub project: String,
    #[serde(alias = "schema")]
    pub dataset: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keyfile: Option<String>,
    pub threads: u32,
    pub timeout_seconds: u32,
    pub location: String,
    pub priority: String,
}

impl TargetConfig {
    /// Service-account target bound to one client's dataset.
    pub fn service_account(project: &str, dataset: &str, keyfile: Option<String>) -> Self {
        Self {
            kind: "bigquery".to_string(),
            method: "service-account".to_string(),
            project: project.to_string(),
            dataset: dataset.to_string(),
            keyfile,
            threads: DEFAULT_THREADS,
            timeout_seconds: DEFAULT_TIMEOUT_SECONDS,
            location: DEFAULT_LOCATION.to_string(),
            priority: DEFAULT_PRIORITY.to_string(),
        }
    }

    /// Interactive OAuth target for local development.
    pub fn oauth(project: &str, dataset: &str) -> Self {
        Self {
            method: "oauth".to_string(),
            ..Self::service_account(project, dataset, None)
        }
    }

    pub fn schema(&self) -> &str {
        &self.dataset
    }
}

/// A named profile with a default target and one or more outputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionProfile {
    pub name: String,
    pub target: String,
    pub outputs: BTreeMap<String, TargetConfig>,
}

#[derive(Serialize, Deserialize)]
struct ProfileBody {
    target: String,
    outputs: BTreeMap<String, TargetConfig>,
}

impl ConnectionProfile {
    /// Profile with a single target that is also the default.
    pub fn single(name: &str, target_name: &str, target: TargetConfig) -> Self {
        let mut outputs = BTreeMap::new();
        outputs.insert(target_name.to_string(), target);
        Self {
            name: name.to_string(),
            target: target_name.to_string(),
            outputs,
        }
    }

    /// The configuration of the default target.
    pub fn default_target(&self) -> Option<&TargetConfig> {
        self.outputs.get(&self.target)
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(anyhow!("profile name must be non-empty"));
        }
        if self.outputs.is_empty() {
            return Err(anyhow!("profile {} has no outputs", self.name));
        }
        if !self.outputs.contains_key(&self.target) {
            return Err(anyhow!(
                "profile {} default target {:?} is not among its outputs",
                self.name,
                self.target
            ));
        }
        Ok(())
    }
}

/// Serialize profiles to the `profiles.yml` layout.
pub fn render_profiles(profiles: &[ConnectionProfile]) -> Result<String> {
    let mut doc = BTreeMap::new();
    for profile in profiles {
        profile.validate()?;
        let body = ProfileBody {
            target: profile.target.clone(),
            outputs: profile.outputs.clone(),
        };
        if doc.insert(profile.name.clone(), body).is_some() {
            return Err(anyhow!("duplicate profile name {}", profile.name));
        }
    }
    serde_yaml::to_string(&doc).context("serialize profiles YAML")
}

/// Parse a `profiles.yml` document.
pub fn parse_profiles(text: &str) -> Result<Vec<ConnectionProfile>> {
    let doc: BTreeMap<String, ProfileBody> =
        serde_yaml::from_str(text).context("parse profiles YAML")?;
    let profiles = doc
        .into_iter()
        .map(|(name, body)| ConnectionProfile {
            name,
            target: body.target,
            outputs: body.outputs,
        })
        .collect::<Vec<_>>();
    for profile in &profiles {
        profile.validate()?;
    }
    Ok(profiles)
}

/// Write `profiles.yml` into `dir`, creating the directory if needed.
pub fn write_profiles_file(dir: &Path, profiles: &[ConnectionProfile]) -> Result<PathBuf> {
    fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
    let path = dir.join(PROFILES_FILE_NAME);
    let text = render_profiles(profiles)?;
    fs::write(&path, text.as_bytes()).with_context(|| format!("write {}", path.display()))?;
    Ok(path)
}

fn env_template(var: &str, fallback: &str) -> String {
    format!("{{{{ env_var('{var}', '{fallback}') }}}}")
}

/// Long-lived profile whose service-account target reads the client dataset,
/// project, and keyfile from the invoking environment.
///
/// `dev` stays the default target so an unconfigured shell never writes into a
/// client dataset.
pub fn static_profile(profile_name: &str, project: &str, keyfile: &Path) -> ConnectionProfile {
    let keyfile = keyfile.display().to_string();
    let mut outputs = BTreeMap::new();
    outputs.insert(
        DEV_TARGET.to_string(),
        TargetConfig::oauth(project, DEFAULT_DATASET),
    );
    outputs.insert(
        SERVICE_ACCOUNT_TARGET.to_string(),
        TargetConfig::service_account(
            &env_template(ENV_BIGQUERY_PROJECT, project),
            &env_template(ENV_CLIENT_DATASET, DEFAULT_DATASET),
            Some(env_template(ENV_KEYFILE, &keyfile)),
        ),
    );
    ConnectionProfile {
        name: profile_name.to_string(),
        target: DEV_TARGET.to_string(),
        outputs,
    }
}
