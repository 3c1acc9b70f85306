//! One-time onboarding of a new client.
//!
//! Writes the long-lived env-templated profile, creates the client's external
//! budget table from a Google Sheet, enables the budget staging model, and
//! runs the project once for the client.
use crate::invoker::{locate_executable, run_streaming, CommandSpec};
use crate::profile::{static_profile, write_profiles_file, ENV_BIGQUERY_PROJECT, ENV_CLIENT_DATASET};
use anyhow::{anyhow, Context, Result};
use regex::Regex;
use std::borrow::Cow;
use std::fs;
use std::path::{Path, PathBuf};

pub const STAGING_MODEL: &str = "models/staging/stg_budget_template.sql";
const BUDGET_TABLE_MACRO: &str = "create_external_budget_table";

#[derive(Debug, Clone)]
pub struct SetupRequest {
    pub client: String,
    pub project: String,
    pub budget_sheet_url: String,
    pub sheet_range: String,
    /// Static profiles directory, already tilde-expanded.
    pub profile_dir: PathBuf,
    pub profile_name: String,
    pub target: String,
    pub project_dir: PathBuf,
    pub executable: String,
    /// Service-account key referenced by the static profile.
    pub keyfile: PathBuf,
    pub dry_run: bool,
}

/// Reduce a Google Sheets link to the bare document URL BigQuery accepts.
pub fn clean_sheet_url(url: &str) -> String {
    let end = url.find(['?', '#']).unwrap_or(url.len());
    url[..end].replace("/edit", "")
}

pub fn setup_client(request: &SetupRequest) -> Result<()> {
    let sheet_url = clean_sheet_url(&request.budget_sheet_url);
    tracing::info!(url = %sheet_url, "cleaned sheet URL");
    tracing::info!(
        client = %request.client,
        project = %request.project,
        project_dir = %request.project_dir.display(),
        profile_dir = %request.profile_dir.display(),
        dry_run = request.dry_run,
        "setting up client"
    );

    let profile = static_profile(&request.profile_name, &request.project, &request.keyfile);
    if request.dry_run {
        tracing::info!(path = %request.profile_dir.display(), "dry run: would write static profile");
    } else {
        let path = write_profiles_file(&request.profile_dir, std::slice::from_ref(&profile))?;
        tracing::info!(path = %path.display(), keyfile = %request.keyfile.display(), "updated dbt profile");
    }

    let executable = if request.dry_run {
        locate_executable(&request.executable).unwrap_or_else(|_| PathBuf::from(&request.executable))
    } else {
        locate_executable(&request.executable)?
    };

    let macro_args = serde_json::json!({
        "budget_sheet_url": sheet_url,
        "sheet_range": request.sheet_range,
    });
    let mut run_operation = vec![
        "run-operation".to_string(),
        BUDGET_TABLE_MACRO.to_string(),
        "--args".to_string(),
        macro_args.to_string(),
    ];
    run_operation.extend(profile_args(request));
    run_operation.push("--debug".to_string());
    run_step(request, &executable, run_operation, "create external budget table")?;

    enable_staging_model(&request.project_dir, request.dry_run)?;

    let mut dbt_run = vec!["run".to_string()];
    dbt_run.extend(profile_args(request));
    run_step(request, &executable, dbt_run, "run dbt models")?;

    tracing::info!(client = %request.client, "client setup complete");
    Ok(())
}

fn profile_args(request: &SetupRequest) -> Vec<String> {
    vec![
        "--profiles-dir".to_string(),
        request.profile_dir.display().to_string(),
        "--target".to_string(),
        request.target.clone(),
    ]
}

fn run_step(request: &SetupRequest, executable: &Path, args: Vec<String>, step: &str) -> Result<()> {
    let spec = CommandSpec {
        program: executable.to_path_buf(),
        args,
        env: vec![
            (ENV_CLIENT_DATASET.to_string(), request.client.clone()),
            (ENV_BIGQUERY_PROJECT.to_string(), request.project.clone()),
        ],
        cwd: Some(request.project_dir.clone()),
    };
    if request.dry_run {
        tracing::info!(step, command = %spec.command_line(), "dry run: would execute");
        return Ok(());
    }
    let result = run_streaming(&spec, &request.client).with_context(|| step.to_string())?;
    if !result.success() {
        tracing::error!(step, exit_code = ?result.exit_code, "setup step failed");
        return Err(anyhow!("{step} failed with exit code {:?}", result.exit_code));
    }
    Ok(())
}

/// Flip `enabled=false` to `enabled=true` in the budget staging model.
///
/// Returns whether the model file exists. A missing model is only a warning.
pub fn enable_staging_model(project_dir: &Path, dry_run: bool) -> Result<bool> {
    let path = project_dir.join(STAGING_MODEL);
    if !path.is_file() {
        tracing::warn!(path = %path.display(), "could not find staging model");
        return Ok(false);
    }
    if dry_run {
        tracing::info!(path = %path.display(), "dry run: would enable staging model");
        return Ok(true);
    }
    let content = fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
    let disabled = Regex::new(r"enabled\s*=\s*false").context("compile staging model pattern")?;
    if let Cow::Owned(updated) = disabled.replace_all(&content, "enabled=true") {
        fs::write(&path, updated.as_bytes())
            .with_context(|| format!("write {}", path.display()))?;
    }
    tracing::info!(path = %path.display(), "staging model enabled");
    Ok(true)
}
