//! Subcommand entry points.
//!
//! Each `run_*` function resolves its inputs (config file, flags, default
//! locations) and hands off to the library modules.
use crate::batch::{BatchReport, BatchRunner, ClientOutcome};
use crate::cache::InvocationCache;
use crate::cli::{
    BatchArgs, ConfigArgs, RegisterCredentialArgs, RunArgs, RunOneArgs, SetupClientArgs,
    WriteProfileArgs, DEFAULT_SERVICE_ACCOUNT_FILE,
};
use crate::config::{
    config_stub, default_cache_path, default_config, load_config, validate_client_id,
    validate_config, RunConfig,
};
use crate::credentials::FileCredentialStore;
use crate::materialize::Materializer;
use crate::profile::{static_profile, write_profiles_file};
use crate::setup::{setup_client, SetupRequest};
use crate::util::expand_tilde;
use anyhow::{anyhow, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

const DBT_DEBUG_FLAG: &str = "--debug";

pub fn run_batch(args: RunArgs) -> Result<()> {
    let mut config = resolve_run_config(&args.batch)?;
    if !args.clients.is_empty() {
        config.clients = args.clients;
    }
    validate_config(&config)?;
    let report = execute(&config, &args.batch)?;
    let failed = report.failed().count();
    if failed > 0 {
        tracing::warn!(
            failed,
            total = report.clients.len(),
            "batch finished with client failures"
        );
    }
    Ok(())
}

/// Build one client; any failure is an error.
pub fn run_one(args: RunOneArgs) -> Result<()> {
    let mut config = resolve_run_config(&args.batch)?;
    config.clients = vec![args.client.clone()];
    validate_config(&config)?;
    tracing::info!(client = %args.client, "starting test flow for client");
    let report = execute(&config, &args.batch)?;
    match report.outcome(&args.client) {
        Some(ClientOutcome::Succeeded | ClientOutcome::Cached) => {
            tracing::info!(client = %args.client, "test completed successfully");
            Ok(())
        }
        Some(ClientOutcome::Failed { error, .. }) => {
            Err(anyhow!("client {} failed: {error}", args.client))
        }
        Some(ClientOutcome::NotAttempted) | None => {
            Err(anyhow!("client {} was not attempted", args.client))
        }
    }
}

pub fn run_setup_client(args: SetupClientArgs) -> Result<()> {
    validate_client_id(&args.client)?;
    let project_dir = project_dir_or_cwd(args.project_dir.as_deref())?;
    let keyfile = keyfile_or_default(args.keyfile.as_deref(), &project_dir)?;
    let request = SetupRequest {
        client: args.client,
        project: args.project,
        budget_sheet_url: args.budget_sheet_url,
        sheet_range: args.sheet_range,
        profile_dir: expand_tilde(&args.profile_dir)?,
        profile_name: args.profile_name,
        target: args.dbt_target,
        project_dir,
        executable: args.dbt,
        keyfile,
        dry_run: args.dry_run,
    };
    setup_client(&request)
}

pub fn run_write_profile(args: WriteProfileArgs) -> Result<()> {
    let project_dir = project_dir_or_cwd(args.project_dir.as_deref())?;
    let keyfile = keyfile_or_default(args.keyfile.as_deref(), &project_dir)?;
    let profile_dir = expand_tilde(&args.profile_dir)?;
    let profile = static_profile(&args.profile_name, &args.project, &keyfile);
    let path = write_profiles_file(&profile_dir, std::slice::from_ref(&profile))?;
    tracing::info!(path = %path.display(), keyfile = %keyfile.display(), "updated dbt profile");
    Ok(())
}

pub fn run_register_credential(args: RegisterCredentialArgs) -> Result<()> {
    let store = credential_store(args.store_dir.as_deref())?;
    let key_file = expand_tilde(&args.service_account_file)?;
    store.register(&args.name, &key_file)?;
    Ok(())
}

pub fn run_config(args: ConfigArgs) -> Result<()> {
    let stub = config_stub()?;
    match args.out {
        Some(path) => {
            fs::write(&path, format!("{stub}\n").as_bytes())
                .with_context(|| format!("write {}", path.display()))?;
            tracing::info!(path = %path.display(), "wrote run config stub");
        }
        None => println!("{stub}"),
    }
    Ok(())
}

/// Load the config file (or defaults) and apply flag overrides.
fn resolve_run_config(args: &BatchArgs) -> Result<RunConfig> {
    let mut config = match &args.config {
        Some(path) => load_config(path)?,
        None => default_config(),
    };
    if let Some(project) = &args.project {
        config.project = project.clone();
    }
    if let Some(project_dir) = &args.project_dir {
        config.project_dir = Some(project_dir.clone());
    }
    if let Some(dbt) = &args.dbt {
        config.dbt_executable = dbt.clone();
    }
    if let Some(transport) = args.transport {
        config.transport = transport;
    }
    if let Some(target) = &args.target {
        config.target = target.clone();
    }
    if let Some(name) = &args.credential_name {
        config.credential_name = name.clone();
    }
    if let Some(store) = &args.credential_store {
        config.credential_store = Some(store.clone());
    }
    if let Some(temp_root) = &args.temp_root {
        config.temp_root = Some(temp_root.clone());
    }
    if args.debug && !config.extra_args.iter().any(|arg| arg == DBT_DEBUG_FLAG) {
        config.extra_args.push(DBT_DEBUG_FLAG.to_string());
    }
    Ok(config)
}

fn execute(config: &RunConfig, args: &BatchArgs) -> Result<BatchReport> {
    let store = credential_store(config.credential_store.as_deref())?;
    let project_dir = project_dir_or_cwd(config.project_dir.as_deref())?;
    let temp_root = match &config.temp_root {
        Some(root) => expand_tilde(root)?,
        None => std::env::temp_dir(),
    };
    let cache = if args.no_cache {
        InvocationCache::in_memory(config.cache_ttl_seconds)
    } else {
        let path = match &config.cache_path {
            Some(path) => expand_tilde(path)?,
            None => default_cache_path()?,
        };
        InvocationCache::load(&path, config.cache_ttl_seconds)
    };

    let mut runner = BatchRunner {
        store: &store,
        materializer: Materializer {
            profile_name: config.profile_name.clone(),
            target_name: config.target.clone(),
            transport: config.transport,
            temp_root,
            static_profiles_dir: expand_tilde(&config.static_profiles_dir)?,
        },
        credential_name: config.credential_name.clone(),
        executable: config.dbt_executable.clone(),
        project_dir,
        dbt_command: config.dbt_command.clone(),
        extra_args: config.extra_args.clone(),
        client_retry: config.client_retry,
        batch_retry: config.batch_retry,
        cache,
        sleep: std::thread::sleep,
        cancel: None,
    };
    let report = runner.run_all(&config.clients, &config.project)?;
    Ok(report)
}

fn credential_store(dir: Option<&Path>) -> Result<FileCredentialStore> {
    let store = match dir {
        Some(dir) => FileCredentialStore::new(expand_tilde(dir)?),
        None => FileCredentialStore::default_location()?,
    };
    tracing::debug!(root = %store.root().display(), "using credential store");
    Ok(store)
}

fn project_dir_or_cwd(dir: Option<&Path>) -> Result<PathBuf> {
    match dir {
        Some(dir) => expand_tilde(dir),
        None => std::env::current_dir().context("resolve current directory"),
    }
}

fn keyfile_or_default(keyfile: Option<&Path>, project_dir: &Path) -> Result<PathBuf> {
    match keyfile {
        Some(path) => expand_tilde(path),
        None => Ok(project_dir.join(DEFAULT_SERVICE_ACCOUNT_FILE)),
    }
}
