//! CLI argument parsing for the per-client dbt runner.
use crate::config::DEFAULT_PROJECT;
use crate::credentials::DEFAULT_CREDENTIAL_NAME;
use crate::materialize::ProfileTransport;
use crate::profile::{DEFAULT_PROFILE_NAME, SERVICE_ACCOUNT_TARGET};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

pub const DEFAULT_PROFILE_DIR: &str = "~/.dbt";
pub const DEFAULT_SERVICE_ACCOUNT_FILE: &str = "credentials/service-account.json";
pub const DEFAULT_TEST_CLIENT: &str = "golden_hour";

#[derive(Parser, Debug)]
#[command(
    name = "dbt-clients",
    version,
    about = "Build a dbt project once per client dataset",
    after_help = "Examples:\n  dbt-clients config > run.json\n  dbt-clients register-credential --service-account-file credentials/service-account.json\n  dbt-clients run --config run.json\n  dbt-clients run-one --client golden_hour --project-dir .\n  dbt-clients setup-client --client bb_design --project holistic-money \\\n    --budget-sheet-url <url> --sheet-range 'Budget Summary!A4:AS69' --dry-run",
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct RootArgs {
    /// Log at debug level (RUST_LOG takes precedence)
    #[arg(long, short, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
#[allow(clippy::large_enum_variant)]
pub enum Command {
    /// Build every configured client in order
    Run(RunArgs),
    /// Build a single client, failing if it fails
    RunOne(RunOneArgs),
    /// Onboard a new client from its budget sheet
    SetupClient(SetupClientArgs),
    /// Write the static env-templated profile
    WriteProfile(WriteProfileArgs),
    /// Store a service-account key under a logical name
    RegisterCredential(RegisterCredentialArgs),
    /// Print a run config with every default filled in
    Config(ConfigArgs),
}

/// Options shared by `run` and `run-one`; each overrides the config file.
#[derive(Args, Debug, Clone, Default)]
pub struct BatchArgs {
    /// Run config JSON
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Warehouse project id
    #[arg(long, value_name = "ID")]
    pub project: Option<String>,

    /// dbt project root containing dbt_project.yml
    #[arg(long, value_name = "DIR")]
    pub project_dir: Option<PathBuf>,

    /// dbt executable name or path
    #[arg(long, value_name = "BIN")]
    pub dbt: Option<String>,

    /// How the per-client profile is handed to dbt
    #[arg(long, value_enum)]
    pub transport: Option<ProfileTransport>,

    /// Profile target to build
    #[arg(long, value_name = "NAME")]
    pub target: Option<String>,

    /// Logical name of the service-account credential
    #[arg(long, value_name = "NAME")]
    pub credential_name: Option<String>,

    /// Credential store directory
    #[arg(long, value_name = "DIR")]
    pub credential_store: Option<PathBuf>,

    /// Parent directory for temporary key files and profiles
    #[arg(long, value_name = "DIR")]
    pub temp_root: Option<PathBuf>,

    /// Pass --debug through to dbt
    #[arg(long)]
    pub debug: bool,

    /// Ignore and do not persist remembered successful runs
    #[arg(long)]
    pub no_cache: bool,
}

#[derive(Args, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub batch: BatchArgs,

    /// Client to build (repeatable); replaces the configured list
    #[arg(long = "client", value_name = "CLIENT")]
    pub clients: Vec<String>,
}

#[derive(Args, Debug)]
pub struct RunOneArgs {
    #[command(flatten)]
    pub batch: BatchArgs,

    /// Client to build
    #[arg(long, value_name = "CLIENT", default_value = DEFAULT_TEST_CLIENT)]
    pub client: String,
}

#[derive(Args, Debug)]
pub struct SetupClientArgs {
    /// Client name (dataset in the warehouse)
    #[arg(long, value_name = "CLIENT")]
    pub client: String,

    /// Warehouse project id
    #[arg(long, value_name = "ID")]
    pub project: String,

    /// URL of the Google Sheet with budget data
    #[arg(long, value_name = "URL")]
    pub budget_sheet_url: String,

    /// Range in the sheet (e.g. "Budget Summary!A4:AS69")
    #[arg(long, value_name = "RANGE")]
    pub sheet_range: String,

    /// dbt profiles directory
    #[arg(long, value_name = "DIR", default_value = DEFAULT_PROFILE_DIR)]
    pub profile_dir: PathBuf,

    /// dbt target to use
    #[arg(long, value_name = "NAME", default_value = SERVICE_ACCOUNT_TARGET)]
    pub dbt_target: String,

    /// Log commands without executing them or modifying files
    #[arg(long)]
    pub dry_run: bool,

    /// dbt project root (defaults to the current directory)
    #[arg(long, value_name = "DIR")]
    pub project_dir: Option<PathBuf>,

    /// dbt executable name or path
    #[arg(long, value_name = "BIN", default_value = "dbt")]
    pub dbt: String,

    /// Service-account key referenced by the profile
    /// (defaults to <project-dir>/credentials/service-account.json)
    #[arg(long, value_name = "PATH")]
    pub keyfile: Option<PathBuf>,

    #[arg(long, value_name = "NAME", default_value = DEFAULT_PROFILE_NAME)]
    pub profile_name: String,
}

#[derive(Args, Debug)]
pub struct WriteProfileArgs {
    /// dbt profiles directory
    #[arg(long, value_name = "DIR", default_value = DEFAULT_PROFILE_DIR)]
    pub profile_dir: PathBuf,

    /// Warehouse project id used as the fallback in every target
    #[arg(long, value_name = "ID", default_value = DEFAULT_PROJECT)]
    pub project: String,

    /// dbt project root (defaults to the current directory)
    #[arg(long, value_name = "DIR")]
    pub project_dir: Option<PathBuf>,

    /// Service-account key referenced by the profile
    /// (defaults to <project-dir>/credentials/service-account.json)
    #[arg(long, value_name = "PATH")]
    pub keyfile: Option<PathBuf>,

    #[arg(long, value_name = "NAME", default_value = DEFAULT_PROFILE_NAME)]
    pub profile_name: String,
}

#[derive(Args, Debug)]
pub struct RegisterCredentialArgs {
    /// Logical credential name
    #[arg(long, value_name = "NAME", default_value = DEFAULT_CREDENTIAL_NAME)]
    pub name: String,

    /// Service-account key JSON to store
    #[arg(long, value_name = "PATH", default_value = DEFAULT_SERVICE_ACCOUNT_FILE)]
    pub service_account_file: PathBuf,

    /// Credential store directory
    #[arg(long, value_name = "DIR")]
    pub store_dir: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct ConfigArgs {
    /// Write the stub here instead of stdout
    #[arg(long, value_name = "PATH")]
    pub out: Option<PathBuf>,
}
