use anyhow::Result;
use clap::Parser;
use dbt_clients::cli::{Command, RootArgs};
use dbt_clients::{telemetry, workflow};

fn main() -> Result<()> {
    let args = RootArgs::parse();
    telemetry::init_tracing(args.verbose)?;

    match args.command {
        Command::Run(args) => workflow::run_batch(args),
        Command::RunOne(args) => workflow::run_one(args),
        Command::SetupClient(args) => workflow::run_setup_client(args),
        Command::WriteProfile(args) => workflow::run_write_profile(args),
        Command::RegisterCredential(args) => workflow::run_register_credential(args),
        Command::Config(args) => workflow::run_config(args),
    }
}
