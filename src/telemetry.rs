//! Tracing initialization.
//!
//! Logs go to stderr so command output on stdout (such as `config`) stays
//! machine-readable.
use anyhow::{anyhow, Result};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Install the global subscriber.
///
/// `RUST_LOG` wins when set; otherwise the level is `info`, or `debug` with
/// `verbose`.
///
/// ```bash
/// RUST_LOG=dbt_clients=trace dbt-clients run
/// ```
pub fn init_tracing(verbose: bool) -> Result<()> {
    let env_filter = create_env_filter(default_directive(verbose))?;
    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_level(true);

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(env_filter)
        .try_init()
        .map_err(|e| anyhow!("failed to initialize tracing: {e}"))?;
    Ok(())
}

fn default_directive(verbose: bool) -> &'static str {
    if verbose {
        "debug"
    } else {
        "info"
    }
}

fn create_env_filter(default: &str) -> Result<EnvFilter> {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default))
        .map_err(|e| anyhow!("failed to create env filter: {e}"))
}
