//! Per-client dbt build runner.
//!
//! For each client in a fixed order: fetch the service-account credential,
//! materialize a profile scoped to the client's dataset, run dbt against the
//! shared project, and remove every temporary artifact before moving on.
pub mod batch;
pub mod cache;
pub mod cleanup;
pub mod cli;
pub mod config;
pub mod credentials;
pub mod error;
pub mod invoker;
pub mod materialize;
pub mod profile;
pub mod retry;
pub mod setup;
pub mod telemetry;
pub mod util;
pub mod workflow;

#[cfg(all(test, unix))]
mod test_support;
