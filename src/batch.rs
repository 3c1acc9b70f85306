//! Sequential per-client batch.
//!
//! Pre-flight problems (no dbt, no project) abort the batch before any client
//! runs. After that, each client is fully isolated: its failure is logged once
//! and the batch moves on to the next client.
use crate::cache::{cache_key, now_epoch_ms, InvocationCache};
use crate::cleanup::CleanupGuard;
use crate::credentials::CredentialStore;
use crate::error::{MissingKind, Result, RunError};
use crate::invoker::{invoke, locate_executable, probe_version, InvocationRequest, InvocationResult};
use crate::materialize::Materializer;
use crate::retry::{retry, RetryPolicy};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

const DBT_PROJECT_FILE: &str = "dbt_project.yml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientOutcome {
    Succeeded,
    /// An identical run succeeded inside the cache window.
    Cached,
    Failed {
        error: String,
        exit_code: Option<i32>,
    },
    /// The batch was cancelled before this client started.
    NotAttempted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientReport {
    pub client: String,
    pub outcome: ClientOutcome,
    pub attempts: u32,
}

/// Outcome of every client, in run order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub clients: Vec<ClientReport>,
}

impl BatchReport {
    pub fn outcome(&self, client: &str) -> Option<&ClientOutcome> {
        self.clients
            .iter()
            .find(|report| report.client == client)
            .map(|report| &report.outcome)
    }

    pub fn failed(&self) -> impl Iterator<Item = &ClientReport> {
        self.clients
            .iter()
            .filter(|report| matches!(report.outcome, ClientOutcome::Failed { .. }))
    }

    pub fn count(&self, predicate: impl Fn(&ClientOutcome) -> bool) -> usize {
        self.clients
            .iter()
            .filter(|report| predicate(&report.outcome))
            .count()
    }
}

/// Everything a batch needs besides the client list.
pub struct BatchRunner<'a> {
    pub store: &'a dyn CredentialStore,
    pub materializer: Materializer,
    pub credential_name: String,
    /// dbt executable name or path, resolved during pre-flight.
    pub executable: String,
    pub project_dir: PathBuf,
    pub dbt_command: Vec<String>,
    pub extra_args: Vec<String>,
    pub client_retry: RetryPolicy,
    pub batch_retry: RetryPolicy,
    pub cache: InvocationCache,
    pub sleep: fn(Duration),
    /// Checked between clients only.
    pub cancel: Option<Arc<AtomicBool>>,
}

impl BatchRunner<'_> {
    /// Resolve dbt and check the project directory.
    pub fn preflight(&self) -> Result<PathBuf> {
        let executable = locate_executable(&self.executable)?;
        tracing::info!(path = %executable.display(), "found dbt");
        let version = probe_version(&executable)?;
        tracing::info!(version = %version, "dbt version");

        let project_file = self.project_dir.join(DBT_PROJECT_FILE);
        if !project_file.is_file() {
            return Err(RunError::not_found(
                MissingKind::ProjectDir,
                project_file.display().to_string(),
            ));
        }
        tracing::info!(project_dir = %self.project_dir.display(), "using dbt project directory");
        Ok(executable)
    }

    /// Build every client in order.
    ///
    /// Returns an error only when pre-flight still fails after the batch
    /// retry policy is exhausted; no client has run in that case.
    pub fn run_all(&mut self, clients: &[String], project: &str) -> Result<BatchReport> {
        tracing::info!(clients = clients.len(), project, "starting batch");
        let executable = retry(self.batch_retry, "batch", &self.sleep, |_| self.preflight())
            .inspect_err(|err| {
                tracing::error!(error = %err.chain(), "batch pre-flight failed, no client was processed");
            })?;

        let mut report = BatchReport::default();
        for client in clients {
            if self.cancelled() {
                tracing::warn!(client = %client, "batch cancelled, skipping client");
                report.clients.push(ClientReport {
                    client: client.clone(),
                    outcome: ClientOutcome::NotAttempted,
                    attempts: 0,
                });
                continue;
            }
            report
                .clients
                .push(self.run_client(client, project, &executable));
        }

        tracing::info!(
            succeeded = report.count(|outcome| *outcome == ClientOutcome::Succeeded),
            cached = report.count(|outcome| *outcome == ClientOutcome::Cached),
            failed = report.failed().count(),
            "completed processing all clients"
        );
        Ok(report)
    }

    fn cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::SeqCst))
    }

    fn run_client(&mut self, client: &str, project: &str, executable: &Path) -> ClientReport {
        let key = cache_key(client, project, &self.project_dir, executable);
        if self.cache.is_fresh(&key, now_epoch_ms()) {
            tracing::info!(client, "identical run succeeded within the cache window, skipping");
            return ClientReport {
                client: client.to_string(),
                outcome: ClientOutcome::Cached,
                attempts: 0,
            };
        }

        tracing::info!(client, "starting processing for client");
        let mut attempts = 0;
        let result = retry(self.client_retry, client, &self.sleep, |attempt| {
            attempts = attempt;
            self.process_client(client, project, executable)
        });

        let outcome = match result {
            Ok(result) => {
                tracing::info!(client, elapsed_ms = result.elapsed_ms, "successfully completed processing");
                let now = now_epoch_ms();
                self.cache.prune(now);
                self.cache.record(key, client, now);
                if let Err(err) = self.cache.save() {
                    tracing::warn!(error = %format!("{err:#}"), "failed to save invocation cache");
                }
                ClientOutcome::Succeeded
            }
            Err(err) => {
                tracing::error!(client, attempts, error = %err.chain(), "failed to process client");
                ClientOutcome::Failed {
                    error: err.chain(),
                    exit_code: err.exit_code(),
                }
            }
        };
        ClientReport {
            client: client.to_string(),
            outcome,
            attempts,
        }
    }

    /// Credential, profile, dbt run; temporary artifacts are removed on every
    /// exit path.
    fn process_client(
        &self,
        client: &str,
        project: &str,
        executable: &Path,
    ) -> Result<InvocationResult> {
        let credential = self.store.get_credential(&self.credential_name)?;
        let (materialized, handle) = self.materializer.materialize(client, project, &credential)?;
        let _guard = CleanupGuard::new(handle);
        let request = InvocationRequest {
            executable,
            command: &self.dbt_command,
            project_dir: &self.project_dir,
            profile: &materialized.reference,
            target: &self.materializer.target_name,
            extra_args: &self.extra_args,
            client,
            project,
        };
        invoke(&request)
    }
}

#[cfg(all(test, unix))]
#[path = "batch_tests.rs"]
mod tests;
