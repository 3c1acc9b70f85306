//! Memoization of successful client runs.
//!
//! A run is identified by a hash of its inputs (client, project, project
//! directory, executable). A successful run is remembered for a fixed window
//! so a rerun inside that window skips the client. Only the keys and
//! completion times are stored, never dbt output.
use crate::util::sha256_hex;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

pub const CACHE_SCHEMA_VERSION: u32 = 1;
pub const DEFAULT_CACHE_TTL_SECONDS: u64 = 60 * 60;

/// Hash of everything that makes two client runs the same unit of work.
pub fn cache_key(client: &str, project: &str, project_dir: &Path, executable: &Path) -> String {
    let inputs = serde_json::json!({
        "client": client,
        "project": project,
        "project_dir": project_dir.display().to_string(),
        "executable": executable.display().to_string(),
    });
    sha256_hex(inputs.to_string().as_bytes())
}

/// Current epoch time in milliseconds.
pub fn now_epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub client: String,
    pub completed_at_epoch_ms: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
struct CacheIndex {
    schema_version: u32,
    entries: BTreeMap<String, CacheEntry>,
}

impl Default for CacheIndex {
    fn default() -> Self {
        Self {
            schema_version: CACHE_SCHEMA_VERSION,
            entries: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct InvocationCache {
    path: Option<PathBuf>,
    ttl_ms: u64,
    index: CacheIndex,
}

impl InvocationCache {
    /// Cache that lives only for this process.
    pub fn in_memory(ttl_seconds: u64) -> Self {
        Self {
            path: None,
            ttl_ms: ttl_seconds.saturating_mul(1000),
            index: CacheIndex::default(),
        }
    }

    /// Load the cache index at `path`; a missing or unreadable index starts
    /// empty.
    pub fn load(path: &Path, ttl_seconds: u64) -> Self {
        let mut cache = Self::in_memory(ttl_seconds);
        cache.path = Some(path.to_path_buf());
        if !path.is_file() {
            return cache;
        }
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "failed to read invocation cache");
                return cache;
            }
        };
        match serde_json::from_slice::<CacheIndex>(&bytes) {
            Ok(index) if index.schema_version == CACHE_SCHEMA_VERSION => cache.index = index,
            Ok(index) => tracing::warn!(
                path = %path.display(),
                schema_version = index.schema_version,
                "ignoring invocation cache with unsupported schema"
            ),
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "failed to parse invocation cache");
            }
        }
        cache
    }

    /// Whether `key` completed successfully within the window ending at `now_ms`.
    pub fn is_fresh(&self, key: &str, now_ms: u64) -> bool {
        self.index
            .entries
            .get(key)
            .is_some_and(|entry| now_ms.saturating_sub(entry.completed_at_epoch_ms) < self.ttl_ms)
    }

    pub fn record(&mut self, key: String, client: &str, now_ms: u64) {
        self.index.entries.insert(
            key,
            CacheEntry {
                client: client.to_string(),
                completed_at_epoch_ms: now_ms,
            },
        );
    }

    /// Drop entries whose window has closed.
    pub fn prune(&mut self, now_ms: u64) {
        let ttl_ms = self.ttl_ms;
        self.index
            .entries
            .retain(|_, entry| now_ms.saturating_sub(entry.completed_at_epoch_ms) < ttl_ms);
    }

    pub fn len(&self) -> usize {
        self.index.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.entries.is_empty()
    }

    /// Persist the index when the cache is file-backed.
    pub fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create {}", parent.display()))?;
        }
        let text =
            serde_json::to_string_pretty(&self.index).context("serialize invocation cache")?;
        fs::write(path, text.as_bytes()).with_context(|| format!("write {}", path.display()))?;
        Ok(())
    }
}
