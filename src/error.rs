//! Error taxonomy for a single client's build.
//!
//! Command glue uses `anyhow`; the pieces that the batch loop has to tell
//! apart (missing inputs, unwritable artifacts, a failed dbt run) are typed.
use std::fmt;
use std::path::PathBuf;

/// Result alias for client-level operations.
pub type Result<T, E = RunError> = std::result::Result<T, E>;

/// What a `NotFound` error failed to locate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingKind {
    Credential,
    Executable,
    ProjectDir,
}

impl fmt::Display for MissingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            MissingKind::Credential => "credential",
            MissingKind::Executable => "executable",
            MissingKind::ProjectDir => "project directory",
        };
        f.write_str(label)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("{kind} not found: {name}")]
    NotFound { kind: MissingKind, name: String },

    #[error("failed to write {what}")]
    Serialization {
        what: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("dbt exited with {}", exit_label(.code))]
    InvocationFailed { code: Option<i32>, output: String },

    #[error("failed to run {}", .program.display())]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Config(String),
}

impl RunError {
    pub fn not_found(kind: MissingKind, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            name: name.into(),
        }
    }

    pub fn serialization(
        what: impl Into<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::Serialization {
            what: what.into(),
            source: source.into(),
        }
    }

    /// Exit code carried by a failed invocation, if any.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            RunError::InvocationFailed { code, .. } => *code,
            _ => None,
        }
    }

    /// This error followed by every source, joined with `": "`.
    pub fn chain(&self) -> String {
        let mut text = self.to_string();
        let mut source = std::error::Error::source(self);
        while let Some(err) = source {
            text.push_str(": ");
            text.push_str(&err.to_string());
            source = std::error::Error::source(err);
        }
        if let RunError::InvocationFailed { output, .. } = self {
            if !output.is_empty() {
                text.push('\n');
                text.push_str(output);
            }
        }
        text
    }
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("status {code}"),
        None => "no status (terminated by signal)".to_string(),
    }
}
