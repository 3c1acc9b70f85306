//! dbt subprocess execution.
//!
//! Output is streamed into the log line by line while the child runs and also
//! captured for the caller. Per-client parameters travel only through the
//! child's own environment.
use crate::error::{MissingKind, Result, RunError};
use crate::materialize::ProfileRef;
use crate::profile::{ENV_BIGQUERY_PROJECT, ENV_CLIENT_DATASET};
use crate::util::{format_command_line, tail_string};
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::mpsc;
use std::time::Instant;

/// Combined output kept on a failed invocation.
pub const MAX_FAILURE_OUTPUT_BYTES: usize = 16 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Stdout,
    Stderr,
}

/// Exit status and captured output of one dbt run.
#[derive(Debug, Clone, Default)]
pub struct InvocationResult {
    pub exit_code: Option<i32>,
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
    /// Both streams in arrival order.
    pub combined: Vec<String>,
    pub elapsed_ms: u128,
}

impl InvocationResult {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    pub fn combined_text(&self) -> String {
        self.combined.join("\n")
    }
}

/// A fully resolved external command.
#[derive(Debug, Clone, Default)]
pub struct CommandSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub cwd: Option<PathBuf>,
}

impl CommandSpec {
    pub fn command_line(&self) -> String {
        format_command_line(&self.program, &self.args)
    }
}

/// One `dbt <command>` run for a client.
#[derive(Debug, Clone)]
pub struct InvocationRequest<'a> {
    pub executable: &'a Path,
    pub command: &'a [String],
    pub project_dir: &'a Path,
    pub profile: &'a ProfileRef,
    pub target: &'a str,
    pub extra_args: &'a [String],
    pub client: &'a str,
    pub project: &'a str,
}

impl InvocationRequest<'_> {
    pub fn to_command(&self) -> CommandSpec {
        let mut args: Vec<String> = self.command.to_vec();
        args.push("--project-dir".to_string());
        args.push(self.project_dir.display().to_string());
        args.extend(self.profile.args());
        args.push("--target".to_string());
        args.push(self.target.to_string());
        args.extend(self.extra_args.iter().cloned());

        let mut env = vec![
            (ENV_BIGQUERY_PROJECT.to_string(), self.project.to_string()),
            (ENV_CLIENT_DATASET.to_string(), self.client.to_string()),
        ];
        for (key, value) in self.profile.env() {
            match env.iter_mut().find(|(existing, _)| *existing == key) {
                Some(entry) => entry.1 = value,
                None => env.push((key, value)),
            }
        }

        CommandSpec {
            program: self.executable.to_path_buf(),
            args,
            env,
            cwd: Some(self.project_dir.to_path_buf()),
        }
    }
}

/// Resolve `name` on `PATH`, or check it directly when it contains a path
/// separator.
pub fn locate_executable(name: &str) -> Result<PathBuf> {
    which::which(name).map_err(|_| RunError::not_found(MissingKind::Executable, name))
}

/// Run `<exe> --version` and return its first non-empty line.
pub fn probe_version(executable: &Path) -> Result<String> {
    let output = Command::new(executable)
        .arg("--version")
        .stdin(Stdio::null())
        .output()
        .map_err(|source| RunError::Spawn {
            program: executable.to_path_buf(),
            source,
        })?;
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    if !output.status.success() {
        return Err(RunError::InvocationFailed {
            code: output.status.code(),
            output: tail_string(&format!("{stdout}{stderr}"), MAX_FAILURE_OUTPUT_BYTES),
        });
    }
    let line = stdout
        .lines()
        .chain(stderr.lines())
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or("unknown");
    Ok(line.to_string())
}

/// Run dbt for one client and fail on a non-zero exit.
pub fn invoke(request: &InvocationRequest<'_>) -> Result<InvocationResult> {
    let spec = request.to_command();
    let result = run_streaming(&spec, request.client)?;
    if result.success() {
        Ok(result)
    } else {
        Err(RunError::InvocationFailed {
            code: result.exit_code,
            output: tail_string(&result.combined_text(), MAX_FAILURE_OUTPUT_BYTES),
        })
    }
}

/// Spawn `spec`, log every output line as it arrives, and wait for exit.
///
/// A non-zero exit is reported in the result, not as an error.
pub fn run_streaming(spec: &CommandSpec, label: &str) -> Result<InvocationResult> {
    tracing::info!(label, command = %spec.command_line(), "executing command");
    let start = Instant::now();
    let mut command = Command::new(&spec.program);
    command
        .args(&spec.args)
        .envs(spec.env.iter().map(|(key, value)| (key, value)))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(cwd) = &spec.cwd {
        command.current_dir(cwd);
    }
    let spawn_error = |source| RunError::Spawn {
        program: spec.program.clone(),
        source,
    };
    let mut child = command.spawn().map_err(spawn_error)?;
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let mut result = InvocationResult::default();
    let (tx, rx) = mpsc::channel::<(Stream, String)>();
    std::thread::scope(|scope| {
        if let Some(stdout) = stdout {
            let tx = tx.clone();
            scope.spawn(move || forward_lines(stdout, Stream::Stdout, &tx));
        }
        if let Some(stderr) = stderr {
            let tx = tx.clone();
            scope.spawn(move || forward_lines(stderr, Stream::Stderr, &tx));
        }
        drop(tx);
        for (stream, line) in rx {
            match stream {
                Stream::Stdout => {
                    tracing::info!(label, "stdout: {line}");
                    result.stdout.push(line.clone());
                }
                Stream::Stderr => {
                    tracing::warn!(label, "stderr: {line}");
                    result.stderr.push(line.clone());
                }
            }
            result.combined.push(line);
        }
    });

    let status = child.wait().map_err(spawn_error)?;
    result.exit_code = status.code();
    result.elapsed_ms = start.elapsed().as_millis();
    tracing::info!(
        label,
        exit_code = ?result.exit_code,
        elapsed_ms = result.elapsed_ms,
        lines = result.combined.len(),
        "command finished"
    );
    Ok(result)
}

fn forward_lines<R: Read>(reader: R, stream: Stream, tx: &mpsc::Sender<(Stream, String)>) {
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf).trim_end().to_string();
                if tx.send((stream, line)).is_err() {
                    break;
                }
            }
            Err(err) => {
                tracing::warn!(?stream, error = %err, "output stream read failed");
                break;
            }
        }
    }
}
