//! Removal of per-invocation temporary artifacts.
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Every temporary artifact created for one client invocation.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ArtifactHandle {
    files: Vec<PathBuf>,
    dirs: Vec<PathBuf>,
}

impl ArtifactHandle {
    pub fn track_file(&mut self, path: PathBuf) {
        self.files.push(path);
    }

    pub fn track_dir(&mut self, path: PathBuf) {
        self.dirs.push(path);
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    pub fn dirs(&self) -> &[PathBuf] {
        &self.dirs
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty() && self.dirs.is_empty()
    }

    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.files
            .iter()
            .chain(self.dirs.iter())
            .map(PathBuf::as_path)
    }
}

/// Remove every artifact in `handle` that still exists.
///
/// Missing artifacts are skipped silently; other failures are logged as
/// warnings and otherwise ignored. Returns the number of removal warnings.
pub fn cleanup(handle: &ArtifactHandle) -> usize {
    let mut warnings = 0;
    for path in handle.files() {
        match fs::remove_file(path) {
            Ok(()) => tracing::debug!(path = %path.display(), "removed temporary file"),
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => {
                warnings += 1;
                tracing::warn!(path = %path.display(), error = %err, "cleanup warning: file not removed");
            }
        }
    }
    // Files may live inside tracked dirs, so dirs go last.
    for path in handle.dirs() {
        match fs::remove_dir_all(path) {
            Ok(()) => tracing::debug!(path = %path.display(), "removed temporary directory"),
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => {
                warnings += 1;
                tracing::warn!(path = %path.display(), error = %err, "cleanup warning: directory not removed");
            }
        }
    }
    warnings
}

/// Runs [`cleanup`] when dropped, covering early returns and panics.
#[derive(Debug)]
pub struct CleanupGuard {
    handle: ArtifactHandle,
}

impl CleanupGuard {
    pub fn new(handle: ArtifactHandle) -> Self {
        Self { handle }
    }
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        cleanup(&self.handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn populated_handle(root: &Path) -> ArtifactHandle {
        let creds = root.join("dbt_creds_a.json");
        fs::write(&creds, b"{}").expect("write creds");
        let profiles_dir = root.join("dbt_profiles_a");
        fs::create_dir_all(&profiles_dir).expect("mkdir");
        fs::write(profiles_dir.join("profiles.yml"), b"x: 1").expect("write profile");

        let mut handle = ArtifactHandle::default();
        handle.track_file(creds);
        handle.track_dir(profiles_dir);
        handle
    }

    #[test]
    fn cleanup_removes_files_and_dirs() {
        let root = tempfile::tempdir().expect("tempdir");
        let handle = populated_handle(root.path());
        assert_eq!(cleanup(&handle), 0);
        for path in handle.paths() {
            assert!(!path.exists(), "{} still exists", path.display());
        }
    }

    #[test]
    fn cleanup_is_idempotent() {
        let root = tempfile::tempdir().expect("tempdir");
        let handle = populated_handle(root.path());
        assert_eq!(cleanup(&handle), 0);
        assert_eq!(cleanup(&handle), 0);
    }

    #[test]
    fn cleanup_of_never_created_paths_is_silent() {
        let mut handle = ArtifactHandle::default();
        handle.track_file(PathBuf::from("/nonexistent/dbt_creds_missing.json"));
        handle.track_dir(PathBuf::from("/nonexistent/dbt_profiles_missing"));
        assert_eq!(cleanup(&handle), 0);
        assert!(ArtifactHandle::default().is_empty());
    }

    #[test]
    fn guard_cleans_up_on_panic() {
        let root = tempfile::tempdir().expect("tempdir");
        let handle = populated_handle(root.path());
        let paths: Vec<PathBuf> = handle.paths().map(Path::to_path_buf).collect();
        let result = std::panic::catch_unwind(move || {
            let _guard = CleanupGuard::new(handle);
            panic!("invocation blew up");
        });
        assert!(result.is_err());
        for path in paths {
            assert!(!path.exists(), "{} leaked", path.display());
        }
    }
}
