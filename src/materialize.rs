//! Per-client profile materialization.
//!
//! Each call writes the credential to a fresh key file and, depending on the
//! transport, a fresh `profiles.yml`. Everything written is recorded in the
//! returned [`ArtifactHandle`] so the caller can tear it down.
use crate::cleanup::{cleanup, ArtifactHandle};
use crate::credentials::Credential;
use crate::error::{Result, RunError};
use crate::profile::{
    render_profiles, write_profiles_file, ConnectionProfile, TargetConfig, ENV_BIGQUERY_PROJECT,
    ENV_CLIENT_DATASET, ENV_KEYFILE,
};
use crate::util::truncate_string;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};

const CREDS_PREFIX: &str = "dbt_creds_";
const PROFILES_DIR_PREFIX: &str = "dbt_profiles_";
const PROFILE_PREVIEW_BYTES: usize = 500;

/// How the materialized profile reaches dbt.
#[derive(Serialize, Deserialize, clap::ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ProfileTransport {
    /// Fresh profiles directory passed as `--profiles-dir`.
    #[default]
    Directory,
    /// Fresh profiles file whose location is exported as `DBT_PROFILES_DIR`
    /// in the child environment.
    ExplicitFile,
    /// No profile file; target parameters are exported to the child and read
    /// by the static env-templated profile.
    Inline,
}

/// Where dbt finds the profile for one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProfileRef {
    Directory(PathBuf),
    ExplicitFile(PathBuf),
    Inline {
        profiles_dir: PathBuf,
        env: Vec<(String, String)>,
    },
}

impl ProfileRef {
    /// Extra argv entries for this reference.
    pub fn args(&self) -> Vec<String> {
        match self {
            ProfileRef::Directory(dir) | ProfileRef::Inline { profiles_dir: dir, .. } => {
                vec!["--profiles-dir".to_string(), dir.display().to_string()]
            }
            ProfileRef::ExplicitFile(_) => Vec::new(),
        }
    }

    /// Extra child-environment entries for this reference.
    pub fn env(&self) -> Vec<(String, String)> {
        match self {
            ProfileRef::Directory(_) => Vec::new(),
            ProfileRef::ExplicitFile(file) => {
                let dir = file.parent().unwrap_or_else(|| Path::new("."));
                vec![("DBT_PROFILES_DIR".to_string(), dir.display().to_string())]
            }
            ProfileRef::Inline { env, .. } => env.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MaterializedProfile {
    pub profile: ConnectionProfile,
    pub reference: ProfileRef,
}

/// Builds client-scoped profiles.
#[derive(Debug, Clone)]
pub struct Materializer {
    pub profile_name: String,
    pub target_name: String,
    pub transport: ProfileTransport,
    /// Parent directory for temporary artifacts.
    pub temp_root: PathBuf,
    /// Directory holding the env-templated profile used by `Inline`.
    pub static_profiles_dir: PathBuf,
}

impl Materializer {
    pub fn materialize(
        &self,
        client_id: &str,
        project_id: &str,
        credential: &Credential,
    ) -> Result<(MaterializedProfile, ArtifactHandle)> {
        let mut handle = ArtifactHandle::default();
        match self.write_artifacts(client_id, project_id, credential, &mut handle) {
            Ok(profile) => Ok((profile, handle)),
            Err(err) => {
                cleanup(&handle);
                Err(err)
            }
        }
    }

    fn write_artifacts(
        &self,
        client_id: &str,
        project_id: &str,
        credential: &Credential,
        handle: &mut ArtifactHandle,
    ) -> Result<MaterializedProfile> {
        let keyfile = write_credential_file(&self.temp_root, credential)?;
        handle.track_file(keyfile.clone());
        tracing::info!(
            client = client_id,
            credential = credential.name(),
            path = %keyfile.display(),
            "credentials written to temporary file"
        );

        let keyfile = keyfile.display().to_string();
        let target = TargetConfig::service_account(project_id, client_id, Some(keyfile.clone()));
        let profile = ConnectionProfile::single(&self.profile_name, &self.target_name, target);

        let reference = match self.transport {
            ProfileTransport::Directory | ProfileTransport::ExplicitFile => {
                let dir = tempfile::Builder::new()
                    .prefix(PROFILES_DIR_PREFIX)
                    .tempdir_in(&self.temp_root)
                    .map_err(|err| RunError::serialization("profiles directory", err))?
                    .keep();
                handle.track_dir(dir.clone());
                let path = write_profiles_file(&dir, std::slice::from_ref(&profile))
                    .map_err(|err| RunError::serialization("profiles.yml", err))?;
                handle.track_file(path.clone());
                log_profile_preview(client_id, &path, &profile);
                if self.transport == ProfileTransport::Directory {
                    ProfileRef::Directory(dir)
                } else {
                    ProfileRef::ExplicitFile(path)
                }
            }
            ProfileTransport::Inline => ProfileRef::Inline {
                profiles_dir: self.static_profiles_dir.clone(),
                env: vec![
                    (ENV_BIGQUERY_PROJECT.to_string(), project_id.to_string()),
                    (ENV_CLIENT_DATASET.to_string(), client_id.to_string()),
                    (ENV_KEYFILE.to_string(), keyfile),
                ],
            },
        };

        Ok(MaterializedProfile { profile, reference })
    }
}

fn write_credential_file(root: &Path, credential: &Credential) -> Result<PathBuf> {
    let mut file = tempfile::Builder::new()
        .prefix(CREDS_PREFIX)
        .suffix(".json")
        .tempfile_in(root)
        .map_err(|err| RunError::serialization("credential file", err))?;
    serde_json::to_writer(&mut file, credential.payload())
        .map_err(|err| RunError::serialization("credential file", err))?;
    file.flush()
        .map_err(|err| RunError::serialization("credential file", err))?;
    let (_, path) = file
        .keep()
        .map_err(|err| RunError::serialization("credential file", err))?;
    Ok(path)
}

fn log_profile_preview(client_id: &str, path: &Path, profile: &ConnectionProfile) {
    let Ok(text) = render_profiles(std::slice::from_ref(profile)) else {
        return;
    };
    tracing::info!(client = client_id, path = %path.display(), "profiles.yml written");
    tracing::debug!(
        client = client_id,
        preview = %truncate_string(&text, PROFILE_PREVIEW_BYTES),
        "profiles.yml content"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::sample_credential;
    use crate::profile::{parse_profiles, DEFAULT_PROFILE_NAME, SERVICE_ACCOUNT_TARGET};
    use std::fs;

    fn materializer(root: &Path, transport: ProfileTransport) -> Materializer {
        Materializer {
            profile_name: DEFAULT_PROFILE_NAME.to_string(),
            target_name: SERVICE_ACCOUNT_TARGET.to_string(),
            transport,
            temp_root: root.to_path_buf(),
            static_profiles_dir: root.join("static"),
        }
    }

    #[test]
    fn target_binds_client_dataset_and_project() {
        let root = tempfile::tempdir().expect("tempdir");
        let credential = sample_credential("creds");
        for client in ["golden_hour", "bb_design", "western_holistic_med"] {
            let (materialized, handle) = materializer(root.path(), ProfileTransport::Directory)
                .materialize(client, "holistic-money", &credential)
                .expect("materialize");
            let target = materialized.profile.default_target().expect("default target");
            assert_eq!(target.dataset, client);
            assert_eq!(target.schema(), client);
            assert_eq!(target.project, "holistic-money");
            assert_eq!(target.threads, 4);
            assert_eq!(target.timeout_seconds, 300);
            assert_eq!(target.location, "US");
            assert_eq!(target.priority, "interactive");
            assert_eq!(materialized.profile.name, DEFAULT_PROFILE_NAME);
            cleanup(&handle);
        }
    }

    #[test]
    fn directory_transport_writes_keyfile_and_profile() {
        let root = tempfile::tempdir().expect("tempdir");
        let credential = sample_credential("creds");
        let (materialized, handle) = materializer(root.path(), ProfileTransport::Directory)
            .materialize("golden_hour", "holistic-money", &credential)
            .expect("materialize");

        let ProfileRef::Directory(dir) = &materialized.reference else {
            panic!("expected directory reference");
        };
        assert_eq!(materialized.reference.args()[1], dir.display().to_string());
        assert!(materialized.reference.env().is_empty());

        let written = fs::read_to_string(dir.join("profiles.yml")).expect("read profile");
        let parsed = parse_profiles(&written).expect("parse");
        assert_eq!(parsed, vec![materialized.profile.clone()]);

        let keyfile = parsed[0].outputs[SERVICE_ACCOUNT_TARGET]
            .keyfile
            .clone()
            .expect("keyfile");
        let key: serde_json::Value =
            serde_json::from_slice(&fs::read(&keyfile).expect("read key")).expect("json");
        assert_eq!(key["client_email"], credential.payload()["client_email"]);
        assert!(handle.files().iter().any(|file| file.display().to_string() == keyfile));

        cleanup(&handle);
        assert!(!dir.exists());
        assert!(!Path::new(&keyfile).exists());
    }

    #[test]
    fn explicit_file_transport_exports_profiles_dir() {
        let root = tempfile::tempdir().expect("tempdir");
        let (materialized, handle) = materializer(root.path(), ProfileTransport::ExplicitFile)
            .materialize("bb_design", "holistic-money", &sample_credential("creds"))
            .expect("materialize");
        let ProfileRef::ExplicitFile(file) = &materialized.reference else {
            panic!("expected file reference");
        };
        assert!(file.is_file());
        assert!(materialized.reference.args().is_empty());
        let env = materialized.reference.env();
        assert_eq!(env[0].0, "DBT_PROFILES_DIR");
        assert_eq!(
            Path::new(&env[0].1),
            file.parent().expect("profile file has a parent")
        );
        cleanup(&handle);
    }

    #[test]
    fn inline_transport_writes_only_the_keyfile() {
        let root = tempfile::tempdir().expect("tempdir");
        let (materialized, handle) = materializer(root.path(), ProfileTransport::Inline)
            .materialize("child_life_on_call", "holistic-money", &sample_credential("c"))
            .expect("materialize");
        assert_eq!(handle.files().len(), 1);
        assert!(handle.dirs().is_empty());
        let env = materialized.reference.env();
        assert!(env.contains(&(
            "DBT_CLIENT_DATASET".to_string(),
            "child_life_on_call".to_string()
        )));
        assert!(env.contains(&(
            "DBT_BIGQUERY_PROJECT".to_string(),
            "holistic-money".to_string()
        )));
        assert_eq!(
            materialized.reference.args(),
            vec![
                "--profiles-dir".to_string(),
                root.path().join("static").display().to_string()
            ]
        );
        cleanup(&handle);
    }

    #[test]
    fn repeated_materializations_never_share_artifacts() {
        let root = tempfile::tempdir().expect("tempdir");
        let materializer = materializer(root.path(), ProfileTransport::Directory);
        let credential = sample_credential("creds");
        let (_, first) = materializer
            .materialize("golden_hour", "p", &credential)
            .expect("first");
        let (_, second) = materializer
            .materialize("golden_hour", "p", &credential)
            .expect("second");
        for path in first.paths() {
            assert!(second.paths().all(|other| other != path));
        }
        cleanup(&first);
        cleanup(&second);
    }

    #[test]
    fn unwritable_root_is_a_serialization_error() {
        let root = tempfile::tempdir().expect("tempdir");
        let missing = root.path().join("does-not-exist");
        let err = materializer(&missing, ProfileTransport::Directory)
            .materialize("golden_hour", "p", &sample_credential("creds"))
            .unwrap_err();
        assert!(matches!(err, RunError::Serialization { .. }));
    }
}
