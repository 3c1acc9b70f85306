//! Fake external tools for unit tests.
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

/// Linux `ETXTBSY`: another thread forked while the script was open for write.
const TEXT_FILE_BUSY: i32 = 26;

/// Write an executable `/bin/sh` script and wait until it can be exec'd.
///
/// The readiness probe runs the script with `FAKE_PROBE` set, which exits
/// before `body` so the probe has no side effects.
pub(crate) fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n[ -n \"$FAKE_PROBE\" ] && exit 0\n{body}")).expect("write script");
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).expect("chmod script");
    for _ in 0..50 {
        let status = Command::new(&path)
            .env("FAKE_PROBE", "1")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
        match status {
            Err(err) if err.raw_os_error() == Some(TEXT_FILE_BUSY) => {
                std::thread::sleep(Duration::from_millis(20));
            }
            _ => break,
        }
    }
    path
}

/// Minimal dbt project directory.
pub(crate) fn dbt_project(dir: &Path) -> PathBuf {
    let project = dir.join("project");
    fs::create_dir_all(&project).expect("create project dir");
    fs::write(
        project.join("dbt_project.yml"),
        "name: holistic_money\nprofile: holistic_money_dw\n",
    )
    .expect("write dbt_project.yml");
    project
}
