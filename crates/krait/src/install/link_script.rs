//! Execution of post-link scripts.
//!
//! A package may ship `bin/.{name}-post-link.sh` (or `Scripts\.{name}-post-link.bat`
//! on windows), which runs once after the package was linked, with the
//! prefix activated through environment variables. A failing post-link
//! script aborts the transaction and triggers a rollback.

use std::path::{Path, PathBuf};

use krait_conda_types::{PackageRecord, Platform};

/// An error while running a link script.
#[derive(Debug, thiserror::Error)]
pub enum LinkScriptError {
    /// The script could not be spawned.
    #[error("failed to spawn post-link script {0}")]
    FailedToSpawn(String, #[source] std::io::Error),

    /// The script ran but reported failure.
    #[error("post-link script {0} exited with {1}")]
    ScriptFailed(String, i32),
}

/// Returns the path of the post-link script a package would ship, relative
/// to the prefix.
pub fn post_link_script_path(record: &PackageRecord, platform: Platform) -> PathBuf {
    if platform.is_windows() {
        PathBuf::from("Scripts").join(format!(".{}-post-link.bat", record.name.as_normalized()))
    } else {
        PathBuf::from("bin").join(format!(".{}-post-link.sh", record.name.as_normalized()))
    }
}

/// Runs the post-link script of the package, when one exists. The script
/// runs with the prefix as working directory and `PREFIX`, `PKG_NAME`,
/// `PKG_VERSION` and `PKG_BUILDNUM` set, matching what packages expect.
pub fn run_post_link_script(
    prefix_root: &Path,
    record: &PackageRecord,
    platform: Platform,
) -> Result<(), LinkScriptError> {
    let script = prefix_root.join(post_link_script_path(record, platform));
    if !script.is_file() {
        return Ok(());
    }

    let script_display = script.display().to_string();
    tracing::debug!("running post-link script {script_display}");

    let mut command = if platform.is_windows() {
        let mut command = std::process::Command::new("cmd");
        command.arg("/c").arg(&script);
        command
    } else {
        let mut command = std::process::Command::new("sh");
        command.arg(&script);
        command
    };

    let status = command
        .current_dir(prefix_root)
        .env("PREFIX", prefix_root)
        .env("PKG_NAME", record.name.as_normalized())
        .env("PKG_VERSION", record.version.to_string())
        .env("PKG_BUILDNUM", record.build_number.to_string())
        .status()
        .map_err(|e| LinkScriptError::FailedToSpawn(script_display.clone(), e))?;

    if status.success() {
        Ok(())
    } else {
        Err(LinkScriptError::ScriptFailed(
            script_display,
            status.code().unwrap_or(-1),
        ))
    }
}

#[cfg(test)]
#[cfg(unix)]
mod test {
    use std::str::FromStr;

    use assert_matches::assert_matches;
    use krait_conda_types::{PackageName, PackageRecord, Platform, Version};

    use super::{post_link_script_path, run_post_link_script, LinkScriptError};

    fn record() -> PackageRecord {
        PackageRecord::new(
            PackageName::new_unchecked("pkga"),
            Version::from_str("1.0").unwrap(),
            "0".to_owned(),
        )
    }

    #[test]
    fn missing_scripts_are_fine() {
        let prefix = tempfile::tempdir().unwrap();
        run_post_link_script(prefix.path(), &record(), Platform::Linux64).unwrap();
    }

    #[test]
    fn scripts_run_with_the_prefix_environment() {
        let prefix = tempfile::tempdir().unwrap();
        let script = prefix
            .path()
            .join(post_link_script_path(&record(), Platform::Linux64));
        fs_err::create_dir_all(script.parent().unwrap()).unwrap();
        fs_err::write(&script, "#!/bin/sh\necho \"$PKG_NAME\" > \"$PREFIX/touched\"\n").unwrap();

        run_post_link_script(prefix.path(), &record(), Platform::Linux64).unwrap();
        assert_eq!(
            fs_err::read_to_string(prefix.path().join("touched")).unwrap(),
            "pkga\n"
        );
    }

    #[test]
    fn failing_scripts_surface() {
        let prefix = tempfile::tempdir().unwrap();
        let script = prefix
            .path()
            .join(post_link_script_path(&record(), Platform::Linux64));
        fs_err::create_dir_all(script.parent().unwrap()).unwrap();
        fs_err::write(&script, "#!/bin/sh\nexit 3\n").unwrap();

        assert_matches!(
            run_post_link_script(prefix.path(), &record(), Platform::Linux64),
            Err(LinkScriptError::ScriptFailed(_, 3))
        );
    }
}
