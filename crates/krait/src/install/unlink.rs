//! Removal of an installed package from a prefix.

use std::path::Path;

use krait_conda_types::PrefixRecord;

/// Errors of [`unlink_package`].
#[derive(Debug, thiserror::Error)]
pub enum UnlinkError {
    /// A file of the package could not be removed.
    #[error("failed to remove {0}")]
    FailedToRemoveFile(String, #[source] std::io::Error),

    /// A directory left empty by the package could not be removed.
    #[error("failed to remove directory {0}")]
    FailedToRemoveDirectory(String, #[source] std::io::Error),
}

/// Removes all files of an installed package from the prefix, then cleans up
/// directories that became empty. The `conda-meta` record itself is the
/// caller's to remove.
pub fn unlink_package(prefix_root: &Path, record: &PrefixRecord) -> Result<(), UnlinkError> {
    for relative_path in &record.files {
        let path = prefix_root.join(relative_path);
        match fs_err::remove_file(&path) {
            Ok(()) => {}
            // Somebody else removed it already; the goal is reached.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(UnlinkError::FailedToRemoveFile(
                    path.display().to_string(),
                    e,
                ))
            }
        }
    }

    // Remove the directories the files lived in, deepest first, up to the
    // prefix root, stopping at any directory that still has contents.
    let mut directories: Vec<&Path> = record
        .files
        .iter()
        .filter_map(|file| file.parent())
        .filter(|parent| !parent.as_os_str().is_empty())
        .collect();
    directories.sort_unstable();
    directories.dedup();
    directories.sort_unstable_by_key(|path| std::cmp::Reverse(path.components().count()));

    for relative_dir in directories {
        let mut current = Some(relative_dir);
        while let Some(dir) = current {
            if dir.as_os_str().is_empty() {
                break;
            }
            let absolute = prefix_root.join(dir);
            match remove_empty_directory(&absolute) {
                Ok(true) => current = dir.parent(),
                Ok(false) => break,
                Err(e) => {
                    return Err(UnlinkError::FailedToRemoveDirectory(
                        absolute.display().to_string(),
                        e,
                    ))
                }
            }
        }
    }

    Ok(())
}

/// Removes the directory if it exists and is empty. Returns whether it was
/// removed.
fn remove_empty_directory(path: &Path) -> Result<bool, std::io::Error> {
    match fs_err::read_dir(path) {
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e),
        Ok(mut entries) => {
            if entries.next().is_some() {
                return Ok(false);
            }
        }
    }
    fs_err::remove_dir(path)?;
    Ok(true)
}

#[cfg(test)]
mod test {
    use std::path::PathBuf;
    use std::str::FromStr;

    use krait_conda_types::{
        PackageName, PackageRecord, PrefixRecord, RepoDataRecord, Version,
    };

    use super::unlink_package;

    fn record_with_files(files: &[&str]) -> PrefixRecord {
        let mut record = PrefixRecord::from_repodata_record(RepoDataRecord {
            package_record: PackageRecord::new(
                PackageName::new_unchecked("pkga"),
                Version::from_str("1.0").unwrap(),
                "0".to_owned(),
            ),
            file_name: "pkga-1.0-0.tar.bz2".to_owned(),
            url: url::Url::parse("https://example.com/pkga-1.0-0.tar.bz2").unwrap(),
            channel: None,
        });
        record.files = files.iter().map(PathBuf::from).collect();
        record
    }

    #[test]
    fn removes_files_and_empty_directories() {
        let prefix = tempfile::tempdir().unwrap();
        fs_err::create_dir_all(prefix.path().join("lib/pkga/sub")).unwrap();
        fs_err::create_dir_all(prefix.path().join("bin")).unwrap();
        fs_err::write(prefix.path().join("lib/pkga/sub/a.py"), "a").unwrap();
        fs_err::write(prefix.path().join("lib/pkga/b.py"), "b").unwrap();
        fs_err::write(prefix.path().join("bin/tool"), "t").unwrap();
        fs_err::write(prefix.path().join("bin/other-package"), "x").unwrap();

        let record = record_with_files(&["lib/pkga/sub/a.py", "lib/pkga/b.py", "bin/tool"]);
        unlink_package(prefix.path(), &record).unwrap();

        // The package directories are gone entirely.
        assert!(!prefix.path().join("lib").exists());
        // bin still has a foreign file and therefore stays.
        assert!(prefix.path().join("bin/other-package").is_file());
        assert!(!prefix.path().join("bin/tool").exists());
    }

    #[test]
    fn missing_files_are_not_an_error() {
        let prefix = tempfile::tempdir().unwrap();
        let record = record_with_files(&["lib/never/created.py"]);
        unlink_package(prefix.path(), &record).unwrap();
    }
}
