//! Validation of extracted package directories against their
//! `info/paths.json`.

use std::path::{Path, PathBuf};

use krait_conda_types::package::{IndexJson, PackageFile, PathType, PathsEntry, PathsJson};
use krait_digest::{Digest, Sha256};
use thiserror::Error;

/// An error returned when an extracted package directory does not match its
/// own metadata.
#[derive(Debug, Error)]
pub enum PackageValidationError {
    /// The `info/index.json` file is missing or unreadable.
    #[error("failed to read 'info/index.json'")]
    ReadIndexJsonError(#[source] std::io::Error),

    /// The `info/paths.json` file is missing or unreadable.
    #[error("failed to read 'info/paths.json'")]
    ReadPathsJsonError(#[source] std::io::Error),

    /// A path described by `paths.json` does not match the file on disk.
    #[error("the path '{0}' seems to be corrupted")]
    CorruptedEntry(PathBuf, #[source] PackageEntryValidationError),
}

/// The way a single entry can fail validation.
#[derive(Debug, Error)]
pub enum PackageEntryValidationError {
    /// The file does not exist.
    #[error("the file does not exist")]
    NotFound,

    /// A symbolic link was expected.
    #[error("expected a symbolic link")]
    ExpectedSymlink,

    /// A directory was expected.
    #[error("expected a directory")]
    ExpectedDirectory,

    /// The size on disk differs from the recorded size.
    #[error("incorrect size, expected {0} but file on disk is {1}")]
    IncorrectSize(u64, u64),

    /// The SHA256 digest differs from the recorded digest.
    #[error("sha256 mismatch, expected '{0}' but file on disk is '{1}'")]
    HashMismatch(String, String),

    /// Reading the file failed.
    #[error(transparent)]
    IoError(#[from] std::io::Error),
}

/// Validates that the files in a package directory match its
/// `info/paths.json`. On success the parsed `index.json` and `paths.json`
/// are returned so callers do not have to parse them again.
pub fn validate_package_directory(
    package_dir: &Path,
) -> Result<(IndexJson, PathsJson), PackageValidationError> {
    let index_json = IndexJson::from_package_directory(package_dir)
        .map_err(PackageValidationError::ReadIndexJsonError)?;
    let paths = PathsJson::from_package_directory(package_dir)
        .map_err(PackageValidationError::ReadPathsJsonError)?;

    validate_package_directory_from_paths(package_dir, &paths)
        .map_err(|(path, err)| PackageValidationError::CorruptedEntry(path, err))?;

    Ok((index_json, paths))
}

/// Validates every entry of the given `paths.json` against the directory.
pub fn validate_package_directory_from_paths(
    package_dir: &Path,
    paths: &PathsJson,
) -> Result<(), (PathBuf, PackageEntryValidationError)> {
    for entry in &paths.paths {
        validate_package_entry(package_dir, entry)
            .map_err(|e| (entry.relative_path.clone(), e))?;
    }
    Ok(())
}

fn validate_package_entry(
    package_dir: &Path,
    entry: &PathsEntry,
) -> Result<(), PackageEntryValidationError> {
    let path = package_dir.join(&entry.relative_path);
    match entry.path_type {
        PathType::HardLink => validate_hard_link_entry(&path, entry),
        PathType::SoftLink => validate_soft_link_entry(&path),
        PathType::Directory => validate_directory_entry(&path),
    }
}

fn validate_hard_link_entry(
    path: &Path,
    entry: &PathsEntry,
) -> Result<(), PackageEntryValidationError> {
    // A file whose contents were patched at build time keeps its original
    // placeholder in the cache, so size and hash still apply there.
    let mut file = match fs_err::File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(PackageEntryValidationError::NotFound);
        }
        Err(e) => return Err(e.into()),
    };

    if let Some(size_in_bytes) = entry.size_in_bytes {
        let actual = file.metadata()?.len();
        if size_in_bytes != actual {
            return Err(PackageEntryValidationError::IncorrectSize(
                size_in_bytes,
                actual,
            ));
        }
    }

    if let Some(expected) = &entry.sha256 {
        let mut hasher = Sha256::new();
        std::io::copy(&mut file, &mut hasher)?;
        let actual = hasher.finalize();
        if expected != &actual {
            return Err(PackageEntryValidationError::HashMismatch(
                format!("{expected:x}"),
                format!("{actual:x}"),
            ));
        }
    }

    Ok(())
}

fn validate_soft_link_entry(path: &Path) -> Result<(), PackageEntryValidationError> {
    // The symlink target is validated through the entry it points at, which
    // the package lists separately.
    if path.is_symlink() {
        Ok(())
    } else {
        Err(PackageEntryValidationError::ExpectedSymlink)
    }
}

fn validate_directory_entry(path: &Path) -> Result<(), PackageEntryValidationError> {
    if path.is_dir() {
        Ok(())
    } else {
        Err(PackageEntryValidationError::ExpectedDirectory)
    }
}

#[cfg(test)]
mod test {
    use assert_matches::assert_matches;
    use std::io::Write;

    use super::{
        validate_package_directory, validate_package_directory_from_paths,
        PackageEntryValidationError, PackageValidationError,
    };
    use krait_conda_types::package::{PackageFile, PathsJson};
    use krait_digest::compute_bytes_digest;

    fn write_package(dir: &std::path::Path) -> PathsJson {
        let content = b"binary payload";
        let sha256 = compute_bytes_digest::<krait_digest::Sha256>(content);

        fs_err::create_dir_all(dir.join("info")).unwrap();
        fs_err::create_dir_all(dir.join("lib")).unwrap();
        fs_err::write(dir.join("lib/data.bin"), content).unwrap();
        fs_err::write(
            dir.join("info/index.json"),
            r#"{"name": "pkga", "version": "1.0", "build": "py_0", "build_number": 0}"#,
        )
        .unwrap();

        let paths_json = format!(
            r#"{{
                "paths_version": 1,
                "paths": [
                    {{"_path": "lib/data.bin", "path_type": "hardlink",
                      "sha256": "{sha256:x}", "size_in_bytes": {len}}}
                ]
            }}"#,
            len = content.len()
        );
        fs_err::write(dir.join("info/paths.json"), &paths_json).unwrap();
        PathsJson::from_str(&paths_json).unwrap()
    }

    #[test]
    fn valid_directory_passes() {
        let dir = tempfile::tempdir().unwrap();
        write_package(dir.path());
        let (index, paths) = validate_package_directory(dir.path()).unwrap();
        assert_eq!(index.name.as_source(), "pkga");
        assert_eq!(paths.paths.len(), 1);
    }

    #[test]
    fn modified_files_fail_hash_validation() {
        let dir = tempfile::tempdir().unwrap();
        let paths = write_package(dir.path());

        let mut file = fs_err::OpenOptions::new()
            .write(true)
            .open(dir.path().join("lib/data.bin"))
            .unwrap();
        file.write_all(&[0xff]).unwrap();
        drop(file);

        assert_matches!(
            validate_package_directory_from_paths(dir.path(), &paths),
            Err((path, PackageEntryValidationError::HashMismatch(_, _)))
                if path == std::path::Path::new("lib/data.bin")
        );
    }

    #[test]
    fn truncated_files_fail_size_validation() {
        let dir = tempfile::tempdir().unwrap();
        let paths = write_package(dir.path());
        fs_err::write(dir.path().join("lib/data.bin"), b"short").unwrap();

        assert_matches!(
            validate_package_directory_from_paths(dir.path(), &paths),
            Err((_, PackageEntryValidationError::IncorrectSize(_, _)))
        );
    }

    #[test]
    fn missing_metadata_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert_matches!(
            validate_package_directory(dir.path()),
            Err(PackageValidationError::ReadIndexJsonError(_))
        );
    }
}
