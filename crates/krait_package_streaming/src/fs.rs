//! Extraction of archives from files on disk.

use std::{fs::File, path::Path};

use krait_conda_types::package::ArchiveType;

use crate::{ExtractError, ExtractResult};

/// Extracts a `.tar.bz2` archive at the given path to a directory.
pub fn extract_tar_bz2(archive: &Path, destination: &Path) -> Result<ExtractResult, ExtractError> {
    let file = File::open(archive)?;
    crate::read::extract_tar_bz2(file, destination)
}

/// Extracts a `.conda` archive at the given path to a directory.
pub fn extract_conda(archive: &Path, destination: &Path) -> Result<ExtractResult, ExtractError> {
    let file = File::open(archive)?;
    crate::read::extract_conda(file, destination)
}

/// Extracts an archive at the given path to a directory; the archive format
/// is determined from the file extension.
pub fn extract(archive: &Path, destination: &Path) -> Result<ExtractResult, ExtractError> {
    match ArchiveType::try_from(archive).ok_or(ExtractError::UnsupportedArchiveType)? {
        ArchiveType::TarBz2 => extract_tar_bz2(archive, destination),
        ArchiveType::Conda => extract_conda(archive, destination),
    }
}

#[cfg(test)]
mod test {
    use assert_matches::assert_matches;

    use crate::{test_utils::build_tar_bz2, ExtractError};

    #[test]
    fn extension_dispatch() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("pkg-1.0-0.tar.bz2");
        std::fs::write(&archive, build_tar_bz2(&[("info/index.json", b"{}")])).unwrap();

        let out = dir.path().join("out");
        super::extract(&archive, &out).unwrap();
        assert!(out.join("info/index.json").is_file());

        let bogus = dir.path().join("pkg-1.0-0.zip");
        std::fs::write(&bogus, b"?").unwrap();
        assert_matches!(
            super::extract(&bogus, &out),
            Err(ExtractError::UnsupportedArchiveType)
        );
    }
}
