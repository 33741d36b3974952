//! Metadata files found inside package archives, and helpers to work with
//! archive names.

mod index;
mod paths;

use std::path::Path;

pub use index::IndexJson;
pub use paths::{FileMode, PathType, PathsEntry, PathsJson, PrefixPlaceholder};

use serde::de::DeserializeOwned;

/// The two archive formats of the conda ecosystem.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum ArchiveType {
    /// A bzip2 compressed tarball.
    TarBz2,

    /// The newer zip + zstd format.
    Conda,
}

impl ArchiveType {
    /// Determines the archive type from a file name, returning `None` when
    /// the extension matches neither format.
    pub fn try_from(path: impl AsRef<Path>) -> Option<ArchiveType> {
        Self::split_str(path.as_ref().to_string_lossy().as_ref())
            .map(|(_, archive_type)| archive_type)
    }

    /// Splits a file name into its stem and the archive type.
    pub fn split_str(file_name: &str) -> Option<(&str, ArchiveType)> {
        if let Some(stem) = file_name.strip_suffix(".tar.bz2") {
            Some((stem, ArchiveType::TarBz2))
        } else {
            file_name
                .strip_suffix(".conda")
                .map(|stem| (stem, ArchiveType::Conda))
        }
    }

    /// The file extension of this archive type, including the leading dot.
    pub fn extension(self) -> &'static str {
        match self {
            ArchiveType::TarBz2 => ".tar.bz2",
            ArchiveType::Conda => ".conda",
        }
    }
}

/// The identity of a package archive as encoded in its file name:
/// `{name}-{version}-{build_string}{extension}`.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct ArchiveIdentifier {
    /// The package name.
    pub name: String,

    /// The version string.
    pub version: String,

    /// The build string.
    pub build_string: String,

    /// The archive format.
    pub archive_type: ArchiveType,
}

impl ArchiveIdentifier {
    /// Parses an archive file name into its identity parts.
    pub fn try_from_filename(file_name: &str) -> Option<Self> {
        let (stem, archive_type) = ArchiveType::split_str(file_name)?;

        // The name itself may contain dashes, so split from the back.
        let (rest, build_string) = stem.rsplit_once('-')?;
        let (name, version) = rest.rsplit_once('-')?;
        if name.is_empty() || version.is_empty() {
            return None;
        }

        Some(Self {
            name: name.to_owned(),
            version: version.to_owned(),
            build_string: build_string.to_owned(),
            archive_type,
        })
    }

    /// Formats the identity back into an archive file name.
    pub fn to_file_name(&self) -> String {
        format!(
            "{}-{}-{}{}",
            self.name,
            self.version,
            self.build_string,
            self.archive_type.extension()
        )
    }

    /// The directory name an archive with this identity extracts to.
    pub fn to_directory_name(&self) -> String {
        format!("{}-{}-{}", self.name, self.version, self.build_string)
    }
}

/// A metadata file stored in the `info/` directory of a package.
pub trait PackageFile: Sized + DeserializeOwned {
    /// The path of the file relative to the package root.
    fn package_path() -> &'static Path;

    /// Parses the file from a string.
    fn from_str(str: &str) -> Result<Self, std::io::Error> {
        serde_json::from_str(str).map_err(std::io::Error::other)
    }

    /// Reads the file from an extracted package directory.
    fn from_package_directory(path: impl AsRef<Path>) -> Result<Self, std::io::Error> {
        let path = path.as_ref().join(Self::package_path());
        Self::from_str(&fs_err::read_to_string(path)?)
    }
}

#[cfg(test)]
mod test {
    use super::{ArchiveIdentifier, ArchiveType};

    #[test]
    fn archive_types() {
        assert_eq!(
            ArchiveType::try_from("pkga-1.0-py_0.tar.bz2"),
            Some(ArchiveType::TarBz2)
        );
        assert_eq!(
            ArchiveType::try_from("pkga-1.0-py_0.conda"),
            Some(ArchiveType::Conda)
        );
        assert_eq!(ArchiveType::try_from("pkga-1.0-py_0.zip"), None);
    }

    #[test]
    fn identifier_roundtrip() {
        let id = ArchiveIdentifier::try_from_filename("my-pkg-1.0rc1-h1234_0.conda").unwrap();
        assert_eq!(id.name, "my-pkg");
        assert_eq!(id.version, "1.0rc1");
        assert_eq!(id.build_string, "h1234_0");
        assert_eq!(id.to_file_name(), "my-pkg-1.0rc1-h1234_0.conda");
        assert_eq!(id.to_directory_name(), "my-pkg-1.0rc1-h1234_0");
    }

    #[test]
    fn malformed_names_are_rejected() {
        assert!(ArchiveIdentifier::try_from_filename("pkga.tar.bz2").is_none());
        assert!(ArchiveIdentifier::try_from_filename("pkga-1.0-py_0.zip").is_none());
    }
}
