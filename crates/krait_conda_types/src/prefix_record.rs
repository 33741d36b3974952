//! The per-package metadata written to `conda-meta/` when a package is
//! linked into a prefix. The presence of such a file is what makes a package
//! "installed".

use std::{
    io::Write,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use serde_repr::{Deserialize_repr, Serialize_repr};
use serde_with::{serde_as, skip_serializing_none};

use krait_digest::{serde::SerializableHash, Sha256Hash};

use crate::{package::FileMode, RepoDataRecord};

/// The state of a single package inside a prefix: the repodata record it was
/// installed from plus everything the linker did for it.
#[skip_serializing_none]
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct PrefixRecord {
    /// The record of the package as it was at install time.
    #[serde(flatten)]
    pub repodata_record: RepoDataRecord,

    /// The path to the archive the package was installed from.
    pub package_tarball_full_path: Option<PathBuf>,

    /// The path to the extracted archive the package was linked from.
    pub extracted_package_dir: Option<PathBuf>,

    /// The files, relative to the prefix root, that make up this package in
    /// the prefix.
    #[serde(default)]
    pub files: Vec<PathBuf>,

    /// Detailed information about every installed file.
    #[serde(default)]
    pub paths_data: PrefixPaths,

    /// The spec that was requested when the user installed this package, if
    /// it was requested explicitly.
    pub requested_spec: Option<String>,

    /// Information about how the package was linked.
    pub link: Option<Link>,
}

impl PrefixRecord {
    /// Constructs a record from a repodata record with no linked files yet.
    pub fn from_repodata_record(repodata_record: RepoDataRecord) -> Self {
        Self {
            repodata_record,
            package_tarball_full_path: None,
            extracted_package_dir: None,
            files: Vec::new(),
            paths_data: PrefixPaths::default(),
            requested_spec: None,
            link: None,
        }
    }

    /// The canonical file name of this record inside `conda-meta/`.
    pub fn file_name(&self) -> String {
        let record = &self.repodata_record.package_record;
        format!(
            "{}-{}-{}.json",
            record.name.as_normalized(),
            record.version,
            record.build
        )
    }

    /// Parses a record from a file on disk.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, std::io::Error> {
        let content = fs_err::read_to_string(path.as_ref())?;
        serde_json::from_str(&content).map_err(std::io::Error::other)
    }

    /// Writes the record as pretty JSON to the given path.
    pub fn write_to_path(&self, path: impl AsRef<Path>) -> Result<(), std::io::Error> {
        let mut file = fs_err::File::create(path.as_ref())?;
        serde_json::to_writer_pretty(&mut file, self).map_err(std::io::Error::other)?;
        file.write_all(b"\n")
    }

    /// Reads all records from the `conda-meta` directory of a prefix. A
    /// missing directory yields an empty environment.
    pub fn collect_from_prefix(prefix: impl AsRef<Path>) -> Result<Vec<Self>, std::io::Error> {
        let conda_meta = prefix.as_ref().join("conda-meta");
        let mut records = Vec::new();
        let entries = match fs_err::read_dir(conda_meta) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(records),
            Err(e) => return Err(e),
        };
        for entry in entries {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                records.push(Self::from_path(&path)?);
            }
        }
        Ok(records)
    }
}

impl AsRef<RepoDataRecord> for PrefixRecord {
    fn as_ref(&self) -> &RepoDataRecord {
        &self.repodata_record
    }
}

impl AsRef<crate::PackageRecord> for PrefixRecord {
    fn as_ref(&self) -> &crate::PackageRecord {
        &self.repodata_record.package_record
    }
}

/// Information about the files that were linked for a package.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct PrefixPaths {
    /// The version of this structure.
    pub paths_version: u64,

    /// The individual entries.
    #[serde(default)]
    pub paths: Vec<PathsEntry>,
}

impl Default for PrefixPaths {
    fn default() -> Self {
        Self {
            paths_version: 1,
            paths: Vec::default(),
        }
    }
}

impl From<Vec<PathsEntry>> for PrefixPaths {
    fn from(paths: Vec<PathsEntry>) -> Self {
        Self {
            paths,
            ..Default::default()
        }
    }
}

/// A single installed file.
#[serde_as]
#[skip_serializing_none]
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct PathsEntry {
    /// The path of the file relative to the prefix root.
    #[serde(rename = "_path")]
    pub relative_path: PathBuf,

    /// How the file was installed into the prefix.
    pub path_type: PathType,

    /// Whether this file must never be linked.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub no_link: bool,

    /// The digest of the file as it was in the package.
    #[serde_as(as = "Option<SerializableHash::<krait_digest::Sha256>>")]
    pub sha256: Option<Sha256Hash>,

    /// The digest of the file as it ended up in the prefix. Differs from
    /// `sha256` when a placeholder was rewritten.
    #[serde_as(as = "Option<SerializableHash::<krait_digest::Sha256>>")]
    pub sha256_in_prefix: Option<Sha256Hash>,

    /// The size of the installed file in bytes.
    pub size_in_bytes: Option<u64>,

    /// The file mode of the entry, recorded when a placeholder was rewritten.
    pub file_mode: Option<FileMode>,

    /// The placeholder that was replaced with the prefix path.
    pub prefix_placeholder: Option<String>,
}

/// How a file was installed into the prefix.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PathType {
    /// The file is a hard link into the package cache.
    #[serde(rename = "hardlink")]
    HardLink,

    /// The file is a symbolic link.
    #[serde(rename = "softlink")]
    SoftLink,

    /// The file is a directory.
    Directory,

    /// A file that was patched while copying (placeholder rewriting).
    #[serde(rename = "patched")]
    Patched,
}

/// How the package as a whole was linked.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Link {
    /// The directory the package was linked from.
    pub source: PathBuf,

    /// The dominant link type.
    #[serde(rename = "type")]
    pub link_type: Option<LinkType>,
}

/// The numeric link type conda records in its metadata.
#[allow(missing_docs)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize_repr, Deserialize_repr)]
#[repr(u8)]
pub enum LinkType {
    HardLink = 1,
    SoftLink = 2,
    Copy = 3,
    Directory = 4,
}
