//! The `info/paths.json` file: the authoritative list of files a package
//! installs, including how each file must be linked.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, skip_serializing_none};

use krait_digest::{serde::SerializableHash, Sha256Hash};

use super::PackageFile;

/// The parsed `info/paths.json` of a package.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct PathsJson {
    /// The version of the file format.
    pub paths_version: u64,

    /// The entries of the package.
    pub paths: Vec<PathsEntry>,
}

impl PackageFile for PathsJson {
    fn package_path() -> &'static Path {
        Path::new("info/paths.json")
    }
}

/// One file of a package and the instructions to install it.
#[serde_as]
#[skip_serializing_none]
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct PathsEntry {
    /// The path of the file relative to the package root.
    #[serde(rename = "_path")]
    pub relative_path: PathBuf,

    /// How the file should be linked into a prefix.
    pub path_type: PathType,

    /// Whether the file must never be linked (data files some packages patch
    /// in place).
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub no_link: bool,

    /// The prefix placeholder data, present when the file contains the build
    /// prefix and must be rewritten at link time.
    #[serde(flatten)]
    pub prefix_placeholder: Option<PrefixPlaceholder>,

    /// The SHA256 digest of the file contents.
    #[serde_as(as = "Option<SerializableHash::<krait_digest::Sha256>>")]
    pub sha256: Option<Sha256Hash>,

    /// The size of the file in bytes.
    pub size_in_bytes: Option<u64>,
}

/// Describes the placeholder that must be replaced with the installation
/// prefix when the file is linked.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct PrefixPlaceholder {
    /// Whether the file is text or binary. Binary replacement preserves the
    /// byte length of the placeholder by NUL padding.
    pub file_mode: FileMode,

    /// The literal placeholder string recorded at build time.
    #[serde(rename = "prefix_placeholder")]
    pub placeholder: String,
}

/// The mode of a file with a prefix placeholder.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileMode {
    /// A binary file; replacement is length preserving.
    Binary,

    /// A text file; replacement may change the length.
    Text,
}

/// How a file is stored in the package and preferably linked to a prefix.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PathType {
    /// A regular file, hard linked when possible.
    HardLink,

    /// A symbolic link, copied verbatim.
    SoftLink,

    /// A directory entry.
    Directory,
}

#[cfg(test)]
mod test {
    use super::{FileMode, PathType, PathsJson};
    use crate::package::PackageFile;

    const PATHS_JSON: &str = r#"{
  "paths": [
    {
      "_path": "bin/tool",
      "path_type": "hardlink",
      "file_mode": "text",
      "prefix_placeholder": "/opt/anaconda1anaconda2anaconda3",
      "sha256": "7ed530efddd47a96c11197906b4008405b90e3bc2f4e0df722a36e0e6103fd9c",
      "size_in_bytes": 120
    },
    {
      "_path": "lib/liba.so",
      "path_type": "softlink"
    },
    {
      "_path": "share/empty",
      "path_type": "directory"
    }
  ],
  "paths_version": 1
}"#;

    #[test]
    fn parse() {
        let paths = PathsJson::from_str(PATHS_JSON).unwrap();
        assert_eq!(paths.paths.len(), 3);

        let placeholder_entry = &paths.paths[0];
        assert_eq!(placeholder_entry.path_type, PathType::HardLink);
        let placeholder = placeholder_entry.prefix_placeholder.as_ref().unwrap();
        assert_eq!(placeholder.file_mode, FileMode::Text);
        assert_eq!(placeholder.placeholder, "/opt/anaconda1anaconda2anaconda3");

        assert_eq!(paths.paths[1].path_type, PathType::SoftLink);
        assert!(paths.paths[1].prefix_placeholder.is_none());
        assert_eq!(paths.paths[2].path_type, PathType::Directory);
    }

    #[test]
    fn roundtrip() {
        let paths = PathsJson::from_str(PATHS_JSON).unwrap();
        let serialized = serde_json::to_string_pretty(&paths).unwrap();
        let reparsed = PathsJson::from_str(&serialized).unwrap();
        assert_eq!(paths, reparsed);
    }
}
