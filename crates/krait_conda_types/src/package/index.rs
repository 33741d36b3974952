//! The `info/index.json` file: the package's own copy of its metadata.

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;

use crate::{utils::serde as serde_utils, NoArchType, PackageName, Version};

use super::PackageFile;

/// The parsed `info/index.json` of a package.
#[skip_serializing_none]
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct IndexJson {
    /// Optionally the architecture the package is built for.
    pub arch: Option<String>,

    /// The build string of the package.
    pub build: String,

    /// The build number of the package.
    #[serde(default)]
    pub build_number: u64,

    /// The package constraints of the package.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub constrains: Vec<String>,

    /// The dependencies of the package.
    #[serde(default)]
    pub depends: Vec<String>,

    /// The license of the package.
    pub license: Option<String>,

    /// The name of the package.
    pub name: PackageName,

    /// The noarch flavor of the package.
    #[serde(default, skip_serializing_if = "NoArchType::is_none")]
    pub noarch: NoArchType,

    /// Optionally the platform the package supports.
    pub platform: Option<String>,

    /// The subdirectory the package was built for.
    pub subdir: Option<String>,

    /// The moment the package was built.
    #[serde(
        default,
        with = "serde_utils::timestamp",
        skip_serializing_if = "Option::is_none"
    )]
    pub timestamp: Option<chrono::DateTime<chrono::Utc>>,

    /// The version of the package.
    pub version: Version,
}

impl PackageFile for IndexJson {
    fn package_path() -> &'static Path {
        Path::new("info/index.json")
    }
}

#[cfg(test)]
mod test {
    use super::IndexJson;
    use crate::package::PackageFile;

    #[test]
    fn parse() {
        let index: IndexJson = IndexJson::from_str(
            r#"{
                "arch": "x86_64",
                "build": "h1234_0",
                "build_number": 2,
                "depends": ["libc >=2.17"],
                "name": "tool",
                "platform": "linux",
                "subdir": "linux-64",
                "timestamp": 1670264089059,
                "version": "4.2.1"
            }"#,
        )
        .unwrap();
        assert_eq!(index.name.as_source(), "tool");
        assert_eq!(index.build_number, 2);
        assert_eq!(index.version.to_string(), "4.2.1");
    }
}
