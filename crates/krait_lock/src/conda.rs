//! The conda dialect: a YAML lockfile with a flat package list.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::LockfileError;

/// The supported major version of the conda lockfile dialect.
const SUPPORTED_VERSION: u64 = 1;

/// A parsed conda dialect lockfile.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct CondaLock {
    /// The version of the lockfile format.
    pub version: u64,

    /// Information about how the lockfile was produced.
    pub metadata: LockMetadata,

    /// The locked packages, all platforms mixed.
    #[serde(default)]
    pub package: Vec<LockedPackage>,
}

impl CondaLock {
    /// Parses a lockfile from a string, rejecting unsupported versions.
    pub fn from_str(content: &str) -> Result<Self, LockfileError> {
        let lock: CondaLock = serde_yaml::from_str(content)?;
        if lock.version != SUPPORTED_VERSION {
            return Err(LockfileError::UnsupportedVersion(lock.version.to_string()));
        }
        Ok(lock)
    }

    /// Returns the packages locked for the given platform.
    pub fn packages_for_platform<'a>(
        &'a self,
        platform: &'a str,
    ) -> impl Iterator<Item = &'a LockedPackage> + 'a {
        self.package.iter().filter(move |p| p.platform == platform)
    }
}

/// The `metadata` block of a conda lockfile.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct LockMetadata {
    /// The platforms this lockfile was solved for.
    #[serde(default)]
    pub platforms: Vec<String>,

    /// The environment source files the lock was derived from.
    #[serde(default)]
    pub sources: Vec<String>,

    /// The channels that were enabled during the solve.
    #[serde(default)]
    pub channels: Vec<LockChannel>,

    /// Hashes of the source files, keyed by platform.
    #[serde(default)]
    pub content_hash: BTreeMap<String, String>,
}

/// A channel entry in the lockfile metadata.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct LockChannel {
    /// The channel url or name.
    pub url: String,

    /// Categories that were requested from this channel.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub used_env_vars: Vec<String>,
}

/// One locked package.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct LockedPackage {
    /// The package name.
    pub name: String,

    /// The exact locked version.
    pub version: String,

    /// The integrity hashes of the artifact.
    #[serde(default)]
    pub hash: PackageHashes,

    /// The url the artifact is downloaded from.
    pub url: Url,

    /// The dependencies of the package, name to version constraint.
    #[serde(default)]
    pub dependencies: BTreeMap<String, String>,

    /// Optional run constraints of the package.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub constrains: BTreeMap<String, String>,

    /// The dependency category (`main`, `dev`, …).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,

    /// The package manager the entry belongs to (`conda` or `pip`).
    pub manager: String,

    /// The platform this entry was locked for.
    pub platform: String,

    /// Whether the package is optional.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub optional: bool,
}

/// The integrity hashes of a locked artifact.
#[derive(Debug, Clone, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct PackageHashes {
    /// The MD5 hex digest, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub md5: Option<String>,

    /// The SHA256 hex digest, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}

#[cfg(test)]
mod test {
    use assert_matches::assert_matches;

    use super::CondaLock;
    use crate::LockfileError;

    const LOCKFILE: &str = r#"
version: 1
metadata:
  platforms:
    - linux-64
  sources:
    - environment.yml
  channels:
    - url: conda-forge
  content_hash:
    linux-64: 1dd5ecbff12a4bb14e2bbb7e0a9bc7b0c96b63589cdb0c116e17a94bcbca9755
package:
  - name: pkgb
    version: "2.1"
    hash:
      md5: bf7f54dd0f25c3f06ecb82a07341841a
    url: https://conda.anaconda.org/conda-forge/noarch/pkgb-2.1-py_0.tar.bz2
    dependencies: {}
    manager: conda
    platform: linux-64
  - name: pkga
    version: "1.0"
    hash:
      sha256: 7ed530efddd47a96c11197906b4008405b90e3bc2f4e0df722a36e0e6103fd9c
    url: https://conda.anaconda.org/conda-forge/noarch/pkga-1.0-py_0.tar.bz2
    dependencies:
      pkgb: 2.*
    manager: conda
    platform: linux-64
    optional: true
"#;

    #[test]
    fn parse() {
        let lock = CondaLock::from_str(LOCKFILE).unwrap();
        assert_eq!(lock.version, 1);
        assert_eq!(lock.metadata.platforms, vec!["linux-64"]);
        assert_eq!(lock.package.len(), 2);

        let pkga = &lock.package[1];
        assert_eq!(pkga.name, "pkga");
        assert_eq!(pkga.dependencies.get("pkgb").map(String::as_str), Some("2.*"));
        assert!(pkga.optional);
        assert_eq!(lock.packages_for_platform("linux-64").count(), 2);
        assert_eq!(lock.packages_for_platform("osx-64").count(), 0);
    }

    #[test]
    fn unsupported_version_is_rejected() {
        let content = LOCKFILE.replace("version: 1", "version: 9");
        assert_matches!(
            CondaLock::from_str(&content),
            Err(LockfileError::UnsupportedVersion(_))
        );
    }
}
