//! The `repodata.json` schema: the index a channel publishes per platform.

pub mod topological_sort;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Formatter};
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, skip_serializing_none};
use thiserror::Error;

use krait_digest::{serde::SerializableHash, Md5Hash, Sha256Hash};

use crate::{
    utils::serde as serde_utils, Channel, NoArchType, PackageName, RepoDataRecord, Version,
};

/// The parsed contents of a `repodata.json` file.
///
/// All maps are ordered so that parsing and re-serializing a repodata file
/// produces a byte-identical result after key-order normalization.
#[derive(Debug, Default, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct RepoData {
    /// Information about the subdirectory of the channel.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub info: Option<ChannelInfo>,

    /// The `.tar.bz2` packages in the repodata, keyed by archive filename.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub packages: BTreeMap<String, PackageRecord>,

    /// The `.conda` packages in the repodata, keyed by archive filename.
    #[serde(
        default,
        rename = "packages.conda",
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub conda_packages: BTreeMap<String, PackageRecord>,

    /// Filenames that have been removed (yanked) from the subdirectory.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub removed: BTreeSet<String>,

    /// The version of the repodata format.
    #[serde(rename = "repodata_version", skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
}

/// The `info` block of a repodata file.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct ChannelInfo {
    /// The platform this repodata describes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subdir: Option<String>,

    /// The base url of all packages, present in newer repodata versions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

/// A single package as described in repodata. This is the central, immutable
/// record the resolver, the cache, and the installer all operate on. Its
/// canonical display form is `name-version-build`.
#[serde_as]
#[skip_serializing_none]
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct PackageRecord {
    /// Optionally the architecture the package supports.
    pub arch: Option<String>,

    /// The build string of the package.
    pub build: String,

    /// The build number: a tiebreaker between packages of equal version.
    pub build_number: u64,

    /// Additional constraints on packages: a `constrains` spec does not pull
    /// its subject in, but restricts it when it is present.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub constrains: Vec<String>,

    /// Match specs of the packages this package depends on.
    #[serde(default)]
    pub depends: Vec<String>,

    /// The license of the package.
    pub license: Option<String>,

    /// The license family of the package.
    pub license_family: Option<String>,

    /// The MD5 digest of the package archive.
    #[serde_as(as = "Option<SerializableHash::<krait_digest::Md5>>")]
    pub md5: Option<Md5Hash>,

    /// The name of the package.
    pub name: PackageName,

    /// The noarch flavor of the package.
    #[serde(default, skip_serializing_if = "NoArchType::is_none")]
    pub noarch: NoArchType,

    /// Optionally the platform the package supports.
    pub platform: Option<String>,

    /// The SHA256 digest of the package archive.
    #[serde_as(as = "Option<SerializableHash::<krait_digest::Sha256>>")]
    pub sha256: Option<Sha256Hash>,

    /// Per-package content-trust signatures over the record, keyed by the
    /// signing key id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signatures: Option<BTreeMap<String, PackageSignature>>,

    /// The size of the package archive in bytes.
    pub size: Option<u64>,

    /// The channel subdirectory this package lives in.
    #[serde(default)]
    pub subdir: String,

    /// The moment the package was built, in milliseconds since the epoch.
    #[serde(default, with = "serde_utils::timestamp", skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<chrono::DateTime<chrono::Utc>>,

    /// Features tracked by this package. A candidate with tracked features is
    /// deprioritized by the solver.
    #[serde(default, with = "serde_utils::string_or_seq", skip_serializing_if = "Vec::is_empty")]
    pub track_features: Vec<String>,

    /// The version of the package.
    pub version: Version,
}

/// A single signature over the signable form of a package record.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct PackageSignature {
    /// The hex encoded Ed25519 signature.
    pub signature: String,

    /// An optional OpenPGP trailer that was appended to the signed data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub other_headers: Option<String>,
}

impl PackageRecord {
    /// Constructs a record with the identity triple set and everything else
    /// empty.
    pub fn new(name: PackageName, version: Version, build: String) -> Self {
        Self {
            arch: None,
            build,
            build_number: 0,
            constrains: Vec::new(),
            depends: Vec::new(),
            license: None,
            license_family: None,
            md5: None,
            name,
            noarch: NoArchType::none(),
            platform: None,
            sha256: None,
            signatures: None,
            size: None,
            subdir: String::new(),
            timestamp: None,
            track_features: Vec::new(),
            version,
        }
    }
}

impl Display for PackageRecord {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}-{}", self.name.as_normalized(), self.version, self.build)
    }
}

impl AsRef<PackageRecord> for PackageRecord {
    fn as_ref(&self) -> &PackageRecord {
        self
    }
}

/// An error that can occur when reading repodata from disk.
#[allow(missing_docs)]
#[derive(Debug, Error)]
pub enum ReadRepoDataError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl RepoData {
    /// Parses a `repodata.json` file from disk.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ReadRepoDataError> {
        let content = fs_err::read_to_string(path.as_ref())?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Returns the platform of the repodata, when recorded.
    pub fn subdir(&self) -> Option<&str> {
        self.info.as_ref().and_then(|info| info.subdir.as_deref())
    }

    /// Converts the repodata into [`RepoDataRecord`]s that carry their
    /// provenance: the channel, the filename, and the full download url.
    pub fn into_repo_data_records(self, channel: &Channel) -> Vec<RepoDataRecord> {
        let mut records = Vec::with_capacity(self.packages.len() + self.conda_packages.len());
        let channel_name = channel.canonical_name();
        let base_url = channel.base_url.clone();
        for (file_name, package_record) in self.packages.into_iter().chain(self.conda_packages) {
            if self.removed.contains(&file_name) {
                continue;
            }
            let url = base_url
                .join(&format!("{}/{file_name}", package_record.subdir))
                .expect("package file names are valid url segments");
            records.push(RepoDataRecord {
                package_record,
                file_name,
                url,
                channel: Some(channel_name.clone()),
            });
        }
        records
    }
}

#[cfg(test)]
mod test {
    use std::str::FromStr;

    use super::{PackageRecord, RepoData};
    use crate::{PackageName, Version};

    const REPODATA: &str = r#"{
  "info": {
    "subdir": "noarch"
  },
  "packages": {
    "pkga-1.0-py_0.tar.bz2": {
      "build": "py_0",
      "build_number": 0,
      "depends": [
        "pkgb 2.*"
      ],
      "md5": "bf7f54dd0f25c3f06ecb82a07341841a",
      "name": "pkga",
      "noarch": "python",
      "sha256": "7ed530efddd47a96c11197906b4008405b90e3bc2f4e0df722a36e0e6103fd9c",
      "size": 27831,
      "subdir": "noarch",
      "timestamp": 1670264089059,
      "version": "1.0"
    }
  },
  "packages.conda": {
    "pkgb-2.1-py_0.conda": {
      "build": "py_0",
      "build_number": 0,
      "depends": [],
      "name": "pkgb",
      "subdir": "noarch",
      "version": "2.1"
    }
  }
}"#;

    #[test]
    fn parse_and_reserialize_is_stable() {
        let repodata: RepoData = serde_json::from_str(REPODATA).unwrap();
        assert_eq!(repodata.packages.len(), 1);
        assert_eq!(repodata.conda_packages.len(), 1);
        assert_eq!(repodata.subdir(), Some("noarch"));

        // Serializing and parsing again must not lose information.
        let serialized = serde_json::to_string_pretty(&repodata).unwrap();
        let reparsed: RepoData = serde_json::from_str(&serialized).unwrap();
        assert_eq!(repodata, reparsed);

        // A second serialization round produces identical bytes.
        assert_eq!(serialized, serde_json::to_string_pretty(&reparsed).unwrap());
    }

    #[test]
    fn empty_repodata_is_an_empty_snapshot() {
        let repodata: RepoData = serde_json::from_str("{}").unwrap();
        assert!(repodata.packages.is_empty());
        assert!(repodata.conda_packages.is_empty());
    }

    #[test]
    fn seconds_timestamps_are_upgraded() {
        let record: PackageRecord = serde_json::from_str(
            r#"{"build": "0", "build_number": 0, "name": "x", "version": "1", "timestamp": 1670264089}"#,
        )
        .unwrap();
        assert_eq!(
            record.timestamp.unwrap().timestamp_millis(),
            1_670_264_089_000
        );
    }

    #[test]
    fn canonical_display() {
        let record = PackageRecord::new(
            PackageName::new_unchecked("pkga"),
            Version::from_str("1.0").unwrap(),
            "py_0".to_owned(),
        );
        assert_eq!(record.to_string(), "pkga-1.0-py_0");
    }
}
