//! The alternate JSON dialect: packages keyed by archive filename, with a
//! separate map for pip packages.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::LockfileError;

/// The lock version prefix this reader accepts.
const SUPPORTED_VERSION_PREFIX: &str = "1.0";

/// A parsed alternate dialect lockfile.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JsonLock {
    /// The version of the lockfile format, `1.0.x`.
    pub lock_version: String,

    /// The platform the environment was locked for.
    pub platform: String,

    /// The channel names that were enabled.
    #[serde(default)]
    pub channels: Vec<String>,

    /// Per channel mirror urls, keyed by channel name.
    #[serde(default)]
    pub channel_info: BTreeMap<String, Vec<ChannelMirror>>,

    /// The locked conda packages, keyed by archive filename.
    #[serde(default)]
    pub packages: BTreeMap<String, LockedPackage>,

    /// The locked pip packages, keyed by archive filename.
    #[serde(default)]
    pub pip_packages: BTreeMap<String, LockedPackage>,
}

impl JsonLock {
    /// Parses a lockfile from a string, rejecting unsupported versions.
    pub fn from_str(content: &str) -> Result<Self, LockfileError> {
        let lock: JsonLock = serde_json::from_str(content)?;
        let supported = lock.lock_version == SUPPORTED_VERSION_PREFIX
            || lock
                .lock_version
                .strip_prefix(SUPPORTED_VERSION_PREFIX)
                .is_some_and(|rest| rest.starts_with('.'));
        if !supported {
            return Err(LockfileError::UnsupportedVersion(lock.lock_version));
        }
        Ok(lock)
    }
}

/// One mirror of a channel.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct ChannelMirror {
    /// The base url of the mirror.
    pub url: Url,
}

/// One locked package.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockedPackage {
    /// The package name.
    pub name: String,

    /// The exact locked version.
    pub version: String,

    /// The build string of the package.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build: Option<String>,

    /// The subdirectory the package comes from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subdir: Option<String>,

    /// The channel the package comes from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,

    /// The dependencies of the package.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends: Vec<String>,

    /// The MD5 hex digest of the artifact, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub md5: Option<String>,

    /// The SHA256 hex digest of the artifact, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}

#[cfg(test)]
mod test {
    use assert_matches::assert_matches;

    use super::JsonLock;
    use crate::LockfileError;

    const LOCKFILE: &str = r#"{
        "lockVersion": "1.0.2",
        "platform": "linux-64",
        "channels": ["conda-forge"],
        "channelInfo": {
            "conda-forge": [
                {"url": "https://conda.anaconda.org/conda-forge"}
            ]
        },
        "packages": {
            "pkgb-2.1-py_0.tar.bz2": {
                "name": "pkgb",
                "version": "2.1",
                "build": "py_0",
                "subdir": "noarch",
                "channel": "conda-forge",
                "md5": "bf7f54dd0f25c3f06ecb82a07341841a"
            }
        },
        "pipPackages": {}
    }"#;

    #[test]
    fn parse() {
        let lock = JsonLock::from_str(LOCKFILE).unwrap();
        assert_eq!(lock.platform, "linux-64");
        assert_eq!(lock.packages.len(), 1);
        let pkgb = lock.packages.get("pkgb-2.1-py_0.tar.bz2").unwrap();
        assert_eq!(pkgb.build.as_deref(), Some("py_0"));
        assert_eq!(lock.channel_info["conda-forge"].len(), 1);
    }

    #[test]
    fn unsupported_version_is_rejected() {
        let content = LOCKFILE.replace("1.0.2", "2.0.0");
        assert_matches!(
            JsonLock::from_str(&content),
            Err(LockfileError::UnsupportedVersion(_))
        );
    }
}
