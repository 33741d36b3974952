//! Information about the Python interpreter of an environment, needed to
//! relocate the files of noarch python packages.

use std::{
    borrow::Cow,
    path::{Path, PathBuf},
};

use krait_conda_types::{PackageRecord, Platform, Version};

/// Describes the Python installation of a prefix.
#[derive(Debug, Clone)]
pub struct PythonInfo {
    /// The platform python runs on.
    pub platform: Platform,

    /// Major and minor version.
    pub short_version: (u64, u64),

    /// The relative path of the interpreter inside the prefix.
    pub path: PathBuf,

    /// The relative path of the site-packages directory.
    pub site_packages_path: PathBuf,

    /// The relative path of the script directory.
    pub bin_dir: PathBuf,
}

/// The error returned when a package record does not describe a usable
/// Python.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PythonInfoError {
    /// The version lacks major/minor components.
    #[error("invalid python version '{0}'")]
    InvalidVersion(String),
}

impl PythonInfo {
    /// Builds the info from the record of the python package itself.
    pub fn from_python_record(
        record: &PackageRecord,
        platform: Platform,
    ) -> Result<Self, PythonInfoError> {
        Self::from_version(&record.version, platform)
    }

    /// Builds the info from a python version and platform.
    pub fn from_version(version: &Version, platform: Platform) -> Result<Self, PythonInfoError> {
        let (major, minor) = version
            .as_major_minor()
            .ok_or_else(|| PythonInfoError::InvalidVersion(version.to_string()))?;

        let path = if platform.is_windows() {
            PathBuf::from("python.exe")
        } else {
            PathBuf::from(format!("bin/python{major}.{minor}"))
        };

        let site_packages_path = if platform.is_windows() {
            PathBuf::from("Lib/site-packages")
        } else {
            PathBuf::from(format!("lib/python{major}.{minor}/site-packages"))
        };

        let bin_dir = if platform.is_windows() {
            PathBuf::from("Scripts")
        } else {
            PathBuf::from("bin")
        };

        Ok(Self {
            platform,
            short_version: (major, minor),
            path,
            site_packages_path,
            bin_dir,
        })
    }

    /// Returns where a file of a noarch python package ends up in the
    /// prefix, given its path inside the package.
    pub fn get_python_noarch_target_path<'a>(&self, relative_path: &'a Path) -> Cow<'a, Path> {
        if let Ok(rest) = relative_path.strip_prefix("site-packages/") {
            self.site_packages_path.join(rest).into()
        } else if let Ok(rest) = relative_path.strip_prefix("python-scripts/") {
            self.bin_dir.join(rest).into()
        } else {
            relative_path.into()
        }
    }

    /// Returns true if moving from `previous` to this python requires every
    /// noarch python package to be relinked (the site-packages path moved).
    pub fn is_relink_required(&self, previous: &PythonInfo) -> bool {
        self.short_version != previous.short_version
    }
}

#[cfg(test)]
mod test {
    use std::path::Path;
    use std::str::FromStr;

    use krait_conda_types::{Platform, Version};

    use super::PythonInfo;

    #[test]
    fn site_packages_mapping() {
        let info =
            PythonInfo::from_version(&Version::from_str("3.11.2").unwrap(), Platform::Linux64)
                .unwrap();
        assert_eq!(
            info.get_python_noarch_target_path(Path::new("site-packages/pkga/__init__.py")),
            Path::new("lib/python3.11/site-packages/pkga/__init__.py")
        );
        assert_eq!(
            info.get_python_noarch_target_path(Path::new("python-scripts/tool")),
            Path::new("bin/tool")
        );
        assert_eq!(
            info.get_python_noarch_target_path(Path::new("share/doc/readme")),
            Path::new("share/doc/readme")
        );
    }

    #[test]
    fn relink_on_minor_version_change() {
        let py310 =
            PythonInfo::from_version(&Version::from_str("3.10.4").unwrap(), Platform::Linux64)
                .unwrap();
        let py311 =
            PythonInfo::from_version(&Version::from_str("3.11.0").unwrap(), Platform::Linux64)
                .unwrap();
        let py311_patch =
            PythonInfo::from_version(&Version::from_str("3.11.9").unwrap(), Platform::Linux64)
                .unwrap();
        assert!(py311.is_relink_required(&py310));
        assert!(!py311_patch.is_relink_required(&py311));
    }
}
