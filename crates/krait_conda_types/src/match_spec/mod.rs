//! Match specs: the query language used to select packages.
//!
//! The canonical string form is
//!
//! ```text
//! (channel(/subdir)::)name (version (build))([key=value, …])
//! ```
//!
//! where the bracket section can constrain `version`, `build`,
//! `build_number`, `channel`, `subdir`, `fn`, `url`, `md5` and `sha256`.
//! A spec survives a round trip: `parse(spec.str()) == spec`.

mod parse;

use std::fmt::{Display, Formatter};

use url::Url;

pub use parse::ParseMatchSpecError;

use krait_digest::{Md5Hash, Sha256Hash};

use crate::{
    BuildNumberSpec, PackageName, PackageRecord, RepoDataRecord, StringMatcher, VersionSpec,
};

/// A parsed constraint over package records. Any field that is `None` matches
/// everything.
#[derive(Debug, Default, Clone, Eq, PartialEq, Hash)]
pub struct MatchSpec {
    /// The name of the package. `None` matches any name (`*`).
    pub name: Option<PackageName>,

    /// The version range the package must fall in.
    pub version: Option<VersionSpec>,

    /// A matcher for the build string.
    pub build: Option<StringMatcher>,

    /// A constraint on the build number.
    pub build_number: Option<BuildNumberSpec>,

    /// The exact archive filename.
    pub file_name: Option<String>,

    /// The channel the package must come from.
    pub channel: Option<String>,

    /// The subdirectory the package must come from.
    pub subdir: Option<String>,

    /// The exact url of the package archive.
    pub url: Option<Url>,

    /// The expected MD5 digest of the archive.
    pub md5: Option<Md5Hash>,

    /// The expected SHA256 digest of the archive.
    pub sha256: Option<Sha256Hash>,
}

impl MatchSpec {
    /// Constructs a spec that matches every package with the given name.
    pub fn from_name(name: PackageName) -> Self {
        Self {
            name: Some(name),
            ..Self::default()
        }
    }

    /// Returns true if the given record matches this spec. Provenance fields
    /// (channel, filename, url) cannot be checked on a bare record and are
    /// ignored here; see [`MatchSpec::matches_record`].
    pub fn matches(&self, record: &PackageRecord) -> bool {
        if let Some(name) = &self.name {
            if name != &record.name {
                return false;
            }
        }
        if let Some(version) = &self.version {
            if !version.matches(&record.version) {
                return false;
            }
        }
        if let Some(build) = &self.build {
            if !build.matches(&record.build) {
                return false;
            }
        }
        if let Some(build_number) = &self.build_number {
            if !build_number.matches(&record.build_number) {
                return false;
            }
        }
        if let Some(subdir) = &self.subdir {
            if subdir != &record.subdir {
                return false;
            }
        }
        if let Some(md5) = &self.md5 {
            if Some(md5) != record.md5.as_ref() {
                return false;
            }
        }
        if let Some(sha256) = &self.sha256 {
            if Some(sha256) != record.sha256.as_ref() {
                return false;
            }
        }
        true
    }

    /// Returns true if the given record, including its provenance, matches
    /// this spec.
    pub fn matches_record(&self, record: &RepoDataRecord) -> bool {
        if !self.matches(&record.package_record) {
            return false;
        }
        if let Some(file_name) = &self.file_name {
            if file_name != &record.file_name {
                return false;
            }
        }
        if let Some(url) = &self.url {
            if url != &record.url {
                return false;
            }
        }
        if let Some(channel) = &self.channel {
            if Some(channel.as_str()) != record.channel.as_deref() {
                return false;
            }
        }
        true
    }
}

impl Display for MatchSpec {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if let Some(channel) = &self.channel {
            write!(f, "{channel}")?;
            if let Some(subdir) = &self.subdir {
                write!(f, "/{subdir}")?;
            }
            write!(f, "::")?;
        }

        match &self.name {
            Some(name) => write!(f, "{}", name.as_normalized())?,
            None => write!(f, "*")?,
        }

        if let Some(version) = &self.version {
            write!(f, " {version}")?;
            if let Some(build) = &self.build {
                write!(f, " {build}")?;
            }
        }

        let mut brackets = Vec::new();
        if self.version.is_none() {
            if let Some(build) = &self.build {
                brackets.push(format!("build=\"{build}\""));
            }
        }
        if let Some(build_number) = &self.build_number {
            brackets.push(format!("build_number=\"{build_number}\""));
        }
        if self.channel.is_none() {
            if let Some(subdir) = &self.subdir {
                brackets.push(format!("subdir=\"{subdir}\""));
            }
        }
        if let Some(file_name) = &self.file_name {
            brackets.push(format!("fn=\"{file_name}\""));
        }
        if let Some(url) = &self.url {
            brackets.push(format!("url=\"{url}\""));
        }
        if let Some(md5) = &self.md5 {
            brackets.push(format!("md5=\"{md5:x}\""));
        }
        if let Some(sha256) = &self.sha256 {
            brackets.push(format!("sha256=\"{sha256:x}\""));
        }

        if !brackets.is_empty() {
            write!(f, "[{}]", brackets.join(","))?;
        }

        Ok(())
    }
}

impl serde::Serialize for MatchSpec {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> serde::Deserialize<'de> for MatchSpec {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let str = String::deserialize(deserializer)?;
        str.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod test {
    use std::str::FromStr;

    use super::MatchSpec;
    use crate::{PackageName, PackageRecord, Version};

    fn record(name: &str, version: &str, build: &str) -> PackageRecord {
        let mut record = PackageRecord::new(
            PackageName::new_unchecked(name),
            Version::from_str(version).unwrap(),
            build.to_owned(),
        );
        record.subdir = "linux-64".to_owned();
        record
    }

    #[test]
    fn name_and_version() {
        let spec: MatchSpec = "foo >=1.0,<2".parse().unwrap();
        assert!(spec.matches(&record("foo", "1.5", "0")));
        assert!(!spec.matches(&record("foo", "2.0", "0")));
        assert!(!spec.matches(&record("bar", "1.5", "0")));
    }

    #[test]
    fn fuzzy_version_and_build() {
        let spec: MatchSpec = "foo 1.0.* py27_0".parse().unwrap();
        assert!(spec.matches(&record("foo", "1.0.3", "py27_0")));
        assert!(!spec.matches(&record("foo", "1.0.3", "py38_0")));
        assert!(!spec.matches(&record("foo", "1.1", "py27_0")));
    }

    #[test]
    fn build_glob() {
        let spec: MatchSpec = "foo=1.0=py2*".parse().unwrap();
        assert!(spec.matches(&record("foo", "1.0", "py27_0")));
        assert!(!spec.matches(&record("foo", "1.0", "py38_0")));
    }

    #[test]
    fn subdir_from_channel_segment() {
        let spec: MatchSpec = "conda-forge/linux-64::foo >=1.0".parse().unwrap();
        assert_eq!(spec.channel.as_deref(), Some("conda-forge"));
        assert_eq!(spec.subdir.as_deref(), Some("linux-64"));
        assert!(spec.matches(&record("foo", "1.0", "0")));
        let mut other = record("foo", "1.0", "0");
        other.subdir = "osx-64".to_owned();
        assert!(!other.subdir.is_empty());
        assert!(!spec.matches(&other));
    }

    #[test]
    fn brackets_override() {
        let spec: MatchSpec = r#"foo[version=">=1.0", build_number=">=2"]"#.parse().unwrap();
        let mut candidate = record("foo", "1.2", "0");
        candidate.build_number = 2;
        assert!(spec.matches(&candidate));
        candidate.build_number = 1;
        assert!(!spec.matches(&candidate));
    }

    #[test]
    fn matches_every_record_of_its_own_identity() {
        // For every record r: parse(str of identity spec) matches r.
        for (name, version, build) in
            [("pkga", "1.0", "py_0"), ("openssl", "3.0.1_1", "h0"), ("x", "2!1.2+5", "0")]
        {
            let record = record(name, version, build);
            let spec: MatchSpec = format!("{name} =={version} {build}").parse().unwrap();
            assert!(spec.matches(&record), "{name} {version} {build}");
        }
    }

    #[test]
    fn display_roundtrip_is_idempotent() {
        for input in [
            "foo",
            "*",
            "foo >=1.0,<2",
            "foo 1.0.* py27_0",
            "conda-forge::foo ==1.0",
            "conda-forge/linux-64::foo >=1.0",
            r#"foo[build_number=">=2",fn="foo-1.0-0.tar.bz2"]"#,
            r#"foo[md5="bf7f54dd0f25c3f06ecb82a07341841a"]"#,
        ] {
            let spec: MatchSpec = input.parse().unwrap();
            let rendered = spec.to_string();
            let reparsed: MatchSpec = rendered.parse().unwrap();
            assert_eq!(spec, reparsed, "for input {input}, rendered {rendered}");
            assert_eq!(rendered, reparsed.to_string(), "for input {input}");
        }
    }
}
