//! Version specifications: the version part of a match spec, e.g.
//! `>=3.4,<4.0` or `1.2.*`.

use std::{
    fmt::{Display, Formatter},
    str::FromStr,
};

use serde::Serialize;
use thiserror::Error;

use crate::{ParseVersionError, Version};

/// An operator to compare two versions.
#[allow(missing_docs)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum RangeOperator {
    Greater,
    GreaterEquals,
    Less,
    LessEquals,
}

/// An operator that matches a version against a prefix or compatibility
/// boundary instead of a point on the version line.
#[allow(missing_docs)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum StrictRangeOperator {
    StartsWith,
    NotStartsWith,
    Compatible,
}

/// An operator comparing for (in)equality.
#[allow(missing_docs)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum EqualityOperator {
    Equals,
    NotEquals,
}

/// The logical operator combining a group of version specs. `,` (and) binds
/// tighter than `|` (or): `>=1,<2|>3` reads `(>=1 and <2) or >3`.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum LogicalOperator {
    /// All members must match.
    And,
    /// At least one member must match.
    Or,
}

/// A version specification.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub enum VersionSpec {
    /// Matches any version (`*`).
    Any,

    /// A half-open range, e.g. `>=3.4`.
    Range(RangeOperator, Version),

    /// A prefix or compatibility match, e.g. `3.4.*` or `~=3.4`.
    StrictRange(StrictRangeOperator, Version),

    /// An exact (in)equality, e.g. `==3.4.1`.
    Exact(EqualityOperator, Version),

    /// A group of specs combined with a logical operator.
    Group(LogicalOperator, Vec<VersionSpec>),
}

impl VersionSpec {
    /// Returns true if the given version matches this spec.
    pub fn matches(&self, version: &Version) -> bool {
        match self {
            VersionSpec::Any => true,
            VersionSpec::Range(op, limit) => match op {
                RangeOperator::Greater => version > limit,
                RangeOperator::GreaterEquals => version >= limit,
                RangeOperator::Less => version < limit,
                RangeOperator::LessEquals => version <= limit,
            },
            VersionSpec::StrictRange(op, limit) => match op {
                StrictRangeOperator::StartsWith => version.starts_with(limit),
                StrictRangeOperator::NotStartsWith => !version.starts_with(limit),
                StrictRangeOperator::Compatible => version.compatible_with(limit),
            },
            VersionSpec::Exact(op, limit) => match op {
                EqualityOperator::Equals => version == limit,
                EqualityOperator::NotEquals => version != limit,
            },
            VersionSpec::Group(LogicalOperator::And, group) => {
                group.iter().all(|spec| spec.matches(version))
            }
            VersionSpec::Group(LogicalOperator::Or, group) => {
                group.iter().any(|spec| spec.matches(version))
            }
        }
    }
}

/// An error that occurred while parsing a version spec.
#[allow(missing_docs)]
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum ParseVersionSpecError {
    #[error("empty version spec")]
    Empty,

    #[error(transparent)]
    InvalidVersion(#[from] ParseVersionError),

    #[error("invalid version constraint '{0}'")]
    InvalidConstraint(String),
}

impl FromStr for VersionSpec {
    type Err = ParseVersionSpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(ParseVersionSpecError::Empty);
        }

        let mut or_groups = Vec::new();
        for or_part in s.split('|') {
            let mut and_group = Vec::new();
            for constraint in or_part.split(',') {
                and_group.push(parse_constraint(constraint.trim())?);
            }
            or_groups.push(flatten_group(LogicalOperator::And, and_group));
        }
        Ok(flatten_group(LogicalOperator::Or, or_groups))
    }
}

fn flatten_group(op: LogicalOperator, mut group: Vec<VersionSpec>) -> VersionSpec {
    if group.len() == 1 {
        group.pop().unwrap()
    } else {
        VersionSpec::Group(op, group)
    }
}

fn parse_constraint(constraint: &str) -> Result<VersionSpec, ParseVersionSpecError> {
    if constraint.is_empty() {
        return Err(ParseVersionSpecError::Empty);
    }
    if constraint == "*" {
        return Ok(VersionSpec::Any);
    }

    let parse_version = |version: &str| -> Result<Version, ParseVersionSpecError> {
        if version.is_empty() {
            return Err(ParseVersionSpecError::InvalidConstraint(
                constraint.to_owned(),
            ));
        }
        Ok(version.parse()?)
    };

    // A trailing `.*` (or bare `*`) after a comparison operator is a common
    // sloppy spelling; for ordered comparisons it is equivalent to the
    // version itself.
    fn strip_any_suffix(version: &str) -> &str {
        version.trim_end_matches(".*").trim_end_matches('*')
    }

    if let Some(rest) = constraint.strip_prefix(">=") {
        Ok(VersionSpec::Range(
            RangeOperator::GreaterEquals,
            parse_version(strip_any_suffix(rest))?,
        ))
    } else if let Some(rest) = constraint.strip_prefix("<=") {
        Ok(VersionSpec::Range(
            RangeOperator::LessEquals,
            parse_version(strip_any_suffix(rest))?,
        ))
    } else if let Some(rest) = constraint.strip_prefix(">") {
        Ok(VersionSpec::Range(
            RangeOperator::Greater,
            parse_version(strip_any_suffix(rest))?,
        ))
    } else if let Some(rest) = constraint.strip_prefix("<") {
        Ok(VersionSpec::Range(
            RangeOperator::Less,
            parse_version(strip_any_suffix(rest))?,
        ))
    } else if let Some(rest) = constraint.strip_prefix("==") {
        Ok(VersionSpec::Exact(
            EqualityOperator::Equals,
            parse_version(rest)?,
        ))
    } else if let Some(rest) = constraint.strip_prefix("!=") {
        if let Some(prefix) = rest.strip_suffix(".*") {
            Ok(VersionSpec::StrictRange(
                StrictRangeOperator::NotStartsWith,
                parse_version(prefix)?,
            ))
        } else {
            Ok(VersionSpec::Exact(
                EqualityOperator::NotEquals,
                parse_version(rest)?,
            ))
        }
    } else if let Some(rest) = constraint.strip_prefix("~=") {
        Ok(VersionSpec::StrictRange(
            StrictRangeOperator::Compatible,
            parse_version(rest)?,
        ))
    } else if let Some(rest) = constraint.strip_prefix('=') {
        // `=1.2` is the fuzzy form: it matches every version starting with
        // the given prefix, the explicit `.*` is optional.
        Ok(VersionSpec::StrictRange(
            StrictRangeOperator::StartsWith,
            parse_version(strip_any_suffix(rest))?,
        ))
    } else if let Some(prefix) = constraint
        .strip_suffix(".*")
        .or_else(|| constraint.strip_suffix('*'))
    {
        Ok(VersionSpec::StrictRange(
            StrictRangeOperator::StartsWith,
            parse_version(prefix)?,
        ))
    } else {
        Ok(VersionSpec::Exact(
            EqualityOperator::Equals,
            parse_version(constraint)?,
        ))
    }
}

impl Display for VersionSpec {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            VersionSpec::Any => write!(f, "*"),
            VersionSpec::Range(op, version) => {
                let op = match op {
                    RangeOperator::Greater => ">",
                    RangeOperator::GreaterEquals => ">=",
                    RangeOperator::Less => "<",
                    RangeOperator::LessEquals => "<=",
                };
                write!(f, "{op}{version}")
            }
            VersionSpec::StrictRange(StrictRangeOperator::StartsWith, version) => {
                write!(f, "{version}.*")
            }
            VersionSpec::StrictRange(StrictRangeOperator::NotStartsWith, version) => {
                write!(f, "!={version}.*")
            }
            VersionSpec::StrictRange(StrictRangeOperator::Compatible, version) => {
                write!(f, "~={version}")
            }
            VersionSpec::Exact(EqualityOperator::Equals, version) => write!(f, "=={version}"),
            VersionSpec::Exact(EqualityOperator::NotEquals, version) => write!(f, "!={version}"),
            VersionSpec::Group(op, group) => {
                let separator = match op {
                    LogicalOperator::And => ",",
                    LogicalOperator::Or => "|",
                };
                let mut first = true;
                for spec in group {
                    if !first {
                        write!(f, "{separator}")?;
                    }
                    write!(f, "{spec}")?;
                    first = false;
                }
                Ok(())
            }
        }
    }
}

impl Serialize for VersionSpec {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> serde::Deserialize<'de> for VersionSpec {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let str = String::deserialize(deserializer)?;
        str.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn version(s: &str) -> Version {
        s.parse().unwrap()
    }

    #[test]
    fn ranges() {
        let spec: VersionSpec = ">=1.2,<2".parse().unwrap();
        assert!(spec.matches(&version("1.2")));
        assert!(spec.matches(&version("1.9.1")));
        assert!(!spec.matches(&version("2.0")));
        assert!(!spec.matches(&version("1.1")));
    }

    #[test]
    fn or_groups() {
        let spec: VersionSpec = "<1|>=3".parse().unwrap();
        assert!(spec.matches(&version("0.9")));
        assert!(spec.matches(&version("3.0")));
        assert!(!spec.matches(&version("2.0")));
    }

    #[test]
    fn starts_with() {
        let spec: VersionSpec = "2.*".parse().unwrap();
        assert!(spec.matches(&version("2.1")));
        assert!(spec.matches(&version("2")));
        assert!(!spec.matches(&version("20.1")));
        assert!(!spec.matches(&version("3.0")));

        let fuzzy: VersionSpec = "=2.1".parse().unwrap();
        assert!(fuzzy.matches(&version("2.1.3")));
        assert!(!fuzzy.matches(&version("2.2")));
    }

    #[test]
    fn not_starts_with() {
        let spec: VersionSpec = "!=2.1.*".parse().unwrap();
        assert!(!spec.matches(&version("2.1.3")));
        assert!(spec.matches(&version("2.2")));
    }

    #[test]
    fn compatible() {
        let spec: VersionSpec = "~=1.4".parse().unwrap();
        assert!(spec.matches(&version("1.4")));
        assert!(spec.matches(&version("1.7")));
        assert!(!spec.matches(&version("2.0")));
        assert!(!spec.matches(&version("1.3")));
    }

    #[test]
    fn exact() {
        let spec: VersionSpec = "==1.4".parse().unwrap();
        assert!(spec.matches(&version("1.4")));
        assert!(spec.matches(&version("1.4.0")));
        assert!(!spec.matches(&version("1.4.1")));

        let bare: VersionSpec = "1.4".parse().unwrap();
        assert_eq!(bare, spec);
    }

    #[test]
    fn display_roundtrip_is_idempotent() {
        for input in [
            "*",
            ">=1.2,<2",
            "<1|>=3,<4",
            "2.1.*",
            "=2.1",
            "~=1.4",
            "==1.0",
            "!=1.0",
            "!=1.0.*",
            ">1.8,<2|==1.7",
        ] {
            let spec: VersionSpec = input.parse().unwrap();
            let rendered = spec.to_string();
            let reparsed: VersionSpec = rendered.parse().unwrap();
            assert_eq!(rendered, reparsed.to_string(), "for input {input}");
            assert_eq!(spec, reparsed, "for input {input}");
        }
    }

    #[test]
    fn errors() {
        assert!("".parse::<VersionSpec>().is_err());
        assert!(">=".parse::<VersionSpec>().is_err());
        assert!(">=1,,2".parse::<VersionSpec>().is_err());
    }
}
