//! Package names and their normalization rules.

use std::{
    borrow::Borrow,
    cmp::Ordering,
    fmt::{Display, Formatter},
    hash::{Hash, Hasher},
    str::FromStr,
};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// The name of a package. Package names are compared case-insensitively:
/// equality and hashing go through the normalized (lower-cased) form while
/// the original spelling is preserved for display.
#[derive(Debug, Clone)]
pub struct PackageName {
    normalized: Option<String>,
    source: String,
}

impl PackageName {
    /// Constructs a new name without validating the characters. Use this only
    /// for string literals that are known to be valid.
    pub fn new_unchecked(name: impl Into<String>) -> Self {
        let source = name.into();
        let normalized = source.to_lowercase();
        Self {
            normalized: (normalized != source).then_some(normalized),
            source,
        }
    }

    /// The name exactly as it was given.
    pub fn as_source(&self) -> &str {
        &self.source
    }

    /// The lower-cased form used for comparisons.
    pub fn as_normalized(&self) -> &str {
        self.normalized.as_deref().unwrap_or(&self.source)
    }
}

/// An error that occurs when a string is not a valid package name.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
#[error("'{0}' is not a valid package name, allowed characters are 0-9, a-z, A-Z, '-', '_' and '.'")]
pub struct InvalidPackageNameError(String);

impl FromStr for PackageName {
    type Err = InvalidPackageNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.to_owned().try_into()
    }
}

impl TryFrom<String> for PackageName {
    type Error = InvalidPackageNameError;

    fn try_from(source: String) -> Result<Self, Self::Error> {
        if source.is_empty()
            || !source
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        {
            return Err(InvalidPackageNameError(source));
        }
        Ok(Self::new_unchecked(source))
    }
}

impl TryFrom<&str> for PackageName {
    type Error = InvalidPackageNameError;

    fn try_from(source: &str) -> Result<Self, Self::Error> {
        source.to_owned().try_into()
    }
}

impl PartialEq for PackageName {
    fn eq(&self, other: &Self) -> bool {
        self.as_normalized() == other.as_normalized()
    }
}

impl Eq for PackageName {}

impl PartialOrd for PackageName {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PackageName {
    fn cmp(&self, other: &Self) -> Ordering {
        self.as_normalized().cmp(other.as_normalized())
    }
}

impl Hash for PackageName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.as_normalized().hash(state);
    }
}

impl Display for PackageName {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_source())
    }
}

impl Borrow<str> for PackageName {
    fn borrow(&self) -> &str {
        self.as_normalized()
    }
}

impl Serialize for PackageName {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.as_source().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for PackageName {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer)?
            .try_into()
            .map_err(serde::de::Error::custom)
    }
}
