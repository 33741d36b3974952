//! The `noarch` field of a package record.

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// The noarch type of a package. `None` means the package is specific to an
/// architecture.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq, Hash)]
pub struct NoArchType(pub Option<RawNoArchType>);

/// The actual noarch flavor found in repodata. Old packages carry a literal
/// `true`, newer ones the strings `generic` or `python`.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum RawNoArchType {
    /// Noarch in the old boolean form.
    GenericV1,

    /// An architecture independent package without special link behavior.
    GenericV2,

    /// A pure python package whose files move to the version specific
    /// site-packages directory at link time.
    Python,
}

impl NoArchType {
    /// A package that is not architecture independent.
    pub fn none() -> Self {
        Self(None)
    }

    /// A noarch python package.
    pub fn python() -> Self {
        Self(Some(RawNoArchType::Python))
    }

    /// A generic noarch package.
    pub fn generic() -> Self {
        Self(Some(RawNoArchType::GenericV2))
    }

    /// Returns true if this is a noarch python package.
    pub fn is_python(&self) -> bool {
        matches!(self.0, Some(RawNoArchType::Python))
    }

    /// Returns true if the package is not architecture independent.
    pub fn is_none(&self) -> bool {
        self.0.is_none()
    }
}

impl Serialize for NoArchType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match &self.0 {
            None => serializer.serialize_none(),
            Some(RawNoArchType::GenericV1) => serializer.serialize_bool(true),
            Some(RawNoArchType::GenericV2) => serializer.serialize_str("generic"),
            Some(RawNoArchType::Python) => serializer.serialize_str("python"),
        }
    }
}

impl<'de> Deserialize<'de> for NoArchType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Bool(bool),
            String(String),
        }

        let raw = Option::<Raw>::deserialize(deserializer)?;
        Ok(NoArchType(match raw {
            None | Some(Raw::Bool(false)) => None,
            Some(Raw::Bool(true)) => Some(RawNoArchType::GenericV1),
            Some(Raw::String(str)) => match str.as_str() {
                "generic" => Some(RawNoArchType::GenericV2),
                "python" => Some(RawNoArchType::Python),
                other => {
                    return Err(serde::de::Error::custom(format!(
                        "invalid noarch type '{other}'"
                    )))
                }
            },
        }))
    }
}

#[cfg(test)]
mod test {
    use super::NoArchType;

    #[test]
    fn deserialize_flavors() {
        assert!(serde_json::from_str::<NoArchType>("\"python\"")
            .unwrap()
            .is_python());
        assert!(serde_json::from_str::<NoArchType>("\"generic\"")
            .unwrap()
            .0
            .is_some());
        assert!(serde_json::from_str::<NoArchType>("true").unwrap().0.is_some());
        assert!(serde_json::from_str::<NoArchType>("null").unwrap().is_none());
        assert!(serde_json::from_str::<NoArchType>("\"quantum\"").is_err());
    }
}
