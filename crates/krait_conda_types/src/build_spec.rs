//! Constraints over build numbers, e.g. the `build_number=">=2"` bracket of a
//! match spec.

use std::{
    fmt::{Display, Formatter},
    str::FromStr,
};

use thiserror::Error;

/// The type build numbers are represented as.
pub type BuildNumber = u64;

/// An operator to compare build numbers with.
#[allow(missing_docs)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum OrdOperator {
    Gt,
    Ge,
    Lt,
    Le,
    Eq,
    Ne,
}

/// A constraint on the build number of a package.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct BuildNumberSpec {
    op: OrdOperator,
    rhs: BuildNumber,
}

impl BuildNumberSpec {
    /// Constructs a new spec from an operator and a bound.
    pub fn new(op: OrdOperator, rhs: BuildNumber) -> Self {
        Self { op, rhs }
    }

    /// Returns true if the given build number satisfies the constraint.
    pub fn matches(&self, build_number: &BuildNumber) -> bool {
        match self.op {
            OrdOperator::Gt => build_number > &self.rhs,
            OrdOperator::Ge => build_number >= &self.rhs,
            OrdOperator::Lt => build_number < &self.rhs,
            OrdOperator::Le => build_number <= &self.rhs,
            OrdOperator::Eq => build_number == &self.rhs,
            OrdOperator::Ne => build_number != &self.rhs,
        }
    }
}

impl Display for BuildNumberSpec {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let op = match self.op {
            OrdOperator::Gt => ">",
            OrdOperator::Ge => ">=",
            OrdOperator::Lt => "<",
            OrdOperator::Le => "<=",
            OrdOperator::Eq => "",
            OrdOperator::Ne => "!=",
        };
        write!(f, "{op}{}", self.rhs)
    }
}

/// An error parsing a [`BuildNumberSpec`].
#[allow(missing_docs)]
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum ParseBuildNumberSpecError {
    #[error("invalid build number '{0}'")]
    InvalidBuildNumber(String),
}

impl FromStr for BuildNumberSpec {
    type Err = ParseBuildNumberSpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (op, rest) = if let Some(rest) = s.strip_prefix(">=") {
            (OrdOperator::Ge, rest)
        } else if let Some(rest) = s.strip_prefix("<=") {
            (OrdOperator::Le, rest)
        } else if let Some(rest) = s.strip_prefix('>') {
            (OrdOperator::Gt, rest)
        } else if let Some(rest) = s.strip_prefix('<') {
            (OrdOperator::Lt, rest)
        } else if let Some(rest) = s.strip_prefix("!=") {
            (OrdOperator::Ne, rest)
        } else if let Some(rest) = s.strip_prefix("==") {
            (OrdOperator::Eq, rest)
        } else if let Some(rest) = s.strip_prefix('=') {
            (OrdOperator::Eq, rest)
        } else {
            (OrdOperator::Eq, s)
        };

        let rhs = rest
            .trim()
            .parse::<BuildNumber>()
            .map_err(|_| ParseBuildNumberSpecError::InvalidBuildNumber(s.to_owned()))?;
        Ok(Self::new(op, rhs))
    }
}

#[cfg(test)]
mod test {
    use super::{BuildNumberSpec, OrdOperator};

    #[test]
    fn parse_and_match() {
        let spec: BuildNumberSpec = ">=2".parse().unwrap();
        assert_eq!(spec, BuildNumberSpec::new(OrdOperator::Ge, 2));
        assert!(spec.matches(&2));
        assert!(spec.matches(&3));
        assert!(!spec.matches(&1));

        let exact: BuildNumberSpec = "4".parse().unwrap();
        assert!(exact.matches(&4));
        assert!(!exact.matches(&5));

        assert!("x".parse::<BuildNumberSpec>().is_err());
    }

    #[test]
    fn display() {
        assert_eq!(">=2".parse::<BuildNumberSpec>().unwrap().to_string(), ">=2");
        assert_eq!("=4".parse::<BuildNumberSpec>().unwrap().to_string(), "4");
    }
}
