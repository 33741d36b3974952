//! Matching of free-form strings (build strings mostly) by exact value, glob
//! or regex.

use std::{
    fmt::{Display, Formatter},
    hash::{Hash, Hasher},
    str::FromStr,
};

use thiserror::Error;

/// Matches a string either exactly, by glob pattern (`*` wildcards), or by an
/// explicit regex (`^…$`).
#[derive(Debug, Clone)]
pub enum StringMatcher {
    /// The string must match exactly.
    Exact(String),

    /// The string must match the glob pattern.
    Glob {
        /// The original glob pattern.
        pattern: String,
        /// The compiled equivalent regex.
        regex: regex::Regex,
    },

    /// The string must match the regex.
    Regex {
        /// The original regex source.
        pattern: String,
        /// The compiled regex.
        regex: regex::Regex,
    },
}

impl StringMatcher {
    /// Returns true if the given string matches.
    pub fn matches(&self, other: &str) -> bool {
        match self {
            StringMatcher::Exact(string) => string == other,
            StringMatcher::Glob { regex, .. } | StringMatcher::Regex { regex, .. } => {
                regex.is_match(other)
            }
        }
    }
}

impl PartialEq for StringMatcher {
    fn eq(&self, other: &Self) -> bool {
        self.to_string() == other.to_string()
    }
}

impl Eq for StringMatcher {}

impl Hash for StringMatcher {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.to_string().hash(state);
    }
}

impl Display for StringMatcher {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            StringMatcher::Exact(string) => write!(f, "{string}"),
            StringMatcher::Glob { pattern, .. } | StringMatcher::Regex { pattern, .. } => {
                write!(f, "{pattern}")
            }
        }
    }
}

/// An error that occurred when parsing a [`StringMatcher`].
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum StringMatcherParseError {
    /// The embedded regex or glob could not be compiled.
    #[error("invalid pattern '{0}'")]
    InvalidPattern(String),
}

impl FromStr for StringMatcher {
    type Err = StringMatcherParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.starts_with('^') && s.ends_with('$') {
            let regex = regex::Regex::new(s)
                .map_err(|_| StringMatcherParseError::InvalidPattern(s.to_owned()))?;
            Ok(StringMatcher::Regex {
                pattern: s.to_owned(),
                regex,
            })
        } else if s.contains('*') {
            let escaped = regex::escape(s).replace("\\*", ".*");
            let regex = regex::Regex::new(&format!("^{escaped}$"))
                .map_err(|_| StringMatcherParseError::InvalidPattern(s.to_owned()))?;
            Ok(StringMatcher::Glob {
                pattern: s.to_owned(),
                regex,
            })
        } else {
            Ok(StringMatcher::Exact(s.to_owned()))
        }
    }
}
