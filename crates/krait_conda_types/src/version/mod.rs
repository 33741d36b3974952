//! Version numbers as used by conda-format packages.
//!
//! Version strings consist of an optional epoch (`1!`), dot-separated
//! segments, and an optional local version behind a `+`. Each segment is a
//! mixed run of numerals and literals; comparisons are performed component by
//! component, where missing components act as the numeral `0`.
//!
//! The literal components obey a priority table inherited from conda:
//!
//! ```text
//! dev  <  _  <  other literals (lexicographic)  <  numerals  <  post
//! ```
//!
//! Because missing components pad as `0`, a version ending in a plain literal
//! compares *below* the same version without it (`1.0a < 1.0`), a trailing
//! underscore sits below all literals (`1.0_ < 1.0a`, the openssl convention)
//! and `dev` sits below everything else (`1.0dev < 1.0_`). `post` always
//! compares greatest, so `1.0 < 1.0post1`.

use std::{
    cmp::Ordering,
    fmt::{self, Display, Formatter},
    hash::{Hash, Hasher},
};

use itertools::{EitherOrBoth, Itertools};
use smallvec::SmallVec;

mod parse;

pub use parse::{ParseVersionError, ParseVersionErrorKind};

/// A single segment of a version: the components between two dots.
pub(crate) type Segment = SmallVec<[Component; 2]>;

/// A parsed version string. See the module documentation for the ordering
/// rules.
#[derive(Debug, Clone, Eq)]
pub struct Version {
    /// A normalized copy of the input: trimmed, lower-cased, and with dashes
    /// replaced by underscores when the input contained no underscore.
    norm: Box<str>,

    /// The epoch, when one was given explicitly.
    epoch: Option<u64>,

    /// The segments of the main version part.
    segments: Vec<Segment>,

    /// The segments of the local version part (behind the `+`).
    local: Vec<Segment>,
}

impl Version {
    /// Returns the epoch of the version, `0` when none was specified.
    pub fn epoch(&self) -> u64 {
        self.epoch.unwrap_or(0)
    }

    /// Returns true if the version carries an explicit epoch.
    pub fn has_epoch(&self) -> bool {
        self.epoch.is_some()
    }

    /// Returns true if the version has a local part (`1.2+3.4`).
    pub fn has_local(&self) -> bool {
        !self.local.is_empty()
    }

    /// Returns the major and minor numbers if the version starts with two
    /// purely numeric segments.
    pub fn as_major_minor(&self) -> Option<(u64, u64)> {
        let mut segments = self.segments.iter();
        let major = segments.next()?;
        let minor = segments.next()?;
        match (major.as_slice(), minor.as_slice()) {
            ([Component::Numeral(major)], [Component::Numeral(minor)]) => Some((*major, *minor)),
            _ => None,
        }
    }

    /// Returns true if any component of the version is the `dev` literal.
    pub fn is_dev(&self) -> bool {
        self.segments
            .iter()
            .flatten()
            .any(|component| matches!(component, Component::Dev))
    }

    /// Returns true if this version starts with the other version, segment by
    /// segment and component by component. Used to implement the `1.2.*`
    /// style of match specs.
    pub fn starts_with(&self, other: &Self) -> bool {
        self.epoch() == other.epoch()
            && segments_start_with(&self.segments, &other.segments)
            && segments_start_with(&self.local, &other.local)
    }

    /// Returns true if this version is "compatible" with the other version in
    /// the `~=` sense: at least the other version, and matching it up to its
    /// final segment.
    pub fn compatible_with(&self, other: &Self) -> bool {
        let truncated = &other.segments[..other.segments.len().saturating_sub(1)];
        self >= other
            && self.epoch() == other.epoch()
            && segments_start_with(&self.segments, truncated)
    }

    /// Returns the canonical string form: all segments joined by dots,
    /// preceded by the epoch when non-zero and followed by the local part.
    pub fn canonical(&self) -> String {
        let mut result = String::new();
        if self.epoch() != 0 {
            result.push_str(&format!("{}!", self.epoch()));
        }
        result.push_str(&format_segments(&self.segments));
        if self.has_local() {
            result.push('+');
            result.push_str(&format_segments(&self.local));
        }
        result
    }
}

fn format_segments(segments: &[Segment]) -> String {
    segments
        .iter()
        .map(|segment| {
            // A leading zero that was only inserted to keep numerals and
            // literals in phase is not rendered.
            let components = match segment.as_slice() {
                [Component::Numeral(0), rest @ ..]
                    if rest.first().is_some_and(|c| !c.is_numeral()) =>
                {
                    rest
                }
                components => components,
            };
            components.iter().join("")
        })
        .join(".")
}

/// Compares two segment lists, padding the shorter side with default
/// components so `1.1 == 1.1.0`.
fn cmp_segments(a: &[Segment], b: &[Segment]) -> Ordering {
    for pair in a.iter().zip_longest(b.iter()) {
        let (a_segment, b_segment) = match &pair {
            EitherOrBoth::Both(a, b) => (a.as_slice(), b.as_slice()),
            EitherOrBoth::Left(a) => (a.as_slice(), [].as_slice()),
            EitherOrBoth::Right(b) => ([].as_slice(), b.as_slice()),
        };
        for components in a_segment.iter().zip_longest(b_segment.iter()) {
            let default = Component::default();
            let (a_component, b_component) = match components {
                EitherOrBoth::Both(a, b) => (a, b),
                EitherOrBoth::Left(a) => (a, &default),
                EitherOrBoth::Right(b) => (&default, b),
            };
            match a_component.cmp(b_component) {
                Ordering::Equal => {}
                ordering => return ordering,
            }
        }
    }
    Ordering::Equal
}

fn segments_start_with(a: &[Segment], b: &[Segment]) -> bool {
    for pair in a.iter().zip_longest(b.iter()) {
        let (a_segment, b_segment) = match pair {
            EitherOrBoth::Both(a, b) => (a, b),
            EitherOrBoth::Left(_) => return true,
            EitherOrBoth::Right(_) => return false,
        };
        for components in a_segment.iter().zip_longest(b_segment.iter()) {
            match components {
                EitherOrBoth::Both(a, b) if a == b => {}
                EitherOrBoth::Both(_, _) => return false,
                EitherOrBoth::Left(_) => return true,
                EitherOrBoth::Right(_) => return false,
            }
        }
    }
    true
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.epoch()
            .cmp(&other.epoch())
            .then_with(|| cmp_segments(&self.segments, &other.segments))
            .then_with(|| cmp_segments(&self.local, &other.local))
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Hash for Version {
    fn hash<H: Hasher>(&self, state: &mut H) {
        fn hash_segments<H: Hasher>(state: &mut H, segments: &[Segment]) {
            // Trailing default components never influence equality, so they
            // must not influence the hash either: `1.1` and `1.1.0` hash the
            // same.
            for segment in segments {
                segment
                    .iter()
                    .rev()
                    .skip_while(|c| **c == Component::default())
                    .for_each(|c| c.hash(state));
            }
        }

        self.epoch().hash(state);
        hash_segments(state, &self.segments);
        hash_segments(state, &self.local);
    }
}

impl Display for Version {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.norm)
    }
}

impl serde::Serialize for Version {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.norm)
    }
}

impl<'de> serde::Deserialize<'de> for Version {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let str = String::deserialize(deserializer)?;
        str.parse().map_err(serde::de::Error::custom)
    }
}

/// A single version component: a numeral, one of the special literals, or a
/// generic lowercase identifier.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub(crate) enum Component {
    /// A numeric component. Also the implicit pad for missing components.
    Numeral(u64),

    /// The `post` literal, ordered above everything else.
    Post,

    /// The `dev` literal, ordered below everything else.
    Dev,

    /// An underscore run, ordered between `dev` and regular identifiers.
    Underscore,

    /// A generic identifier, compared lexicographically, always below
    /// numerals.
    Iden(Box<str>),
}

impl Component {
    fn is_numeral(&self) -> bool {
        matches!(self, Component::Numeral(_))
    }
}

impl Default for Component {
    fn default() -> Self {
        Component::Numeral(0)
    }
}

impl Ord for Component {
    fn cmp(&self, other: &Self) -> Ordering {
        use Component::{Dev, Iden, Numeral, Post, Underscore};
        match (self, other) {
            (Numeral(a), Numeral(b)) => a.cmp(b),
            (Iden(a), Iden(b)) => a.cmp(b),
            (Post, Post) | (Dev, Dev) | (Underscore, Underscore) => Ordering::Equal,

            (Post, _) => Ordering::Greater,
            (_, Post) => Ordering::Less,

            (Dev, _) => Ordering::Less,
            (_, Dev) => Ordering::Greater,

            (Underscore, _) => Ordering::Less,
            (_, Underscore) => Ordering::Greater,

            // Identifiers always order below numerals.
            (Iden(_), Numeral(_)) => Ordering::Less,
            (Numeral(_), Iden(_)) => Ordering::Greater,
        }
    }
}

impl PartialOrd for Component {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Display for Component {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Component::Numeral(n) => write!(f, "{n}"),
            Component::Post => write!(f, "post"),
            Component::Dev => write!(f, "dev"),
            Component::Underscore => write!(f, "_"),
            Component::Iden(iden) => write!(f, "{iden}"),
        }
    }
}
