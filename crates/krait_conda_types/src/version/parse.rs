use std::str::FromStr;

use thiserror::Error;

use super::{Component, Segment, Version};

/// An error that occurred during parsing of a version string.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
#[error("malformed version string '{version}': {kind}")]
pub struct ParseVersionError {
    /// The original string that could not be parsed.
    pub version: String,

    /// The reason parsing failed.
    pub kind: ParseVersionErrorKind,
}

/// The reason a version string could not be parsed.
#[allow(missing_docs)]
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum ParseVersionErrorKind {
    #[error("empty version string")]
    Empty,

    #[error("epoch must be an integer")]
    EpochMustBeInteger,

    #[error("duplicated epoch separator '!'")]
    DuplicatedEpochSeparator,

    #[error("duplicated local version separator '+'")]
    DuplicatedLocalVersionSeparator,

    #[error("empty version component")]
    EmptyVersionComponent,

    #[error("invalid character '{0}'")]
    InvalidCharacter(char),

    #[error("number is too large to be represented")]
    NumberOverflow,
}

impl FromStr for Version {
    type Err = ParseVersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let error = |kind| ParseVersionError {
            version: s.to_owned(),
            kind,
        };

        let lowered = s.trim().to_lowercase();
        if lowered.is_empty() {
            return Err(error(ParseVersionErrorKind::Empty));
        }

        // Dashes act as underscores, but only when the version contains no
        // underscore of its own.
        let norm = if lowered.contains('_') {
            lowered
        } else {
            lowered.replace('-', "_")
        };

        let (epoch, segments, local) = {
            let input = norm.as_str();

            // Split off the epoch.
            let (epoch, rest) = match input.split_once('!') {
                Some((epoch, rest)) => {
                    if rest.contains('!') {
                        return Err(error(ParseVersionErrorKind::DuplicatedEpochSeparator));
                    }
                    let epoch = epoch
                        .parse::<u64>()
                        .map_err(|_| error(ParseVersionErrorKind::EpochMustBeInteger))?;
                    (Some(epoch), rest)
                }
                None => (None, input),
            };

            // Split off the local version.
            let (main, local) = match rest.split_once('+') {
                Some((main, local)) => {
                    if local.contains('+') {
                        return Err(error(
                            ParseVersionErrorKind::DuplicatedLocalVersionSeparator,
                        ));
                    }
                    (main, Some(local))
                }
                None => (rest, None),
            };

            let segments = parse_segments(main).map_err(&error)?;
            let local = match local {
                Some(local) => parse_segments(local).map_err(&error)?,
                None => Vec::new(),
            };

            (epoch, segments, local)
        };

        Ok(Version {
            norm: norm.into_boxed_str(),
            epoch,
            segments,
            local,
        })
    }
}

fn parse_segments(part: &str) -> Result<Vec<Segment>, ParseVersionErrorKind> {
    part.split('.').map(parse_segment).collect()
}

/// Lexes one dot-separated segment into components: maximal runs of digits
/// become numerals, alphabetic runs become literals, underscore runs a single
/// underscore component. A segment that starts with a literal gets a `0`
/// inserted in front so numerals and literals stay in phase (`1.1.a1` equals
/// `1.1.0a1`).
fn parse_segment(segment: &str) -> Result<Segment, ParseVersionErrorKind> {
    if segment.is_empty() {
        return Err(ParseVersionErrorKind::EmptyVersionComponent);
    }

    let mut components = Segment::new();
    let mut chars = segment.chars().peekable();
    while let Some(&c) = chars.peek() {
        if c.is_ascii_digit() {
            let mut run = String::new();
            while let Some(&c) = chars.peek() {
                if !c.is_ascii_digit() {
                    break;
                }
                run.push(c);
                chars.next();
            }
            let numeral = run
                .parse::<u64>()
                .map_err(|_| ParseVersionErrorKind::NumberOverflow)?;
            components.push(Component::Numeral(numeral));
        } else if c.is_ascii_alphabetic() {
            let mut run = String::new();
            while let Some(&c) = chars.peek() {
                if !c.is_ascii_alphabetic() {
                    break;
                }
                run.push(c);
                chars.next();
            }
            components.push(match run.as_str() {
                "post" => Component::Post,
                "dev" => Component::Dev,
                _ => Component::Iden(run.into_boxed_str()),
            });
        } else if c == '_' {
            while chars.peek() == Some(&'_') {
                chars.next();
            }
            components.push(Component::Underscore);
        } else {
            return Err(ParseVersionErrorKind::InvalidCharacter(c));
        }
    }

    if !components
        .first()
        .is_some_and(|c| matches!(c, Component::Numeral(_)))
    {
        components.insert(0, Component::Numeral(0));
    }

    Ok(components)
}

#[cfg(test)]
mod test {
    use super::{ParseVersionErrorKind, Version};
    use assert_matches::assert_matches;

    #[test]
    fn parse_errors() {
        assert_matches!(
            "".parse::<Version>().map_err(|e| e.kind),
            Err(ParseVersionErrorKind::Empty)
        );
        assert_matches!(
            "1..2".parse::<Version>().map_err(|e| e.kind),
            Err(ParseVersionErrorKind::EmptyVersionComponent)
        );
        assert_matches!(
            "x!1.2".parse::<Version>().map_err(|e| e.kind),
            Err(ParseVersionErrorKind::EpochMustBeInteger)
        );
        assert_matches!(
            "1!2!3".parse::<Version>().map_err(|e| e.kind),
            Err(ParseVersionErrorKind::DuplicatedEpochSeparator)
        );
        assert_matches!(
            "1+2+3".parse::<Version>().map_err(|e| e.kind),
            Err(ParseVersionErrorKind::DuplicatedLocalVersionSeparator)
        );
        assert_matches!(
            "1.2#3".parse::<Version>().map_err(|e| e.kind),
            Err(ParseVersionErrorKind::InvalidCharacter('#'))
        );
        assert_matches!(
            "92233720368547758070".parse::<Version>().map_err(|e| e.kind),
            Err(ParseVersionErrorKind::NumberOverflow)
        );
    }

    #[test]
    fn dashes_normalize_to_underscores() {
        let dashed: Version = "1.2.3-alpha".parse().unwrap();
        let underscored: Version = "1.2.3_alpha".parse().unwrap();
        assert_eq!(dashed, underscored);
        assert_eq!(dashed.to_string(), "1.2.3_alpha");
    }

    #[test]
    fn epoch_and_local_are_recognized() {
        let version: Version = "2!1.2.3+4.5".parse().unwrap();
        assert_eq!(version.epoch(), 2);
        assert!(version.has_local());
    }
}
