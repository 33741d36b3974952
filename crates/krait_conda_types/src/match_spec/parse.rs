//! Parsing of match spec strings.

use std::str::FromStr;

use nom::{
    branch::alt,
    bytes::complete::{take_till, take_till1, take_while1},
    character::complete::{char, multispace0},
    multi::separated_list1,
    sequence::{delimited, separated_pair},
    Finish, IResult,
};
use thiserror::Error;

use krait_digest::parse_digest_from_hex;

use crate::{
    build_spec::ParseBuildNumberSpecError, string_matcher::StringMatcherParseError,
    version_spec::ParseVersionSpecError, InvalidPackageNameError, MatchSpec, PackageName,
    Platform, StringMatcher, VersionSpec,
};

/// An error that occurred while parsing a match spec string.
#[allow(missing_docs)]
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum ParseMatchSpecError {
    #[error("empty match spec")]
    Empty,

    #[error("invalid bracket section")]
    InvalidBracket,

    #[error("invalid bracket key: {0}")]
    InvalidBracketKey(String),

    #[error("missing package name")]
    MissingPackageName,

    #[error(transparent)]
    InvalidPackageName(#[from] InvalidPackageNameError),

    #[error(transparent)]
    InvalidVersionSpec(#[from] ParseVersionSpecError),

    #[error(transparent)]
    InvalidBuildString(#[from] StringMatcherParseError),

    #[error(transparent)]
    InvalidBuildNumber(#[from] ParseBuildNumberSpecError),

    #[error("unable to parse hash digest from hex")]
    InvalidHashDigest,

    #[error("invalid package url '{0}'")]
    InvalidUrl(String),

    #[error("unexpected trailing input '{0}'")]
    UnexpectedTrailingInput(String),
}

impl FromStr for MatchSpec {
    type Err = ParseMatchSpecError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let input = input.trim();
        if input.is_empty() {
            return Err(ParseMatchSpecError::Empty);
        }

        // Strip off the bracket section at the end.
        let (input, brackets) = strip_brackets(input)?;

        // Strip off the channel and optional subdir.
        let mut spec = MatchSpec::default();
        let input = match input.split_once("::") {
            Some((channel, rest)) => {
                let (channel, subdir) = split_channel_and_subdir(channel);
                if channel != "*" && !channel.is_empty() {
                    spec.channel = Some(channel.to_owned());
                }
                spec.subdir = subdir.map(str::to_owned);
                rest.trim()
            }
            None => input,
        };

        // The name is everything up to the first whitespace or operator.
        let name_end = input
            .find(|c: char| c.is_whitespace() || matches!(c, '=' | '<' | '>' | '!' | '~'))
            .unwrap_or(input.len());
        let (name, rest) = input.split_at(name_end);
        match name.trim() {
            "" => {
                if !input.starts_with('*') {
                    return Err(ParseMatchSpecError::MissingPackageName);
                }
            }
            "*" => {}
            name => spec.name = Some(PackageName::try_from(name)?),
        }
        // A star name is consumed here, operators would have split before it.
        let rest = rest.trim_start_matches('*').trim();

        // What remains is the version and optionally the build.
        if !rest.is_empty() {
            let (version_str, build_str) = split_version_and_build(rest)?;
            spec.version = Some(VersionSpec::from_str(version_str)?);
            if let Some(build_str) = build_str {
                spec.build = Some(StringMatcher::from_str(build_str)?);
            }
        }

        // Bracket values override anything parsed so far.
        for (key, value) in brackets {
            match key {
                "version" => spec.version = Some(VersionSpec::from_str(value)?),
                "build" => spec.build = Some(StringMatcher::from_str(value)?),
                "build_number" => spec.build_number = Some(value.parse()?),
                "fn" => spec.file_name = Some(value.to_owned()),
                "url" => {
                    spec.url = Some(
                        url::Url::parse(value)
                            .map_err(|_| ParseMatchSpecError::InvalidUrl(value.to_owned()))?,
                    );
                }
                "channel" => {
                    let (channel, subdir) = split_channel_and_subdir(value);
                    spec.channel = Some(channel.to_owned());
                    if subdir.is_some() {
                        spec.subdir = subdir.map(str::to_owned);
                    }
                }
                "subdir" => spec.subdir = Some(value.to_owned()),
                "md5" => {
                    spec.md5 = Some(
                        parse_digest_from_hex::<krait_digest::Md5>(value)
                            .ok_or(ParseMatchSpecError::InvalidHashDigest)?,
                    );
                }
                "sha256" => {
                    spec.sha256 = Some(
                        parse_digest_from_hex::<krait_digest::Sha256>(value)
                            .ok_or(ParseMatchSpecError::InvalidHashDigest)?,
                    );
                }
                key => return Err(ParseMatchSpecError::InvalidBracketKey(key.to_owned())),
            }
        }

        Ok(spec)
    }
}

/// Splits `channel/subdir` into its parts. The subdir is only split off when
/// the trailing segment is a known platform, so channel names containing
/// slashes (labels, urls) stay intact.
fn split_channel_and_subdir(channel: &str) -> (&str, Option<&str>) {
    if let Some((rest, last)) = channel.rsplit_once('/') {
        if Platform::from_str(last).is_ok() {
            return (rest, Some(last));
        }
    }
    (channel, None)
}

/// Splits the version-and-build tail of a spec. Accepts both the spaced form
/// (`>=1.0 py27_0`) and the compact form (`=1.0=py27_0`).
fn split_version_and_build(
    input: &str,
) -> Result<(&str, Option<&str>), ParseMatchSpecError> {
    let mut parts = input.split_whitespace();
    let version_part = parts.next().ok_or(ParseMatchSpecError::Empty)?;
    let build_part = parts.next();
    if parts.next().is_some() {
        return Err(ParseMatchSpecError::UnexpectedTrailingInput(
            input.to_owned(),
        ));
    }
    if build_part.is_some() {
        return Ok((version_part, build_part));
    }

    // Detect the compact `={version}={build}` form: an equals sign in the
    // middle that is not part of a comparison operator.
    let stripped = version_part
        .strip_prefix("==")
        .or_else(|| version_part.strip_prefix('='));
    if let Some(stripped) = stripped {
        if let Some((version, build)) = stripped.split_once('=') {
            if !version.is_empty() && !build.is_empty() && !build.starts_with('=') {
                // Reconstruct the version including its original operator.
                let operator_len = version_part.len() - stripped.len();
                let version_with_op = &version_part[..operator_len + version.len()];
                return Ok((version_with_op, Some(build)));
            }
        }
    }

    Ok((version_part, None))
}

/// Strips a trailing `[key=value, …]` section off the spec.
fn strip_brackets(input: &str) -> Result<(&str, Vec<(&str, &str)>), ParseMatchSpecError> {
    if let Some(without_close) = input.strip_suffix(']') {
        let Some((before, bracket)) = without_close.rsplit_once('[') else {
            return Err(ParseMatchSpecError::InvalidBracket);
        };
        if before.contains('[') {
            return Err(ParseMatchSpecError::InvalidBracket);
        }
        Ok((before.trim_end(), parse_bracket_list(bracket)?))
    } else if input.contains('[') || input.contains(']') {
        Err(ParseMatchSpecError::InvalidBracket)
    } else {
        Ok((input, Vec::new()))
    }
}

/// Parses the contents of a bracket section into key value pairs. Values may
/// be single or double quoted; quoting is required when the value contains a
/// comma or bracket.
fn parse_bracket_list(input: &str) -> Result<Vec<(&str, &str)>, ParseMatchSpecError> {
    fn parse_key_value(input: &str) -> IResult<&str, (&str, &str)> {
        separated_pair(
            delimited(
                multispace0,
                take_while1(|c: char| c.is_ascii_alphanumeric() || c == '_'),
                multispace0,
            ),
            char('='),
            delimited(
                multispace0,
                alt((
                    delimited(char('"'), take_till(|c| c == '"'), char('"')),
                    delimited(char('\''), take_till(|c| c == '\''), char('\'')),
                    take_till1(|c| c == ','),
                )),
                multispace0,
            ),
        )(input)
    }

    match separated_list1(char(','), parse_key_value)(input).finish() {
        Ok(("", list)) => Ok(list),
        _ => Err(ParseMatchSpecError::InvalidBracket),
    }
}

#[cfg(test)]
mod test {
    use assert_matches::assert_matches;

    use super::{split_version_and_build, ParseMatchSpecError};
    use crate::MatchSpec;

    #[test]
    fn split_version_and_build_forms() {
        assert_eq!(split_version_and_build(">=1.0").unwrap(), (">=1.0", None));
        assert_eq!(
            split_version_and_build("1.0.* py27_0").unwrap(),
            ("1.0.*", Some("py27_0"))
        );
        assert_eq!(
            split_version_and_build("=1.0=py27_0").unwrap(),
            ("=1.0", Some("py27_0"))
        );
        assert_eq!(
            split_version_and_build("==1.0=py27_0").unwrap(),
            ("==1.0", Some("py27_0"))
        );
        assert_eq!(
            split_version_and_build(">=1.8,<2").unwrap(),
            (">=1.8,<2", None)
        );
    }

    #[test]
    fn bracket_quoting() {
        let spec: MatchSpec = r#"foo[version=">=1.0,<2", build='py2*']"#.parse().unwrap();
        assert_eq!(spec.version.unwrap().to_string(), ">=1.0,<2");
        assert_eq!(spec.build.unwrap().to_string(), "py2*");
    }

    #[test]
    fn star_spec() {
        let spec: MatchSpec = "*".parse().unwrap();
        assert!(spec.name.is_none());
        assert!(spec.version.is_none());
    }

    #[test]
    fn errors() {
        assert_matches!(
            "".parse::<MatchSpec>(),
            Err(ParseMatchSpecError::Empty)
        );
        assert_matches!(
            "foo[bar=1]".parse::<MatchSpec>(),
            Err(ParseMatchSpecError::InvalidBracketKey(_))
        );
        assert_matches!(
            "foo[version=1".parse::<MatchSpec>(),
            Err(ParseMatchSpecError::InvalidBracket)
        );
        assert_matches!(
            ">=1.0".parse::<MatchSpec>(),
            Err(ParseMatchSpecError::MissingPackageName)
        );
        assert_matches!(
            "foo 1.0 py_0 extra".parse::<MatchSpec>(),
            Err(ParseMatchSpecError::UnexpectedTrailingInput(_))
        );
    }

    #[test]
    fn channel_forms() {
        let spec: MatchSpec = "conda-forge::foo".parse().unwrap();
        assert_eq!(spec.channel.as_deref(), Some("conda-forge"));
        assert!(spec.subdir.is_none());

        let spec: MatchSpec = "*/linux-64::foo >=1.0".parse().unwrap();
        assert!(spec.channel.is_none());
        assert_eq!(spec.subdir.as_deref(), Some("linux-64"));
    }
}
