//! Channels: named sources of packages that resolve to one URL per platform.

use std::{
    fmt::{Display, Formatter},
    path::PathBuf,
    str::FromStr,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::{ParsePlatformError, Platform};

/// Configuration required to resolve bare channel names.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// The url to prepend to a bare channel name, e.g.
    /// `https://conda.anaconda.org` turns `conda-forge` into
    /// `https://conda.anaconda.org/conda-forge/`.
    pub channel_alias: Url,

    /// The directory relative paths to local channels are resolved against.
    pub root_dir: PathBuf,
}

impl ChannelConfig {
    /// Constructs a config with the default channel alias and the given root
    /// directory.
    pub fn default_with_root_dir(root_dir: PathBuf) -> Self {
        Self {
            channel_alias: Url::parse("https://conda.anaconda.org")
                .expect("the default channel alias is a valid url"),
            root_dir,
        }
    }
}

/// A channel from which packages can be obtained.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    /// The platforms explicitly selected with `[…]` in the channel string, or
    /// `None` to use the default set `{current platform, noarch}`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platforms: Option<Vec<Platform>>,

    /// The base url of the channel, always ending in a `/`.
    pub base_url: Url,

    /// The name of the channel when it was created from a bare name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Channel {
    /// Constructs a channel directly from a base url.
    pub fn from_url(url: Url) -> Self {
        let base_url = ensure_trailing_slash(url);
        let name = channel_name_from_url(&base_url);
        Self {
            platforms: None,
            base_url,
            name,
        }
    }

    /// Parses a channel string: a bare name (resolved against the channel
    /// alias), an absolute url, or either of these followed by explicit
    /// platform filters in brackets, e.g. `conda-forge[linux-64, noarch]`.
    pub fn from_str(
        str: impl AsRef<str>,
        config: &ChannelConfig,
    ) -> Result<Self, ParseChannelError> {
        let str = str.as_ref().trim();
        let (str, platforms) = parse_platforms(str)?;
        if str.is_empty() {
            return Err(ParseChannelError::Empty);
        }

        let mut channel = if str.contains("://") {
            let url = Url::parse(str).map_err(|e| ParseChannelError::InvalidUrl(e.to_string()))?;
            Channel::from_url(url)
        } else if str.starts_with('/') || str.starts_with("./") || str.starts_with("../") {
            let path = config.root_dir.join(str);
            let url = Url::from_directory_path(&path)
                .map_err(|()| ParseChannelError::InvalidPath(path.display().to_string()))?;
            Channel {
                platforms: None,
                base_url: url,
                name: Some(str.to_owned()),
            }
        } else {
            validate_channel_name(str)?;
            let url = config
                .channel_alias
                .join(&format!("{str}/"))
                .map_err(|e| ParseChannelError::InvalidUrl(e.to_string()))?;
            Channel {
                platforms: None,
                base_url: url,
                name: Some(str.to_owned()),
            }
        };
        channel.platforms = platforms;
        Ok(channel)
    }

    /// Returns the url of the subdirectory for the given platform.
    pub fn platform_url(&self, platform: Platform) -> Url {
        self.base_url
            .join(&format!("{platform}/"))
            .expect("platform strings are valid url segments")
    }

    /// Returns the platforms selected by this channel, or the default set of
    /// the given platform plus `noarch`.
    pub fn platforms_or_default(&self, platform: Platform) -> Vec<Platform> {
        match &self.platforms {
            Some(platforms) => platforms.clone(),
            None if platform.is_noarch() => vec![Platform::NoArch],
            None => vec![platform, Platform::NoArch],
        }
    }

    /// Returns the canonical name of the channel: the configured name when
    /// there is one, the full url otherwise.
    pub fn canonical_name(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => self.base_url.to_string(),
        }
    }
}

impl Display for Channel {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.canonical_name())
    }
}

/// An error that occurred while parsing a channel string.
#[allow(missing_docs)]
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum ParseChannelError {
    #[error("empty channel string")]
    Empty,

    #[error("invalid platform filter: {0}")]
    InvalidPlatform(#[from] ParsePlatformError),

    #[error("invalid channel url: {0}")]
    InvalidUrl(String),

    #[error("invalid channel path: {0}")]
    InvalidPath(String),

    #[error("'{0}' is not a valid channel name")]
    InvalidName(String),
}

/// Splits off a trailing `[platform, …]` filter from a channel string.
fn parse_platforms(
    channel: &str,
) -> Result<(&str, Option<Vec<Platform>>), ParseChannelError> {
    if channel.ends_with(']') {
        if let Some(start) = channel.rfind('[') {
            let platforms = channel[start + 1..channel.len() - 1]
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(Platform::from_str)
                .collect::<Result<Vec<_>, _>>()?;
            let rest = &channel[..start];
            return Ok((rest, (!platforms.is_empty()).then_some(platforms)));
        }
    }
    Ok((channel, None))
}

fn validate_channel_name(name: &str) -> Result<(), ParseChannelError> {
    if name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/'))
    {
        Ok(())
    } else {
        Err(ParseChannelError::InvalidName(name.to_owned()))
    }
}

fn ensure_trailing_slash(url: Url) -> Url {
    if url.path().ends_with('/') {
        url
    } else {
        let mut url = url;
        url.set_path(&format!("{}/", url.path()));
        url
    }
}

fn channel_name_from_url(url: &Url) -> Option<String> {
    let name = url.path().trim_matches('/');
    (!name.is_empty()).then(|| name.to_owned())
}

#[cfg(test)]
mod test {
    use super::{Channel, ChannelConfig, Platform};
    use url::Url;

    fn config() -> ChannelConfig {
        ChannelConfig::default_with_root_dir(std::env::current_dir().unwrap())
    }

    #[test]
    fn bare_name_resolves_against_alias() {
        let channel = Channel::from_str("conda-forge", &config()).unwrap();
        assert_eq!(
            channel.base_url,
            Url::parse("https://conda.anaconda.org/conda-forge/").unwrap()
        );
        assert_eq!(channel.name.as_deref(), Some("conda-forge"));
        assert_eq!(
            channel.platform_url(Platform::Linux64),
            Url::parse("https://conda.anaconda.org/conda-forge/linux-64/").unwrap()
        );
    }

    #[test]
    fn absolute_url_is_used_as_is() {
        let channel = Channel::from_str("https://repo.prefix.dev/emperor", &config()).unwrap();
        assert_eq!(
            channel.base_url,
            Url::parse("https://repo.prefix.dev/emperor/").unwrap()
        );
    }

    #[test]
    fn platform_filters() {
        let channel = Channel::from_str("conda-forge[linux-64, noarch]", &config()).unwrap();
        assert_eq!(
            channel.platforms,
            Some(vec![Platform::Linux64, Platform::NoArch])
        );
        assert_eq!(channel.name.as_deref(), Some("conda-forge"));
    }

    #[test]
    fn default_platforms_include_noarch() {
        let channel = Channel::from_str("conda-forge", &config()).unwrap();
        assert_eq!(
            channel.platforms_or_default(Platform::Linux64),
            vec![Platform::Linux64, Platform::NoArch]
        );
    }

    #[test]
    fn invalid_channels() {
        assert!(Channel::from_str("", &config()).is_err());
        assert!(Channel::from_str("conda forge", &config()).is_err());
        assert!(Channel::from_str("conda-forge[amiga-68k]", &config()).is_err());
    }
}
