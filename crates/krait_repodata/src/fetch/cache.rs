//! The state sidecar written next to every cached repodata file.

use std::{path::Path, str::FromStr, time::SystemTime};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use url::Url;

/// The `{name}.state.json` file describing a cached repodata file: which url
/// it came from, the validators the server sent, and the size and mtime of
/// the cached file so tampering can be detected without hashing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoDataState {
    /// The url the cached data was actually downloaded from, including the
    /// file name of the chosen variant (`repodata.json.zst` etc).
    pub url: Url,

    /// The http cache headers of the last response.
    #[serde(flatten)]
    pub cache_headers: CacheHeaders,

    /// The mtime of the cached repodata file, in nanoseconds since the epoch.
    #[serde(
        rename = "mtime_ns",
        serialize_with = "system_time_to_nanos",
        deserialize_with = "system_time_from_nanos"
    )]
    pub cache_last_modified: SystemTime,

    /// The size of the cached repodata file in bytes.
    #[serde(rename = "size")]
    pub cache_size: u64,

    /// Whether the subdirectory offers a `.zst` compressed variant, together
    /// with when that was last checked.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_zst: Option<Expiring<bool>>,

    /// Whether the subdirectory offers a `.bz2` compressed variant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_bz2: Option<Expiring<bool>>,
}

impl RepoDataState {
    /// Reads and parses a state file from disk.
    pub fn from_path(path: &Path) -> Result<RepoDataState, std::io::Error> {
        let content = fs_err::read_to_string(path)?;
        Ok(Self::from_str(&content)?)
    }

    /// Writes the state file to disk.
    pub fn to_path(&self, path: &Path) -> Result<(), std::io::Error> {
        let file = fs_err::File::create(path)?;
        Ok(serde_json::to_writer_pretty(file, self)?)
    }
}

impl FromStr for RepoDataState {
    type Err = serde_json::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_str(s)
    }
}

/// The subset of response headers that drive conditional requests and
/// freshness.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheHeaders {
    /// The `ETag` of the response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,

    /// The `Last-Modified` date of the response.
    #[serde(default, rename = "mod", skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<String>,

    /// The `Cache-Control` header of the response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_control: Option<String>,
}

impl From<&reqwest::Response> for CacheHeaders {
    fn from(response: &reqwest::Response) -> Self {
        let headers = response.headers();
        Self {
            etag: headers
                .get(reqwest::header::ETAG)
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned),
            last_modified: headers
                .get(reqwest::header::LAST_MODIFIED)
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned),
            cache_control: headers
                .get(reqwest::header::CACHE_CONTROL)
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned),
        }
    }
}

/// A value with a timestamp of when it was determined.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Expiring<T> {
    /// The remembered value.
    pub value: T,

    /// When the value was last checked.
    pub last_checked: chrono::DateTime<chrono::Utc>,
}

impl<T> Expiring<T> {
    /// Wraps a value determined right now.
    pub fn now(value: T) -> Self {
        Self {
            value,
            last_checked: chrono::Utc::now(),
        }
    }

    /// Returns the value unless it is older than the given lifetime.
    pub fn value(&self, lifetime: chrono::Duration) -> Option<&T> {
        if chrono::Utc::now().signed_duration_since(self.last_checked) >= lifetime {
            None
        } else {
            Some(&self.value)
        }
    }
}

fn system_time_from_nanos<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<SystemTime, D::Error> {
    use serde::de::Error;
    let nanos: u64 = Deserialize::deserialize(deserializer)?;
    SystemTime::UNIX_EPOCH
        .checked_add(std::time::Duration::from_nanos(nanos))
        .ok_or_else(|| D::Error::custom("mtime out of range"))
}

fn system_time_to_nanos<S: Serializer>(time: &SystemTime, s: S) -> Result<S::Ok, S::Error> {
    use serde::ser::Error;
    let nanos = time
        .duration_since(SystemTime::UNIX_EPOCH)
        .map_err(|_| S::Error::custom("mtime precedes the epoch"))?
        .as_nanos();
    (nanos as u64).serialize(s)
}

#[cfg(test)]
mod test {
    use std::str::FromStr;

    use super::RepoDataState;

    const STATE: &str = r#"{
        "cache_control": "public, max-age=1200",
        "etag": "\"bec332621e00fc4ad87ba185171bcf46\"",
        "has_zst": {
            "last_checked": "2023-02-13T14:08:50Z",
            "value": true
        },
        "mod": "Mon, 13 Feb 2023 13:49:56 GMT",
        "mtime_ns": 1676297333020928000,
        "size": 156627374,
        "url": "https://conda.anaconda.org/conda-forge/win-64/repodata.json.zst"
    }"#;

    #[test]
    fn parse_and_roundtrip() {
        let state = RepoDataState::from_str(STATE).unwrap();
        assert_eq!(
            state.cache_headers.cache_control.as_deref(),
            Some("public, max-age=1200")
        );
        assert_eq!(state.cache_size, 156627374);
        assert!(state.has_zst.as_ref().unwrap().value);

        let serialized = serde_json::to_string(&state).unwrap();
        let reparsed = RepoDataState::from_str(&serialized).unwrap();
        assert_eq!(reparsed.cache_headers.etag, state.cache_headers.etag);
        assert_eq!(reparsed.cache_size, state.cache_size);
    }

    #[test]
    fn expiring_values_expire() {
        let expiring = super::Expiring::now(true);
        assert_eq!(expiring.value(chrono::Duration::hours(1)), Some(&true));
        assert_eq!(expiring.value(chrono::Duration::zero()), None);
    }
}
