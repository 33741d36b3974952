//! A package record together with its provenance.

use serde::{Deserialize, Serialize};
use url::Url;

use crate::PackageRecord;

/// A [`PackageRecord`] that also stores where the record came from: the
/// archive filename, the full download url, and the channel.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct RepoDataRecord {
    /// The actual package metadata.
    #[serde(flatten)]
    pub package_record: PackageRecord,

    /// The filename of the package archive.
    #[serde(rename = "fn")]
    pub file_name: String,

    /// The url from which the package archive can be downloaded. When the
    /// provenance is fully known this ends in `/{subdir}/{file_name}`.
    pub url: Url,

    /// The canonical name of the channel the package came from.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
}

impl AsRef<PackageRecord> for RepoDataRecord {
    fn as_ref(&self) -> &PackageRecord {
        &self.package_record
    }
}
