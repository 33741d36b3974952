//! Extraction and download of conda package archives.
//!
//! Both archive formats are supported: the classic `.tar.bz2` and the newer
//! `.conda` (a zip container holding zstd compressed tarballs). All extract
//! functions compute the digests of the archive while streaming it, so
//! integrity validation never requires a second pass over the data.

#![deny(missing_docs)]

pub mod download;
pub mod fs;
pub mod read;

#[cfg(test)]
pub(crate) mod test_utils;

use krait_digest::{Md5Hash, Sha256Hash};
use krait_networking::Interrupted;
use thiserror::Error;

/// The digests of an archive that was extracted.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ExtractResult {
    /// The SHA256 digest of the archive bytes.
    pub sha256: Sha256Hash,

    /// The MD5 digest of the archive bytes.
    pub md5: Md5Hash,
}

/// An error that can occur while extracting or downloading an archive.
#[derive(Debug, Error)]
pub enum ExtractError {
    /// An io error occurred somewhere in the pipeline.
    #[error(transparent)]
    IoError(#[from] std::io::Error),

    /// The destination directory could not be created.
    #[error("failed to create the destination directory")]
    CouldNotCreateDestination(#[source] std::io::Error),

    /// The archive has an extension this crate does not know.
    #[error("unsupported archive type")]
    UnsupportedArchiveType,

    /// The archive bytes do not match the expected SHA256 digest.
    #[error("sha256 mismatch: expected '{expected}', archive was '{actual}'")]
    Sha256Mismatch {
        /// The digest the index promised.
        expected: String,
        /// The digest that was computed from the bytes.
        actual: String,
    },

    /// The download failed.
    #[error("failed to download {0}")]
    DownloadFailed(url::Url, #[source] reqwest::Error),

    /// The server answered with a failure status.
    #[error("the server responded with {status} for {url}")]
    HttpStatus {
        /// The url that was requested.
        url: url::Url,
        /// The response status.
        status: reqwest::StatusCode,
        /// The wait the server asked for through `Retry-After`, when it sent
        /// one.
        retry_after: Option<std::time::Duration>,
    },

    /// The download kept failing after exhausting the retry policy.
    #[error("retry limit reached while downloading {0}")]
    RetryLimitReached(url::Url),

    /// The operation was cancelled through the interrupt flag.
    #[error(transparent)]
    Cancelled(#[from] Interrupted),

    /// A background task died before delivering its result.
    #[error("the extraction task was aborted")]
    TaskAborted,
}

impl From<tokio::task::JoinError> for ExtractError {
    fn from(err: tokio::task::JoinError) -> Self {
        // Panics in the blocking extraction task should surface as panics.
        match err.try_into_panic() {
            Ok(panic) => std::panic::resume_unwind(panic),
            Err(_) => ExtractError::TaskAborted,
        }
    }
}
