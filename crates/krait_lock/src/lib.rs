//! Typed schemas for the two environment lockfile dialects krait can
//! consume. The readers validate the file version once at the boundary and
//! hand back plain data; interpreting the records is up to the caller.

#![deny(missing_docs)]

pub mod conda;
pub mod json;

use std::path::Path;

use thiserror::Error;

/// An error reading a lockfile.
#[allow(missing_docs)]
#[derive(Debug, Error)]
pub enum LockfileError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("failed to parse lockfile: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("failed to parse lockfile: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unsupported lockfile version '{0}'")]
    UnsupportedVersion(String),
}

/// Reads a conda dialect (YAML) lockfile from disk.
pub fn read_conda_lockfile(path: impl AsRef<Path>) -> Result<conda::CondaLock, LockfileError> {
    let content = fs_err::read_to_string(path.as_ref())?;
    conda::CondaLock::from_str(&content)
}

/// Reads an alternate dialect (JSON) lockfile from disk.
pub fn read_json_lockfile(
    path: impl AsRef<Path>,
) -> Result<json::JsonLock, LockfileError> {
    let content = fs_err::read_to_string(path.as_ref())?;
    json::JsonLock::from_str(&content)
}
