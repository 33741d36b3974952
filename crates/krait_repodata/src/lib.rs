//! Acquisition of repository indices: conditional fetching, on-disk caching
//! with a state sidecar, decompression, and the per (channel, platform)
//! subdir index that yields snapshots of package records.

#![deny(missing_docs)]

pub mod fetch;
mod subdir;

pub use subdir::{load_channels, RepoSnapshot, SubdirIndex};

#[cfg(test)]
pub(crate) mod utils;
