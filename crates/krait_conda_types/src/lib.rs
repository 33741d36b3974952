//! `krait_conda_types` contains the data types used across the krait crates:
//! versions and version specs, match specs, package records, repodata,
//! prefix metadata and the channel/platform model.

#![deny(missing_docs)]

mod build_spec;
mod channel;
pub mod history;
mod match_spec;
mod no_arch_type;
pub mod package;
mod package_name;
mod platform;
mod prefix_record;
mod repo_data;
mod repo_data_record;
mod string_matcher;
mod utils;
mod version;
mod version_spec;

pub use build_spec::{BuildNumber, BuildNumberSpec, OrdOperator, ParseBuildNumberSpecError};
pub use channel::{Channel, ChannelConfig, ParseChannelError};
pub use match_spec::{MatchSpec, ParseMatchSpecError};
pub use no_arch_type::{NoArchType, RawNoArchType};
pub use package_name::{InvalidPackageNameError, PackageName};
pub use platform::{ParsePlatformError, Platform};
pub use prefix_record::{Link, LinkType, PathsEntry, PrefixPaths, PrefixRecord};
pub use repo_data::{
    topological_sort::sort_topologically, ChannelInfo, PackageRecord, PackageSignature,
    ReadRepoDataError, RepoData,
};
pub use repo_data_record::RepoDataRecord;
pub use string_matcher::{StringMatcher, StringMatcherParseError};
pub use version::{ParseVersionError, ParseVersionErrorKind, Version};
pub use version_spec::{
    EqualityOperator, LogicalOperator, ParseVersionSpecError, RangeOperator, StrictRangeOperator,
    VersionSpec,
};

/// The paths entry type used by prefix records, re-exported under the name
/// the rest of the workspace refers to it by.
pub use prefix_record::PathType as PrefixPathType;
