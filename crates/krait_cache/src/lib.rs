//! The content addressed package cache.
//!
//! A cache layer is a directory holding downloaded archives (`{fn}`) and
//! extracted packages (`{name}-{version}-{build}/`). Multiple layers compose
//! into a [`MultiPackageCache`] with first-hit lookup; new artifacts are
//! always written to the first writable layer.

#![deny(missing_docs)]

mod package_cache;
pub mod validation;

pub use package_cache::{
    MultiPackageCache, PackageCacheLayer, VerificationPolicy, Writability,
};
