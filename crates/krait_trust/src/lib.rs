//! Content trust for repodata.
//!
//! A channel that supports content trust publishes a chain of signed role
//! metadata: a *root* role that can rotate itself and delegates to a *key
//! manager* role, which in turn delegates to a *package manager* role whose
//! keys sign the individual package records in repodata.
//!
//! The [`TrustChain`] starts from a root file trusted out of band (read from
//! local disk, never fetched), walks forward through `N.root.json` successors
//! published by the channel, and then derives the delegated roles. Two
//! metadata spec versions are supported with different canonical forms; see
//! [`SpecVersion`].

#![deny(missing_docs)]

mod chain;
mod error;
mod model;
mod signature;

pub use chain::{RoleKey, RoleKeys, TrustChain};
pub use error::TrustError;
pub use model::{DelegationsV06, PayloadV06, RoleType, SignedFile, SpecVersion};
pub use signature::{verify_signature, PublicKey, Signature};
