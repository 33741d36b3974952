//! Create and mutate conda environments.
//!
//! This crate ties the workspace together: repodata acquired through
//! `krait_repodata` feeds the solver in `krait_solve`; the resulting desired
//! state is diffed against the installed packages into a
//! [`install::Transaction`]; and the [`installer::Installer`] drives the
//! download/extract pipeline and the link engine to apply it to a
//! [`prefix::Prefix`].

#![deny(missing_docs)]

pub mod error;
pub mod install;
pub mod installer;
pub mod prefix;

pub use error::{ExitCode, KraitError};
pub use install::{InstallOptions, Transaction, TransactionOperation};
pub use installer::Installer;
pub use prefix::Prefix;
