//! Solvables: the candidate package instances the solver decides over.

use std::fmt::{Display, Formatter};

use krait_conda_types::RepoDataRecord;

use crate::id::{MatchSpecId, NameId, RepoId};

/// A solvable backed by an actual package record.
pub struct PackageSolvable<'a> {
    pub(crate) repo_id: RepoId,

    /// The interned name of the package.
    pub(crate) name: NameId,

    /// The record the solvable was created from.
    pub(crate) record: &'a RepoDataRecord,

    /// The interned dependencies of the package.
    pub(crate) dependencies: Vec<MatchSpecId>,

    /// The interned run constraints of the package.
    pub(crate) constrains: Vec<MatchSpecId>,
}

impl<'a> PackageSolvable<'a> {
    /// The record this solvable represents.
    pub fn record(&self) -> &'a RepoDataRecord {
        self.record
    }

    /// The repo the solvable belongs to.
    pub fn repo_id(&self) -> RepoId {
        self.repo_id
    }
}

/// Either the synthetic root (whose "dependencies" are the install jobs) or a
/// package.
pub(crate) enum Solvable<'a> {
    Root(Vec<MatchSpecId>),
    Package(PackageSolvable<'a>),
}

impl<'a> Solvable<'a> {
    pub(crate) fn new_root() -> Self {
        Solvable::Root(Vec::new())
    }

    pub(crate) fn new_package(
        repo_id: RepoId,
        name: NameId,
        record: &'a RepoDataRecord,
    ) -> Self {
        Solvable::Package(PackageSolvable {
            repo_id,
            name,
            record,
            dependencies: Vec::new(),
            constrains: Vec::new(),
        })
    }

    pub(crate) fn get_package(&self) -> Option<&PackageSolvable<'a>> {
        match self {
            Solvable::Root(_) => None,
            Solvable::Package(package) => Some(package),
        }
    }

    pub(crate) fn package(&self) -> &PackageSolvable<'a> {
        self.get_package().expect("expected a package solvable")
    }

    pub(crate) fn package_mut(&mut self) -> &mut PackageSolvable<'a> {
        match self {
            Solvable::Root(_) => panic!("expected a package solvable"),
            Solvable::Package(package) => package,
        }
    }

    pub(crate) fn root_mut(&mut self) -> &mut Vec<MatchSpecId> {
        match self {
            Solvable::Root(specs) => specs,
            Solvable::Package(_) => panic!("expected the root solvable"),
        }
    }

    pub(crate) fn display(&self) -> SolvableDisplay<'_> {
        SolvableDisplay { solvable: self }
    }
}

/// Formats a solvable as `name version build`.
pub(crate) struct SolvableDisplay<'a> {
    solvable: &'a Solvable<'a>,
}

impl Display for SolvableDisplay<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.solvable {
            Solvable::Root(_) => write!(f, "<root>"),
            Solvable::Package(package) => {
                let record = &package.record.package_record;
                write!(f, "{} {}", record.name.as_normalized(), record.version)?;
                if !record.build.is_empty() {
                    write!(f, " {}", record.build)?;
                }
                Ok(())
            }
        }
    }
}
