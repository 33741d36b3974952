//! Dependency resolution over conda package records.
//!
//! The low level building blocks are public: a [`Pool`] holds the union of
//! all repository snapshots plus the installed set, a [`Solver`] runs a CDCL
//! SAT search over it, and an unsolvable run yields a [`Problem`] that can be
//! compressed and rendered as an explanation tree.
//!
//! Most callers only need [`resolve`], which wires those pieces together: it
//! builds the pool, adds jobs that keep installed packages where possible,
//! and maps the solution back to records.

#![deny(missing_docs)]

mod conda_sorting;
mod id;
mod jobs;
mod pool;
mod problem;
mod solvable;
mod solver;

use krait_conda_types::{MatchSpec, ParseMatchSpecError, RepoDataRecord};
use thiserror::Error;

pub use id::{MatchSpecId, NameId, RepoId, SolvableId};
pub use jobs::{SolveJobs, SolverFlags};
pub use pool::Pool;
pub use problem::{
    DisplayUnsat, MergedProblemNode, Problem, ProblemEdge, ProblemGraph, ProblemNode, TreeGlyphs,
};
pub use solvable::PackageSolvable;
pub use solver::Solver;

/// One repository of available packages plus its channel priority.
pub struct RepoSource<'a> {
    /// The records of the repository.
    pub records: &'a [RepoDataRecord],

    /// The priority of the repository's channel; higher wins under strict
    /// channel priority.
    pub channel_priority: i32,
}

/// Everything a single solve needs.
pub struct SolverTask<'a> {
    /// The available package repositories.
    pub available: Vec<RepoSource<'a>>,

    /// The records currently installed in the prefix.
    pub installed: &'a [RepoDataRecord],

    /// The specs that must be installed.
    pub specs: Vec<MatchSpec>,

    /// The specs whose matching installed packages must be removed.
    pub remove_specs: Vec<MatchSpec>,

    /// The specs whose packages should move to the newest matching version.
    pub update_specs: Vec<MatchSpec>,

    /// Specs that restrict what may be chosen without installing anything.
    pub pinned_specs: Vec<MatchSpec>,

    /// Whether installed packages may never be swapped for a candidate of
    /// another channel/version combination (hard lock).
    pub lock_installed: bool,

    /// Whether strict channel priority applies.
    pub strict_channel_priority: bool,

    /// The solver flags.
    pub flags: SolverFlags,
}

impl<'a> SolverTask<'a> {
    /// Creates a task with the given available repositories and no jobs.
    pub fn new(available: Vec<RepoSource<'a>>, installed: &'a [RepoDataRecord]) -> Self {
        Self {
            available,
            installed,
            specs: Vec::new(),
            remove_specs: Vec::new(),
            update_specs: Vec::new(),
            pinned_specs: Vec::new(),
            lock_installed: false,
            strict_channel_priority: false,
            flags: SolverFlags::default(),
        }
    }
}

/// The ways a solve can fail.
#[derive(Debug, Error)]
pub enum SolveError {
    /// A dependency string in the input could not be parsed.
    #[error(transparent)]
    InvalidMatchSpec(#[from] ParseMatchSpecError),

    /// The jobs cannot be satisfied; the message is the rendered explanation
    /// tree.
    #[error("{0}")]
    Unsolvable(String),
}

/// Solves the task and returns the records that make up the desired state of
/// the environment.
pub fn resolve<'a>(task: SolverTask<'a>) -> Result<Vec<&'a RepoDataRecord>, SolveError> {
    let mut pool = Pool::new();
    pool.set_strict_channel_priority(task.strict_channel_priority);

    for source in &task.available {
        let repo = pool.new_repo(source.channel_priority);
        for record in source.records {
            pool.add_package(repo, record)?;
        }
    }

    let installed_repo = pool.new_installed_repo();
    let mut installed_ids = Vec::with_capacity(task.installed.len());
    for record in task.installed {
        installed_ids.push(pool.add_package(installed_repo, record)?);
    }

    let mut jobs = SolveJobs::default();
    jobs.set_flags(task.flags);

    for spec in task.specs {
        jobs.install(spec);
    }
    for spec in task.update_specs {
        jobs.update(spec);
    }
    for spec in &task.remove_specs {
        jobs.remove(spec.clone());
    }
    for spec in task.pinned_specs {
        jobs.pin(spec);
    }

    // Installed packages stay part of the environment (unless removed) and
    // are favored, so the solver prefers to keep them untouched.
    for (record, &solvable_id) in task.installed.iter().zip(&installed_ids) {
        let removed = task
            .remove_specs
            .iter()
            .any(|spec| spec.matches(&record.package_record));
        if removed {
            continue;
        }
        jobs.install(MatchSpec::from_name(record.package_record.name.clone()));
        jobs.favor(solvable_id);
        if task.lock_installed {
            jobs.lock(solvable_id);
        }
    }

    let mut solver = Solver::new(pool);
    match solver.solve(jobs) {
        Ok(solution) => Ok(solution
            .into_iter()
            .map(|id| solver.pool().resolve_solvable(id).record())
            .collect()),
        Err(problem) => {
            let message = problem
                .display_user_friendly(&solver, TreeGlyphs::default())
                .to_string();
            Err(SolveError::Unsolvable(message))
        }
    }
}
