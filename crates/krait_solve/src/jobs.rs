//! The jobs and flags a solve operates on.

use krait_conda_types::MatchSpec;

use crate::id::SolvableId;

/// Flags that tune how jobs are interpreted.
#[derive(Debug, Default, Copy, Clone)]
pub struct SolverFlags {
    /// When set, an installed package may be replaced by a lower version to
    /// satisfy the jobs.
    pub allow_downgrade: bool,

    /// When set, only the job specs themselves are enforced; dependencies of
    /// the selected candidates are not pulled in.
    pub no_deps: bool,

    /// When set, the dependencies of the matching candidates are installed
    /// but the candidates themselves are not required.
    pub only_deps: bool,
}

/// The work a single solve must accomplish.
#[derive(Default)]
pub struct SolveJobs {
    pub(crate) install: Vec<MatchSpec>,
    pub(crate) remove: Vec<MatchSpec>,
    pub(crate) update: Vec<MatchSpec>,
    pub(crate) pin: Vec<MatchSpec>,
    pub(crate) favor: Vec<SolvableId>,
    pub(crate) lock: Vec<SolvableId>,
    pub(crate) flags: SolverFlags,
}

impl SolveJobs {
    /// At least one candidate matching the spec must be installed.
    pub fn install(&mut self, match_spec: MatchSpec) {
        self.install.push(match_spec);
    }

    /// Every installed package matching the spec must be absent from the
    /// solution.
    pub fn remove(&mut self, match_spec: MatchSpec) {
        self.remove.push(match_spec);
    }

    /// Like install, but the installed version of the matching name is not
    /// favored, so newer candidates win.
    pub fn update(&mut self, match_spec: MatchSpec) {
        self.update.push(match_spec);
    }

    /// The spec must hold in the solution without installing anything new:
    /// whatever provides the name must match the spec.
    pub fn pin(&mut self, match_spec: MatchSpec) {
        self.pin.push(match_spec);
    }

    /// Prefer the given solvable over other candidates of the same name.
    /// This is how the installed state biases the solver towards keeping
    /// things unchanged.
    pub fn favor(&mut self, id: SolvableId) {
        self.favor.push(id);
    }

    /// Never consider other candidates with the same name as the given
    /// solvable.
    pub fn lock(&mut self, id: SolvableId) {
        self.lock.push(id);
    }

    /// Sets the flags of this solve.
    pub fn set_flags(&mut self, flags: SolverFlags) {
        self.flags = flags;
    }
}
