//! The CDCL solver: watched-literal unit propagation, conflict analysis with
//! clause learning and backjumping.

pub(crate) mod clause;
pub(crate) mod decision;
pub(crate) mod decision_map;
pub(crate) mod decision_tracker;
pub(crate) mod watch_map;

use ahash::{AHashMap, AHashSet};

use crate::{
    id::{ClauseId, MatchSpecId, NameId, SolvableId},
    jobs::SolveJobs,
    pool::Pool,
    problem::Problem,
};

use clause::{Clause, ClauseKind, Literal};
use decision::Decision;
use decision_tracker::DecisionTracker;
use watch_map::WatchMap;

/// The dependency solver. It owns the pool it solves over.
pub struct Solver<'a> {
    pool: Pool<'a>,

    pub(crate) clauses: Vec<Clause>,
    watches: WatchMap,

    pub(crate) learnt_clauses: Vec<Vec<Literal>>,
    learnt_clauses_start: ClauseId,
    learnt_why: Vec<Vec<ClauseId>>,

    decision_tracker: DecisionTracker,
}

impl<'a> Solver<'a> {
    /// Creates a solver over the given pool.
    pub fn new(pool: Pool<'a>) -> Self {
        Self {
            clauses: Vec::new(),
            watches: WatchMap::new(),
            learnt_clauses: Vec::new(),
            learnt_clauses_start: ClauseId::new(0),
            learnt_why: Vec::new(),
            decision_tracker: DecisionTracker::new(pool.nsolvables()),
            pool,
        }
    }

    /// The pool the solver operates on.
    pub fn pool(&self) -> &Pool<'a> {
        &self.pool
    }

    /// Solves the given jobs. On success the solvables that must be present
    /// are returned; on failure a [`Problem`] describing the minimal set of
    /// conflicting clauses.
    pub fn solve(&mut self, jobs: SolveJobs) -> Result<Vec<SolvableId>, Problem> {
        // Clear state from previous runs.
        self.pool.root_solvable_mut().clear();
        self.decision_tracker.clear();
        self.clauses = vec![Clause::new(ClauseKind::InstallRoot, &[], &self.pool)];
        self.learnt_clauses.clear();
        self.learnt_why.clear();

        // Build the favored map: installed solvables win ties, except for
        // names the user asked to update.
        let mut favored_map = AHashMap::new();
        for &favored_id in &jobs.favor {
            let name_id = self.pool.resolve_solvable(favored_id).name;
            favored_map.insert(name_id, favored_id);
        }
        for spec in &jobs.update {
            if let Some(name) = &spec.name {
                if let Some(name_id) = self.pool.names_to_ids.get(name.as_normalized()) {
                    favored_map.remove(name_id);
                }
            }
        }

        // Root requirements: installs and updates; `only_deps` replaces each
        // spec with the dependencies of its best candidate.
        let mut visited_solvables = AHashSet::new();
        let mut root_requirements = Vec::new();
        for spec in jobs.install.iter().chain(jobs.update.iter()) {
            let spec_id = self
                .pool
                .intern_matchspec(&spec.to_string())
                .expect("a parsed spec re-parses");
            if jobs.flags.only_deps {
                let best_candidate = self.candidates(&favored_map, spec_id).first().copied();
                if let Some(best) = best_candidate {
                    let dependencies = self.pool.resolve_solvable(best).dependencies.clone();
                    root_requirements.extend(dependencies);
                } else {
                    // No candidates at all; keep the spec so the failure is
                    // reported on it.
                    root_requirements.push(spec_id);
                }
            } else {
                root_requirements.push(spec_id);
            }
        }

        for &spec_id in &root_requirements {
            self.pool.root_solvable_mut().push(spec_id);
            self.add_clauses_for_root_dep(
                &mut visited_solvables,
                &favored_map,
                spec_id,
                jobs.flags.no_deps,
            );
        }

        // Only one candidate per package name may be installed.
        for candidates in &self.pool.packages_by_name {
            for (i, &candidate) in candidates.iter().enumerate() {
                for &other_candidate in &candidates[i + 1..] {
                    self.clauses.push(Clause::new(
                        ClauseKind::ForbidMultipleInstances(candidate, other_candidate),
                        &self.learnt_clauses,
                        &self.pool,
                    ));
                }
            }
        }

        // Locked solvables: no other candidate of their name may be chosen.
        for &locked_solvable_id in &jobs.lock {
            let name = self.pool.resolve_solvable(locked_solvable_id).name;
            for &other_candidate in &self.pool.packages_by_name[name.index()] {
                if other_candidate != locked_solvable_id {
                    self.clauses.push(Clause::new(
                        ClauseKind::ForbidMultipleInstances(SolvableId::root(), other_candidate),
                        &self.learnt_clauses,
                        &self.pool,
                    ));
                }
            }
        }

        // Removals: every candidate matching the spec is forbidden.
        for spec in &jobs.remove {
            let spec_id = self
                .pool
                .intern_matchspec(&spec.to_string())
                .expect("a parsed spec re-parses");
            for excluded in self.candidates(&favored_map, spec_id).to_vec() {
                self.clauses.push(Clause::new(
                    ClauseKind::ForbidMultipleInstances(SolvableId::root(), excluded),
                    &self.learnt_clauses,
                    &self.pool,
                ));
            }
        }

        // Pins: candidates of the pinned name that do not match the pin are
        // forbidden, without requiring anything to be installed.
        for spec in &jobs.pin {
            let spec_id = self
                .pool
                .intern_matchspec(&spec.to_string())
                .expect("a parsed spec re-parses");
            let forbidden = Pool::get_forbidden(
                &self.pool.match_specs,
                &self.pool.names_to_ids,
                &self.pool.solvables,
                &self.pool.packages_by_name,
                &mut self.pool.match_spec_to_forbidden,
                spec_id,
            )
            .to_vec();
            for excluded in forbidden {
                self.clauses.push(Clause::new(
                    ClauseKind::ForbidMultipleInstances(SolvableId::root(), excluded),
                    &self.learnt_clauses,
                    &self.pool,
                ));
            }
        }

        // Without allow-downgrade, candidates older than the installed
        // (favored) version of their name are off limits.
        if !jobs.flags.allow_downgrade {
            for (&name_id, &favored_id) in &favored_map {
                let favored_version = &self
                    .pool
                    .resolve_solvable(favored_id)
                    .record
                    .package_record
                    .version;
                for &candidate in &self.pool.packages_by_name[name_id.index()] {
                    if candidate == favored_id {
                        continue;
                    }
                    let candidate_version = &self
                        .pool
                        .resolve_solvable(candidate)
                        .record
                        .package_record
                        .version;
                    if candidate_version < favored_version {
                        self.clauses.push(Clause::new(
                            ClauseKind::ForbidMultipleInstances(SolvableId::root(), candidate),
                            &self.learnt_clauses,
                            &self.pool,
                        ));
                    }
                }
            }
        }

        // Everything added from here on is learnt.
        self.learnt_clauses_start = ClauseId::new(self.clauses.len());

        self.make_watches();
        self.run_sat()?;

        Ok(self
            .decision_tracker
            .stack()
            .iter()
            .filter(|d| d.value && !d.solvable_id.is_root())
            .map(|d| d.solvable_id)
            .collect())
    }

    /// Computes (and caches) the candidates of a match spec.
    fn candidates(
        &mut self,
        favored_map: &AHashMap<NameId, SolvableId>,
        spec_id: MatchSpecId,
    ) -> &[SolvableId] {
        Pool::get_candidates(
            &self.pool.match_specs,
            &self.pool.names_to_ids,
            &self.pool.solvables,
            &self.pool.packages_by_name,
            &self.pool.repos,
            self.pool.strict_channel_priority,
            &mut self.pool.match_spec_to_candidates,
            favored_map,
            spec_id,
        )
    }

    /// Adds the requires/constrains clauses reachable from a root
    /// requirement, depth first.
    fn add_clauses_for_root_dep(
        &mut self,
        visited: &mut AHashSet<SolvableId>,
        favored_map: &AHashMap<NameId, SolvableId>,
        dep: MatchSpecId,
        no_deps: bool,
    ) {
        let mut candidate_stack = Vec::new();

        for &candidate in self.candidates(favored_map, dep) {
            if visited.insert(candidate) {
                candidate_stack.push(candidate);
            }
        }

        while let Some(candidate) = candidate_stack.pop() {
            if no_deps {
                // Only the job specs themselves are enforced; candidate
                // dependencies stay out of the picture.
                continue;
            }

            let (dependencies, constrains) = {
                let solvable = self.pool.resolve_solvable(candidate);
                (solvable.dependencies.clone(), solvable.constrains.clone())
            };

            for dep in dependencies {
                for &dep_candidate in self.candidates(favored_map, dep).to_vec().iter() {
                    if visited.insert(dep_candidate) {
                        candidate_stack.push(dep_candidate);
                    }
                }

                self.clauses.push(Clause::new(
                    ClauseKind::Requires(candidate, dep),
                    &self.learnt_clauses,
                    &self.pool,
                ));
            }

            for dep in constrains {
                let forbidden = Pool::get_forbidden(
                    &self.pool.match_specs,
                    &self.pool.names_to_ids,
                    &self.pool.solvables,
                    &self.pool.packages_by_name,
                    &mut self.pool.match_spec_to_forbidden,
                    dep,
                )
                .to_vec();
                for forbidden_candidate in forbidden {
                    self.clauses.push(Clause::new(
                        ClauseKind::Constrains(candidate, forbidden_candidate),
                        &self.learnt_clauses,
                        &self.pool,
                    ));
                }
            }
        }

        // And finally: the root requires the dependency.
        self.clauses.push(Clause::new(
            ClauseKind::Requires(SolvableId::root(), dep),
            &self.learnt_clauses,
            &self.pool,
        ));
    }

    fn run_sat(&mut self) -> Result<(), Problem> {
        let level = self.install_root_solvable();

        self.decide_requires_without_candidates(level)
            .map_err(|cause| self.analyze_unsolvable(cause))?;

        self.propagate(level)
            .map_err(|(_, _, cause)| self.analyze_unsolvable(cause))?;

        self.resolve_dependencies(level)?;

        Ok(())
    }

    fn install_root_solvable(&mut self) -> u32 {
        assert!(self.decision_tracker.is_empty());
        self.decision_tracker
            .try_add_decision(
                Decision::new(SolvableId::root(), true, ClauseId::install_root()),
                1,
            )
            .expect("the root solvable is the first decision");

        // The root is installed at level 1.
        1
    }

    /// A requires clause without watches has no candidates: assert that the
    /// requiring solvable cannot be installed.
    fn decide_requires_without_candidates(&mut self, level: u32) -> Result<(), ClauseId> {
        tracing::trace!("deciding assertions for requirements without candidates");
        for (i, clause) in self.clauses.iter().enumerate() {
            if let ClauseKind::Requires(solvable_id, _) = clause.kind {
                if !clause.has_watches() {
                    let clause_id = ClauseId::new(i);
                    let decided = self
                        .decision_tracker
                        .try_add_decision(Decision::new(solvable_id, false, clause_id), level)
                        .map_err(|()| clause_id)?;

                    if decided {
                        tracing::trace!(
                            "assertion: {} = false",
                            self.pool.resolve_solvable_inner(solvable_id).display()
                        );
                    }
                }
            }
        }
        Ok(())
    }

    /// Drives the solve forward: repeatedly pick the best undecided candidate
    /// of a requirement whose owner is installed, install it, and propagate.
    fn resolve_dependencies(&mut self, mut level: u32) -> Result<u32, Problem> {
        let mut i = 0;
        loop {
            if i >= self.clauses.len() {
                break;
            }

            let (required_by, candidate) = {
                let clause = &self.clauses[i];
                i += 1;

                let ClauseKind::Requires(solvable_id, deps) = clause.kind else {
                    continue;
                };

                // Only consider requirements of solvables we have decided to
                // install.
                if self.decision_tracker.assigned_value(solvable_id) != Some(true) {
                    continue;
                }

                // Skip requirements that are already satisfied.
                let candidates = self.pool.match_spec_to_candidates[deps.index()]
                    .as_deref()
                    .expect("candidates are computed when the clause is added");
                if candidates
                    .iter()
                    .any(|&c| self.decision_tracker.assigned_value(c) == Some(true))
                {
                    continue;
                }

                // Take the first undecided candidate. Candidates are sorted
                // most preferred first, so this is the best choice.
                let Some(candidate) = candidates
                    .iter()
                    .copied()
                    .find(|&c| self.decision_tracker.assigned_value(c).is_none())
                else {
                    continue;
                };

                (solvable_id, candidate)
            };

            level = self.set_propagate_learn(level, candidate, required_by, ClauseId::new(i - 1))?;

            // Decisions were made; reconsider all clauses.
            i = 0;
        }

        Ok(level)
    }

    fn set_propagate_learn(
        &mut self,
        mut level: u32,
        solvable: SolvableId,
        required_by: SolvableId,
        clause_id: ClauseId,
    ) -> Result<u32, Problem> {
        level += 1;

        tracing::trace!(
            "installing {} at level {level} (required by {})",
            self.pool.resolve_solvable_inner(solvable).display(),
            self.pool.resolve_solvable_inner(required_by).display(),
        );

        self.decision_tracker
            .try_add_decision(Decision::new(solvable, true, clause_id), level)
            .expect("the candidate was undecided");

        loop {
            let Err((conflicting_solvable, attempted_value, conflicting_clause)) =
                self.propagate(level)
            else {
                // Propagation completed without conflicts.
                break;
            };

            tracing::trace!(
                "propagation conflict: could not set {} to {attempted_value}",
                self.pool
                    .resolve_solvable_inner(conflicting_solvable)
                    .display()
            );

            if level == 1 {
                return Err(self.analyze_unsolvable(conflicting_clause));
            }

            let (new_level, learned_clause_id, literal) =
                self.analyze(level, conflicting_solvable, conflicting_clause);
            level = new_level;

            tracing::trace!("backtracked to level {level}");

            // The learnt clause is a unit clause at this point; propagate it
            // immediately.
            let decision = literal.satisfying_value();
            self.decision_tracker
                .try_add_decision(
                    Decision::new(literal.solvable_id, decision, learned_clause_id),
                    level,
                )
                .expect("the learnt literal was undecided after backjumping");
        }

        Ok(level)
    }

    fn propagate(&mut self, level: u32) -> Result<(), (SolvableId, bool, ClauseId)> {
        // Learnt assertions (unit clauses) first.
        let learnt_clauses_start = self.learnt_clauses_start.index();
        for (i, clause) in self.clauses[learnt_clauses_start..].iter().enumerate() {
            let ClauseKind::Learnt(learnt_index) = clause.kind else {
                unreachable!("all clauses after the marker are learnt");
            };

            let literals = &self.learnt_clauses[learnt_index];
            if literals.len() > 1 {
                continue;
            }

            debug_assert!(!literals.is_empty());

            let literal = literals[0];
            let decision = literal.satisfying_value();
            let clause_id = ClauseId::new(learnt_clauses_start + i);

            self.decision_tracker
                .try_add_decision(Decision::new(literal.solvable_id, decision, clause_id), level)
                .map_err(|()| (literal.solvable_id, decision, clause_id))?;
        }

        // Watched literals.
        while let Some(decision) = self.decision_tracker.next_unpropagated() {
            let pkg = decision.solvable_id;

            // Walk the linked list of clauses watching this solvable.
            let mut old_predecessor_clause_id: Option<ClauseId>;
            let mut predecessor_clause_id: Option<ClauseId> = None;
            let mut clause_id = self.watches.first_clause_watching_solvable(pkg);
            while !clause_id.is_null() {
                debug_assert!(
                    predecessor_clause_id != Some(clause_id),
                    "the watch chain is circular"
                );

                // Get mutable access to the current clause and its
                // predecessor in the chain at the same time.
                let (predecessor_clause, clause) =
                    if let Some(prev_clause_id) = predecessor_clause_id {
                        if prev_clause_id < clause_id {
                            let (prev, current) = self.clauses.split_at_mut(clause_id.index());
                            (Some(&mut prev[prev_clause_id.index()]), &mut current[0])
                        } else {
                            let (current, prev) =
                                self.clauses.split_at_mut(prev_clause_id.index());
                            (Some(&mut prev[0]), &mut current[clause_id.index()])
                        }
                    } else {
                        (None, &mut self.clauses[clause_id.index()])
                    };

                old_predecessor_clause_id = predecessor_clause_id;
                predecessor_clause_id = Some(clause_id);

                let this_clause_id = clause_id;
                clause_id = clause.next_watched_clause(pkg);

                if let Some((watched_literals, watch_index)) = clause.watch_turned_false(
                    pkg,
                    self.decision_tracker.map(),
                    &self.learnt_clauses,
                ) {
                    // One of the watched literals is now false.
                    if let Some(variable) = clause.next_unwatched_variable(
                        &self.pool,
                        &self.learnt_clauses,
                        self.decision_tracker.map(),
                    ) {
                        debug_assert!(!clause.watched_literals.contains(&variable));

                        self.watches.update_watched(
                            predecessor_clause,
                            clause,
                            this_clause_id,
                            watch_index,
                            pkg,
                            variable,
                        );

                        // The current clause left the chain; its predecessor
                        // stays the predecessor of the next clause.
                        predecessor_clause_id = old_predecessor_clause_id;
                    } else {
                        // There is no other literal to watch: the remaining
                        // watched literal must be made true.
                        let remaining_watch_index = match watch_index {
                            0 => 1,
                            1 => 0,
                            _ => unreachable!("clauses have exactly two watches"),
                        };

                        let remaining_watch = watched_literals[remaining_watch_index];
                        let decided = self
                            .decision_tracker
                            .try_add_decision(
                                Decision::new(
                                    remaining_watch.solvable_id,
                                    remaining_watch.satisfying_value(),
                                    this_clause_id,
                                ),
                                level,
                            )
                            .map_err(|()| {
                                (remaining_watch.solvable_id, true, this_clause_id)
                            })?;

                        if decided && !matches!(clause.kind, ClauseKind::ForbidMultipleInstances(..))
                        {
                            tracing::trace!(
                                "propagate {} = {}",
                                self.pool
                                    .resolve_solvable_inner(remaining_watch.solvable_id)
                                    .display(),
                                remaining_watch.satisfying_value(),
                            );
                        }
                    }
                }
            }
        }

        Ok(())
    }

    /// Collects the non-learnt clauses that participated in making the
    /// problem unsolvable.
    fn analyze_unsolvable_clause(
        clauses: &[Clause],
        learnt_why: &[Vec<ClauseId>],
        learnt_clauses_start: ClauseId,
        clause_id: ClauseId,
        problem: &mut Problem,
        seen: &mut AHashSet<ClauseId>,
    ) {
        let clause = &clauses[clause_id.index()];
        match clause.kind {
            ClauseKind::Learnt(..) => {
                if !seen.insert(clause_id) {
                    return;
                }
                for &cause in &learnt_why[clause_id.index() - learnt_clauses_start.index()] {
                    Self::analyze_unsolvable_clause(
                        clauses,
                        learnt_why,
                        learnt_clauses_start,
                        cause,
                        problem,
                        seen,
                    );
                }
            }
            _ => problem.add_clause(clause_id),
        }
    }

    fn analyze_unsolvable(&mut self, clause_id: ClauseId) -> Problem {
        let mut problem = Problem::default();
        tracing::debug!("analyzing unsolvable problem");

        let mut involved: AHashSet<SolvableId> = self.clauses[clause_id.index()]
            .literals(&self.learnt_clauses, &self.pool)
            .iter()
            .map(|l| l.solvable_id)
            .collect();

        let mut seen = AHashSet::new();
        Self::analyze_unsolvable_clause(
            &self.clauses,
            &self.learnt_why,
            self.learnt_clauses_start,
            clause_id,
            &mut problem,
            &mut seen,
        );

        for decision in self.decision_tracker.stack()[1..].iter().rev() {
            if decision.solvable_id.is_root() {
                continue;
            }

            if !involved.contains(&decision.solvable_id) {
                continue;
            }

            let why = decision.derived_from;
            debug_assert_ne!(why, ClauseId::install_root());

            Self::analyze_unsolvable_clause(
                &self.clauses,
                &self.learnt_why,
                self.learnt_clauses_start,
                why,
                &mut problem,
                &mut seen,
            );

            for literal in self.clauses[why.index()].literals(&self.learnt_clauses, &self.pool) {
                if literal.eval(self.decision_tracker.map()) == Some(true) {
                    debug_assert_eq!(literal.solvable_id, decision.solvable_id);
                    continue;
                }
                involved.insert(literal.solvable_id);
            }
        }

        problem
    }

    /// First-unique-implication-point conflict analysis: learns a clause and
    /// returns the level to backjump to plus the literal to assert.
    fn analyze(
        &mut self,
        mut current_level: u32,
        mut conflicting_solvable: SolvableId,
        mut clause_id: ClauseId,
    ) -> (u32, ClauseId, Literal) {
        let mut seen = AHashSet::new();
        let mut causes_at_current_level = 0u32;
        let mut learnt = Vec::new();
        let mut back_track_to = 0;

        let mut s_value;
        let mut learnt_why = Vec::new();
        let mut first_iteration = true;
        loop {
            learnt_why.push(clause_id);

            let causes = if first_iteration {
                first_iteration = false;
                self.clauses[clause_id.index()].literals(&self.learnt_clauses, &self.pool)
            } else {
                self.clauses[clause_id.index()].conflict_causes(
                    conflicting_solvable,
                    &self.learnt_clauses,
                    &self.pool,
                )
            };

            debug_assert!(!causes.is_empty());

            // Collect the literals that imply the conflicting assignment.
            for cause in causes {
                if seen.insert(cause.solvable_id) {
                    let decision_level = self.decision_tracker.level(cause.solvable_id);
                    if decision_level == current_level {
                        causes_at_current_level += 1;
                    } else if current_level > 1 {
                        let learnt_literal = Literal {
                            solvable_id: cause.solvable_id,
                            negate: self
                                .decision_tracker
                                .assigned_value(cause.solvable_id)
                                .expect("cause literals are decided"),
                        };
                        learnt.push(learnt_literal);
                        back_track_to = back_track_to.max(decision_level);
                    } else {
                        // A conflict with a level 1 decision means the user
                        // input itself is inconsistent; that case is caught
                        // before analyze is called.
                        unreachable!("conflict at level 1 must go through analyze_unsolvable");
                    }
                }
            }

            // Walk back along the decision stack to the next involved
            // assignment.
            loop {
                let (last_decision, last_decision_level) = self.decision_tracker.undo_last();

                conflicting_solvable = last_decision.solvable_id;
                s_value = last_decision.value;
                clause_id = last_decision.derived_from;

                current_level = last_decision_level;

                if seen.contains(&last_decision.solvable_id) {
                    break;
                }
            }

            causes_at_current_level = causes_at_current_level.saturating_sub(1);
            if causes_at_current_level == 0 {
                break;
            }
        }

        let last_literal = Literal {
            solvable_id: conflicting_solvable,
            negate: s_value,
        };
        learnt.push(last_literal);

        // Store the learnt clause.
        let clause_id = ClauseId::new(self.clauses.len());
        let learnt_index = self.learnt_clauses.len();
        self.learnt_clauses.push(learnt.clone());
        self.learnt_why.push(learnt_why);

        let mut clause = Clause::new(
            ClauseKind::Learnt(learnt_index),
            &self.learnt_clauses,
            &self.pool,
        );
        if clause.has_watches() {
            self.watches.start_watching(&mut clause, clause_id);
        }
        self.clauses.push(clause);

        tracing::trace!("learnt clause with {} literals", learnt.len());

        // Backjump, but never past the root level.
        let target_level = back_track_to.max(1);
        self.decision_tracker.undo_until(target_level);

        (target_level, clause_id, last_literal)
    }

    fn make_watches(&mut self) {
        self.watches.initialize(self.pool.solvables.len());

        // Watches are initialized in the clauses themselves; here the linked
        // lists are built by chaining clauses watching the same solvable.
        for (i, clause) in self.clauses.iter_mut().enumerate() {
            if !clause.has_watches() {
                continue;
            }
            self.watches.start_watching(clause, ClauseId::new(i));
        }
    }
}
