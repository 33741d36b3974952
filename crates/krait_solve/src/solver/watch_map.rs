use crate::id::{ClauseId, SolvableId};
use crate::solver::clause::Clause;

/// A map from solvables to the first clause watching them. Clauses form
/// intrusive linked lists through their `next_watches` fields, so the map
/// entry is the head of a chain.
pub(crate) struct WatchMap {
    map: Vec<ClauseId>,
}

impl WatchMap {
    pub(crate) fn new() -> Self {
        Self { map: Vec::new() }
    }

    pub(crate) fn initialize(&mut self, nsolvables: usize) {
        self.map = vec![ClauseId::null(); nsolvables];
    }

    /// Inserts the clause at the head of the chains of both its watched
    /// solvables.
    pub(crate) fn start_watching(&mut self, clause: &mut Clause, clause_id: ClauseId) {
        for (watch_index, watched_solvable) in clause.watched_literals.into_iter().enumerate() {
            let already_watching = self.first_clause_watching_solvable(watched_solvable);
            clause.link_to_clause(watch_index, already_watching);
            self.watch_solvable(watched_solvable, clause_id);
        }
    }

    /// Replaces one watched solvable of a clause with another, fixing up the
    /// affected linked lists.
    pub(crate) fn update_watched(
        &mut self,
        predecessor_clause: Option<&mut Clause>,
        clause: &mut Clause,
        clause_id: ClauseId,
        watch_index: usize,
        previous_watch: SolvableId,
        new_watch: SolvableId,
    ) {
        // Unlink the clause from the chain of the solvable it no longer
        // watches.
        if let Some(predecessor_clause) = predecessor_clause {
            predecessor_clause.unlink_clause(clause, previous_watch, watch_index);
        } else {
            // This was the first clause in the chain.
            self.map[previous_watch.index()] = clause.next_watched_clause(previous_watch);
        }

        // Link it into the chain of the newly watched solvable.
        clause.watched_literals[watch_index] = new_watch;
        clause.link_to_clause(watch_index, self.map[new_watch.index()]);
        self.map[new_watch.index()] = clause_id;
    }

    pub(crate) fn first_clause_watching_solvable(
        &mut self,
        watched_solvable: SolvableId,
    ) -> ClauseId {
        self.map[watched_solvable.index()]
    }

    pub(crate) fn watch_solvable(&mut self, watched_solvable: SolvableId, id: ClauseId) {
        self.map[watched_solvable.index()] = id;
    }
}
