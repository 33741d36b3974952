//! The clause types the solver propagates over.

use crate::id::{ClauseId, MatchSpecId, SolvableId};
use crate::pool::Pool;
use crate::solver::decision_map::DecisionMap;

/// A clause with up to two watched literals, linked into the watch chains of
/// the solvables it watches.
#[derive(Clone)]
pub(crate) struct Clause {
    /// The two solvables whose assignments this clause is watching. Both are
    /// null for assertions.
    pub(crate) watched_literals: [SolvableId; 2],

    /// The next clause in the watch chain of each watched solvable.
    next_watches: [ClauseId; 2],

    pub(crate) kind: ClauseKind,
}

/// What a clause encodes. The SAT shape of each kind is given in the variant
/// documentation, with `¬A` meaning "A is not installed".
#[derive(Copy, Clone, Debug)]
pub(crate) enum ClauseKind {
    /// The root solvable is installed: `(root)`.
    InstallRoot,

    /// A solvable requires at least one candidate of a match spec:
    /// `(¬A ∨ C1 ∨ C2 ∨ …)`.
    Requires(SolvableId, MatchSpecId),

    /// Two solvables with the same name cannot both be installed:
    /// `(¬A ∨ ¬B)`. Also encodes locks and removals, with the root solvable
    /// standing in as the always-true side.
    ForbidMultipleInstances(SolvableId, SolvableId),

    /// A solvable restricts another through a `constrains` entry that the
    /// other does not satisfy: `(¬A ∨ ¬B)`.
    Constrains(SolvableId, SolvableId),

    /// A clause learned during conflict analysis; the literals live in the
    /// solver's learnt clause store at the given index.
    Learnt(usize),
}

impl Clause {
    pub(crate) fn new(kind: ClauseKind, learnt_clauses: &[Vec<Literal>], pool: &Pool<'_>) -> Self {
        let watched_literals = kind
            .initial_watches(learnt_clauses, pool)
            .unwrap_or([SolvableId::null(), SolvableId::null()]);

        let clause = Self {
            watched_literals,
            next_watches: [ClauseId::null(), ClauseId::null()],
            kind,
        };

        debug_assert!(!clause.has_watches() || watched_literals[0] != watched_literals[1]);
        clause
    }

    pub(crate) fn link_to_clause(&mut self, watch_index: usize, linked_clause: ClauseId) {
        self.next_watches[watch_index] = linked_clause;
    }

    pub(crate) fn get_linked_clause(&self, watch_index: usize) -> ClauseId {
        self.next_watches[watch_index]
    }

    pub(crate) fn unlink_clause(
        &mut self,
        linked_clause: &Clause,
        watched_solvable: SolvableId,
        linked_clause_watch_index: usize,
    ) {
        if self.watched_literals[0] == watched_solvable {
            self.next_watches[0] = linked_clause.next_watches[linked_clause_watch_index];
        } else {
            debug_assert_eq!(self.watched_literals[1], watched_solvable);
            self.next_watches[1] = linked_clause.next_watches[linked_clause_watch_index];
        }
    }

    pub(crate) fn next_watched_clause(&self, solvable_id: SolvableId) -> ClauseId {
        if solvable_id == self.watched_literals[0] {
            self.next_watches[0]
        } else {
            debug_assert_eq!(self.watched_literals[1], solvable_id);
            self.next_watches[1]
        }
    }

    /// Returns the watched literals and the index of the watch that became
    /// false under the current assignment, if any.
    pub(crate) fn watch_turned_false(
        &self,
        solvable_id: SolvableId,
        decision_map: &DecisionMap,
        learnt_clauses: &[Vec<Literal>],
    ) -> Option<([Literal; 2], usize)> {
        debug_assert!(self.watched_literals.contains(&solvable_id));

        let literals @ [w1, w2] = self.watched_literals(learnt_clauses);

        if solvable_id == w1.solvable_id && w1.eval(decision_map) == Some(false) {
            Some((literals, 0))
        } else if solvable_id == w2.solvable_id && w2.eval(decision_map) == Some(false) {
            Some((literals, 1))
        } else {
            None
        }
    }

    pub(crate) fn has_watches(&self) -> bool {
        // The second watch cannot be set without the first.
        !self.watched_literals[0].is_null()
    }

    /// Returns the two watched literals with the polarity they have in this
    /// clause.
    pub(crate) fn watched_literals(&self, learnt_clauses: &[Vec<Literal>]) -> [Literal; 2] {
        let literals = |positive1: bool, positive2: bool| {
            [
                Literal {
                    solvable_id: self.watched_literals[0],
                    negate: !positive1,
                },
                Literal {
                    solvable_id: self.watched_literals[1],
                    negate: !positive2,
                },
            ]
        };

        match self.kind {
            ClauseKind::InstallRoot => unreachable!("the root clause has no watches"),
            ClauseKind::Learnt(index) => {
                let &w1 = learnt_clauses[index]
                    .iter()
                    .find(|l| l.solvable_id == self.watched_literals[0])
                    .expect("watches of a learnt clause are literals of the clause");
                let &w2 = learnt_clauses[index]
                    .iter()
                    .find(|l| l.solvable_id == self.watched_literals[1])
                    .expect("watches of a learnt clause are literals of the clause");
                [w1, w2]
            }
            ClauseKind::ForbidMultipleInstances(..) | ClauseKind::Constrains(..) => {
                literals(false, false)
            }
            ClauseKind::Requires(solvable_id, _) => {
                if self.watched_literals[0] == solvable_id {
                    literals(false, true)
                } else if self.watched_literals[1] == solvable_id {
                    literals(true, false)
                } else {
                    literals(true, true)
                }
            }
        }
    }

    /// Finds a new solvable this clause could watch instead of one that just
    /// became false: any literal that is not already watched and is not
    /// currently false.
    pub(crate) fn next_unwatched_variable(
        &self,
        pool: &Pool<'_>,
        learnt_clauses: &[Vec<Literal>],
        decision_map: &DecisionMap,
    ) -> Option<SolvableId> {
        let can_watch = |solvable_lit: Literal| {
            !self.watched_literals.contains(&solvable_lit.solvable_id)
                && solvable_lit.eval(decision_map).unwrap_or(true)
        };

        match self.kind {
            ClauseKind::InstallRoot => unreachable!("the root clause has no watches"),
            ClauseKind::Learnt(index) => learnt_clauses[index]
                .iter()
                .copied()
                .find(|&l| can_watch(l))
                .map(|l| l.solvable_id),
            ClauseKind::ForbidMultipleInstances(..) | ClauseKind::Constrains(..) => None,
            ClauseKind::Requires(solvable_id, match_spec_id) => {
                // The solvable that owns the requirement…
                let own_literal = Literal {
                    solvable_id,
                    negate: true,
                };
                if can_watch(own_literal) {
                    return Some(solvable_id);
                }

                // …or any of the candidates.
                for &candidate in pool.match_spec_to_candidates[match_spec_id.index()]
                    .as_deref()
                    .expect("candidates are computed when the clause is added")
                {
                    let literal = Literal {
                        solvable_id: candidate,
                        negate: false,
                    };
                    if can_watch(literal) {
                        return Some(candidate);
                    }
                }

                None
            }
        }
    }

    /// Returns every literal of the clause.
    pub(crate) fn literals(
        &self,
        learnt_clauses: &[Vec<Literal>],
        pool: &Pool<'_>,
    ) -> Vec<Literal> {
        match self.kind {
            ClauseKind::InstallRoot => unreachable!("the root clause has no literals"),
            ClauseKind::Learnt(index) => learnt_clauses[index].clone(),
            ClauseKind::Requires(solvable_id, match_spec_id) => std::iter::once(Literal {
                solvable_id,
                negate: true,
            })
            .chain(
                pool.match_spec_to_candidates[match_spec_id.index()]
                    .as_deref()
                    .expect("candidates are computed when the clause is added")
                    .iter()
                    .map(|&candidate| Literal {
                        solvable_id: candidate,
                        negate: false,
                    }),
            )
            .collect(),
            ClauseKind::ForbidMultipleInstances(s1, s2)
            | ClauseKind::Constrains(s1, s2) => {
                vec![
                    Literal {
                        solvable_id: s1,
                        negate: true,
                    },
                    Literal {
                        solvable_id: s2,
                        negate: true,
                    },
                ]
            }
        }
    }

    /// Returns the literals that imply the given conflicting solvable's
    /// assignment.
    pub(crate) fn conflict_causes(
        &self,
        variable: SolvableId,
        learnt_clauses: &[Vec<Literal>],
        pool: &Pool<'_>,
    ) -> Vec<Literal> {
        match self.kind {
            ClauseKind::InstallRoot => unreachable!("the root clause cannot conflict"),
            ClauseKind::Learnt(index) => learnt_clauses[index]
                .iter()
                .copied()
                .filter(|lit| lit.solvable_id != variable)
                .collect(),
            ClauseKind::Requires(solvable_id, match_spec_id) => std::iter::once(Literal {
                solvable_id,
                negate: true,
            })
            .chain(
                pool.match_spec_to_candidates[match_spec_id.index()]
                    .as_deref()
                    .expect("candidates are computed when the clause is added")
                    .iter()
                    .map(|&candidate| Literal {
                        solvable_id: candidate,
                        negate: false,
                    }),
            )
            .filter(|&l| variable != l.solvable_id)
            .collect(),
            ClauseKind::ForbidMultipleInstances(s1, s2)
            | ClauseKind::Constrains(s1, s2) => {
                let cause = if variable == s1 { s2 } else { s1 };
                vec![Literal {
                    solvable_id: cause,
                    negate: true,
                }]
            }
        }
    }
}

/// A literal: a solvable with a polarity.
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
pub(crate) struct Literal {
    pub(crate) solvable_id: SolvableId,
    pub(crate) negate: bool,
}

impl Literal {
    /// The value the solvable must take for this literal to be true.
    pub(crate) fn satisfying_value(self) -> bool {
        !self.negate
    }

    /// Evaluates the literal under the given assignment.
    pub(crate) fn eval(self, decision_map: &DecisionMap) -> Option<bool> {
        decision_map
            .value(self.solvable_id)
            .map(|value| if self.negate { !value } else { value })
    }
}

impl ClauseKind {
    fn initial_watches(
        &self,
        learnt_clauses: &[Vec<Literal>],
        pool: &Pool<'_>,
    ) -> Option<[SolvableId; 2]> {
        match self {
            ClauseKind::InstallRoot => None,
            ClauseKind::Constrains(s1, s2) | ClauseKind::ForbidMultipleInstances(s1, s2) => {
                Some([*s1, *s2])
            }
            ClauseKind::Learnt(index) => {
                let literals = &learnt_clauses[*index];
                debug_assert!(!literals.is_empty());
                if literals.len() == 1 {
                    // Assertions do not need watches.
                    None
                } else {
                    Some([
                        literals.first().unwrap().solvable_id,
                        literals.last().unwrap().solvable_id,
                    ])
                }
            }
            ClauseKind::Requires(id, match_spec) => {
                let candidates = pool.match_spec_to_candidates[match_spec.index()]
                    .as_ref()
                    .expect("candidates are computed when the clause is added");
                if candidates.is_empty() {
                    None
                } else {
                    Some([*id, candidates[0]])
                }
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::id::{ClauseId, SolvableId};

    fn clause(next_clauses: [ClauseId; 2], watched_solvables: [SolvableId; 2]) -> Clause {
        Clause {
            watched_literals: watched_solvables,
            next_watches: next_clauses,
            // The kind is irrelevant for watch management.
            kind: ClauseKind::InstallRoot,
        }
    }

    #[test]
    fn literal_satisfying_value() {
        let lit = Literal {
            solvable_id: SolvableId::root(),
            negate: true,
        };
        assert!(!lit.satisfying_value());

        let lit = Literal {
            solvable_id: SolvableId::root(),
            negate: false,
        };
        assert!(lit.satisfying_value());
    }

    #[test]
    fn literal_eval() {
        use crate::solver::decision_map::DecisionMap;

        let mut decision_map = DecisionMap::new(10);

        let literal = Literal {
            solvable_id: SolvableId::root(),
            negate: false,
        };
        let negated_literal = Literal {
            solvable_id: SolvableId::root(),
            negate: true,
        };

        assert_eq!(literal.eval(&decision_map), None);
        assert_eq!(negated_literal.eval(&decision_map), None);

        decision_map.set(SolvableId::root(), true, 1);
        assert_eq!(literal.eval(&decision_map), Some(true));
        assert_eq!(negated_literal.eval(&decision_map), Some(false));

        decision_map.set(SolvableId::root(), false, 1);
        assert_eq!(literal.eval(&decision_map), Some(false));
        assert_eq!(negated_literal.eval(&decision_map), Some(true));
    }

    #[test]
    fn unlinking_from_different_chains() {
        let clause1 = clause(
            [ClauseId::new(2), ClauseId::new(3)],
            [SolvableId::new(1596), SolvableId::new(1211)],
        );
        let clause2 = clause(
            [ClauseId::null(), ClauseId::new(3)],
            [SolvableId::new(1596), SolvableId::new(1208)],
        );
        let clause3 = clause(
            [ClauseId::null(), ClauseId::null()],
            [SolvableId::new(1211), SolvableId::new(42)],
        );

        // Unlink 0
        {
            let mut clause1 = clause1.clone();
            clause1.unlink_clause(&clause2, SolvableId::new(1596), 0);
            assert_eq!(
                clause1.watched_literals,
                [SolvableId::new(1596), SolvableId::new(1211)]
            );
            assert_eq!(clause1.next_watches, [ClauseId::null(), ClauseId::new(3)]);
        }

        // Unlink 1
        {
            let mut clause1 = clause1.clone();
            clause1.unlink_clause(&clause3, SolvableId::new(1211), 0);
            assert_eq!(
                clause1.watched_literals,
                [SolvableId::new(1596), SolvableId::new(1211)]
            );
            assert_eq!(clause1.next_watches, [ClauseId::new(2), ClauseId::null()]);
        }
    }
}
