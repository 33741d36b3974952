use crate::id::{ClauseId, SolvableId};

/// An assignment of a truth value to a solvable, remembering which clause
/// caused it.
#[derive(Copy, Clone, Eq, PartialEq)]
pub(crate) struct Decision {
    pub(crate) solvable_id: SolvableId,
    pub(crate) value: bool,
    pub(crate) derived_from: ClauseId,
}

impl Decision {
    pub(crate) fn new(solvable_id: SolvableId, value: bool, derived_from: ClauseId) -> Self {
        Self {
            solvable_id,
            value,
            derived_from,
        }
    }
}
