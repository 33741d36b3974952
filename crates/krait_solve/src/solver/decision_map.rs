use std::cmp::Ordering;

use crate::id::SolvableId;

/// The current assignment of every solvable, packed into a single signed
/// integer per solvable:
///
/// * `0`: undecided
/// * `> 0`: decided true at that level
/// * `< 0`: decided false at that level
pub(crate) struct DecisionMap {
    map: Vec<i64>,
}

impl DecisionMap {
    pub(crate) fn new(nsolvables: u32) -> Self {
        Self {
            map: vec![0; nsolvables as usize],
        }
    }

    pub(crate) fn nsolvables(&self) -> u32 {
        self.map.len() as u32
    }

    pub(crate) fn reset(&mut self, solvable_id: SolvableId) {
        self.map[solvable_id.index()] = 0;
    }

    pub(crate) fn set(&mut self, solvable_id: SolvableId, value: bool, level: u32) {
        self.map[solvable_id.index()] = if value {
            i64::from(level)
        } else {
            -i64::from(level)
        };
    }

    pub(crate) fn level(&self, solvable_id: SolvableId) -> u32 {
        self.map[solvable_id.index()].unsigned_abs() as u32
    }

    pub(crate) fn value(&self, solvable_id: SolvableId) -> Option<bool> {
        match self.map[solvable_id.index()].cmp(&0) {
            Ordering::Less => Some(false),
            Ordering::Equal => None,
            Ordering::Greater => Some(true),
        }
    }
}
