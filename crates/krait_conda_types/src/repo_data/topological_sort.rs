//! Topological sorting of package records so that a package always comes
//! after its dependencies. Used to order the link steps of a transaction.

use std::collections::{HashMap, VecDeque};

use crate::PackageRecord;

/// Sorts the records so that every record appears after all of its
/// dependencies that are part of the input. Cycles (python/pip being the
/// classic one) are broken by emitting the remaining members of the cycle in
/// their input order; virtual or otherwise absent dependencies are ignored.
pub fn sort_topologically<T: AsRef<PackageRecord>>(records: Vec<T>) -> Vec<T> {
    let name_to_index: HashMap<&str, usize> = records
        .iter()
        .enumerate()
        .map(|(index, record)| (record.as_ref().name.as_normalized(), index))
        .collect();

    // For each record the indices of the records that depend on it, plus the
    // number of in-set dependencies it still waits for.
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); records.len()];
    let mut pending_dependencies = vec![0usize; records.len()];
    for (index, record) in records.iter().enumerate() {
        for spec in &record.as_ref().depends {
            let Some(&dependency_index) = name_to_index.get(dependency_name(spec)) else {
                continue;
            };
            if dependency_index == index {
                continue;
            }
            dependents[dependency_index].push(index);
            pending_dependencies[index] += 1;
        }
    }

    let mut queue: VecDeque<usize> = pending_dependencies
        .iter()
        .enumerate()
        .filter(|(_, &pending)| pending == 0)
        .map(|(index, _)| index)
        .collect();

    let mut order = Vec::with_capacity(records.len());
    let mut emitted = vec![false; records.len()];
    while let Some(index) = queue.pop_front() {
        if emitted[index] {
            continue;
        }
        emitted[index] = true;
        order.push(index);
        for &dependent in &dependents[index] {
            pending_dependencies[dependent] =
                pending_dependencies[dependent].saturating_sub(1);
            if pending_dependencies[dependent] == 0 {
                queue.push_back(dependent);
            }
        }
    }

    // Anything left is part of a dependency cycle.
    for index in 0..records.len() {
        if !emitted[index] {
            order.push(index);
        }
    }

    // Reorder the owned records according to the computed order.
    let mut slots: Vec<Option<T>> = records.into_iter().map(Some).collect();
    order
        .into_iter()
        .map(|index| slots[index].take().expect("every index is emitted once"))
        .collect()
}

/// Extracts the package name from a match spec string: everything up to the
/// first whitespace or version operator.
pub(crate) fn dependency_name(spec: &str) -> &str {
    spec.trim()
        .split(|c: char| c.is_whitespace() || matches!(c, '=' | '<' | '>' | '!' | '~' | '['))
        .next()
        .unwrap_or("")
}
