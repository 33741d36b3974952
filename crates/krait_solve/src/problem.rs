//! Structured explanation of unsolvable jobs.
//!
//! A [`Problem`] is the minimal set of conflicting clauses the solver ended
//! up with. From it a [`ProblemGraph`] is built: a directed graph whose nodes
//! are the involved packages (plus dedicated nodes for unresolvable
//! dependencies and violated constraints) and whose edges carry the match
//! spec of the dependency; a separate symmetric conflict table records which
//! nodes cannot coexist. The graph can be compressed (merging equivalent
//! versions of the same package) and rendered as a tree.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fmt::Formatter;
use std::rc::Rc;

use itertools::Itertools;
use petgraph::graph::{DiGraph, EdgeIndex, NodeIndex};
use petgraph::visit::{Bfs, EdgeRef};
use petgraph::Direction;

use crate::id::{ClauseId, MatchSpecId, SolvableId};
use crate::pool::Pool;
use crate::solver::clause::ClauseKind;
use crate::solver::Solver;

/// A node of the problem graph.
#[derive(Copy, Clone, Eq, PartialEq)]
pub enum ProblemNode {
    /// The root: the user's jobs.
    Root,

    /// A candidate package that participates in the problem.
    Package(SolvableId),

    /// A dependency for which no candidate exists at all.
    UnresolvedDependency(MatchSpecId),

    /// A `constrains` spec that a package violates.
    Constraint(MatchSpecId),
}

impl ProblemNode {
    fn solvable_id(self) -> SolvableId {
        match self {
            ProblemNode::Package(solvable_id) => solvable_id,
            _ => panic!("expected a package node"),
        }
    }
}

/// An edge of the problem graph: the match spec through which the source
/// depends on (or constrains) the target.
#[derive(Copy, Clone, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub enum ProblemEdge {
    /// The source requires the target through the spec.
    Requires(MatchSpecId),

    /// The source declares the constraint the target node stands for.
    Constrains(MatchSpecId),
}

impl ProblemEdge {
    fn try_requires(self) -> Option<MatchSpecId> {
        match self {
            ProblemEdge::Requires(match_spec_id) => Some(match_spec_id),
            ProblemEdge::Constrains(_) => None,
        }
    }

    fn match_spec_id(self) -> MatchSpecId {
        match self {
            ProblemEdge::Requires(match_spec_id) | ProblemEdge::Constrains(match_spec_id) => {
                match_spec_id
            }
        }
    }
}

/// Packages that were merged into a single node during compression.
pub struct MergedProblemNode {
    /// The solvables that were merged, in display order.
    pub ids: Vec<SolvableId>,
}

/// The minimal conflicting clause set produced by the solver.
#[derive(Debug, Default)]
pub struct Problem {
    clauses: Vec<ClauseId>,
}

impl Problem {
    pub(crate) fn add_clause(&mut self, clause_id: ClauseId) {
        if !self.clauses.contains(&clause_id) {
            self.clauses.push(clause_id);
        }
    }

    /// Builds the problem graph from the conflicting clauses.
    pub fn graph(&self, solver: &Solver<'_>) -> ProblemGraph {
        let mut graph = DiGraph::<ProblemNode, ProblemEdge>::default();
        let mut package_nodes: HashMap<SolvableId, NodeIndex> = HashMap::default();
        let mut constraint_nodes: HashMap<MatchSpecId, NodeIndex> = HashMap::default();
        let mut conflicts: Vec<(NodeIndex, NodeIndex)> = Vec::new();

        let root_node = graph.add_node(ProblemNode::Root);
        let mut unresolved_node = None;

        let mut add_package_node =
            |graph: &mut DiGraph<ProblemNode, ProblemEdge>, solvable_id: SolvableId| {
                if solvable_id.is_root() {
                    root_node
                } else {
                    *package_nodes
                        .entry(solvable_id)
                        .or_insert_with(|| graph.add_node(ProblemNode::Package(solvable_id)))
                }
            };

        for clause_id in &self.clauses {
            let clause = &solver.clauses[clause_id.index()];
            match clause.kind {
                ClauseKind::InstallRoot | ClauseKind::Learnt(..) => {}
                ClauseKind::Requires(package_id, match_spec_id) => {
                    let package_node = add_package_node(&mut graph, package_id);

                    let candidates = solver.pool().match_spec_to_candidates
                        [match_spec_id.index()]
                    .as_deref()
                    .expect("candidates are computed when the clause is added");
                    if candidates.is_empty() {
                        let unresolved = *unresolved_node.get_or_insert_with(|| {
                            graph.add_node(ProblemNode::UnresolvedDependency(match_spec_id))
                        });
                        graph.add_edge(
                            package_node,
                            unresolved,
                            ProblemEdge::Requires(match_spec_id),
                        );
                    } else {
                        for &candidate_id in candidates {
                            let candidate_node = add_package_node(&mut graph, candidate_id);
                            graph.add_edge(
                                package_node,
                                candidate_node,
                                ProblemEdge::Requires(match_spec_id),
                            );
                        }
                    }
                }
                ClauseKind::ForbidMultipleInstances(instance1_id, instance2_id) => {
                    let node1 = add_package_node(&mut graph, instance1_id);
                    let node2 = add_package_node(&mut graph, instance2_id);
                    conflicts.push((node1, node2));
                }
                ClauseKind::Constrains(package_id, violator_id) => {
                    let package_node = add_package_node(&mut graph, package_id);
                    let violator_node = add_package_node(&mut graph, violator_id);

                    // Find the constrains spec connecting the two.
                    let package = solver.pool().resolve_solvable(package_id);
                    let violator = solver.pool().resolve_solvable(violator_id);
                    let ms_id = package
                        .constrains
                        .iter()
                        .copied()
                        .find(|&ms| {
                            solver
                                .pool()
                                .resolve_match_spec(ms)
                                .name
                                .as_ref()
                                .map(|name| name.as_normalized())
                                == Some(
                                    violator
                                        .record
                                        .package_record
                                        .name
                                        .as_normalized(),
                                )
                        })
                        .expect("a constrains clause implies a matching constrains spec");

                    let constraint_node = *constraint_nodes
                        .entry(ms_id)
                        .or_insert_with(|| graph.add_node(ProblemNode::Constraint(ms_id)));
                    graph.add_edge(
                        package_node,
                        constraint_node,
                        ProblemEdge::Constrains(ms_id),
                    );
                    conflicts.push((constraint_node, violator_node));
                }
            }
        }

        ProblemGraph {
            graph,
            root_node,
            unresolved_node,
            conflicts,
        }
    }

    /// Renders a human readable explanation of the problem.
    pub fn display_user_friendly<'a>(
        &self,
        solver: &'a Solver<'_>,
        glyphs: TreeGlyphs,
    ) -> DisplayUnsat<'a> {
        let graph = self.graph(solver);
        DisplayUnsat::new(graph, solver.pool(), glyphs)
    }
}

/// The graph form of a problem.
pub struct ProblemGraph {
    graph: DiGraph<ProblemNode, ProblemEdge>,
    root_node: NodeIndex,
    unresolved_node: Option<NodeIndex>,

    /// Symmetric relation between nodes that cannot coexist.
    conflicts: Vec<(NodeIndex, NodeIndex)>,
}

impl ProblemGraph {
    /// The number of nodes, including the root.
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Returns true if every node is reachable from the root.
    pub fn all_reachable_from_root(&self) -> bool {
        let mut bfs = Bfs::new(&self.graph, self.root_node);
        let mut visited = 0usize;
        while bfs.next(&self.graph).is_some() {
            visited += 1;
        }
        // Nodes that only appear as conflict endpoints (not via edges) are
        // not required to be reachable.
        let edge_connected: HashSet<NodeIndex> = self
            .graph
            .node_indices()
            .filter(|&nx| {
                nx == self.root_node
                    || self
                        .graph
                        .edges_directed(nx, Direction::Incoming)
                        .next()
                        .is_some()
            })
            .collect();
        visited >= edge_connected.len()
    }

    /// Merges nodes that represent the same package name, are not in
    /// conflict with each other, and have identical predecessors and
    /// successor leaf-sets. Returns the mapping from solvable to its merged
    /// group.
    fn simplify(&self, pool: &Pool<'_>) -> HashMap<SolvableId, Rc<MergedProblemNode>> {
        let graph = &self.graph;

        let mut maybe_merge: HashMap<_, Vec<(NodeIndex, SolvableId)>> = HashMap::new();
        for node_id in graph.node_indices() {
            let candidate = match graph[node_id] {
                ProblemNode::Package(solvable_id) => solvable_id,
                _ => continue,
            };

            // Nodes that participate in a conflict stand for themselves.
            if self
                .conflicts
                .iter()
                .any(|&(a, b)| a == node_id || b == node_id)
            {
                continue;
            }

            let predecessors: Vec<_> = graph
                .edges_directed(node_id, Direction::Incoming)
                .map(|e| e.source())
                .sorted_unstable()
                .collect();
            let successors: Vec<_> = graph
                .edges(node_id)
                .map(|e| (e.target(), *e.weight()))
                .sorted_unstable()
                .collect();

            let name = pool.resolve_solvable(candidate).name;
            maybe_merge
                .entry((name, predecessors, successors))
                .or_default()
                .push((node_id, candidate));
        }

        let mut merged_candidates = HashMap::default();
        for mut group in maybe_merge.into_values() {
            if group.len() > 1 {
                group.sort_unstable_by(|&(_, a), &(_, b)| {
                    pool.resolve_solvable(a)
                        .record
                        .package_record
                        .version
                        .cmp(&pool.resolve_solvable(b).record.package_record.version)
                });
                let merged = Rc::new(MergedProblemNode {
                    ids: group.into_iter().map(|(_, solvable)| solvable).collect(),
                });
                for &id in &merged.ids {
                    merged_candidates.insert(id, merged.clone());
                }
            }
        }
        merged_candidates
    }

    /// Marks each node with an installability bit, propagated bottom-up: a
    /// node is installable iff it is not involved in a conflict and each of
    /// its dependencies has at least one installable candidate.
    fn get_installable_set(&self) -> HashSet<NodeIndex> {
        // Seed with the directly bad nodes: targets of unresolvable
        // dependencies, constraint nodes, and conflict participants.
        let mut queue: Vec<NodeIndex> = Vec::new();
        if let Some(unresolved) = self.unresolved_node {
            queue.push(unresolved);
        }
        for node in self.graph.node_indices() {
            if matches!(self.graph[node], ProblemNode::Constraint(_)) {
                queue.push(node);
            }
        }
        for &(a, b) in &self.conflicts {
            if a != self.root_node {
                queue.push(a);
            }
            if b != self.root_node {
                queue.push(b);
            }
        }

        // A package with alternatives is only non-installable when *all*
        // candidates of one of its dependency groups are non-installable; an
        // over-approximation that treats any edge into a bad node as bad
        // would be wrong. Propagate per dependency group instead.
        let mut bad: HashSet<NodeIndex> = queue.iter().copied().collect();
        loop {
            let mut changed = false;
            for node in self.graph.node_indices() {
                if bad.contains(&node) {
                    continue;
                }
                // Group outgoing requires edges by spec; a node is bad when
                // some group has only bad targets, or when it points at a
                // constraint node.
                let mut groups: HashMap<MatchSpecId, (usize, usize)> = HashMap::new();
                let mut touches_constraint = false;
                for edge in self.graph.edges(node) {
                    match edge.weight() {
                        ProblemEdge::Requires(spec) => {
                            let entry = groups.entry(*spec).or_insert((0, 0));
                            entry.0 += 1;
                            if bad.contains(&edge.target()) {
                                entry.1 += 1;
                            }
                        }
                        ProblemEdge::Constrains(_) => {
                            if bad.contains(&edge.target()) {
                                touches_constraint = true;
                            }
                        }
                    }
                }
                let some_group_fully_bad =
                    groups.values().any(|&(total, bad_count)| total == bad_count && total > 0);
                if some_group_fully_bad || touches_constraint {
                    bad.insert(node);
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }

        self.graph
            .node_indices()
            .filter(|nx| !bad.contains(nx))
            .collect()
    }
}

/// The characters used to draw the explanation tree.
#[derive(Debug, Clone)]
pub struct TreeGlyphs {
    /// Drawn in front of an entry that has siblings below it.
    pub tee: &'static str,

    /// Drawn in front of the last entry of a group.
    pub elbow: &'static str,

    /// Whether to colorize installable (green) and non-installable (red)
    /// entries with ANSI escapes.
    pub color: bool,
}

impl Default for TreeGlyphs {
    fn default() -> Self {
        Self {
            tee: "├─",
            elbow: "└─",
            color: false,
        }
    }
}

impl TreeGlyphs {
    /// A pure-ascii glyph set.
    pub fn ascii() -> Self {
        Self {
            tee: "|--",
            elbow: "`--",
            color: false,
        }
    }
}

/// Renders a [`ProblemGraph`] as an explanation tree.
pub struct DisplayUnsat<'a> {
    graph: ProblemGraph,
    merged_candidates: HashMap<SolvableId, Rc<MergedProblemNode>>,
    installable_set: HashSet<NodeIndex>,
    pool: &'a Pool<'a>,
    glyphs: TreeGlyphs,
}

impl<'a> DisplayUnsat<'a> {
    /// Prepares the renderer: compresses the graph and computes the
    /// installability marking.
    pub fn new(graph: ProblemGraph, pool: &'a Pool<'a>, glyphs: TreeGlyphs) -> Self {
        let merged_candidates = graph.simplify(pool);
        let installable_set = graph.get_installable_set();
        Self {
            graph,
            merged_candidates,
            installable_set,
            pool,
            glyphs,
        }
    }

    fn paint(&self, text: String, installable: bool) -> String {
        if !self.glyphs.color {
            return text;
        }
        if installable {
            format!("\x1b[32m{text}\x1b[0m")
        } else {
            format!("\x1b[31m{text}\x1b[0m")
        }
    }
}

enum DisplayOp {
    Requirement(MatchSpecId, Vec<EdgeIndex>),
    Candidate(NodeIndex),
}

impl fmt::Display for DisplayUnsat<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let graph = &self.graph.graph;
        let installable_nodes = &self.installable_set;
        let mut reported: HashSet<SolvableId> = HashSet::new();

        writeln!(f, "The following packages are incompatible")?;

        // Walk depth first, grouping the successors of each node by the
        // dependency (match spec) they satisfy. Groups whose candidates are
        // partly installable are listed before fully broken ones.
        let mut stack = graph
            .edges(self.graph.root_node)
            .filter(|e| e.weight().try_requires().is_some())
            .group_by(|e| e.weight().match_spec_id())
            .into_iter()
            .map(|(match_spec_id, group)| {
                let edges: Vec<_> = group.map(|e| e.id()).collect();
                (match_spec_id, edges)
            })
            .sorted_by_key(|(_match_spec_id, edges)| {
                edges
                    .iter()
                    .any(|&edge| installable_nodes.contains(&graph.edge_endpoints(edge).unwrap().1))
            })
            .map(|(match_spec_id, edges)| (DisplayOp::Requirement(match_spec_id, edges), 0))
            .collect::<Vec<_>>();

        while let Some((node, depth)) = stack.pop() {
            let indent = "   ".repeat(depth);
            let glyph = self.glyphs.tee;

            match node {
                DisplayOp::Requirement(match_spec_id, edges) => {
                    debug_assert!(!edges.is_empty());

                    let installable = edges.iter().any(|&e| {
                        let (_, target) = graph.edge_endpoints(e).unwrap();
                        installable_nodes.contains(&target)
                    });

                    let req = self.pool.resolve_match_spec(match_spec_id).to_string();
                    let target_nx = graph.edge_endpoints(edges[0]).unwrap().1;
                    let missing = edges.len() == 1
                        && matches!(graph[target_nx], ProblemNode::UnresolvedDependency(_));
                    if missing {
                        // No candidates at all for this requirement.
                        let line = if depth == 0 {
                            format!("{glyph} no candidates were found for {req}.")
                        } else {
                            format!("{glyph} {req}, for which no candidates were found.")
                        };
                        writeln!(f, "{indent}{}", self.paint(line, false))?;
                    } else if installable {
                        // A split: the dependency resolves to several
                        // candidate groups, at least one of which works.
                        let line = if depth == 0 {
                            format!("{glyph} {req} can be installed with any of the following options:")
                        } else {
                            format!("{glyph} {req}, which can be installed with any of the following options:")
                        };
                        writeln!(f, "{indent}{}", self.paint(line, true))?;

                        stack.extend(
                            edges
                                .iter()
                                .filter(|&&e| {
                                    installable_nodes
                                        .contains(&graph.edge_endpoints(e).unwrap().1)
                                })
                                .map(|&e| {
                                    (
                                        DisplayOp::Candidate(graph.edge_endpoints(e).unwrap().1),
                                        depth + 1,
                                    )
                                }),
                        );
                    } else {
                        let line = if depth == 0 {
                            format!("{glyph} {req} cannot be installed because there are no viable options:")
                        } else {
                            format!("{glyph} {req}, which cannot be installed because there are no viable options:")
                        };
                        writeln!(f, "{indent}{}", self.paint(line, false))?;

                        stack.extend(edges.iter().map(|&e| {
                            (
                                DisplayOp::Candidate(graph.edge_endpoints(e).unwrap().1),
                                depth + 1,
                            )
                        }));
                    }
                }
                DisplayOp::Candidate(candidate) => {
                    if let ProblemNode::Constraint(ms_id) = graph[candidate] {
                        let spec = self.pool.resolve_match_spec(ms_id).to_string();
                        let line = format!(
                            "{glyph} the constraint {spec} cannot be satisfied, as reported above."
                        );
                        writeln!(f, "{indent}{}", self.paint(line, false))?;
                        continue;
                    }

                    let solvable_id = graph[candidate].solvable_id();
                    if reported.contains(&solvable_id) {
                        continue;
                    }

                    let solvable = self.pool.resolve_solvable(solvable_id);
                    let name = solvable.record.package_record.name.as_normalized();
                    let version = if let Some(merged) = self.merged_candidates.get(&solvable_id)
                    {
                        reported.extend(merged.ids.iter().copied());
                        merged
                            .ids
                            .iter()
                            .map(|&id| {
                                self.pool
                                    .resolve_solvable(id)
                                    .record
                                    .package_record
                                    .version
                                    .to_string()
                            })
                            .join(" | ")
                    } else {
                        solvable.record.package_record.version.to_string()
                    };

                    let is_conflict_source = self
                        .graph
                        .conflicts
                        .iter()
                        .any(|&(a, b)| a == candidate || b == candidate);
                    let constraint_edges: Vec<_> = graph
                        .edges(candidate)
                        .filter(|e| matches!(e.weight(), ProblemEdge::Constrains(_)))
                        .collect();
                    let is_leaf = graph.edges(candidate).next().is_none();

                    if is_conflict_source {
                        let line = format!(
                            "{glyph} {name} {version}, which conflicts with the versions reported above."
                        );
                        writeln!(f, "{indent}{}", self.paint(line, false))?;
                    } else if is_leaf {
                        let line = format!("{glyph} {name} {version}");
                        writeln!(
                            f,
                            "{indent}{}",
                            self.paint(line, installable_nodes.contains(&candidate))
                        )?;
                    } else {
                        let line = format!("{glyph} {name} {version} would require");
                        writeln!(
                            f,
                            "{indent}{}",
                            self.paint(line, installable_nodes.contains(&candidate))
                        )?;

                        let requirements = graph
                            .edges(candidate)
                            .filter(|e| matches!(e.weight(), ProblemEdge::Requires(_)))
                            .group_by(|e| e.weight().match_spec_id())
                            .into_iter()
                            .map(|(match_spec_id, group)| {
                                let edges: Vec<_> = group.map(|e| e.id()).collect();
                                (match_spec_id, edges)
                            })
                            .sorted_by_key(|(_match_spec_id, edges)| {
                                edges.iter().any(|&edge| {
                                    installable_nodes
                                        .contains(&graph.edge_endpoints(edge).unwrap().1)
                                })
                            })
                            .map(|(match_spec_id, edges)| {
                                (DisplayOp::Requirement(match_spec_id, edges), depth + 1)
                            })
                            .collect::<Vec<_>>();
                        stack.extend(requirements);

                        // Violated constraints of this candidate are listed
                        // beneath it.
                        for edge in constraint_edges {
                            stack.push((DisplayOp::Candidate(edge.target()), depth + 1));
                        }
                    }
                }
            }
        }

        // Conflicts involving the root directly: locked or removed packages.
        for &(a, b) in &self.graph.conflicts {
            let other = if a == self.graph.root_node {
                Some(b)
            } else if b == self.graph.root_node {
                Some(a)
            } else {
                None
            };
            if let Some(locked_node) = other {
                if let ProblemNode::Package(locked_id) = graph[locked_node] {
                    let record = &self.pool.resolve_solvable(locked_id).record.package_record;
                    writeln!(
                        f,
                        "{} {} {} is excluded, but another version is required as reported above",
                        self.glyphs.elbow,
                        record.name.as_normalized(),
                        record.version
                    )?;
                }
            }
        }

        Ok(())
    }
}
