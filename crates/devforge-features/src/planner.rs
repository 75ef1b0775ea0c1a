//! Install ordering.
//!
//! A topological sort over hard edges where, among the features whose
//! hard dependencies are all placed, the next one is chosen by:
//!
//! 1. explicit override position (inherited by the override's dependencies),
//! 2. whether soft predecessors are still pending,
//! 3. user declaration order,
//! 4. discovery order, then canonical id.
//!
//! The same graph and inputs always produce the same plan.

use std::collections::HashMap;

use devforge_common::types::FeatureId;
use petgraph::Direction;
use petgraph::graph::NodeIndex;
use petgraph::visit::EdgeRef;

use crate::graph::{DependencyGraph, FeatureNode, Relation};

/// An override pair that a hard dependency forced into the other order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverrideCorrection {
    /// Feature the override listed first.
    pub requested_first: FeatureId,
    /// Feature actually installed first.
    pub placed_first: FeatureId,
}

/// Features in install order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallPlan {
    /// Features to install, first to last.
    pub features: Vec<FeatureNode>,
    /// Override pairs the plan could not honor.
    pub corrections: Vec<OverrideCorrection>,
}

impl InstallPlan {
    /// Ids in install order.
    #[must_use]
    pub fn ids(&self) -> Vec<&FeatureId> {
        self.features.iter().map(FeatureNode::id).collect()
    }

    /// Number of features in the plan.
    #[must_use]
    pub fn len(&self) -> usize {
        self.features.len()
    }

    /// Whether the plan installs nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
}

/// Orders the graph for installation.
///
/// `explicit_order` is the configuration's `overrideFeatureInstallOrder`
/// mapped to canonical ids; entries not in the graph are ignored.
/// `declaration_order` overrides the order recorded on the nodes when
/// non-empty.
#[must_use]
pub fn plan(
    graph: &DependencyGraph,
    explicit_order: &[FeatureId],
    declaration_order: &[FeatureId],
) -> InstallPlan {
    let inner = graph.inner();
    let count = inner.node_count();

    let mut overrides: Vec<NodeIndex> = Vec::new();
    for id in explicit_order {
        match graph.index_of(id) {
            Some(idx) if !overrides.contains(&idx) => overrides.push(idx),
            Some(_) => {}
            None => tracing::warn!(feature = %id, "override names a feature that is not installed"),
        }
    }
    let override_rank = inherited_override_rank(graph, &overrides);

    let declared: HashMap<&FeatureId, usize> = declaration_order
        .iter()
        .enumerate()
        .map(|(i, id)| (id, i))
        .collect();
    let declared_rank = |node: &FeatureNode| {
        if declaration_order.is_empty() {
            node.declared_at.unwrap_or(usize::MAX)
        } else {
            declared.get(node.id()).copied().unwrap_or(usize::MAX)
        }
    };

    let mut pending_hard: Vec<usize> = vec![0; count];
    let mut pending_soft: Vec<usize> = vec![0; count];
    for edge in inner.edge_references() {
        match edge.weight() {
            Relation::Hard => pending_hard[edge.target().index()] += 1,
            Relation::Soft => pending_soft[edge.target().index()] += 1,
        }
    }

    let mut placed = vec![false; count];
    let mut order: Vec<NodeIndex> = Vec::with_capacity(count);
    while order.len() < count {
        let next = inner
            .node_indices()
            .filter(|idx| !placed[idx.index()] && pending_hard[idx.index()] == 0)
            .min_by_key(|idx| {
                let node = &inner[*idx];
                (
                    override_rank[idx.index()],
                    pending_soft[idx.index()] > 0,
                    declared_rank(node),
                    node.discovered_at,
                    node.id(),
                )
            });
        // The graph has no hard cycles, so some node is always ready.
        let Some(next) = next else {
            break;
        };
        if pending_soft[next.index()] > 0 {
            tracing::debug!(feature = %inner[next].id(), "installing before its soft predecessors");
        }
        placed[next.index()] = true;
        order.push(next);
        for edge in inner.edges_directed(next, Direction::Outgoing) {
            let target = edge.target().index();
            match edge.weight() {
                Relation::Hard => pending_hard[target] -= 1,
                Relation::Soft => pending_soft[target] -= 1,
            }
        }
    }

    let position: HashMap<NodeIndex, usize> =
        order.iter().enumerate().map(|(i, idx)| (*idx, i)).collect();
    let mut corrections = Vec::new();
    for (i, &first) in overrides.iter().enumerate() {
        for &later in &overrides[i + 1..] {
            if position.get(&later) < position.get(&first) {
                let correction = OverrideCorrection {
                    requested_first: inner[first].id().clone(),
                    placed_first: inner[later].id().clone(),
                };
                tracing::warn!(
                    requested_first = %correction.requested_first,
                    placed_first = %correction.placed_first,
                    "override order contradicts a hard dependency; dependency order kept"
                );
                corrections.push(correction);
            }
        }
    }

    let features: Vec<FeatureNode> = order.iter().map(|idx| inner[*idx].clone()).collect();
    tracing::info!(
        features = features.len(),
        corrections = corrections.len(),
        "install plan ready"
    );
    InstallPlan {
        features,
        corrections,
    }
}

/// Each node's override position: its own, or the earliest of any override
/// entry that depends on it, or `usize::MAX`.
fn inherited_override_rank(graph: &DependencyGraph, overrides: &[NodeIndex]) -> Vec<usize> {
    let inner = graph.inner();
    let mut rank = vec![usize::MAX; inner.node_count()];
    for (position, &start) in overrides.iter().enumerate() {
        let mut stack = vec![start];
        while let Some(idx) = stack.pop() {
            if rank[idx.index()] <= position {
                continue;
            }
            rank[idx.index()] = position;
            stack.extend(
                inner
                    .edges_directed(idx, Direction::Incoming)
                    .filter(|edge| *edge.weight() == Relation::Hard)
                    .map(|edge| edge.source()),
            );
        }
    }
    rank
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::tests::{fid, node};

    fn declared(mut node: FeatureNode, at: usize) -> FeatureNode {
        node.declared_at = Some(at);
        node.discovered_at = at;
        node
    }

    fn names(plan: &InstallPlan) -> Vec<String> {
        plan.ids()
            .iter()
            .map(|id| id.short_name().to_string())
            .collect()
    }

    #[test]
    fn dependency_goes_first_regardless_of_declaration() {
        let graph = DependencyGraph::build(vec![
            declared(node("tool", &["base"], &[]), 0),
            declared(node("base", &[], &[]), 1),
        ])
        .expect("graph");
        let plan = plan(&graph, &[], &[]);
        assert_eq!(names(&plan), vec!["base", "tool"]);
        assert!(plan.corrections.is_empty());
    }

    #[test]
    fn declaration_order_breaks_ties() {
        let graph = DependencyGraph::build(vec![
            declared(node("c", &[], &[]), 0),
            declared(node("a", &[], &[]), 1),
            declared(node("b", &[], &[]), 2),
        ])
        .expect("graph");
        assert_eq!(names(&plan(&graph, &[], &[])), vec!["c", "a", "b"]);
        assert_eq!(
            names(&plan(&graph, &[], &[fid("b"), fid("a"), fid("c")])),
            vec!["b", "a", "c"]
        );
    }

    #[test]
    fn soft_hints_reorder_within_ties() {
        let graph = DependencyGraph::build(vec![
            declared(node("node", &[], &["git"]), 0),
            declared(node("git", &[], &[]), 1),
        ])
        .expect("graph");
        assert_eq!(names(&plan(&graph, &[], &[])), vec!["git", "node"]);
    }

    #[test]
    fn soft_cycles_fall_back_to_declaration_order() {
        let graph = DependencyGraph::build(vec![
            declared(node("a", &[], &["b"]), 0),
            declared(node("b", &[], &["a"]), 1),
        ])
        .expect("graph");
        assert_eq!(names(&plan(&graph, &[], &[])), vec!["a", "b"]);
    }

    #[test]
    fn override_beats_soft_hints() {
        let graph = DependencyGraph::build(vec![
            declared(node("node", &[], &["git"]), 0),
            declared(node("git", &[], &[]), 1),
        ])
        .expect("graph");
        let plan = plan(&graph, &[fid("node")], &[]);
        assert_eq!(names(&plan), vec!["node", "git"]);
        assert!(plan.corrections.is_empty());
    }

    #[test]
    fn override_pulls_its_dependencies_forward() {
        let graph = DependencyGraph::build(vec![
            declared(node("a", &[], &[]), 0),
            declared(node("z", &["dep"], &[]), 1),
            node("dep", &[], &[]),
        ])
        .expect("graph");
        let plan = plan(&graph, &[fid("z"), fid("a")], &[]);
        assert_eq!(names(&plan), vec!["dep", "z", "a"]);
        assert!(plan.corrections.is_empty());
    }

    #[test]
    fn hard_dependency_beats_override_and_is_recorded() {
        let graph = DependencyGraph::build(vec![
            declared(node("base", &[], &[]), 0),
            declared(node("tool", &["base"], &[]), 1),
        ])
        .expect("graph");
        let plan = plan(&graph, &[fid("tool"), fid("base")], &[]);
        assert_eq!(names(&plan), vec!["base", "tool"]);
        assert_eq!(
            plan.corrections,
            vec![OverrideCorrection {
                requested_first: fid("tool"),
                placed_first: fid("base"),
            }]
        );
    }

    #[test]
    fn unknown_override_entries_are_ignored() {
        let graph = DependencyGraph::build(vec![declared(node("a", &[], &[]), 0)]).expect("graph");
        let plan = plan(&graph, &[fid("ghost"), fid("a")], &[]);
        assert_eq!(names(&plan), vec!["a"]);
    }

    #[test]
    fn auto_added_dependencies_follow_declared_features() {
        let mut first = node("x", &[], &[]);
        first.discovered_at = 2;
        let mut second = node("y", &[], &[]);
        second.discovered_at = 1;
        let graph = DependencyGraph::build(vec![
            declared(node("d", &[], &[]), 0),
            first,
            second,
        ])
        .expect("graph");
        assert_eq!(names(&plan(&graph, &[], &[])), vec!["d", "y", "x"]);
    }

    #[test]
    fn plan_is_deterministic_and_topologically_valid() {
        let nodes = vec![
            declared(node("app", &["lang", "db"], &["git"]), 0),
            declared(node("git", &[], &[]), 1),
            node("lang", &["common"], &[]),
            node("db", &["common"], &["lang"]),
            node("common", &[], &[]),
        ];
        let graph = DependencyGraph::build(nodes.clone()).expect("graph");
        let first = plan(&graph, &[], &[]);
        for _ in 0..10 {
            let again = DependencyGraph::build(nodes.clone()).expect("graph");
            assert_eq!(plan(&again, &[], &[]), first);
        }

        let order = names(&first);
        let pos = |name: &str| order.iter().position(|n| n == name).expect(name);
        assert!(pos("common") < pos("lang"));
        assert!(pos("common") < pos("db"));
        assert!(pos("lang") < pos("app"));
        assert!(pos("db") < pos("app"));
        assert!(pos("lang") < pos("db"));
        assert!(pos("git") < pos("app"));
    }
}
