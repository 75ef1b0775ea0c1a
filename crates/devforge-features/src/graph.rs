//! Feature dependency graph built on `petgraph`.
//!
//! Nodes are resolved features keyed by canonical id. Edges point from a
//! dependency to its dependent and are either hard (`dependsOn`) or soft
//! (`installsAfter`). Only hard edges can form a reportable cycle.

use std::collections::{BTreeMap, HashMap};

use devforge_common::error::{CyclicDependencyError, DevforgeError, FeatureResolutionError};
use devforge_common::types::FeatureId;
use devforge_config::OptionValue;
use petgraph::Direction;
use petgraph::graph::{Graph, NodeIndex};
use petgraph::visit::EdgeRef;

use crate::manifest::FeatureManifest;
use crate::options::resolve_options;
use crate::reference::FeatureRef;
use crate::resolver::FeatureResolver;

/// A feature the user asked for, with the options they selected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureRequest {
    /// Parsed reference.
    pub reference: FeatureRef,
    /// Options as written in the configuration.
    pub options: BTreeMap<String, OptionValue>,
}

/// One resolved feature in the graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureNode {
    /// Resolved manifest.
    pub manifest: FeatureManifest,
    /// Options validated against the manifest, defaults filled in.
    pub options: BTreeMap<String, OptionValue>,
    /// Hard dependencies.
    pub depends_on: Vec<FeatureId>,
    /// Soft ordering hints.
    pub installs_after: Vec<FeatureId>,
    /// Position in the user's declaration order; `None` when pulled in as
    /// a dependency.
    pub declared_at: Option<usize>,
    /// Order in which the feature was first resolved.
    pub discovered_at: usize,
}

impl FeatureNode {
    /// Canonical id of the feature.
    #[must_use]
    pub const fn id(&self) -> &FeatureId {
        &self.manifest.id
    }
}

/// Kind of ordering constraint between two features.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relation {
    /// `dependsOn`: never violated.
    Hard,
    /// `installsAfter`: honored when possible.
    Soft,
}

/// A validated feature graph with no hard cycles.
#[derive(Debug)]
pub struct DependencyGraph {
    graph: Graph<FeatureNode, Relation>,
    index: HashMap<FeatureId, NodeIndex>,
}

/// Traversal state for cycle detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    White,
    Grey,
    Black,
}

impl DependencyGraph {
    /// Resolves `requests` and every feature they transitively depend on,
    /// then builds the graph.
    ///
    /// Expansion runs in waves: each wave resolves all newly named hard
    /// dependencies concurrently. The first declaration of an id wins.
    ///
    /// # Errors
    ///
    /// Returns any resolution or option error, or `CyclicDependency` if the
    /// hard edges form a cycle.
    pub async fn resolve(
        resolver: &FeatureResolver,
        requests: &[FeatureRequest],
    ) -> Result<Self, DevforgeError> {
        let mut nodes: Vec<FeatureNode> = Vec::new();
        let mut known: HashMap<FeatureId, FeatureRef> = HashMap::new();
        let mut wave: Vec<(FeatureRequest, Option<usize>)> = requests
            .iter()
            .cloned()
            .enumerate()
            .map(|(i, request)| (request, Some(i)))
            .collect();

        while !wave.is_empty() {
            let mut batch = Vec::new();
            for (request, declared_at) in wave.drain(..) {
                let id = request.reference.id();
                if let Some(first) = known.get(&id) {
                    if first.constraint != request.reference.constraint {
                        tracing::warn!(
                            feature = %id,
                            kept = %first,
                            ignored = %request.reference,
                            "feature declared twice, keeping the first declaration"
                        );
                    }
                    continue;
                }
                let _ = known.insert(id, request.reference.clone());
                batch.push((request, declared_at));
            }
            if batch.is_empty() {
                break;
            }

            tracing::info!(count = batch.len(), "resolving feature wave");
            let references: Vec<FeatureRef> =
                batch.iter().map(|(r, _)| r.reference.clone()).collect();
            let manifests = resolver.resolve_all(&references).await?;

            for ((request, declared_at), manifest) in batch.into_iter().zip(manifests) {
                let label = manifest.id.to_string();
                let options = resolve_options(&label, &manifest.metadata.options, &request.options)?;

                let mut depends_on = Vec::new();
                for (raw, selected) in &manifest.metadata.depends_on {
                    let reference = resolver.parse_ref_from(raw, &manifest.package_dir)?;
                    depends_on.push(reference.id());
                    wave.push((
                        FeatureRequest {
                            reference,
                            options: selected.clone(),
                        },
                        None,
                    ));
                }

                let mut installs_after = Vec::new();
                for raw in &manifest.metadata.installs_after {
                    match resolver.parse_ref_from(raw, &manifest.package_dir) {
                        Ok(reference) => installs_after.push(reference.id()),
                        Err(e) => {
                            tracing::warn!(feature = %label, hint = %raw, error = %e, "ignoring installsAfter entry");
                        }
                    }
                }

                let discovered_at = nodes.len();
                nodes.push(FeatureNode {
                    manifest,
                    options,
                    depends_on,
                    installs_after,
                    declared_at,
                    discovered_at,
                });
            }
        }

        Self::build(nodes)
    }

    /// Builds a graph from already resolved nodes.
    ///
    /// Soft hints naming features outside the set are dropped. A later node
    /// with an id already present is ignored.
    ///
    /// # Errors
    ///
    /// Returns `FeatureResolutionError::MissingDependency` if a hard
    /// dependency is not in the set, or `CyclicDependency` with the cycle's
    /// members if the hard edges loop.
    pub fn build(nodes: Vec<FeatureNode>) -> Result<Self, DevforgeError> {
        let mut graph = Graph::new();
        let mut index = HashMap::new();
        for node in nodes {
            if index.contains_key(node.id()) {
                tracing::warn!(feature = %node.id(), "duplicate feature node ignored");
                continue;
            }
            let id = node.id().clone();
            let idx = graph.add_node(node);
            let _ = index.insert(id, idx);
        }

        let indices: Vec<NodeIndex> = graph.node_indices().collect();
        for &idx in &indices {
            let node = &graph[idx];
            let mut hard = Vec::new();
            for dependency in &node.depends_on {
                let Some(&dep) = index.get(dependency) else {
                    return Err(FeatureResolutionError::MissingDependency {
                        feature: node.id().to_string(),
                        dependency: dependency.to_string(),
                    }
                    .into());
                };
                hard.push(dep);
            }
            let soft: Vec<NodeIndex> = node
                .installs_after
                .iter()
                .filter_map(|hint| index.get(hint).copied())
                .filter(|&hint| hint != idx)
                .collect();
            for dep in hard {
                let _ = graph.update_edge(dep, idx, Relation::Hard);
            }
            for hint in soft {
                if graph.find_edge(hint, idx).is_none() {
                    let _ = graph.add_edge(hint, idx, Relation::Soft);
                }
            }
        }

        let built = Self { graph, index };
        if let Some(cycle) = built.find_hard_cycle() {
            return Err(CyclicDependencyError { cycle }.into());
        }
        tracing::debug!(features = built.len(), "feature graph built");
        Ok(built)
    }

    /// Number of features.
    #[must_use]
    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    /// Whether the graph has no features.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Looks a feature up by id.
    #[must_use]
    pub fn node(&self, id: &FeatureId) -> Option<&FeatureNode> {
        self.index.get(id).map(|&idx| &self.graph[idx])
    }

    /// Features in discovery order.
    pub fn nodes(&self) -> impl Iterator<Item = &FeatureNode> {
        self.graph.node_weights()
    }

    /// Features that must be installed before `id`.
    #[must_use]
    pub fn hard_dependencies(&self, id: &FeatureId) -> Vec<&FeatureId> {
        self.predecessors(id, Relation::Hard)
    }

    /// Features present in the graph that `id` prefers to follow.
    #[must_use]
    pub fn soft_predecessors(&self, id: &FeatureId) -> Vec<&FeatureId> {
        self.predecessors(id, Relation::Soft)
    }

    fn predecessors(&self, id: &FeatureId, relation: Relation) -> Vec<&FeatureId> {
        let Some(&idx) = self.index.get(id) else {
            return Vec::new();
        };
        let mut found: Vec<&FeatureId> = self
            .graph
            .edges_directed(idx, Direction::Incoming)
            .filter(|edge| *edge.weight() == relation)
            .map(|edge| self.graph[edge.source()].id())
            .collect();
        found.sort();
        found
    }

    pub(crate) const fn inner(&self) -> &Graph<FeatureNode, Relation> {
        &self.graph
    }

    pub(crate) fn index_of(&self, id: &FeatureId) -> Option<NodeIndex> {
        self.index.get(id).copied()
    }

    /// Iterative depth-first search along hard edges.
    ///
    /// Returns the members of the first cycle found, each depending on the
    /// next. Start nodes are visited in discovery order so the answer is
    /// stable for a given input.
    fn find_hard_cycle(&self) -> Option<Vec<String>> {
        let mut marks = vec![Mark::White; self.graph.node_count()];
        for start in self.graph.node_indices() {
            if marks[start.index()] != Mark::White {
                continue;
            }
            marks[start.index()] = Mark::Grey;
            let mut stack = vec![(start, self.dependencies_of(start))];
            loop {
                let Some(frame) = stack.last_mut() else {
                    break;
                };
                let (node, next) = (frame.0, frame.1.pop());
                match next {
                    None => {
                        marks[node.index()] = Mark::Black;
                        let _ = stack.pop();
                    }
                    Some(next) => match marks[next.index()] {
                        Mark::White => {
                            marks[next.index()] = Mark::Grey;
                            stack.push((next, self.dependencies_of(next)));
                        }
                        Mark::Grey => {
                            let from = stack.iter().position(|(n, _)| *n == next).unwrap_or(0);
                            return Some(
                                stack[from..]
                                    .iter()
                                    .map(|(n, _)| self.graph[*n].id().to_string())
                                    .collect(),
                            );
                        }
                        Mark::Black => {}
                    },
                }
            }
        }
        None
    }

    /// Hard dependencies of `idx`, reversed so that popping yields them in
    /// declaration order.
    fn dependencies_of(&self, idx: NodeIndex) -> Vec<NodeIndex> {
        let mut deps: Vec<NodeIndex> = self.graph[idx]
            .depends_on
            .iter()
            .filter_map(|id| self.index.get(id).copied())
            .collect();
        deps.reverse();
        deps
    }
}
