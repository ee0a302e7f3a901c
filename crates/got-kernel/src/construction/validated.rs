//! Validated registry
//!
//! Proof that a `StageRegistry` passed construction-time validation. Holds
//! the execution-direction graph (dependency -> dependent) for readiness and
//! failure propagation queries.

use crate::error::CycleDetected;
use crate::registry::StageRegistry;
use crate::types::{StageDefinition, StageId};
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::{Dfs, Walker};
use petgraph::Direction;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

/// A registry proven acyclic
#[derive(Debug, Clone)]
pub struct ValidatedRegistry {
    registry: Arc<StageRegistry>,
    graph: DiGraph<StageId, ()>,
    index: HashMap<StageId, NodeIndex>,
    topo_order: Vec<StageId>,
}

impl ValidatedRegistry {
    /// Build the execution graph. Only called by the validator after the
    /// DFS check, so `toposort` failing is unreachable in practice.
    pub(crate) fn build(registry: StageRegistry) -> Result<Self, CycleDetected> {
        let mut graph = DiGraph::with_capacity(registry.len(), registry.len());
        let mut index = HashMap::with_capacity(registry.len());

        for id in registry.ids() {
            index.insert(id.clone(), graph.add_node(id.clone()));
        }
        for def in registry.all() {
            let to = index[&def.id];
            for dep in &def.depends_on {
                graph.add_edge(index[dep], to, ());
            }
        }

        let topo_order = toposort(&graph, None)
            .map_err(|cycle| {
                let id = graph[cycle.node_id()].clone();
                CycleDetected {
                    path: vec![id.clone(), id],
                }
            })?
            .into_iter()
            .map(|ix| graph[ix].clone())
            .collect();

        Ok(Self {
            registry: Arc::new(registry),
            graph,
            index,
            topo_order,
        })
    }

    /// Underlying registry
    #[inline]
    #[must_use]
    pub fn registry(&self) -> &StageRegistry {
        &self.registry
    }

    /// Look up a definition
    #[inline]
    #[must_use]
    pub fn get(&self, id: &StageId) -> Option<&StageDefinition> {
        self.registry.get(id)
    }

    /// Stages in an order where every stage follows its dependencies
    #[inline]
    #[must_use]
    pub fn topological_order(&self) -> &[StageId] {
        &self.topo_order
    }

    /// Stages with no dependencies, in registration order
    #[must_use]
    pub fn roots(&self) -> Vec<StageId> {
        self.registry
            .all()
            .filter(|def| def.is_root())
            .map(|def| def.id.clone())
            .collect()
    }

    /// Direct dependencies of a stage
    #[must_use]
    pub fn dependencies(&self, id: &StageId) -> Option<&BTreeSet<StageId>> {
        self.registry.get(id).map(|def| &def.depends_on)
    }

    /// Direct dependents of a stage, in registration order
    #[must_use]
    pub fn dependents(&self, id: &StageId) -> Vec<StageId> {
        let Some(&ix) = self.index.get(id) else {
            return Vec::new();
        };
        let mut out: Vec<StageId> = self
            .graph
            .neighbors_directed(ix, Direction::Outgoing)
            .map(|n| self.graph[n].clone())
            .collect();
        self.sort_by_registration(&mut out);
        out
    }

    /// Every stage that transitively depends on `id`, in registration order
    #[must_use]
    pub fn transitive_dependents(&self, id: &StageId) -> Vec<StageId> {
        let Some(&ix) = self.index.get(id) else {
            return Vec::new();
        };
        let mut out: Vec<StageId> = Dfs::new(&self.graph, ix)
            .iter(&self.graph)
            .filter(|n| *n != ix)
            .map(|n| self.graph[n].clone())
            .collect();
        self.sort_by_registration(&mut out);
        out
    }

    /// Number of stages
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.registry.len()
    }

    /// True if no stages are declared
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }

    /// Number of dependency edges
    #[inline]
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    fn sort_by_registration(&self, ids: &mut [StageId]) {
        ids.sort_by_key(|id| self.registry.position(id).unwrap_or(usize::MAX));
    }
}
