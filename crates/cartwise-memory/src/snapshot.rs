//! Versioned, copy-on-write graph snapshots.
//!
//! Each user's graph is held as `Arc<EntityGraph>` behind a short-lived
//! lock. Readers clone the `Arc` and work on an immutable version. A
//! writer updates in place when no reader holds the graph; otherwise it
//! copies and updates outside the lock, then swaps the new version in if
//! the slot still holds the graph it copied from.

use crate::graph::{EntityGraph, MergeReport};
use crate::sink::PersistBatch;
use crate::types::{Entity, RelationshipObservation};
use dashmap::DashMap;
use std::ops::Deref;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::trace;

/// Immutable view of one user's graph at a single version.
#[derive(Debug, Clone)]
pub struct GraphSnapshot {
    user_id: String,
    graph: Arc<EntityGraph>,
}

impl GraphSnapshot {
    /// Owning user.
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Shared handle to the underlying graph.
    pub fn graph(&self) -> Arc<EntityGraph> {
        Arc::clone(&self.graph)
    }
}

impl Deref for GraphSnapshot {
    type Target = EntityGraph;

    fn deref(&self) -> &EntityGraph {
        &self.graph
    }
}

/// Graph slots for every user seen so far.
#[derive(Default)]
pub(crate) struct GraphRegistry {
    graphs: DashMap<String, Arc<RwLock<Arc<EntityGraph>>>>,
}

impl GraphRegistry {
    fn slot(&self, user_id: &str) -> Arc<RwLock<Arc<EntityGraph>>> {
        if let Some(slot) = self.graphs.get(user_id) {
            return Arc::clone(&slot);
        }
        self.graphs
            .entry(user_id.to_string())
            .or_default()
            .clone()
    }

    pub(crate) fn snapshot(&self, user_id: &str) -> GraphSnapshot {
        let graph = match self.graphs.get(user_id) {
            Some(slot) => Arc::clone(&slot.read().unwrap_or_else(PoisonError::into_inner)),
            None => Arc::new(EntityGraph::new()),
        };
        GraphSnapshot {
            user_id: user_id.to_string(),
            graph,
        }
    }

    /// Apply `update` to the user's graph without copying under the lock.
    ///
    /// `update` may run more than once when another writer gets in first;
    /// only the run that is swapped in counts.
    fn update<T>(
        &self,
        slot: &RwLock<Arc<EntityGraph>>,
        mut update: impl FnMut(&mut EntityGraph) -> T,
    ) -> T {
        loop {
            let base = {
                let mut current = slot.write().unwrap_or_else(PoisonError::into_inner);
                if let Some(graph) = Arc::get_mut(&mut current) {
                    return update(graph);
                }
                Arc::clone(&current)
            };

            let mut next = EntityGraph::clone(&base);
            let out = update(&mut next);

            let mut current = slot.write().unwrap_or_else(PoisonError::into_inner);
            if Arc::ptr_eq(&current, &base) {
                *current = Arc::new(next);
                return out;
            }
            drop(current);
            trace!(version = base.version(), "Graph changed during copy, retrying");
        }
    }

    /// Merge and cut the persistence batch from the same version.
    pub(crate) fn merge(
        &self,
        user_id: &str,
        entities: &[Entity],
        observations: &[RelationshipObservation],
    ) -> (MergeReport, PersistBatch) {
        let slot = self.slot(user_id);
        self.update(&slot, |graph| {
            let report = graph.merge(entities, observations);
            let batch = PersistBatch {
                user_id: user_id.to_string(),
                graph_version: graph.version(),
                entities: report
                    .changed_entities
                    .iter()
                    .map(|idx| graph.entity(*idx).clone())
                    .collect(),
                relationships: report
                    .changed_edges
                    .iter()
                    .filter_map(|(from, to, kind)| graph.edge(*from, *to, *kind))
                    .map(|edge| graph.relationship(edge))
                    .collect(),
            };
            (report, batch)
        })
    }

    /// Apply a sink acknowledgement.
    pub(crate) fn mark_persisted(&self, batch: &PersistBatch) -> usize {
        let Some(slot) = self.graphs.get(&batch.user_id).map(|s| Arc::clone(&s)) else {
            return 0;
        };
        let pending = {
            let current = slot.read().unwrap_or_else(PoisonError::into_inner);
            let pending = current
                .entities()
                .any(|(_, e)| !e.persisted && batch.entities.iter().any(|b| b.entity_id == e.entity_id));
            pending
        };
        if !pending {
            return 0;
        }
        self.update(&slot, |graph| graph.mark_persisted(&batch.entities))
    }
}
