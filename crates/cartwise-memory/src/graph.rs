//! Per-user entity/relationship graph.
//!
//! Entities live in an arena (`Vec<Entity>`) addressed by [`EntityIdx`];
//! edges reference arena slots, never entity values, so bidirectional
//! edges create no ownership cycles.
//!
//! Merging is commutative and idempotent:
//! - each attribute keeps the value from its strongest claim, ordered by
//!   confidence, then `observed_at`, then the value itself
//! - name and confidence come from the strongest observation under the
//!   same order
//! - relationship observations are applied once per `observation_id`,
//!   remembered for the last [`OBSERVATION_WINDOW`] observations

use crate::types::{Entity, EntityKind, RelationKind, Relationship, RelationshipObservation};
use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use uuid::Uuid;

/// Observation IDs remembered per user for duplicate detection.
pub const OBSERVATION_WINDOW: usize = 4096;

#[cfg(test)]
mod tests;

/// Index of an entity in the graph arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityIdx(pub u32);

/// A directed edge between two arena slots.
#[derive(Debug, Clone, PartialEq)]
pub struct Edge {
    /// Source slot
    pub from: EntityIdx,
    /// Target slot
    pub to: EntityIdx,
    /// Edge kind
    pub kind: RelationKind,
    /// Accumulated weight
    pub weight: f64,
    /// Most recent observation
    pub last_seen_at: DateTime<Utc>,
}

type EdgeKey = (EntityIdx, EntityIdx, RelationKind);

/// Where an attribute value came from.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Claim {
    confidence: f64,
    observed_at: DateTime<Utc>,
}

impl Claim {
    fn of(entity: &Entity) -> Self {
        Self {
            confidence: entity.confidence,
            observed_at: entity.observed_at,
        }
    }

    fn rank(&self, value: &serde_json::Value, other: &Self, other_value: &serde_json::Value) -> Ordering {
        self.confidence
            .total_cmp(&other.confidence)
            .then(self.observed_at.cmp(&other.observed_at))
            .then_with(|| value.to_string().cmp(&other_value.to_string()))
    }
}

/// Total order over whole observations of one entity.
fn entity_rank(a: &Entity, b: &Entity) -> Ordering {
    a.confidence
        .total_cmp(&b.confidence)
        .then(a.observed_at.cmp(&b.observed_at))
        .then_with(|| a.name.cmp(&b.name))
        .then_with(|| a.kind.to_string().cmp(&b.kind.to_string()))
}

/// FIFO set of the most recent observation IDs.
#[derive(Debug, Clone, Default)]
struct ObservationWindow {
    order: VecDeque<Uuid>,
    seen: HashSet<Uuid>,
}

impl ObservationWindow {
    fn contains(&self, id: &Uuid) -> bool {
        self.seen.contains(id)
    }

    fn insert(&mut self, id: Uuid) {
        if !self.seen.insert(id) {
            return;
        }
        self.order.push_back(id);
        if self.order.len() > OBSERVATION_WINDOW {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
    }

    fn len(&self) -> usize {
        self.order.len()
    }
}

/// What a merge changed, used to build persistence batches.
#[derive(Debug, Default, Clone)]
pub struct MergeReport {
    /// Entity slots whose stored value changed
    pub changed_entities: BTreeSet<EntityIdx>,
    /// Edges whose weight or timestamp changed
    pub changed_edges: BTreeSet<EdgeKey>,
    /// Observations skipped because they were already applied
    pub duplicate_observations: usize,
}

impl MergeReport {
    /// Whether nothing changed.
    pub fn is_empty(&self) -> bool {
        self.changed_entities.is_empty() && self.changed_edges.is_empty()
    }
}

/// Arena-backed graph for one user.
#[derive(Debug, Clone, Default)]
pub struct EntityGraph {
    version: u64,
    entities: Vec<Entity>,
    claims: Vec<BTreeMap<String, Claim>>,
    index: HashMap<String, EntityIdx>,
    edges: BTreeMap<EdgeKey, Edge>,
    applied_observations: ObservationWindow,
}

impl EntityGraph {
    /// Empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Monotonic version, bumped by every merge that changes something.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Number of entities.
    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// Number of edges.
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Whether the graph holds no entities.
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Arena slot for an entity ID.
    pub fn idx_of(&self, entity_id: &str) -> Option<EntityIdx> {
        self.index.get(entity_id).copied()
    }

    /// Entity at a slot.
    pub fn entity(&self, idx: EntityIdx) -> &Entity {
        &self.entities[idx.0 as usize]
    }

    /// Entity by ID.
    pub fn get(&self, entity_id: &str) -> Option<&Entity> {
        self.idx_of(entity_id).map(|idx| self.entity(idx))
    }

    /// All entities in arena order.
    pub fn entities(&self) -> impl Iterator<Item = (EntityIdx, &Entity)> {
        self.entities
            .iter()
            .enumerate()
            .map(|(i, e)| (EntityIdx(i as u32), e))
    }

    /// Entities of one kind.
    pub fn entities_of(&self, kind: EntityKind) -> impl Iterator<Item = (EntityIdx, &Entity)> {
        self.entities().filter(move |(_, e)| e.kind == kind)
    }

    /// Edge between two slots.
    pub fn edge(&self, from: EntityIdx, to: EntityIdx, kind: RelationKind) -> Option<&Edge> {
        self.edges.get(&(from, to, kind))
    }

    /// All edges in deterministic (from, to, kind) order.
    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.edges.values()
    }

    /// Edges of `kind` pointing at `to`.
    pub fn incoming(&self, to: EntityIdx, kind: RelationKind) -> impl Iterator<Item = &Edge> {
        self.edges
            .values()
            .filter(move |e| e.to == to && e.kind == kind)
    }

    /// Edges of `kind` leaving `from`.
    pub fn outgoing(&self, from: EntityIdx, kind: RelationKind) -> impl Iterator<Item = &Edge> {
        self.edges
            .range((from, EntityIdx(0), RelationKind::UsedTogether)..)
            .take_while(move |((f, _, _), _)| *f == from)
            .map(|(_, e)| e)
            .filter(move |e| e.kind == kind)
    }

    /// Observation IDs currently held for duplicate detection.
    pub fn remembered_observations(&self) -> usize {
        self.applied_observations.len()
    }

    /// Count of entities not yet acknowledged by the durable sink.
    pub fn unpersisted_count(&self) -> usize {
        self.entities.iter().filter(|e| !e.persisted).count()
    }

    /// Export an edge with entity IDs.
    pub fn relationship(&self, edge: &Edge) -> Relationship {
        Relationship {
            from_entity: self.entity(edge.from).entity_id.clone(),
            to_entity: self.entity(edge.to).entity_id.clone(),
            kind: edge.kind,
            weight: edge.weight,
            last_seen_at: edge.last_seen_at,
        }
    }

    /// Merge entities and relationship observations.
    pub fn merge(
        &mut self,
        entities: &[Entity],
        observations: &[RelationshipObservation],
    ) -> MergeReport {
        let mut report = MergeReport::default();

        for incoming in entities {
            let (idx, changed) = self.merge_entity(incoming);
            if changed {
                report.changed_entities.insert(idx);
            }
        }

        for obs in observations {
            if self.applied_observations.contains(&obs.observation_id) {
                report.duplicate_observations += 1;
                continue;
            }
            let from = self.ensure_endpoint(&obs.from_entity, obs.observed_at, &mut report);
            let to = self.ensure_endpoint(&obs.to_entity, obs.observed_at, &mut report);
            let key = (from, to, obs.kind);
            let edge = self.edges.entry(key).or_insert_with(|| Edge {
                from,
                to,
                kind: obs.kind,
                weight: 0.0,
                last_seen_at: obs.observed_at,
            });
            edge.weight += obs.weight;
            edge.last_seen_at = edge.last_seen_at.max(obs.observed_at);
            self.applied_observations.insert(obs.observation_id);
            report.changed_edges.insert(key);
        }

        if !report.is_empty() {
            self.version += 1;
        }
        report
    }

    /// Mark entities persisted if they still hold the acknowledged version.
    pub fn mark_persisted(&mut self, acknowledged: &[Entity]) -> usize {
        let mut marked = 0;
        for ack in acknowledged {
            let Some(idx) = self.idx_of(&ack.entity_id) else {
                continue;
            };
            let current = &mut self.entities[idx.0 as usize];
            if !current.persisted
                && current.observed_at == ack.observed_at
                && current.confidence == ack.confidence
                && current.attributes == ack.attributes
            {
                current.persisted = true;
                marked += 1;
            }
        }
        marked
    }

    fn merge_entity(&mut self, incoming: &Entity) -> (EntityIdx, bool) {
        let claim = Claim::of(incoming);
        let Some(idx) = self.idx_of(&incoming.entity_id) else {
            let idx = EntityIdx(self.entities.len() as u32);
            let mut entity = incoming.clone();
            entity.persisted = false;
            self.claims
                .push(entity.attributes.keys().map(|k| (k.clone(), claim)).collect());
            self.entities.push(entity);
            self.index.insert(incoming.entity_id.clone(), idx);
            return (idx, true);
        };

        let slot = idx.0 as usize;
        let mut merged = self.entities[slot].clone();
        if entity_rank(incoming, &merged) == Ordering::Greater {
            merged.kind = incoming.kind;
            merged.name = incoming.name.clone();
            merged.confidence = incoming.confidence;
            merged.observed_at = incoming.observed_at;
        }

        let claims = &mut self.claims[slot];
        for (key, value) in &incoming.attributes {
            let wins = match (merged.attributes.get(key), claims.get(key)) {
                (Some(held_value), Some(held)) => {
                    claim.rank(value, held, held_value) == Ordering::Greater
                }
                _ => true,
            };
            if wins {
                merged.attributes.insert(key.clone(), value.clone());
                claims.insert(key.clone(), claim);
            }
        }

        let existing = &self.entities[slot];
        let changed = merged.kind != existing.kind
            || merged.name != existing.name
            || merged.attributes != existing.attributes
            || merged.confidence != existing.confidence
            || merged.observed_at != existing.observed_at;
        if changed {
            merged.persisted = false;
            self.entities[slot] = merged;
        }
        (idx, changed)
    }

    fn ensure_endpoint(
        &mut self,
        entity_id: &str,
        at: DateTime<Utc>,
        report: &mut MergeReport,
    ) -> EntityIdx {
        if let Some(idx) = self.idx_of(entity_id) {
            return idx;
        }
        let (idx, _) = self.merge_entity(&Entity::placeholder(entity_id, at));
        report.changed_entities.insert(idx);
        idx
    }
}
