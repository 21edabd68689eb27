//! MemoryStore - the facade over sessions, graphs and persistence.

use crate::cart::{Cart, CartMutation};
use crate::dietary::{DietaryCache, DietaryProfile};
use crate::error::Result;
use crate::persistence::{PersistStats, Persistence, PersistenceConfig};
use crate::session::SessionStore;
use crate::sink::DurableGraphSink;
use crate::snapshot::{GraphRegistry, GraphSnapshot};
use crate::types::{Entity, EntityKind, RelationshipObservation, Session, Turn};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

#[cfg(test)]
mod tests;

/// Settings for session and graph memory.
#[derive(Debug, Clone)]
pub struct MemoryConfig {
    /// Idle time after which a session is evicted
    pub cache_ttl: Duration,
    /// Conversation turns kept per session
    pub max_turns_per_session: usize,
    /// How long a caller waits for a busy session
    pub contention_timeout: Duration,
    /// Period of the eviction sweep
    pub eviction_interval: Duration,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(3600),
            max_turns_per_session: 50,
            contention_timeout: Duration::from_millis(250),
            eviction_interval: Duration::from_secs(60),
        }
    }
}

/// Where the changes from a `record_entities` call stand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PersistState {
    /// Nothing changed, so nothing to persist
    Unchanged,
    /// Handed to the durable sink queue
    Queued,
    /// No durable sink configured
    InProcessOnly,
}

/// Result of recording observations.
#[derive(Debug, Clone, Serialize)]
pub struct RecordOutcome {
    /// Graph version after the merge
    pub graph_version: u64,
    /// Entities whose stored value changed
    pub changed_entities: usize,
    /// Edges whose weight or timestamp changed
    pub changed_relationships: usize,
    /// Observations ignored as already applied
    pub duplicate_observations: usize,
    /// Durable persistence status
    pub persistence: PersistState,
}

/// Session state, per-user graphs and the dietary profile cache.
pub struct MemoryStore {
    sessions: SessionStore,
    graphs: Arc<GraphRegistry>,
    dietary: DietaryCache,
    persistence: Option<Arc<Persistence>>,
    config: MemoryConfig,
}

impl MemoryStore {
    /// In-process store with no durable sink.
    pub fn new(config: MemoryConfig) -> Self {
        Self {
            sessions: SessionStore::new(
                config.cache_ttl,
                config.max_turns_per_session,
                config.contention_timeout,
            ),
            graphs: Arc::new(GraphRegistry::default()),
            dietary: DietaryCache::new(),
            persistence: None,
            config,
        }
    }

    /// Attach a durable sink.
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn DurableGraphSink>, config: PersistenceConfig) -> Self {
        info!(sink = sink.name(), "Durable graph sink attached");
        self.persistence = Some(Arc::new(Persistence::new(sink, config)));
        self
    }

    /// Start the persistence worker (if a sink is attached) and the
    /// session eviction sweep.
    pub fn spawn_workers(self: &Arc<Self>, cancel: CancellationToken) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::with_capacity(2);

        if let Some(persistence) = &self.persistence {
            handles.push(tokio::spawn(
                Arc::clone(persistence).run(Arc::clone(&self.graphs), cancel.clone()),
            ));
        }

        let store = Arc::clone(self);
        let period = self.config.eviction_interval;
        handles.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let evicted = store.evict_expired(Utc::now());
                        if evicted > 0 {
                            info!(evicted, "Evicted idle sessions");
                        }
                    }
                }
            }
        }));

        handles
    }

    /// Get the session, creating it for `user_id` if absent.
    pub async fn get_session(&self, session_id: &str, user_id: &str) -> Result<Session> {
        self.sessions.get_or_create(session_id, user_id).await
    }

    /// Get an existing session.
    pub async fn find_session(&self, session_id: &str) -> Option<Session> {
        self.sessions.find(session_id).await
    }

    /// Owner of an existing session.
    pub fn session_owner(&self, session_id: &str) -> Option<String> {
        self.sessions.owner(session_id)
    }

    /// Apply a cart mutation; mutations on one session apply in arrival
    /// order.
    pub async fn mutate_cart(&self, session_id: &str, mutation: &CartMutation) -> Result<Session> {
        self.sessions.mutate_cart(session_id, mutation).await
    }

    /// Empty the cart and return its previous contents.
    pub async fn take_cart(&self, session_id: &str) -> Result<Cart> {
        self.sessions.take_cart(session_id).await
    }

    /// Append a conversation turn, trimming the oldest past the limit.
    pub async fn append_turn(&self, session_id: &str, turn: Turn) -> Result<()> {
        self.sessions.append_turn(session_id, turn).await
    }

    /// Merge observations into the user's graph.
    ///
    /// The in-process graph is updated before this returns; durable
    /// persistence happens in the background.
    pub fn record_entities(
        &self,
        user_id: &str,
        entities: &[Entity],
        relationships: &[RelationshipObservation],
    ) -> RecordOutcome {
        let (report, batch) = self.graphs.merge(user_id, entities, relationships);

        if entities.iter().any(|e| e.kind == EntityKind::Preference) {
            self.dietary.invalidate(user_id);
        }

        let graph_version = batch.graph_version;
        let persistence = if report.is_empty() {
            PersistState::Unchanged
        } else if let Some(persistence) = &self.persistence {
            persistence.enqueue(batch);
            PersistState::Queued
        } else {
            PersistState::InProcessOnly
        };

        debug!(
            user_id,
            graph_version,
            entities = report.changed_entities.len(),
            relationships = report.changed_edges.len(),
            duplicates = report.duplicate_observations,
            "Recorded observations"
        );

        RecordOutcome {
            graph_version,
            changed_entities: report.changed_entities.len(),
            changed_relationships: report.changed_edges.len(),
            duplicate_observations: report.duplicate_observations,
            persistence,
        }
    }

    /// Immutable view of the user's graph.
    pub fn snapshot_graph(&self, user_id: &str) -> GraphSnapshot {
        self.graphs.snapshot(user_id)
    }

    /// The user's dietary profile for the current graph version.
    pub fn dietary_profile(&self, user_id: &str) -> Arc<DietaryProfile> {
        let snapshot = self.graphs.snapshot(user_id);
        self.dietary.get_or_compute(user_id, &snapshot)
    }

    /// Force the next `dietary_profile` call to recompute.
    pub fn invalidate_dietary_profile(&self, user_id: &str) {
        if self.dietary.invalidate(user_id) {
            debug!(user_id, "Dietary profile invalidated");
        }
    }

    /// Drop sessions idle past the TTL.
    pub fn evict_expired(&self, now: DateTime<Utc>) -> usize {
        self.sessions.evict_expired(now)
    }

    /// Number of live sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Persistence counters, if a sink is attached.
    pub fn persistence_stats(&self) -> Option<PersistStats> {
        self.persistence.as_ref().map(|p| p.stats())
    }
}
