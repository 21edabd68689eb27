//! Durable graph sink interface.
//!
//! The sink receives the absolute state of changed entities and edges, so
//! delivering the same batch twice is harmless (at-least-once delivery).

use crate::types::{Entity, Relationship};
use async_trait::async_trait;
use serde::Serialize;

/// Entities and relationships changed by one `record_entities` call.
#[derive(Debug, Clone, Serialize)]
pub struct PersistBatch {
    /// Owning user
    pub user_id: String,
    /// Graph version the batch was cut from
    pub graph_version: u64,
    /// Current value of each changed entity
    pub entities: Vec<Entity>,
    /// Current value of each changed edge
    pub relationships: Vec<Relationship>,
}

impl PersistBatch {
    /// Whether the batch carries nothing.
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.relationships.is_empty()
    }
}

/// Why a persist attempt failed.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SinkError {
    /// The store could not be reached; retry later
    #[error("durable sink unreachable: {0}")]
    Unreachable(String),

    /// The store rejected the batch
    #[error("durable sink rejected batch: {0}")]
    Rejected(String),
}

/// A durable store for the entity/relationship graph.
#[async_trait]
pub trait DurableGraphSink: Send + Sync {
    /// Sink name (for logs).
    fn name(&self) -> &str;

    /// Persist a batch; `Ok` is the acknowledgement.
    async fn persist(&self, batch: &PersistBatch) -> std::result::Result<(), SinkError>;
}

/// Sink that acknowledges everything without storing it.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopGraphSink;

#[async_trait]
impl DurableGraphSink for NoopGraphSink {
    fn name(&self) -> &str {
        "noop"
    }

    async fn persist(&self, _batch: &PersistBatch) -> std::result::Result<(), SinkError> {
        Ok(())
    }
}
