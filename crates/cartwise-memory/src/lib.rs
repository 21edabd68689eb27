//! Cartwise Memory - session state and per-user entity graphs
//!
//! Holds each conversation's cart and turn history, and a per-user graph
//! of products, brands, categories and preferences linked by
//! `USED_TOGETHER`, `SEARCHED_FOR`, `ADDED_TO_CART` and `PREFERS` edges.
//!
//! # Architecture
//!
//! ```text
//! mutate_cart ──► SessionStore (per-session FIFO lock)
//!
//! record_entities ──► GraphRegistry (copy-on-write Arc<EntityGraph>)
//!                        │                    │
//!                  snapshot_graph       PersistBatch
//!                  dietary_profile            │
//!                                       OutboundQueue
//!                                             │
//!                              Persistence worker (retry + breaker)
//!                                             │
//!                                     DurableGraphSink (SQLite)
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cart;
pub mod circuit_breaker;
pub mod dietary;
pub mod error;
pub mod graph;
pub mod outbox;
pub mod persistence;
pub mod retry;
pub mod session;
pub mod sink;
pub mod snapshot;
pub mod sqlite_sink;
pub mod store;
pub mod types;

pub use cart::{Cart, CartItem, CartMutation, CartOp};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use dietary::{DietaryCache, DietaryProfile};
pub use error::{Error, Result};
pub use graph::{Edge, EntityGraph, EntityIdx, MergeReport};
pub use outbox::{OutboundQueue, PushOutcome};
pub use persistence::{PersistStats, PersistenceConfig};
pub use retry::RetryPolicy;
pub use sink::{DurableGraphSink, NoopGraphSink, PersistBatch, SinkError};
pub use snapshot::GraphSnapshot;
pub use sqlite_sink::SqliteGraphSink;
pub use store::{MemoryConfig, MemoryStore, PersistState, RecordOutcome};
pub use types::{
    entity_id, normalize_name, Entity, EntityKind, RelationKind, Relationship,
    RelationshipObservation, Session, Turn, TurnRole,
};
