//! Error types for the memory store.

/// Errors that can occur in memory store operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A cart mutation was rejected; the cart is left unchanged
    #[error("invalid cart mutation for {sku}: {reason}")]
    InvalidMutation {
        /// SKU the mutation targeted
        sku: String,
        /// Why it was rejected
        reason: String,
    },

    /// No session with this ID exists
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// Session exists but belongs to another user
    #[error("session {session_id} is not owned by {user_id}")]
    SessionOwnership {
        /// Session ID
        session_id: String,
        /// Requesting user
        user_id: String,
    },

    /// The per-session lock could not be acquired in time
    #[error("session {0} is busy")]
    Contention(String),

    /// SQLite database error
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Serialization / deserialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// General internal error
    #[error("{0}")]
    Internal(String),
}

impl Error {
    pub(crate) fn invalid(sku: &str, reason: impl Into<String>) -> Self {
        Self::InvalidMutation {
            sku: sku.to_string(),
            reason: reason.into(),
        }
    }
}

/// Convenience Result type.
pub type Result<T> = std::result::Result<T, Error>;
