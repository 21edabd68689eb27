//! Error types for cartwise-core
//!
//! Every error maps to a stable code that ends up in the `meta` of a
//! degraded response envelope.

use thiserror::Error;

/// Core error type
#[derive(Debug, Error)]
pub enum Error {
    /// Memory store failure (invalid mutation, ownership, contention, ...)
    #[error("memory error: {0}")]
    Memory(#[from] cartwise_memory::Error),

    /// The intent classifier failed or was unreachable
    #[error("classification failed: {0}")]
    Classification(String),

    /// A provider did not answer before the request deadline
    #[error("provider {provider} timed out")]
    ProviderTimeout {
        /// Provider name
        provider: String,
    },

    /// A provider answered with an error
    #[error("provider {provider} failed: {message}")]
    Provider {
        /// Provider name
        provider: String,
        /// Detailed message
        message: String,
    },

    /// Summary generation failed
    #[error("summarization failed: {0}")]
    Summarization(String),

    /// Catalog could not be loaded or parsed
    #[error("catalog error: {0}")]
    Catalog(String),

    /// Invalid configuration
    #[error("invalid configuration: {field}: {message}")]
    InvalidConfig {
        /// Config field name
        field: String,
        /// Detailed message
        message: String,
    },

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal error
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Stable machine-readable code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        use cartwise_memory::Error as Mem;
        match self {
            Error::Memory(Mem::InvalidMutation { .. }) => "invalid_mutation",
            Error::Memory(Mem::SessionNotFound(_)) => "session_not_found",
            Error::Memory(Mem::SessionOwnership { .. }) => "session_ownership",
            Error::Memory(Mem::Contention(_)) => "memory_contention",
            Error::Memory(_) => "memory_failure",
            Error::Classification(_) => "classification_failure",
            Error::ProviderTimeout { .. } => "provider_timeout",
            Error::Provider { .. } => "provider_failure",
            Error::Summarization(_) => "summarization_failure",
            Error::Catalog(_) => "catalog_error",
            Error::InvalidConfig { .. } => "invalid_config",
            Error::Serialization(_) => "serialization_error",
            Error::Internal(_) => "internal_error",
        }
    }

    /// Message fit to show an end user.
    #[must_use]
    pub fn user_message(&self) -> String {
        use cartwise_memory::Error as Mem;
        match self {
            Error::Memory(Mem::InvalidMutation { sku, reason }) => {
                format!("Couldn't update {sku}: {reason}.")
            }
            Error::Memory(Mem::SessionOwnership { .. }) => {
                "This conversation belongs to another shopper.".to_string()
            }
            Error::Memory(Mem::Contention(_)) => {
                "Your cart is busy with another change. Please try again.".to_string()
            }
            Error::ProviderTimeout { .. } | Error::Provider { .. } => {
                "Some results are unavailable right now.".to_string()
            }
            _ => "Something went wrong. Please try again.".to_string(),
        }
    }
}
