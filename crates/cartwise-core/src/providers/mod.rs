//! Candidate providers
//!
//! A provider turns routed request parameters into candidates. Each one is
//! called at most once per request, in parallel with the others, and must
//! return before the request deadline or be abandoned.
//!
//! - `search`: keyword/broad hybrid over the catalog
//! - `complementary`: `USED_TOGETHER` neighbours of cart items
//! - `cart`: cart and order operations through the memory store

mod cart;
mod complementary;
mod search;

pub use cart::CartProvider;
pub use complementary::ComplementaryProvider;
pub use search::CatalogSearchProvider;

use crate::error::Result;
use crate::intent::{ExtractedAttributes, Intent};
use async_trait::async_trait;
use cartwise_memory::Cart;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use tokio::time::Instant;

/// Which provider a strategy invokes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// Catalog search
    Search,
    /// Items bought together with the cart
    Complementary,
    /// Cart and order operations
    Cart,
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Search => write!(f, "search"),
            Self::Complementary => write!(f, "complementary"),
            Self::Cart => write!(f, "cart"),
        }
    }
}

/// A product proposed by a provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    /// Product ID (the SKU)
    pub id: String,
    /// Display name
    pub name: String,
    /// Provider relevance before personalization
    pub base_relevance_score: f64,
    /// `brand`, `category`, `tags`, `contains`, `price`, ...
    pub attributes: BTreeMap<String, Value>,
}

impl Candidate {
    /// Create a candidate with no attributes.
    pub fn new(id: impl Into<String>, name: impl Into<String>, base_relevance_score: f64) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            base_relevance_score,
            attributes: BTreeMap::new(),
        }
    }

    /// Set an attribute.
    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// String attribute lookup.
    pub fn attr_str(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).and_then(Value::as_str)
    }

    /// List-of-strings attribute, lowercased; empty when absent.
    pub fn attr_list(&self, key: &str) -> Vec<String> {
        self.attributes
            .get(key)
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_lowercase)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Brand, if known.
    pub fn brand(&self) -> Option<&str> {
        self.attr_str("brand")
    }

    /// Category, if known.
    pub fn category(&self) -> Option<&str> {
        self.attr_str("category")
    }
}

/// Everything a provider needs to answer one request.
#[derive(Debug, Clone)]
pub struct ProviderParams {
    /// Request ID (for logs)
    pub request_id: String,
    /// Requesting user
    pub user_id: String,
    /// Session the request belongs to
    pub session_id: String,
    /// Classified intent
    pub intent: Intent,
    /// Extracted attributes
    pub attributes: ExtractedAttributes,
    /// Exact (0.0) to broad (1.0) matching trade-off
    pub blend_weight: f64,
    /// Favour products matching the requested dietary tags
    pub dietary_emphasis: bool,
    /// Cart as of the start of the request
    pub cart: Cart,
}

/// Outcome of one provider call.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ProviderStatus {
    /// Answered in time
    Ok,
    /// Abandoned at the deadline
    TimedOut,
    /// Failed; the message explains why
    Failed {
        /// Error code
        code: String,
        /// Error message
        message: String,
    },
}

/// A cart change the pipeline records in long-term memory afterwards.
#[derive(Debug, Clone, PartialEq)]
pub enum CartEffect {
    /// Units were added
    Added {
        /// SKU added
        sku: String,
        /// Units added
        quantity: u32,
    },
    /// The order was confirmed with these contents
    Confirmed {
        /// Cart at confirmation
        order: Cart,
    },
}

/// What a provider produced.
#[derive(Debug, Clone)]
pub struct ProviderOutput {
    /// Which provider produced it
    pub provider: ProviderKind,
    /// Candidates in provider order
    pub candidates: Vec<Candidate>,
    /// Non-candidate payload (the cart, an order summary)
    pub data: Option<Value>,
    /// Call outcome
    pub status: ProviderStatus,
    /// Side effect to record in memory
    pub effect: Option<CartEffect>,
}

impl ProviderOutput {
    /// Successful output with candidates.
    pub fn ok(provider: ProviderKind, candidates: Vec<Candidate>) -> Self {
        Self {
            provider,
            candidates,
            data: None,
            status: ProviderStatus::Ok,
            effect: None,
        }
    }

    /// Degraded-empty output for a provider abandoned at the deadline.
    pub fn timed_out(provider: ProviderKind) -> Self {
        Self {
            status: ProviderStatus::TimedOut,
            ..Self::ok(provider, Vec::new())
        }
    }

    /// Empty output for a failed provider.
    pub fn failed(provider: ProviderKind, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status: ProviderStatus::Failed {
                code: code.into(),
                message: message.into(),
            },
            ..Self::ok(provider, Vec::new())
        }
    }

    /// Attach a data payload.
    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Attach a cart effect.
    #[must_use]
    pub fn with_effect(mut self, effect: CartEffect) -> Self {
        self.effect = Some(effect);
        self
    }

    /// Whether the provider answered successfully.
    pub fn is_ok(&self) -> bool {
        self.status == ProviderStatus::Ok
    }
}

/// A source of candidates.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CandidateProvider: Send + Sync {
    /// Which strategy slot this provider fills.
    fn kind(&self) -> ProviderKind;

    /// Answer one request. The caller also enforces `deadline`.
    async fn query(&self, params: &ProviderParams, deadline: Instant) -> Result<ProviderOutput>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_candidate_attributes() {
        let candidate = Candidate::new("BRD-001", "Country White Bread", 0.8)
            .with_attribute("brand", "Hearth & Mill")
            .with_attribute("contains", vec!["Gluten", "wheat"]);
        assert_eq!(candidate.brand(), Some("Hearth & Mill"));
        assert_eq!(candidate.attr_list("contains"), vec!["gluten", "wheat"]);
        assert!(candidate.attr_list("tags").is_empty());
        assert_eq!(candidate.category(), None);
    }

    #[test]
    fn test_output_constructors() {
        let out = ProviderOutput::timed_out(ProviderKind::Search);
        assert_eq!(out.status, ProviderStatus::TimedOut);
        assert!(out.candidates.is_empty());
        assert!(!out.is_ok());
        assert_eq!(ProviderKind::Complementary.to_string(), "complementary");
    }
}
