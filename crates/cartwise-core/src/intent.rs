//! Intents and the attributes extracted alongside them.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A structured cart command, either parsed from text or sent directly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum CartCommand {
    /// Add `quantity` of an item (SKU or product phrase)
    Add {
        /// SKU or product phrase
        item: String,
        /// Units to add
        quantity: i64,
    },
    /// Remove an item entirely
    Remove {
        /// SKU or product phrase
        item: String,
    },
    /// Set the quantity of an item; 0 removes it
    SetQuantity {
        /// SKU or product phrase
        item: String,
        /// New quantity
        quantity: i64,
    },
    /// Show the cart
    View,
    /// Confirm the order and empty the cart
    Confirm,
}

impl CartCommand {
    /// Short operation name (for logs and analytics).
    #[must_use]
    pub fn op(&self) -> &'static str {
        match self {
            Self::Add { .. } => "add",
            Self::Remove { .. } => "remove",
            Self::SetQuantity { .. } => "set_quantity",
            Self::View => "view",
            Self::Confirm => "confirm",
        }
    }
}

/// What the shopper wants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Intent {
    /// Find products
    ProductSearch {
        /// Cleaned search phrase
        query: String,
    },
    /// Change or inspect the cart
    CartOperation {
        /// The command
        command: CartCommand,
    },
    /// A question or statement about diet
    DietaryQuery {
        /// Cleaned search phrase
        query: String,
        /// Dietary tags mentioned
        tags: Vec<String>,
    },
    /// Small talk
    Conversational,
    /// Could not be classified with enough confidence
    Unknown,
}

impl Intent {
    /// Payload-free label.
    #[must_use]
    pub fn kind(&self) -> IntentKind {
        match self {
            Self::ProductSearch { .. } => IntentKind::ProductSearch,
            Self::CartOperation { .. } => IntentKind::CartOperation,
            Self::DietaryQuery { .. } => IntentKind::DietaryQuery,
            Self::Conversational => IntentKind::Conversational,
            Self::Unknown => IntentKind::Unknown,
        }
    }

    /// Search phrase carried by the intent, if any.
    #[must_use]
    pub fn query(&self) -> Option<&str> {
        match self {
            Self::ProductSearch { query } | Self::DietaryQuery { query, .. } => Some(query),
            Self::CartOperation { .. } | Self::Conversational | Self::Unknown => None,
        }
    }
}

/// Intent label without payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentKind {
    /// Product search
    ProductSearch,
    /// Cart operation
    CartOperation,
    /// Dietary query
    DietaryQuery,
    /// Small talk
    Conversational,
    /// Unclassified
    Unknown,
}

impl fmt::Display for IntentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::ProductSearch => "product_search",
            Self::CartOperation => "cart_operation",
            Self::DietaryQuery => "dietary_query",
            Self::Conversational => "conversational",
            Self::Unknown => "unknown",
        };
        f.write_str(label)
    }
}

/// Whether a dietary statement restricts or favours a tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DietaryStance {
    /// Something to avoid
    Restriction,
    /// Something to favour
    Preference,
}

impl DietaryStance {
    /// Attribute value stored on `Preference` entities.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Restriction => "restriction",
            Self::Preference => "preference",
        }
    }
}

/// "I'm allergic to peanuts", "I prefer organic", ...
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DietaryStatement {
    /// Normalized tag (`gluten`, `organic`)
    pub tag: String,
    /// Restriction or preference
    pub stance: DietaryStance,
    /// How sure the extractor is
    pub confidence: f64,
}

/// Signals pulled from the raw text.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedAttributes {
    /// Brand names mentioned
    pub brands: Vec<String>,
    /// SKU tokens mentioned
    pub skus: Vec<String>,
    /// Categories mentioned
    pub categories: Vec<String>,
    /// Dietary tags mentioned
    pub dietary_tags: Vec<String>,
    /// Dietary statements about the shopper
    pub dietary_statements: Vec<DietaryStatement>,
    /// Vague or exploratory phrasing ("ideas for", "something healthy")
    pub exploratory: bool,
}

impl ExtractedAttributes {
    /// Whether the text pins down a brand or SKU.
    #[must_use]
    pub fn is_exact(&self) -> bool {
        !self.brands.is_empty() || !self.skus.is_empty()
    }
}
