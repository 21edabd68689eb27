//! Core data types for the memory store.
//!
//! Short-term memory is the [`Session`] (cart + conversation turns).
//! Long-term memory is the per-user graph of [`Entity`] records joined by
//! [`Relationship`] edges.

use crate::cart::Cart;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Who produced a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    /// Shopper message
    User,
    /// Assistant response
    Assistant,
}

impl std::fmt::Display for TurnRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
        }
    }
}

/// A single conversation turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    /// Who sent it
    pub role: TurnRole,
    /// Message text
    pub text: String,
    /// Intent label the router assigned, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<String>,
    /// When the turn was recorded
    pub at: DateTime<Utc>,
}

impl Turn {
    /// Create a user turn stamped now.
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: TurnRole::User,
            text: text.into(),
            intent: None,
            at: Utc::now(),
        }
    }

    /// Create an assistant turn stamped now.
    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: TurnRole::Assistant,
            text: text.into(),
            intent: None,
            at: Utc::now(),
        }
    }

    /// Attach the intent label.
    #[must_use]
    pub fn with_intent(mut self, intent: impl Into<String>) -> Self {
        self.intent = Some(intent.into());
        self
    }
}

/// Per-conversation session state, owned by the memory store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Session ID (one per user/conversation pair)
    pub session_id: String,
    /// Owning user
    pub user_id: String,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Shopping cart, in insertion order
    pub cart: Cart,
    /// Conversation history, oldest first
    pub conversation_turns: Vec<Turn>,
    /// Last time the session was read or written
    pub last_active_at: DateTime<Utc>,
}

impl Session {
    pub(crate) fn new(session_id: &str, user_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            session_id: session_id.to_string(),
            user_id: user_id.to_string(),
            created_at: now,
            cart: Cart::default(),
            conversation_turns: Vec::new(),
            last_active_at: now,
        }
    }

    /// Append a turn, dropping the oldest ones beyond `max_turns`.
    pub(crate) fn push_turn(&mut self, turn: Turn, max_turns: usize) {
        self.last_active_at = turn.at.max(self.last_active_at);
        self.conversation_turns.push(turn);
        if max_turns > 0 && self.conversation_turns.len() > max_turns {
            let excess = self.conversation_turns.len() - max_turns;
            self.conversation_turns.drain(..excess);
        }
    }
}

/// Classification of a graph entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    /// A catalog product
    Product,
    /// A product brand
    Brand,
    /// A product category (e.g. `bakery`)
    Category,
    /// A shopper preference, including dietary restrictions
    Preference,
    /// Something that happened (an order, an occasion)
    Event,
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Product => write!(f, "product"),
            Self::Brand => write!(f, "brand"),
            Self::Category => write!(f, "category"),
            Self::Preference => write!(f, "preference"),
            Self::Event => write!(f, "event"),
        }
    }
}

impl EntityKind {
    /// Parse from string.
    pub fn from_str_lossy(s: &str) -> Self {
        match s {
            "product" => Self::Product,
            "brand" => Self::Brand,
            "category" => Self::Category,
            "preference" => Self::Preference,
            _ => Self::Event,
        }
    }

    /// Infer the kind from a canonical `kind:name` entity ID.
    pub fn from_entity_id(entity_id: &str) -> Self {
        entity_id
            .split_once(':')
            .map(|(prefix, _)| Self::from_str_lossy(prefix))
            .unwrap_or(Self::Event)
    }
}

/// Normalize an entity name for use in canonical IDs.
pub fn normalize_name(name: &str) -> String {
    name.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Build the canonical ID for an entity of `kind` named `name`.
pub fn entity_id(kind: EntityKind, name: &str) -> String {
    format!("{kind}:{}", normalize_name(name))
}

/// A recognized thing in a user's long-term memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Stable ID, canonically `kind:normalized name`
    pub entity_id: String,
    /// What kind of thing this is
    pub kind: EntityKind,
    /// Display name
    pub name: String,
    /// Free-form attributes (`sku`, `category`, `dietary`, `tag`, ...)
    pub attributes: BTreeMap<String, serde_json::Value>,
    /// Extraction confidence (0.0–1.0)
    pub confidence: f64,
    /// When this version of the entity was observed
    pub observed_at: DateTime<Utc>,
    /// Whether the durable sink has acknowledged this version
    #[serde(default)]
    pub persisted: bool,
}

impl Entity {
    /// Create an entity with the canonical ID, full confidence, observed now.
    pub fn new(kind: EntityKind, name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            entity_id: entity_id(kind, &name),
            kind,
            name,
            attributes: BTreeMap::new(),
            confidence: 1.0,
            observed_at: Utc::now(),
            persisted: false,
        }
    }

    /// Use a caller-supplied ID instead of the canonical one.
    #[must_use]
    pub fn with_entity_id(mut self, entity_id: impl Into<String>) -> Self {
        self.entity_id = entity_id.into();
        self
    }

    /// Set an attribute.
    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Set the confidence, clamped to 0.0–1.0.
    #[must_use]
    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }

    /// Set the observation timestamp.
    #[must_use]
    pub fn observed_at(mut self, at: DateTime<Utc>) -> Self {
        self.observed_at = at;
        self
    }

    /// String attribute lookup.
    pub fn attr_str(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).and_then(|v| v.as_str())
    }

    /// Placeholder for an entity only known through a relationship endpoint.
    pub(crate) fn placeholder(entity_id: &str, at: DateTime<Utc>) -> Self {
        let name = entity_id
            .split_once(':')
            .map(|(_, name)| name)
            .unwrap_or(entity_id)
            .to_string();
        Self {
            entity_id: entity_id.to_string(),
            kind: EntityKind::from_entity_id(entity_id),
            name,
            attributes: BTreeMap::new(),
            confidence: 0.0,
            observed_at: at,
            persisted: false,
        }
    }
}

/// Kind of a directed relationship between two entities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelationKind {
    /// Bought or carted in the same basket
    UsedTogether,
    /// The user searched for the target
    SearchedFor,
    /// The user added the target to a cart
    AddedToCart,
    /// The user prefers the target
    Prefers,
}

impl std::fmt::Display for RelationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UsedTogether => write!(f, "USED_TOGETHER"),
            Self::SearchedFor => write!(f, "SEARCHED_FOR"),
            Self::AddedToCart => write!(f, "ADDED_TO_CART"),
            Self::Prefers => write!(f, "PREFERS"),
        }
    }
}

impl RelationKind {
    /// Parse from string.
    pub fn from_str_lossy(s: &str) -> Option<Self> {
        match s {
            "USED_TOGETHER" => Some(Self::UsedTogether),
            "SEARCHED_FOR" => Some(Self::SearchedFor),
            "ADDED_TO_CART" => Some(Self::AddedToCart),
            "PREFERS" => Some(Self::Prefers),
            _ => None,
        }
    }
}

/// A relationship edge expressed with entity IDs (export / persistence form).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    /// Source entity ID
    pub from_entity: String,
    /// Target entity ID
    pub to_entity: String,
    /// Edge kind
    pub kind: RelationKind,
    /// Accumulated observation weight
    pub weight: f64,
    /// Most recent observation
    pub last_seen_at: DateTime<Utc>,
}

/// One observation of a relationship, merged into the graph at most once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationshipObservation {
    /// Deduplication key; replaying the same observation is a no-op
    pub observation_id: Uuid,
    /// Source entity ID
    pub from_entity: String,
    /// Target entity ID
    pub to_entity: String,
    /// Edge kind
    pub kind: RelationKind,
    /// Weight added to the edge
    pub weight: f64,
    /// When it was observed
    pub observed_at: DateTime<Utc>,
}

impl RelationshipObservation {
    /// A unit-weight observation stamped now.
    pub fn new(from_entity: impl Into<String>, to_entity: impl Into<String>, kind: RelationKind) -> Self {
        Self {
            observation_id: Uuid::new_v4(),
            from_entity: from_entity.into(),
            to_entity: to_entity.into(),
            kind,
            weight: 1.0,
            observed_at: Utc::now(),
        }
    }

    /// Set the weight increment.
    #[must_use]
    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    /// Set the observation timestamp.
    #[must_use]
    pub fn observed_at(mut self, at: DateTime<Utc>) -> Self {
        self.observed_at = at;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_kind_roundtrip() {
        for kind in [
            EntityKind::Product,
            EntityKind::Brand,
            EntityKind::Category,
            EntityKind::Preference,
            EntityKind::Event,
        ] {
            assert_eq!(EntityKind::from_str_lossy(&kind.to_string()), kind);
        }
    }

    #[test]
    fn test_canonical_entity_id() {
        assert_eq!(entity_id(EntityKind::Product, "  Whole   Milk "), "product:whole milk");
        assert_eq!(EntityKind::from_entity_id("brand:acme"), EntityKind::Brand);
        assert_eq!(EntityKind::from_entity_id("no-prefix"), EntityKind::Event);
    }

    #[test]
    fn test_relation_kind_display() {
        assert_eq!(RelationKind::UsedTogether.to_string(), "USED_TOGETHER");
        assert_eq!(
            RelationKind::from_str_lossy("ADDED_TO_CART"),
            Some(RelationKind::AddedToCart)
        );
        assert_eq!(RelationKind::from_str_lossy("LIKES"), None);
    }

    #[test]
    fn test_confidence_is_clamped() {
        let e = Entity::new(EntityKind::Preference, "vegan").with_confidence(1.7);
        assert_eq!(e.confidence, 1.0);
    }

    #[test]
    fn test_turn_history_is_capped() {
        let mut session = Session::new("s1", "u1", Utc::now());
        for i in 0..5 {
            session.push_turn(Turn::user(format!("msg {i}")), 3);
        }
        assert_eq!(session.conversation_turns.len(), 3);
        assert_eq!(session.conversation_turns[0].text, "msg 2");
    }
}
