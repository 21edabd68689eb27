//! Requests and per-request context

use crate::intent::{CartCommand, Intent};
use crate::router::Strategy;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use uuid::Uuid;

/// An incoming shopping request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ShoppingRequest {
    /// Free text, classified by the NLU collaborator
    Text {
        /// Requesting user
        user_id: String,
        /// Conversation session
        session_id: String,
        /// What the shopper typed
        text: String,
    },
    /// A cart command that skips classification
    Structured {
        /// Requesting user
        user_id: String,
        /// Conversation session
        session_id: String,
        /// The command
        command: CartCommand,
    },
}

impl ShoppingRequest {
    /// Free-text request.
    pub fn text(user_id: impl Into<String>, session_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self::Text {
            user_id: user_id.into(),
            session_id: session_id.into(),
            text: text.into(),
        }
    }

    /// Structured cart command.
    pub fn command(user_id: impl Into<String>, session_id: impl Into<String>, command: CartCommand) -> Self {
        Self::Structured {
            user_id: user_id.into(),
            session_id: session_id.into(),
            command,
        }
    }

    /// Requesting user.
    pub fn user_id(&self) -> &str {
        match self {
            Self::Text { user_id, .. } | Self::Structured { user_id, .. } => user_id,
        }
    }

    /// Conversation session.
    pub fn session_id(&self) -> &str {
        match self {
            Self::Text { session_id, .. } | Self::Structured { session_id, .. } => session_id,
        }
    }

    /// Text recorded as the user's turn.
    pub fn turn_text(&self) -> String {
        match self {
            Self::Text { text, .. } => text.clone(),
            Self::Structured { command, .. } => match command {
                CartCommand::Add { item, quantity } => format!("/add {item} {quantity}"),
                CartCommand::Remove { item } => format!("/remove {item}"),
                CartCommand::SetQuantity { item, quantity } => format!("/set {item} {quantity}"),
                CartCommand::View => "/cart".to_string(),
                CartCommand::Confirm => "/confirm".to_string(),
            },
        }
    }
}

/// Everything known about a request while it is being handled. Never persisted.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Unique request ID
    pub request_id: String,
    /// Conversation session
    pub session_id: String,
    /// Requesting user
    pub user_id: String,
    /// Raw text, for text requests
    pub raw_text: Option<String>,
    /// Detected intent (`Unknown` until classified)
    pub intent: Intent,
    /// Classifier confidence
    pub confidence: f64,
    /// Chosen strategy, once selected
    pub strategy: Option<Strategy>,
    /// Why classification failed, if it did
    pub classification_failure: Option<String>,
    /// Hard deadline for the whole request
    pub deadline: Instant,
    /// When handling started
    pub started: Instant,
}

impl RequestContext {
    /// Fresh context with a new request ID.
    pub fn new(user_id: impl Into<String>, session_id: impl Into<String>, deadline: Instant) -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            user_id: user_id.into(),
            raw_text: None,
            intent: Intent::Unknown,
            confidence: 0.0,
            strategy: None,
            classification_failure: None,
            deadline,
            started: Instant::now(),
        }
    }

    /// Set the raw text.
    #[must_use]
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.raw_text = Some(text.into());
        self
    }

    /// Set the detected intent.
    #[must_use]
    pub fn with_intent(mut self, intent: Intent, confidence: f64) -> Self {
        self.intent = intent;
        self.confidence = confidence;
        self
    }

    /// Set the chosen strategy.
    #[must_use]
    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = Some(strategy);
        self
    }
}
