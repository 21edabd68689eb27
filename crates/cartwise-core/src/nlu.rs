//! Intent classification
//!
//! [`IntentClassifier`] is the NLU seam. [`KeywordClassifier`] is the
//! built-in rule-based implementation: regex rules for cart commands,
//! greetings and dietary statements, then catalog vocabulary for searches.

use crate::catalog::{tokenize, Catalog};
use crate::error::Result;
use crate::intent::{
    CartCommand, DietaryStance, DietaryStatement, ExtractedAttributes, Intent,
};
use async_trait::async_trait;
use regex::Regex;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::LazyLock;


/// Session facts available to the classifier.
#[derive(Debug, Clone, Default)]
pub struct ClassifyContext {
    /// SKUs currently in the cart
    pub cart_skus: Vec<String>,
    /// Intent label of the previous user turn
    pub last_intent: Option<String>,
}

/// Classifier verdict.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Classification {
    /// Detected intent
    pub intent: Intent,
    /// Confidence (0.0–1.0)
    pub confidence: f64,
    /// Extracted signals
    pub attributes: ExtractedAttributes,
}

impl Classification {
    /// Fallback verdict.
    #[must_use]
    pub fn unknown() -> Self {
        Self {
            intent: Intent::Unknown,
            confidence: 0.0,
            attributes: ExtractedAttributes::default(),
        }
    }
}

/// NLU collaborator.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IntentClassifier: Send + Sync {
    /// Classify one user utterance.
    async fn classify(&self, text: &str, context: &ClassifyContext) -> Result<Classification>;
}

static CART_SET: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(?:please\s+)?(?:set|change|update)\s+(?:the\s+)?(?:quantity\s+of\s+)?(.+?)\s+(?:quantity\s+)?to\s+(\d+)\s*[.!]?\s*$")
        .expect("valid regex")
});

static CART_REMOVE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(?:please\s+)?(?:remove|delete|drop|take\s+out)\s+(?:the\s+)?(.+?)(?:\s+from\s+(?:my|the)\s+(?:cart|basket))?\s*[.!]?\s*$")
        .expect("valid regex")
});

static CART_ADD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(?:please\s+)?(?:add|put|throw)\s+(?:(\d+|a|an|one|two|three|four|five|six)\s+)?(.+?)(?:\s+(?:to|in|into)\s+(?:my|the)\s+(?:cart|basket))?\s*[.!]?\s*$")
        .expect("valid regex")
});

static CART_VIEW: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:(?:show|view|see)\s+(?:me\s+)?(?:my|the)\s+(?:cart|basket)|what'?s\s+in\s+(?:my|the)\s+(?:cart|basket))\b")
        .expect("valid regex")
});

static CART_CONFIRM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(?:please\s+)?(?:check\s*out|confirm(?:\s+(?:my|the))?(?:\s+order)?|place\s+(?:my\s+|the\s+)?order)\b")
        .expect("valid regex")
});

static GREETING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(?:hi|hello|hey|thanks|thank\s+you|bye|goodbye|good\s+(?:morning|afternoon|evening))\b")
        .expect("valid regex")
});

static SKU_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b[a-z]{3}-\d{3}\b").expect("valid regex"));

static EXPLORATORY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:ideas?|suggest\w*|recommend\w*|inspiration|something|anything|what\s+should|surprise\s+me|healthy|options)\b")
        .expect("valid regex")
});

static SEARCH_TRIGGER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:find|search(?:\s+for)?|looking\s+for|look\s+for|show\s+me|do\s+you\s+have|i\s+need|i\s+want|buy|get\s+me|got\s+any)\b")
        .expect("valid regex")
});

static DIETARY_TERM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(gluten|dairy|lactose|nut|peanut|egg|soy|wheat)[\s-]free\b|\b(vegan|vegetarian|organic)\b")
        .expect("valid regex")
});

static DIETARY_QUESTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(?:is|are|does|do|can|which|what)\b|\?\s*$|\bsafe\s+for\b|\bcontains?\b")
        .expect("valid regex")
});

/// (pattern, stance, confidence)
static DIETARY_STATEMENTS: LazyLock<Vec<(Regex, DietaryStance, f64)>> = LazyLock::new(|| {
    [
        (r"(?i)\b(?:i'?m|i\s+am)\s+(?:allergic|intolerant)\s+to\s+([a-z]+)", DietaryStance::Restriction, 0.9),
        (r"(?i)\b(?:can'?t|cannot)\s+(?:eat|have)\s+([a-z]+)", DietaryStance::Restriction, 0.8),
        (r"(?i)\b(?:i\s+)?(?:avoid|don'?t\s+eat|stay\s+away\s+from)\s+([a-z]+)", DietaryStance::Restriction, 0.6),
        (r"(?i)\b(?:i'?m|i\s+am)\s+(vegan|vegetarian)\b", DietaryStance::Preference, 0.8),
        (r"(?i)\bi\s+(?:prefer|love|like|only\s+buy)\s+(organic|vegan|vegetarian)\b", DietaryStance::Preference, 0.6),
    ]
    .into_iter()
    .map(|(pattern, stance, confidence)| {
        (Regex::new(pattern).expect("valid regex"), stance, confidence)
    })
    .collect()
});

fn normalize_dietary_tag(raw: &str) -> String {
    match raw.to_lowercase().as_str() {
        "dairy" | "milk" | "lactose" => "dairy".to_string(),
        "gluten" | "wheat" => "gluten".to_string(),
        "nut" | "nuts" => "nuts".to_string(),
        "peanut" | "peanuts" => "peanuts".to_string(),
        "egg" | "eggs" => "eggs".to_string(),
        "almond" | "almonds" => "almonds".to_string(),
        other => other.to_string(),
    }
}

fn parse_quantity(raw: Option<&str>) -> i64 {
    match raw.map(str::to_lowercase).as_deref() {
        None | Some("a" | "an" | "one") => 1,
        Some("two") => 2,
        Some("three") => 3,
        Some("four") => 4,
        Some("five") => 5,
        Some("six") => 6,
        Some(n) => n.parse().unwrap_or(1),
    }
}

/// Rule-based classifier driven by regexes and catalog vocabulary.
#[derive(Debug, Clone, Default)]
pub struct KeywordClassifier {
    brands: BTreeSet<String>,
    categories: BTreeSet<String>,
    vocabulary: BTreeSet<String>,
}

impl KeywordClassifier {
    /// Classifier with no catalog knowledge.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Classifier that knows the catalog's brands, categories and terms.
    #[must_use]
    pub fn from_catalog(catalog: &Catalog) -> Self {
        Self::new()
            .with_brands(catalog.brands())
            .with_categories(catalog.categories())
            .with_vocabulary(catalog.vocabulary())
    }

    /// Set the known brand names
    #[must_use]
    pub fn with_brands(mut self, brands: impl IntoIterator<Item = String>) -> Self {
        self.brands = brands.into_iter().map(|b| b.to_lowercase()).collect();
        self
    }

    /// Set the known categories
    #[must_use]
    pub fn with_categories(mut self, categories: impl IntoIterator<Item = String>) -> Self {
        self.categories = categories.into_iter().map(|c| c.to_lowercase()).collect();
        self
    }

    /// Set the searchable vocabulary
    #[must_use]
    pub fn with_vocabulary(mut self, vocabulary: impl IntoIterator<Item = String>) -> Self {
        self.vocabulary = vocabulary.into_iter().collect();
        self
    }

    fn cart_command(text: &str) -> Option<CartCommand> {
        if let Some(caps) = CART_SET.captures(text) {
            return Some(CartCommand::SetQuantity {
                item: caps[1].trim().to_string(),
                quantity: caps[2].parse().unwrap_or(0),
            });
        }
        if CART_VIEW.is_match(text) {
            return Some(CartCommand::View);
        }
        if CART_CONFIRM.is_match(text) {
            return Some(CartCommand::Confirm);
        }
        if let Some(caps) = CART_REMOVE.captures(text) {
            return Some(CartCommand::Remove {
                item: caps[1].trim().to_string(),
            });
        }
        if let Some(caps) = CART_ADD.captures(text) {
            return Some(CartCommand::Add {
                item: caps[2].trim().to_string(),
                quantity: parse_quantity(caps.get(1).map(|m| m.as_str())),
            });
        }
        None
    }

    /// Pull brands, SKUs, categories and dietary signals from the text.
    pub fn extract(&self, text: &str) -> ExtractedAttributes {
        let lower = format!(" {} ", text.to_lowercase());
        let padded = |term: &str| lower.contains(&format!(" {term} "));

        let mut dietary_tags = Vec::new();
        for caps in DIETARY_TERM.captures_iter(text) {
            let tag = match (caps.get(1), caps.get(2)) {
                (Some(base), _) => format!("{}-free", normalize_dietary_tag(base.as_str())),
                (None, Some(word)) => word.as_str().to_lowercase(),
                (None, None) => continue,
            };
            if !dietary_tags.contains(&tag) {
                dietary_tags.push(tag);
            }
        }

        let mut dietary_statements: Vec<DietaryStatement> = Vec::new();
        for (pattern, stance, confidence) in DIETARY_STATEMENTS.iter() {
            for caps in pattern.captures_iter(text) {
                let tag = normalize_dietary_tag(&caps[1]);
                if dietary_statements.iter().any(|s| s.tag == tag) {
                    continue;
                }
                dietary_statements.push(DietaryStatement {
                    tag,
                    stance: *stance,
                    confidence: *confidence,
                });
            }
        }

        ExtractedAttributes {
            brands: self.brands.iter().filter(|b| padded(b)).cloned().collect(),
            skus: SKU_TOKEN
                .find_iter(text)
                .map(|m| m.as_str().to_uppercase())
                .collect(),
            categories: self
                .categories
                .iter()
                .filter(|c| padded(c))
                .cloned()
                .collect(),
            dietary_tags,
            dietary_statements,
            exploratory: EXPLORATORY.is_match(text),
        }
    }

    fn clean_query(text: &str) -> String {
        let stripped = SEARCH_TRIGGER.replace_all(text, " ");
        stripped
            .trim_matches(|c: char| c.is_whitespace() || c == '?' || c == '.' || c == '!')
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Classify synchronously.
    pub fn classify_text(&self, text: &str) -> Classification {
        let text = text.trim();
        if text.is_empty() {
            return Classification::unknown();
        }
        let attributes = self.extract(text);

        if let Some(command) = Self::cart_command(text) {
            return Classification {
                intent: Intent::CartOperation { command },
                confidence: 0.95,
                attributes,
            };
        }

        let query = Self::clean_query(text);
        if !attributes.dietary_statements.is_empty()
            || (!attributes.dietary_tags.is_empty() && DIETARY_QUESTION.is_match(text))
        {
            let mut tags = attributes.dietary_tags.clone();
            for statement in &attributes.dietary_statements {
                if !tags.contains(&statement.tag) {
                    tags.push(statement.tag.clone());
                }
            }
            return Classification {
                intent: Intent::DietaryQuery { query, tags },
                confidence: 0.85,
                attributes,
            };
        }

        let known_terms = tokenize(&query)
            .iter()
            .filter(|t| self.vocabulary.contains(*t))
            .count();

        if GREETING.is_match(text) && known_terms == 0 {
            return Classification {
                intent: Intent::Conversational,
                confidence: 0.9,
                attributes,
            };
        }

        let confidence = if SEARCH_TRIGGER.is_match(text) || attributes.is_exact() {
            0.8
        } else if known_terms > 0 {
            0.6
        } else if attributes.exploratory {
            0.5
        } else {
            return Classification {
                intent: Intent::Unknown,
                confidence: 0.2,
                attributes,
            };
        };

        Classification {
            intent: Intent::ProductSearch { query },
            confidence,
            attributes,
        }
    }
}

#[async_trait]
impl IntentClassifier for KeywordClassifier {
    async fn classify(&self, text: &str, _context: &ClassifyContext) -> Result<Classification> {
        Ok(self.classify_text(text))
    }
}
