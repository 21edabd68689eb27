//! Personalization & ranking
//!
//! Reranks provider candidates against a read-only snapshot of the user's
//! memory:
//!
//! ```text
//! final_score = base_relevance_score + Σ boost
//! ```
//!
//! Every boost carries a label and an explanation. Dietary conflicts at or
//! above the configured confidence are removed before scoring; weaker ones
//! only push the candidate down. The result is a pure function of the
//! candidates, the snapshot and `now`, sorted stably so equal scores keep
//! provider order.

use crate::config::RankingConfig;
use crate::providers::Candidate;
use crate::signals::{brand_id, category_id, product_id, PURCHASED};
use cartwise_memory::{Cart, DietaryProfile, EntityGraph, MemoryStore, RelationKind};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

#[cfg(test)]
mod tests;

/// Which signal produced a boost.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BoostLabel {
    /// The user bought from this category before
    PastPurchaseCategory,
    /// The candidate matches a dietary preference
    DietaryPreference,
    /// The candidate was bought together with a cart or past item
    UsedTogether,
    /// The user bought this brand before
    PreferredBrand,
    /// The candidate contains something the user may avoid
    DietaryConflict,
}

impl BoostLabel {
    /// Wire label.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PastPurchaseCategory => "past_purchase_category",
            Self::DietaryPreference => "dietary_preference",
            Self::UsedTogether => "used_together",
            Self::PreferredBrand => "preferred_brand",
            Self::DietaryConflict => "dietary_conflict",
        }
    }
}

impl fmt::Display for BoostLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One labelled score adjustment.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Boost {
    /// Signal that produced it
    pub label: BoostLabel,
    /// Signed amount added to the score
    pub amount: f64,
    /// Human-readable reason
    pub explanation: String,
}

/// A candidate with its personalized score.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedCandidate {
    /// Provider candidate
    #[serde(flatten)]
    pub candidate: Candidate,
    /// Base relevance plus all boosts
    pub final_score: f64,
    /// Applied boosts, in evaluation order
    pub boosts: Vec<Boost>,
}

/// A candidate removed by a dietary restriction.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FilteredCandidate {
    /// Candidate ID
    pub id: String,
    /// Candidate name
    pub name: String,
    /// Restriction that excluded it
    pub restriction: String,
    /// Confidence of that restriction
    pub confidence: f64,
}

/// Reranked output.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RankedCandidates {
    /// Candidates, best first
    pub candidates: Vec<RankedCandidate>,
    /// Candidates excluded by high-confidence restrictions
    pub filtered: Vec<FilteredCandidate>,
    /// Distinct signals that affected the ranking
    pub signals_used: usize,
}

impl RankedCandidates {
    /// Wrap candidates without personalization, keeping their order.
    pub fn passthrough(candidates: Vec<Candidate>) -> Self {
        Self {
            candidates: candidates
                .into_iter()
                .map(|candidate| RankedCandidate {
                    final_score: candidate.base_relevance_score,
                    candidate,
                    boosts: Vec::new(),
                })
                .collect(),
            filtered: Vec::new(),
            signals_used: 0,
        }
    }

    /// Number of ranked candidates.
    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    /// Whether nothing survived ranking.
    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }
}

/// What the reranker knows about a user for one request.
#[derive(Debug, Clone)]
pub struct ProfileSnapshot {
    graph: Arc<EntityGraph>,
    dietary: Arc<DietaryProfile>,
    cart_skus: BTreeSet<String>,
}

impl ProfileSnapshot {
    /// Snapshot built from explicit parts.
    pub fn new(graph: Arc<EntityGraph>, dietary: Arc<DietaryProfile>) -> Self {
        Self {
            graph,
            dietary,
            cart_skus: BTreeSet::new(),
        }
    }

    /// Snapshot deriving the dietary profile from the graph itself.
    pub fn from_graph(graph: Arc<EntityGraph>) -> Self {
        let dietary = Arc::new(DietaryProfile::from_graph(&graph));
        Self::new(graph, dietary)
    }

    /// Take the user's current graph and dietary profile from memory.
    pub fn capture(memory: &MemoryStore, user_id: &str, cart: &Cart) -> Self {
        Self::new(
            memory.snapshot_graph(user_id).graph(),
            memory.dietary_profile(user_id),
        )
        .with_cart(cart)
    }

    /// Items currently in the cart.
    #[must_use]
    pub fn with_cart(mut self, cart: &Cart) -> Self {
        self.cart_skus = cart.skus().into_iter().map(|s| s.to_uppercase()).collect();
        self
    }

    /// Dietary profile in use.
    pub fn dietary(&self) -> &DietaryProfile {
        &self.dietary
    }

    /// Whether there is nothing to personalize with.
    pub fn is_cold(&self) -> bool {
        self.graph.is_empty() && self.dietary.is_empty() && self.cart_skus.is_empty()
    }

    fn purchased(&self, entity_id: &str) -> bool {
        self.graph
            .get(entity_id)
            .and_then(|e| e.attributes.get(PURCHASED))
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

/// Exponential decay for evidence `age_days` old.
///
/// Returns 1.0 when no half-life is set or the evidence is from the future.
pub fn recency_decay(age_days: f64, half_life_days: Option<f64>) -> f64 {
    match half_life_days {
        Some(half_life) if half_life > 0.0 && age_days > 0.0 => 0.5_f64.powf(age_days / half_life),
        _ => 1.0,
    }
}

/// Deterministic reranker.
#[derive(Debug, Clone, Default)]
pub struct PersonalizationEngine {
    config: RankingConfig,
}

impl PersonalizationEngine {
    /// Create an engine.
    pub fn new(config: RankingConfig) -> Self {
        Self { config }
    }

    /// Ranking configuration.
    pub fn config(&self) -> &RankingConfig {
        &self.config
    }

    /// Filter, boost and sort `candidates` for one user.
    pub fn rerank(
        &self,
        candidates: Vec<Candidate>,
        profile: &ProfileSnapshot,
        now: DateTime<Utc>,
    ) -> RankedCandidates {
        let mut ranked = Vec::with_capacity(candidates.len());
        let mut filtered = Vec::new();
        let mut labels = BTreeSet::new();

        for candidate in candidates {
            if let Some(hit) = self.hard_restriction(&candidate, profile) {
                debug!(
                    candidate = %candidate.id,
                    restriction = %hit.restriction,
                    confidence = hit.confidence,
                    "Candidate filtered by dietary restriction"
                );
                labels.insert(BoostLabel::DietaryConflict);
                filtered.push(hit);
                continue;
            }

            let boosts = self.boosts(&candidate, profile, now);
            labels.extend(boosts.iter().map(|b| b.label));
            let final_score = candidate.base_relevance_score + boosts.iter().map(|b| b.amount).sum::<f64>();
            ranked.push(RankedCandidate {
                candidate,
                final_score,
                boosts,
            });
        }

        // `sort_by` is stable: ties keep provider order
        ranked.sort_by(|a, b| b.final_score.total_cmp(&a.final_score));

        RankedCandidates {
            candidates: ranked,
            filtered,
            signals_used: labels.len(),
        }
    }

    fn hard_restriction(&self, candidate: &Candidate, profile: &ProfileSnapshot) -> Option<FilteredCandidate> {
        let contains = candidate.attr_list("contains");
        profile
            .dietary
            .restrictions
            .iter()
            .filter(|tag| contains.contains(tag))
            .map(|tag| (tag, profile.dietary.restriction_confidence(tag)))
            .find(|(_, confidence)| *confidence >= self.config.dietary_confidence_threshold)
            .map(|(tag, confidence)| FilteredCandidate {
                id: candidate.id.clone(),
                name: candidate.name.clone(),
                restriction: tag.clone(),
                confidence,
            })
    }

    fn boosts(&self, candidate: &Candidate, profile: &ProfileSnapshot, now: DateTime<Utc>) -> Vec<Boost> {
        let mut boosts = Vec::new();

        if let Some(category) = candidate.category() {
            if profile.purchased(&category_id(category)) {
                boosts.push(Boost {
                    label: BoostLabel::PastPurchaseCategory,
                    amount: self.config.past_purchase_boost,
                    explanation: format!("You have bought {category} before"),
                });
            }
        }

        if let Some(brand) = candidate.brand() {
            if profile.purchased(&brand_id(brand)) {
                boosts.push(Boost {
                    label: BoostLabel::PreferredBrand,
                    amount: self.config.preferred_brand_boost,
                    explanation: format!("You have bought {brand} before"),
                });
            }
        }

        let tags = candidate.attr_list("tags");
        let matched: Vec<&String> = profile
            .dietary
            .preferences
            .iter()
            .filter(|p| tags.contains(p))
            .collect();
        if let Some(confidence) = matched
            .iter()
            .map(|tag| profile.dietary.preference_confidence(tag))
            .max_by(f64::total_cmp)
        {
            let names: Vec<&str> = matched.iter().map(|s| s.as_str()).collect();
            boosts.push(Boost {
                label: BoostLabel::DietaryPreference,
                amount: self.config.dietary_preference_boost * confidence,
                explanation: format!("Matches your preference for {}", names.join(", ")),
            });
        }

        if let Some(boost) = self.used_together(candidate, profile, now) {
            boosts.push(boost);
        }

        let contains = candidate.attr_list("contains");
        let conflicts: Vec<&String> = profile
            .dietary
            .restrictions
            .iter()
            .filter(|tag| contains.contains(tag))
            .collect();
        if let Some(confidence) = conflicts
            .iter()
            .map(|tag| profile.dietary.restriction_confidence(tag))
            .max_by(f64::total_cmp)
        {
            let names: Vec<&str> = conflicts.iter().map(|s| s.as_str()).collect();
            boosts.push(Boost {
                label: BoostLabel::DietaryConflict,
                amount: -self.config.dietary_penalty * confidence,
                explanation: format!("Contains {}, which you may avoid", names.join(", ")),
            });
        }

        boosts
    }

    /// Strongest `USED_TOGETHER` evidence pointing at the candidate.
    fn used_together(&self, candidate: &Candidate, profile: &ProfileSnapshot, now: DateTime<Utc>) -> Option<Boost> {
        let graph = &profile.graph;
        let target = graph.idx_of(&product_id(&candidate.id))?;
        let mut best: Option<(f64, String, bool)> = None;

        for edge in graph.incoming(target, RelationKind::UsedTogether) {
            let related = graph.entity(edge.from);
            let related_sku = related
                .attr_str("sku")
                .map(str::to_uppercase)
                .or_else(|| related.entity_id.strip_prefix("product:").map(str::to_uppercase))
                .unwrap_or_else(|| related.name.clone());
            let in_cart = profile.cart_skus.contains(&related_sku);

            let age_days = (now - edge.last_seen_at).num_seconds() as f64 / 86_400.0;
            let mut amount = self.config.used_together_boost
                * edge.weight.ln_1p()
                * recency_decay(age_days, self.config.recency_half_life_days);
            if in_cart {
                amount *= 2.0;
            }

            if best.as_ref().map_or(true, |(a, _, _)| amount > *a) {
                best = Some((amount, related.name.clone(), in_cart));
            }
        }

        let (amount, name, in_cart) = best?;
        if amount <= 0.0 {
            return None;
        }
        let explanation = if in_cart {
            format!("Often bought with {name}, which is in your cart")
        } else {
            format!("Often bought with {name}")
        };
        Some(Boost {
            label: BoostLabel::UsedTogether,
            amount,
            explanation,
        })
    }
}
