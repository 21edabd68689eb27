//! Complementary items: `USED_TOGETHER` neighbours of what is in the cart.

use super::{Candidate, CandidateProvider, ProviderKind, ProviderOutput, ProviderParams};
use crate::catalog::Catalog;
use crate::error::Result;
use crate::signals::product_id;
use async_trait::async_trait;
use cartwise_memory::{MemoryStore, RelationKind};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::debug;

/// Suggests products the user previously bought together with cart items.
pub struct ComplementaryProvider {
    memory: Arc<MemoryStore>,
    catalog: Arc<Catalog>,
}

impl ComplementaryProvider {
    /// Create a provider over the shared memory store.
    pub fn new(memory: Arc<MemoryStore>, catalog: Arc<Catalog>) -> Self {
        Self { memory, catalog }
    }

    fn neighbours(&self, params: &ProviderParams) -> Vec<Candidate> {
        let graph = self.memory.snapshot_graph(&params.user_id);
        // sku -> (score, related cart sku), first-seen order kept via `order`
        let mut best: BTreeMap<String, (f64, String)> = BTreeMap::new();
        let mut order = Vec::new();

        for item in params.cart.items() {
            let Some(from) = graph.idx_of(&product_id(&item.sku)) else {
                continue;
            };
            for edge in graph.outgoing(from, RelationKind::UsedTogether) {
                let target = graph.entity(edge.to);
                let Some(sku) = target.attr_str("sku").map(str::to_uppercase) else {
                    continue;
                };
                if params.cart.contains(&sku) || self.catalog.get(&sku).is_none() {
                    continue;
                }
                let score = (0.3 + 0.2 * edge.weight.ln_1p()).min(1.0);
                match best.get_mut(&sku) {
                    Some(slot) if slot.0 >= score => {}
                    Some(slot) => *slot = (score, item.sku.clone()),
                    None => {
                        order.push(sku.clone());
                        best.insert(sku, (score, item.sku.clone()));
                    }
                }
            }
        }

        let mut candidates: Vec<Candidate> = order
            .into_iter()
            .filter_map(|sku| {
                let (score, related) = best.get(&sku)?;
                let product = self.catalog.get(&sku)?;
                Some(product.to_candidate(*score).with_attribute("related_to", related.clone()))
            })
            .collect();
        candidates.sort_by(|a, b| b.base_relevance_score.total_cmp(&a.base_relevance_score));
        candidates
    }
}

#[async_trait]
impl CandidateProvider for ComplementaryProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Complementary
    }

    async fn query(&self, params: &ProviderParams, _deadline: Instant) -> Result<ProviderOutput> {
        let candidates = self.neighbours(params);
        debug!(
            request_id = %params.request_id,
            provider = "complementary",
            cart_items = params.cart.len(),
            results = candidates.len(),
            "Complementary lookup complete"
        );
        Ok(ProviderOutput::ok(ProviderKind::Complementary, candidates))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intent::{ExtractedAttributes, Intent};
    use crate::signals::order_confirmed;
    use cartwise_memory::{Cart, CartMutation, MemoryConfig};
    use chrono::Utc;

    fn cart(skus: &[&str]) -> Cart {
        let mut cart = Cart::default();
        for sku in skus {
            cart.apply(&CartMutation::add(*sku, 1), Utc::now()).unwrap();
        }
        cart
    }

    fn params(cart: Cart) -> ProviderParams {
        ProviderParams {
            request_id: "r1".into(),
            user_id: "u1".into(),
            session_id: "s1".into(),
            intent: Intent::ProductSearch {
                query: "jam".into(),
            },
            attributes: ExtractedAttributes::default(),
            blend_weight: 0.5,
            dietary_emphasis: false,
            cart,
        }
    }

    #[tokio::test]
    async fn test_suggests_items_bought_together() {
        let catalog = Arc::new(Catalog::demo().unwrap());
        let memory = Arc::new(MemoryStore::new(MemoryConfig::default()));
        let (entities, observations) = order_confirmed(&catalog, &cart(&["BRD-001", "BTR-001"]), Utc::now());
        memory.record_entities("u1", &entities, &observations);

        let provider = ComplementaryProvider::new(memory, catalog);
        let out = provider
            .query(&params(cart(&["BRD-001"])), Instant::now())
            .await
            .unwrap();
        assert!(out.is_ok());
        assert_eq!(out.candidates.len(), 1);
        assert_eq!(out.candidates[0].id, "BTR-001");
        assert_eq!(out.candidates[0].attr_str("related_to"), Some("BRD-001"));
    }

    #[tokio::test]
    async fn test_excludes_items_already_in_cart() {
        let catalog = Arc::new(Catalog::demo().unwrap());
        let memory = Arc::new(MemoryStore::new(MemoryConfig::default()));
        let (entities, observations) = order_confirmed(&catalog, &cart(&["BRD-001", "BTR-001"]), Utc::now());
        memory.record_entities("u1", &entities, &observations);

        let provider = ComplementaryProvider::new(memory, catalog);
        let out = provider
            .query(&params(cart(&["BRD-001", "BTR-001"])), Instant::now())
            .await
            .unwrap();
        assert!(out.candidates.is_empty());
    }
}
