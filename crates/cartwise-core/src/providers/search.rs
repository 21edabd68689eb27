//! Catalog search with a keyword/broad blend.
//!
//! `exact` scores how much of the query hits product names, brands and
//! SKUs; `broad` also counts categories, keywords and dietary tags. The
//! blend weight from the strategy mixes the two:
//! `base = (1 - w) * exact + w * broad`.

use super::{CandidateProvider, ProviderKind, ProviderOutput, ProviderParams};
use crate::catalog::{tokenize, Catalog, CatalogProduct};
use crate::error::Result;
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::debug;

/// Default number of candidates returned.
const DEFAULT_LIMIT: usize = 10;

/// Share of the score reserved for satisfying a requested dietary tag.
const DIETARY_EMPHASIS: f64 = 0.25;

/// In-memory hybrid search over the catalog.
pub struct CatalogSearchProvider {
    catalog: Arc<Catalog>,
    limit: usize,
}

impl CatalogSearchProvider {
    /// Search the given catalog.
    pub fn new(catalog: Arc<Catalog>) -> Self {
        Self {
            catalog,
            limit: DEFAULT_LIMIT,
        }
    }

    /// Set the maximum number of candidates
    #[must_use]
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit.max(1);
        self
    }

    fn score(
        product: &CatalogProduct,
        tokens: &[String],
        skus: &BTreeSet<String>,
        blend_weight: f64,
    ) -> f64 {
        if skus.contains(&product.sku.to_uppercase()) {
            return 1.0;
        }
        if tokens.is_empty() {
            return 0.0;
        }
        let exact_terms = product.exact_terms();
        let broad_terms = product.broad_terms();
        let total = tokens.len() as f64;
        let exact = tokens.iter().filter(|t| exact_terms.contains(*t)).count() as f64 / total;
        let broad = tokens.iter().filter(|t| broad_terms.contains(*t)).count() as f64 / total;
        (1.0 - blend_weight) * exact + blend_weight * broad
    }

    /// Rank the catalog for a query; pure and deterministic.
    pub fn search(&self, params: &ProviderParams) -> Vec<super::Candidate> {
        let query = params.intent.query().unwrap_or_default();
        let tokens = tokenize(query);
        let skus: BTreeSet<String> = params.attributes.skus.iter().map(|s| s.to_uppercase()).collect();
        let wanted_tags: BTreeSet<String> = if params.dietary_emphasis {
            params
                .attributes
                .dietary_tags
                .iter()
                .map(|t| t.to_lowercase())
                .collect()
        } else {
            BTreeSet::new()
        };

        let mut scored: Vec<(f64, &CatalogProduct)> = self
            .catalog
            .products()
            .iter()
            .filter_map(|product| {
                let mut score = Self::score(product, &tokens, &skus, params.blend_weight);
                if score <= 0.0 {
                    return None;
                }
                if !wanted_tags.is_empty() {
                    let satisfies = product
                        .tags
                        .iter()
                        .any(|t| wanted_tags.contains(&t.to_lowercase()));
                    score = (1.0 - DIETARY_EMPHASIS) * score
                        + if satisfies { DIETARY_EMPHASIS } else { 0.0 };
                }
                Some((score.min(1.0), product))
            })
            .collect();

        // stable: equal scores keep catalog order
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));
        scored.truncate(self.limit);

        scored
            .into_iter()
            .map(|(score, product)| product.to_candidate(score))
            .collect()
    }
}

#[async_trait]
impl CandidateProvider for CatalogSearchProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Search
    }

    async fn query(&self, params: &ProviderParams, _deadline: Instant) -> Result<ProviderOutput> {
        let candidates = self.search(params);
        debug!(
            request_id = %params.request_id,
            provider = "search",
            blend_weight = params.blend_weight,
            results = candidates.len(),
            "Catalog search complete"
        );
        Ok(ProviderOutput::ok(ProviderKind::Search, candidates))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intent::{ExtractedAttributes, Intent};
    use cartwise_memory::Cart;

    fn params(query: &str, blend_weight: f64, attributes: ExtractedAttributes) -> ProviderParams {
        ProviderParams {
            request_id: "r1".into(),
            user_id: "u1".into(),
            session_id: "s1".into(),
            intent: Intent::ProductSearch {
                query: query.into(),
            },
            attributes,
            blend_weight,
            dietary_emphasis: false,
            cart: Cart::default(),
        }
    }

    fn provider() -> CatalogSearchProvider {
        CatalogSearchProvider::new(Arc::new(Catalog::demo().unwrap()))
    }

    #[test]
    fn test_bread_returns_breads_first() {
        let results = provider().search(&params("bread", 0.5, ExtractedAttributes::default()));
        assert!(results.len() >= 4);
        assert!(results[..4].iter().all(|c| c.name.contains("Bread")));
        // ties keep catalog order
        assert_eq!(results[0].id, "BRD-001");
    }

    #[test]
    fn test_sku_token_is_exact_hit() {
        let attrs = ExtractedAttributes {
            skus: vec!["mlk-002".into()],
            ..ExtractedAttributes::default()
        };
        let results = provider().search(&params("mlk-002", 0.2, attrs));
        assert_eq!(results[0].id, "MLK-002");
        assert_eq!(results[0].base_relevance_score, 1.0);
    }

    #[test]
    fn test_blend_weight_shifts_toward_broad_matches() {
        // "breakfast" is only a keyword, never a name token
        let exact = provider().search(&params("breakfast", 0.0, ExtractedAttributes::default()));
        let broad = provider().search(&params("breakfast", 1.0, ExtractedAttributes::default()));
        assert!(exact.is_empty());
        assert!(!broad.is_empty());
    }

    #[test]
    fn test_dietary_emphasis() {
        let attrs = ExtractedAttributes {
            dietary_tags: vec!["gluten-free".into()],
            ..ExtractedAttributes::default()
        };
        let mut p = params("bread", 0.5, attrs);
        p.dietary_emphasis = true;
        let results = provider().search(&p);
        assert_eq!(results[0].id, "BRD-003");
    }

    #[test]
    fn test_limit() {
        let results = provider()
            .with_limit(2)
            .search(&params("milk", 0.8, ExtractedAttributes::default()));
        assert_eq!(results.len(), 2);
    }
}
