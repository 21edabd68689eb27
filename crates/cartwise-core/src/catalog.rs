//! Product catalog
//!
//! A small in-memory catalog loaded from JSON. The demo catalog is embedded
//! in the binary; deployments point `[catalog].path` at their own file.

use crate::error::{Error, Result};
use crate::providers::Candidate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use tracing::info;

const DEMO_CATALOG: &str = include_str!("../data/catalog.json");

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "any", "are", "buy", "can", "do", "find", "for", "get", "have", "i", "im",
    "is", "it", "looking", "m", "me", "my", "need", "of", "or", "please", "show", "some", "the",
    "there", "to", "want", "what", "with", "you",
];

/// Lowercase word tokens with stopwords removed and a light plural strip.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .filter(|t| !STOPWORDS.contains(&t.as_str()))
        .map(|t| stem(&t))
        .collect()
}

fn stem(token: &str) -> String {
    if token.len() > 3 && token.ends_with('s') && !token.ends_with("ss") {
        token[..token.len() - 1].to_string()
    } else {
        token.to_string()
    }
}

/// One catalog entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogProduct {
    /// Stock keeping unit
    pub sku: String,
    /// Display name
    pub name: String,
    /// Brand name
    pub brand: String,
    /// Category slug
    pub category: String,
    /// Unit price
    pub price: f64,
    /// Dietary tags the product satisfies (`vegan`, `gluten-free`)
    #[serde(default)]
    pub tags: Vec<String>,
    /// Allergens and ingredients the product contains
    #[serde(default)]
    pub contains: Vec<String>,
    /// Extra search terms
    #[serde(default)]
    pub keywords: Vec<String>,
}

impl CatalogProduct {
    /// Tokens of the name and brand.
    pub fn exact_terms(&self) -> BTreeSet<String> {
        tokenize(&self.name)
            .into_iter()
            .chain(tokenize(&self.brand))
            .collect()
    }

    /// Tokens of everything searchable.
    pub fn broad_terms(&self) -> BTreeSet<String> {
        let mut terms = self.exact_terms();
        terms.extend(tokenize(&self.category));
        for word in self.keywords.iter().chain(&self.tags) {
            terms.extend(tokenize(word));
        }
        terms
    }

    /// Candidate view of the product with the given relevance.
    pub fn to_candidate(&self, base_relevance_score: f64) -> Candidate {
        Candidate::new(self.sku.clone(), self.name.clone(), base_relevance_score)
            .with_attribute("sku", self.sku.clone())
            .with_attribute("brand", self.brand.clone())
            .with_attribute("category", self.category.clone())
            .with_attribute("price", self.price)
            .with_attribute("tags", self.tags.clone())
            .with_attribute("contains", self.contains.clone())
    }
}

#[derive(Deserialize)]
struct CatalogFile {
    products: Vec<CatalogProduct>,
}

/// In-memory product catalog.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    products: Vec<CatalogProduct>,
    by_sku: HashMap<String, usize>,
}

impl Catalog {
    /// Build from products; later duplicates of a SKU are ignored.
    pub fn new(products: Vec<CatalogProduct>) -> Self {
        let mut catalog = Self::default();
        for product in products {
            let key = product.sku.to_uppercase();
            if catalog.by_sku.contains_key(&key) {
                continue;
            }
            catalog.by_sku.insert(key, catalog.products.len());
            catalog.products.push(product);
        }
        catalog
    }

    /// Parse the JSON catalog format (`{"products": [...]}`).
    pub fn from_json(raw: &str) -> Result<Self> {
        let file: CatalogFile = serde_json::from_str(raw)?;
        Ok(Self::new(file.products))
    }

    /// Load a JSON catalog file.
    pub fn from_path(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::Catalog(format!("{}: {e}", path.display())))?;
        let catalog = Self::from_json(&raw)?;
        info!(path = %path.display(), products = catalog.len(), "Catalog loaded");
        Ok(catalog)
    }

    /// The embedded demo catalog.
    pub fn demo() -> Result<Self> {
        Self::from_json(DEMO_CATALOG)
    }

    /// Number of products.
    pub fn len(&self) -> usize {
        self.products.len()
    }

    /// Whether the catalog is empty.
    pub fn is_empty(&self) -> bool {
        self.products.is_empty()
    }

    /// All products in file order.
    pub fn products(&self) -> &[CatalogProduct] {
        &self.products
    }

    /// Look up a SKU (case-insensitive).
    pub fn get(&self, sku: &str) -> Option<&CatalogProduct> {
        self.by_sku
            .get(&sku.to_uppercase())
            .map(|&i| &self.products[i])
    }

    /// Lowercase brand names.
    pub fn brands(&self) -> BTreeSet<String> {
        self.products.iter().map(|p| p.brand.to_lowercase()).collect()
    }

    /// Category slugs.
    pub fn categories(&self) -> BTreeSet<String> {
        self.products.iter().map(|p| p.category.to_lowercase()).collect()
    }

    /// Every searchable token.
    pub fn vocabulary(&self) -> BTreeSet<String> {
        self.products.iter().flat_map(CatalogProduct::broad_terms).collect()
    }

    /// Resolve a SKU or product phrase to a product.
    ///
    /// Exact SKUs win; otherwise the product whose name shares the largest
    /// share of the phrase's tokens, first in file order on ties.
    pub fn resolve(&self, item: &str) -> Option<&CatalogProduct> {
        if let Some(product) = self.get(item.trim()) {
            return Some(product);
        }
        let wanted: BTreeSet<String> = tokenize(item).into_iter().collect();
        if wanted.is_empty() {
            return None;
        }
        let mut best: Option<(usize, &CatalogProduct)> = None;
        for product in &self.products {
            let hits = product.exact_terms().intersection(&wanted).count();
            if hits > 0 && best.is_none_or(|(top, _)| hits > top) {
                best = Some((hits, product));
            }
        }
        best.map(|(_, p)| p)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_demo_catalog_loads() {
        let catalog = Catalog::demo().unwrap();
        assert!(catalog.len() >= 20);
        assert_eq!(catalog.get("brd-001").unwrap().name, "Country White Bread");
        assert!(catalog.brands().contains("dalewood"));
        assert!(catalog.vocabulary().contains("bread"));
    }

    #[test]
    fn test_tokenize() {
        assert_eq!(tokenize("I'm looking for Breads!"), vec!["bread"]);
        assert_eq!(tokenize("gluten-free"), vec!["gluten", "free"]);
        assert_eq!(tokenize("glass"), vec!["glass"]);
    }

    #[test]
    fn test_resolve() {
        let catalog = Catalog::demo().unwrap();
        assert_eq!(catalog.resolve("MLK-002").unwrap().sku, "MLK-002");
        assert_eq!(catalog.resolve("oat milk").unwrap().sku, "MLK-002");
        assert_eq!(catalog.resolve("sourdough").unwrap().sku, "BRD-002");
        assert!(catalog.resolve("caviar").is_none());
    }

    #[test]
    fn test_duplicate_skus_ignored() {
        let raw = r#"{"products": [
            {"sku": "X-1", "name": "First", "brand": "B", "category": "c", "price": 1.0},
            {"sku": "x-1", "name": "Second", "brand": "B", "category": "c", "price": 2.0}
        ]}"#;
        let catalog = Catalog::from_json(raw).unwrap();
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.get("X-1").unwrap().name, "First");
    }
}
