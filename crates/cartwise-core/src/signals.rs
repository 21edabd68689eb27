//! Memory observations derived from shopping activity.
//!
//! Products are keyed by SKU (`product:brd-001`) so cart rows, search
//! results and graph entities line up without name matching.

use crate::catalog::Catalog;
use crate::intent::DietaryStatement;
use cartwise_memory::{
    entity_id, Cart, Entity, EntityKind, RelationKind, RelationshipObservation,
};
use chrono::{DateTime, Utc};

/// Attribute marking brands, categories and products from a confirmed order.
pub const PURCHASED: &str = "purchased";

/// Graph ID of a product.
pub fn product_id(sku: &str) -> String {
    entity_id(EntityKind::Product, sku)
}

/// Graph ID of a brand.
pub fn brand_id(brand: &str) -> String {
    entity_id(EntityKind::Brand, brand)
}

/// Graph ID of a category.
pub fn category_id(category: &str) -> String {
    entity_id(EntityKind::Category, category)
}

/// Product entity for a SKU, enriched from the catalog when known.
pub fn product_entity(catalog: &Catalog, sku: &str, at: DateTime<Utc>) -> Entity {
    let entity = match catalog.get(sku) {
        Some(p) => Entity::new(EntityKind::Product, p.name.clone())
            .with_attribute("brand", p.brand.clone())
            .with_attribute("category", p.category.clone()),
        None => Entity::new(EntityKind::Product, sku),
    };
    entity
        .with_entity_id(product_id(sku))
        .with_attribute("sku", sku.to_uppercase())
        .observed_at(at)
}

/// A search: the query as an event linked to what it surfaced.
pub fn searched_for(
    query: &str,
    result_skus: &[String],
    at: DateTime<Utc>,
) -> (Vec<Entity>, Vec<RelationshipObservation>) {
    let event = Entity::new(EntityKind::Event, format!("search {query}"))
        .with_attribute("query", query)
        .observed_at(at);
    let observations = result_skus
        .iter()
        .map(|sku| {
            RelationshipObservation::new(event.entity_id.clone(), product_id(sku), RelationKind::SearchedFor)
                .observed_at(at)
        })
        .collect();
    (vec![event], observations)
}

/// Units added to a session's cart.
pub fn added_to_cart(
    catalog: &Catalog,
    session_id: &str,
    sku: &str,
    quantity: u32,
    at: DateTime<Utc>,
) -> (Vec<Entity>, Vec<RelationshipObservation>) {
    let session = Entity::new(EntityKind::Event, format!("session {session_id}")).observed_at(at);
    let observation = RelationshipObservation::new(
        session.entity_id.clone(),
        product_id(sku),
        RelationKind::AddedToCart,
    )
    .with_weight(f64::from(quantity))
    .observed_at(at);
    (
        vec![session, product_entity(catalog, sku, at)],
        vec![observation],
    )
}

/// A confirmed order: purchased products, brands and categories, and a
/// `USED_TOGETHER` edge each way between every pair of products.
pub fn order_confirmed(
    catalog: &Catalog,
    order: &Cart,
    at: DateTime<Utc>,
) -> (Vec<Entity>, Vec<RelationshipObservation>) {
    let mut entities = Vec::new();
    for item in order.items() {
        entities.push(product_entity(catalog, &item.sku, at).with_attribute(PURCHASED, true));
        if let Some(product) = catalog.get(&item.sku) {
            entities.push(
                Entity::new(EntityKind::Brand, product.brand.clone())
                    .with_attribute(PURCHASED, true)
                    .observed_at(at),
            );
            entities.push(
                Entity::new(EntityKind::Category, product.category.clone())
                    .with_attribute(PURCHASED, true)
                    .observed_at(at),
            );
        }
    }

    let skus = order.skus();
    let mut observations = Vec::new();
    for (i, a) in skus.iter().enumerate() {
        for b in &skus[i + 1..] {
            for (from, to) in [(a, b), (b, a)] {
                observations.push(
                    RelationshipObservation::new(product_id(from), product_id(to), RelationKind::UsedTogether)
                        .observed_at(at),
                );
            }
        }
    }
    (entities, observations)
}

/// Dietary statements as `Preference` entities, one per (stance, tag) so
/// avoiding and favouring the same tag are tracked separately.
pub fn dietary_preferences(statements: &[DietaryStatement], at: DateTime<Utc>) -> Vec<Entity> {
    statements
        .iter()
        .map(|s| {
            Entity::new(EntityKind::Preference, format!("{} {}", s.stance.as_str(), s.tag))
                .with_attribute("dietary", s.stance.as_str())
                .with_attribute("tag", s.tag.clone())
                .with_confidence(s.confidence)
                .observed_at(at)
        })
        .collect()
}
