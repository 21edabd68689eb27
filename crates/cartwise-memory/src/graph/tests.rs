use super::*;
use crate::types::{entity_id, EntityKind, RelationKind, RelationshipObservation};
use chrono::{Duration, TimeZone, Utc};

fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

fn milk() -> Entity {
    Entity::new(EntityKind::Product, "Milk")
        .with_attribute("sku", "sku-milk")
        .observed_at(at(0))
}

#[test]
fn test_insert_new_entity() {
    let mut graph = EntityGraph::new();
    let report = graph.merge(&[milk()], &[]);
    assert_eq!(report.changed_entities.len(), 1);
    assert_eq!(graph.version(), 1);
    let e = graph.get("product:milk").unwrap();
    assert_eq!(e.attr_str("sku"), Some("sku-milk"));
    assert!(!e.persisted);
}

#[test]
fn test_higher_confidence_wins() {
    let mut graph = EntityGraph::new();
    let low = Entity::new(EntityKind::Preference, "vegan")
        .with_attribute("dietary", "preference")
        .with_confidence(0.4)
        .observed_at(at(10));
    let high = Entity::new(EntityKind::Preference, "vegan")
        .with_attribute("dietary", "restriction")
        .with_confidence(0.9)
        .observed_at(at(0));

    graph.merge(&[high.clone()], &[]);
    graph.merge(&[low], &[]);
    let e = graph.get("preference:vegan").unwrap();
    assert_eq!(e.confidence, 0.9);
    assert_eq!(e.attr_str("dietary"), Some("restriction"));
}

#[test]
fn test_confidence_tie_broken_by_recency() {
    let mut graph = EntityGraph::new();
    let older = milk().with_attribute("brand", "Old Farm");
    let newer = milk()
        .with_attribute("brand", "New Farm")
        .observed_at(at(60));
    graph.merge(&[newer], &[]);
    graph.merge(&[older], &[]);
    assert_eq!(
        graph.get("product:milk").unwrap().attr_str("brand"),
        Some("New Farm")
    );
}

#[test]
fn test_entity_merge_is_commutative() {
    let a = milk().with_attribute("category", "dairy").with_confidence(0.6);
    let b = milk()
        .with_attribute("brand", "Acme")
        .with_confidence(0.8)
        .observed_at(at(5));

    let mut ab = EntityGraph::new();
    ab.merge(&[a.clone()], &[]);
    ab.merge(&[b.clone()], &[]);
    let mut ba = EntityGraph::new();
    ba.merge(&[b], &[]);
    ba.merge(&[a], &[]);

    assert_eq!(ab.get("product:milk"), ba.get("product:milk"));
    let merged = ab.get("product:milk").unwrap();
    assert_eq!(merged.attr_str("category"), Some("dairy"));
    assert_eq!(merged.attr_str("brand"), Some("Acme"));
}

#[test]
fn test_three_way_merge_settles_each_attribute_independently() {
    let a = milk()
        .with_attribute("fat", "1")
        .with_confidence(0.9);
    let b = milk()
        .with_attribute("fat", "2")
        .with_attribute("size", "3")
        .with_confidence(0.5)
        .observed_at(at(20));
    let c = milk()
        .with_attribute("size", "4")
        .with_confidence(0.7)
        .observed_at(at(10));

    let orders = [
        [&a, &b, &c],
        [&a, &c, &b],
        [&b, &a, &c],
        [&b, &c, &a],
        [&c, &a, &b],
        [&c, &b, &a],
    ];
    let merged: Vec<Entity> = orders
        .iter()
        .map(|order| {
            let mut graph = EntityGraph::new();
            for entity in order {
                graph.merge(&[(*entity).clone()], &[]);
            }
            graph.get("product:milk").unwrap().clone()
        })
        .collect();

    for entity in &merged[1..] {
        assert_eq!(entity, &merged[0]);
    }
    let first = &merged[0];
    assert_eq!(first.attr_str("fat"), Some("1"));
    assert_eq!(first.attr_str("size"), Some("4"));
    assert_eq!(first.attr_str("sku"), Some("sku-milk"));
    assert_eq!(first.confidence, 0.9);
}

#[test]
fn test_equal_claims_settle_on_value() {
    let left = milk().with_attribute("brand", "Acme");
    let right = milk().with_attribute("brand", "Zest");

    let mut lr = EntityGraph::new();
    lr.merge(&[left.clone(), right.clone()], &[]);
    let mut rl = EntityGraph::new();
    rl.merge(&[right, left], &[]);

    assert_eq!(lr.get("product:milk"), rl.get("product:milk"));
    assert_eq!(lr.get("product:milk").unwrap().attr_str("brand"), Some("Zest"));
}

#[test]
fn test_same_entity_twice_is_noop() {
    let mut graph = EntityGraph::new();
    graph.merge(&[milk()], &[]);
    let report = graph.merge(&[milk()], &[]);
    assert!(report.is_empty());
    assert_eq!(graph.version(), 1);
}

#[test]
fn test_observation_applied_once() {
    let mut graph = EntityGraph::new();
    let obs = RelationshipObservation::new("product:milk", "product:bread", RelationKind::UsedTogether)
        .observed_at(at(0));
    graph.merge(&[], &[obs.clone(), obs.clone()]);
    let report = graph.merge(&[], &[obs]);
    assert_eq!(report.duplicate_observations, 1);

    let from = graph.idx_of("product:milk").unwrap();
    let to = graph.idx_of("product:bread").unwrap();
    let edge = graph.edge(from, to, RelationKind::UsedTogether).unwrap();
    assert_eq!(edge.weight, 1.0);
}

#[test]
fn test_distinct_observations_accumulate_weight() {
    let mut graph = EntityGraph::new();
    let observations: Vec<_> = (0..3)
        .map(|i| {
            RelationshipObservation::new("product:milk", "product:bread", RelationKind::UsedTogether)
                .observed_at(at(i * 10))
        })
        .collect();
    graph.merge(&[], &observations);

    let from = graph.idx_of("product:milk").unwrap();
    let to = graph.idx_of("product:bread").unwrap();
    let edge = graph.edge(from, to, RelationKind::UsedTogether).unwrap();
    assert_eq!(edge.weight, 3.0);
    assert_eq!(edge.last_seen_at, at(20));
}

#[test]
fn test_placeholder_endpoints_and_later_upgrade() {
    let mut graph = EntityGraph::new();
    graph.merge(
        &[],
        &[RelationshipObservation::new("product:milk", "product:bread", RelationKind::UsedTogether)],
    );
    assert_eq!(graph.entity_count(), 2);
    assert_eq!(graph.get("product:bread").unwrap().confidence, 0.0);
    assert_eq!(graph.get("product:bread").unwrap().kind, EntityKind::Product);

    let bread = Entity::new(EntityKind::Product, "Bread").with_attribute("sku", "sku-bread");
    graph.merge(&[bread], &[]);
    let stored = graph.get(&entity_id(EntityKind::Product, "bread")).unwrap();
    assert_eq!(stored.name, "Bread");
    assert_eq!(stored.confidence, 1.0);
}

#[test]
fn test_bidirectional_edges_and_traversal() {
    let mut graph = EntityGraph::new();
    graph.merge(
        &[],
        &[
            RelationshipObservation::new("product:milk", "product:bread", RelationKind::UsedTogether),
            RelationshipObservation::new("product:bread", "product:milk", RelationKind::UsedTogether),
            RelationshipObservation::new("product:milk", "brand:acme", RelationKind::Prefers),
        ],
    );
    let milk = graph.idx_of("product:milk").unwrap();
    let bread = graph.idx_of("product:bread").unwrap();
    assert_eq!(graph.incoming(bread, RelationKind::UsedTogether).count(), 1);
    assert_eq!(graph.outgoing(milk, RelationKind::UsedTogether).count(), 1);
    assert_eq!(graph.outgoing(milk, RelationKind::Prefers).count(), 1);
    assert_eq!(graph.edge_count(), 3);
}

#[test]
fn test_mark_persisted_skips_superseded_versions() {
    let mut graph = EntityGraph::new();
    let v1 = milk();
    graph.merge(&[v1.clone()], &[]);
    let v2 = milk().with_attribute("brand", "Acme").observed_at(at(0) + Duration::seconds(1));
    graph.merge(&[v2.clone()], &[]);

    assert_eq!(graph.mark_persisted(&[v1]), 0);
    assert_eq!(graph.unpersisted_count(), 1);
    assert_eq!(graph.mark_persisted(&[v2]), 1);
    assert_eq!(graph.unpersisted_count(), 0);
}

#[test]
fn test_observation_window_is_bounded() {
    let mut graph = EntityGraph::new();
    let first = RelationshipObservation::new("product:milk", "product:bread", RelationKind::UsedTogether)
        .observed_at(at(0));
    graph.merge(&[], &[first.clone()]);

    let later: Vec<_> = (0..OBSERVATION_WINDOW)
        .map(|_| {
            RelationshipObservation::new("product:milk", "product:jam", RelationKind::UsedTogether)
                .observed_at(at(1))
        })
        .collect();
    graph.merge(&[], &later);
    assert_eq!(graph.remembered_observations(), OBSERVATION_WINDOW);

    // Replays inside the window are still recognised
    let report = graph.merge(&[], &[later[OBSERVATION_WINDOW - 1].clone()]);
    assert_eq!(report.duplicate_observations, 1);

    // The oldest ID has aged out
    let report = graph.merge(&[], &[first]);
    assert_eq!(report.duplicate_observations, 0);
    assert_eq!(graph.remembered_observations(), OBSERVATION_WINDOW);
}
