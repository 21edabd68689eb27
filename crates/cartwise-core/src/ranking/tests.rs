use super::*;
use crate::catalog::Catalog;
use crate::intent::{DietaryStance, DietaryStatement};
use crate::signals::{dietary_preferences, order_confirmed};
use cartwise_memory::CartMutation;
use chrono::Duration;

fn catalog() -> Catalog {
    Catalog::demo().unwrap()
}

fn candidates(catalog: &Catalog, skus: &[&str], score: f64) -> Vec<Candidate> {
    skus.iter()
        .map(|sku| catalog.get(sku).unwrap().to_candidate(score))
        .collect()
}

fn cart(skus: &[&str]) -> Cart {
    let mut cart = Cart::default();
    for sku in skus {
        cart.apply(&CartMutation::add(*sku, 1), Utc::now()).unwrap();
    }
    cart
}

fn ids(ranked: &RankedCandidates) -> Vec<&str> {
    ranked.candidates.iter().map(|c| c.candidate.id.as_str()).collect()
}

fn purchase_graph(catalog: &Catalog, skus: &[&str], at: DateTime<Utc>) -> EntityGraph {
    let mut graph = EntityGraph::new();
    let (entities, observations) = order_confirmed(catalog, &cart(skus), at);
    graph.merge(&entities, &observations);
    graph
}

fn restriction_graph(tag: &str, confidence: f64) -> EntityGraph {
    let mut graph = EntityGraph::new();
    let statements = [DietaryStatement {
        tag: tag.into(),
        stance: DietaryStance::Restriction,
        confidence,
    }];
    graph.merge(&dietary_preferences(&statements, Utc::now()), &[]);
    graph
}

#[test]
fn test_cold_start_keeps_provider_order() {
    let catalog = catalog();
    let engine = PersonalizationEngine::default();
    let profile = ProfileSnapshot::from_graph(Arc::new(EntityGraph::new()));
    assert!(profile.is_cold());

    let ranked = engine.rerank(
        candidates(&catalog, &["BRD-002", "BRD-001", "BRD-004"], 0.5),
        &profile,
        Utc::now(),
    );
    assert_eq!(ids(&ranked), vec!["BRD-002", "BRD-001", "BRD-004"]);
    assert_eq!(ranked.signals_used, 0);
    assert!(ranked.filtered.is_empty());
    assert!(ranked.candidates.iter().all(|c| c.boosts.is_empty() && c.final_score == 0.5));
}

#[test]
fn test_rerank_is_deterministic() {
    let catalog = catalog();
    let engine = PersonalizationEngine::default();
    let now = Utc::now();
    let profile = ProfileSnapshot::from_graph(Arc::new(purchase_graph(
        &catalog,
        &["BRD-001", "JAM-001", "MLK-002"],
        now,
    )))
    .with_cart(&cart(&["BRD-001"]));
    let input = candidates(
        &catalog,
        &["PNB-001", "JAM-001", "BTR-002", "MLK-001", "MLK-002", "FRT-001"],
        0.4,
    );

    let first = engine.rerank(input.clone(), &profile, now);
    for _ in 0..10 {
        assert_eq!(engine.rerank(input.clone(), &profile, now), first);
    }
}

#[test]
fn test_used_together_boost() {
    let catalog = catalog();
    let engine = PersonalizationEngine::default();
    let now = Utc::now();
    let graph = Arc::new(purchase_graph(&catalog, &["BRD-001", "JAM-001"], now));

    // PNB-001 and JAM-001 share brand and category; only JAM-001 was bought with bread
    let input = candidates(&catalog, &["PNB-001", "JAM-001"], 0.5);
    let ranked = engine.rerank(input.clone(), &ProfileSnapshot::from_graph(Arc::clone(&graph)), now);
    assert_eq!(ids(&ranked), vec!["JAM-001", "PNB-001"]);

    let boost = |ranked: &RankedCandidates| {
        ranked.candidates[0]
            .boosts
            .iter()
            .find(|b| b.label == BoostLabel::UsedTogether)
            .map(|b| b.amount)
            .unwrap()
    };
    let expected = 0.1 * 2.0_f64.ln();
    assert!((boost(&ranked) - expected).abs() < 1e-9);

    let in_cart = engine.rerank(
        input,
        &ProfileSnapshot::from_graph(graph).with_cart(&cart(&["BRD-001"])),
        now,
    );
    assert!((boost(&in_cart) - 2.0 * expected).abs() < 1e-9);
    assert!(in_cart.candidates[0].boosts[2].explanation.contains("in your cart"));
}

#[test]
fn test_used_together_recency_decay() {
    let catalog = catalog();
    let engine = PersonalizationEngine::new(RankingConfig {
        recency_half_life_days: Some(7.0),
        ..RankingConfig::default()
    });
    let now = Utc::now();
    let graph = Arc::new(purchase_graph(&catalog, &["BRD-001", "JAM-001"], now - Duration::days(7)));
    let ranked = engine.rerank(
        candidates(&catalog, &["JAM-001"], 0.5),
        &ProfileSnapshot::from_graph(graph),
        now,
    );
    let amount = ranked.candidates[0]
        .boosts
        .iter()
        .find(|b| b.label == BoostLabel::UsedTogether)
        .unwrap()
        .amount;
    assert!((amount - 0.05 * 2.0_f64.ln()).abs() < 1e-6);

    assert_eq!(recency_decay(3.0, None), 1.0);
    assert_eq!(recency_decay(-1.0, Some(7.0)), 1.0);
    assert!((recency_decay(14.0, Some(7.0)) - 0.25).abs() < 1e-12);
}

#[test]
fn test_purchase_history_boosts() {
    let catalog = catalog();
    let engine = PersonalizationEngine::default();
    let graph = Arc::new(purchase_graph(&catalog, &["BTR-001"], Utc::now()));
    let ranked = engine.rerank(
        candidates(&catalog, &["MLK-002", "MLK-001"], 0.5),
        &ProfileSnapshot::from_graph(graph),
        Utc::now(),
    );
    assert_eq!(ids(&ranked), vec!["MLK-001", "MLK-002"]);
    let labels: Vec<BoostLabel> = ranked.candidates[0].boosts.iter().map(|b| b.label).collect();
    assert_eq!(
        labels,
        vec![BoostLabel::PastPurchaseCategory, BoostLabel::PreferredBrand]
    );
    assert!((ranked.candidates[0].final_score - 0.75).abs() < 1e-9);
    assert_eq!(ranked.signals_used, 2);
}

#[test]
fn test_dietary_preference_boost() {
    let catalog = catalog();
    let engine = PersonalizationEngine::default();
    let mut graph = EntityGraph::new();
    let statements = [DietaryStatement {
        tag: "vegan".into(),
        stance: DietaryStance::Preference,
        confidence: 0.8,
    }];
    graph.merge(&dietary_preferences(&statements, Utc::now()), &[]);

    let ranked = engine.rerank(
        candidates(&catalog, &["BTR-001", "BTR-002"], 0.5),
        &ProfileSnapshot::from_graph(Arc::new(graph)),
        Utc::now(),
    );
    assert_eq!(ids(&ranked), vec!["BTR-002", "BTR-001"]);
    let boost = &ranked.candidates[0].boosts[0];
    assert_eq!(boost.label, BoostLabel::DietaryPreference);
    assert!((boost.amount - 0.08).abs() < 1e-9);
    assert!(boost.explanation.contains("vegan"));
}

#[test]
fn test_dietary_conflict_at_threshold_filters() {
    let catalog = catalog();
    let engine = PersonalizationEngine::default();
    let profile = ProfileSnapshot::from_graph(Arc::new(restriction_graph("gluten", 0.7)));
    let ranked = engine.rerank(
        candidates(&catalog, &["BRD-001", "BRD-003"], 0.6),
        &profile,
        Utc::now(),
    );
    assert_eq!(ids(&ranked), vec!["BRD-003"]);
    assert_eq!(ranked.filtered.len(), 1);
    assert_eq!(ranked.filtered[0].id, "BRD-001");
    assert_eq!(ranked.filtered[0].restriction, "gluten");
    assert_eq!(ranked.signals_used, 1);
}

#[test]
fn test_restriction_confidence_ignores_preference_on_same_tag() {
    let catalog = catalog();
    let engine = PersonalizationEngine::default();
    let mut graph = EntityGraph::new();
    let statements = [
        DietaryStatement {
            tag: "gluten".into(),
            stance: DietaryStance::Restriction,
            confidence: 0.75,
        },
        DietaryStatement {
            tag: "gluten".into(),
            stance: DietaryStance::Preference,
            confidence: 0.95,
        },
    ];
    graph.merge(&dietary_preferences(&statements, Utc::now()), &[]);
    let profile = ProfileSnapshot::from_graph(Arc::new(graph));

    let ranked = engine.rerank(candidates(&catalog, &["BRD-001"], 0.6), &profile, Utc::now());
    assert!(ranked.is_empty());
    assert_eq!(ranked.filtered[0].restriction, "gluten");
    assert_eq!(ranked.filtered[0].confidence, 0.75);
}

#[test]
fn test_dietary_conflict_below_threshold_penalizes() {
    let catalog = catalog();
    let engine = PersonalizationEngine::default();
    let profile = ProfileSnapshot::from_graph(Arc::new(restriction_graph("gluten", 0.69)));
    let ranked = engine.rerank(
        candidates(&catalog, &["BRD-001", "BRD-003"], 0.6),
        &profile,
        Utc::now(),
    );
    assert!(ranked.filtered.is_empty());
    assert_eq!(ids(&ranked), vec!["BRD-003", "BRD-001"]);

    let penalized = &ranked.candidates[1];
    assert!(penalized.final_score < penalized.candidate.base_relevance_score);
    assert_eq!(penalized.boosts[0].label, BoostLabel::DietaryConflict);
    assert!((penalized.boosts[0].amount + 0.5 * 0.69).abs() < 1e-9);
}

#[test]
fn test_threshold_is_configurable() {
    let catalog = catalog();
    let engine = PersonalizationEngine::new(RankingConfig {
        dietary_confidence_threshold: 0.95,
        ..RankingConfig::default()
    });
    let profile = ProfileSnapshot::from_graph(Arc::new(restriction_graph("nuts", 0.9)));
    let ranked = engine.rerank(candidates(&catalog, &["PNB-001"], 0.5), &profile, Utc::now());
    assert_eq!(ranked.len(), 1);
    assert!(ranked.candidates[0].final_score < 0.5);
}

#[test]
fn test_passthrough_keeps_scores() {
    let catalog = catalog();
    let ranked = RankedCandidates::passthrough(candidates(&catalog, &["FRT-001", "COF-001"], 0.3));
    assert_eq!(ids(&ranked), vec!["FRT-001", "COF-001"]);
    assert_eq!(ranked.candidates[1].final_score, 0.3);
    assert_eq!(ranked.signals_used, 0);
}
