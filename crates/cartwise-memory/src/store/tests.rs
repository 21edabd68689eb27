use super::*;
use crate::error::Error;
use crate::retry::RetryPolicy;
use crate::sink::{PersistBatch, SinkError};
use crate::sqlite_sink::SqliteGraphSink;
use crate::types::RelationKind;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};

struct DownSink {
    calls: AtomicU32,
}

#[async_trait]
impl DurableGraphSink for DownSink {
    fn name(&self) -> &str {
        "down"
    }

    async fn persist(&self, _batch: &PersistBatch) -> std::result::Result<(), SinkError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(SinkError::Unreachable("connection refused".into()))
    }
}

fn store() -> Arc<MemoryStore> {
    Arc::new(MemoryStore::new(MemoryConfig::default()))
}

fn fast_retries() -> PersistenceConfig {
    PersistenceConfig {
        retry: RetryPolicy::new()
            .with_initial_delay(Duration::from_millis(20))
            .with_max_delay(Duration::from_millis(100))
            .with_jitter(false),
        ..PersistenceConfig::default()
    }
}

async fn wait_for(store: &MemoryStore, done: impl Fn(&PersistStats) -> bool) -> PersistStats {
    for _ in 0..200 {
        if let Some(stats) = store.persistence_stats() {
            if done(&stats) {
                return stats;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("persistence did not settle: {:?}", store.persistence_stats());
}

#[tokio::test]
async fn test_concurrent_adds_are_serialized() {
    let store = store();
    store.get_session("s1", "u1").await.unwrap();

    let tasks: Vec<_> = (0..50)
        .map(|_| {
            let store = Arc::clone(&store);
            tokio::spawn(async move { store.mutate_cart("s1", &CartMutation::add("milk", 1)).await })
        })
        .collect();
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let session = store.find_session("s1").await.unwrap();
    assert_eq!(session.cart.get("milk").unwrap().quantity, 50);
}

#[tokio::test]
async fn test_mutations_apply_in_order() {
    let store = store();
    store.get_session("s1", "u1").await.unwrap();

    store.mutate_cart("s1", &CartMutation::add("bread", 2)).await.unwrap();
    store.mutate_cart("s1", &CartMutation::set_quantity("bread", 5)).await.unwrap();
    let session = store.mutate_cart("s1", &CartMutation::set_quantity("bread", 0)).await.unwrap();
    assert!(session.cart.is_empty());

    let err = store
        .mutate_cart("s1", &CartMutation::add("bread", -1))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidMutation { .. }));
    assert!(store.find_session("s1").await.unwrap().cart.is_empty());
}

#[tokio::test]
async fn test_turns_are_trimmed() {
    let store = MemoryStore::new(MemoryConfig {
        max_turns_per_session: 3,
        ..MemoryConfig::default()
    });
    store.get_session("s1", "u1").await.unwrap();
    for i in 0..5 {
        store.append_turn("s1", Turn::user(format!("turn {i}"))).await.unwrap();
    }
    let turns = store.find_session("s1").await.unwrap().conversation_turns;
    assert_eq!(turns.len(), 3);
    assert_eq!(turns[0].text, "turn 2");
}

#[tokio::test]
async fn test_record_without_sink_is_in_process_only() {
    let store = store();
    let outcome = store.record_entities("u1", &[Entity::new(EntityKind::Brand, "Acme")], &[]);
    assert_eq!(outcome.persistence, PersistState::InProcessOnly);
    assert_eq!(outcome.changed_entities, 1);

    let again = store.record_entities("u1", &[Entity::new(EntityKind::Brand, "Acme")], &[]);
    assert_eq!(again.persistence, PersistState::Unchanged);
    assert!(store.persistence_stats().is_none());
}

#[tokio::test]
async fn test_duplicate_observation_counts_once() {
    let store = store();
    let obs = RelationshipObservation::new("product:milk", "product:bread", RelationKind::UsedTogether);
    store.record_entities("u1", &[], &[obs.clone()]);
    let outcome = store.record_entities("u1", &[], &[obs]);
    assert_eq!(outcome.duplicate_observations, 1);

    let snapshot = store.snapshot_graph("u1");
    let milk = snapshot.idx_of("product:milk").unwrap();
    let bread = snapshot.idx_of("product:bread").unwrap();
    assert_eq!(
        snapshot.edge(milk, bread, RelationKind::UsedTogether).unwrap().weight,
        1.0
    );
}

#[tokio::test]
async fn test_preference_invalidates_dietary_profile() {
    let store = store();
    assert!(store.dietary_profile("u1").is_empty());

    store.record_entities(
        "u1",
        &[Entity::new(EntityKind::Preference, "gluten")
            .with_attribute("dietary", "restriction")
            .with_confidence(0.9)],
        &[],
    );
    assert!(store.dietary_profile("u1").restrictions.contains("gluten"));
}

#[tokio::test]
async fn test_profile_computed_from_stale_snapshot_is_not_served() {
    let store = store();
    // A reader takes its snapshot before the restriction lands...
    let stale = store.snapshot_graph("u1");

    store.record_entities(
        "u1",
        &[Entity::new(EntityKind::Preference, "gluten")
            .with_attribute("dietary", "restriction")
            .with_confidence(0.9)],
        &[],
    );

    // ...and only then fills the cache from it
    assert!(store.dietary.get_or_compute("u1", &stale).is_empty());

    let profile = store.dietary_profile("u1");
    assert!(profile.restrictions.contains("gluten"));
    assert_eq!(profile.restriction_confidence("gluten"), 0.9);
}

#[tokio::test]
async fn test_unreachable_sink_keeps_in_process_state() {
    let sink = Arc::new(DownSink { calls: AtomicU32::new(0) });
    let store = Arc::new(MemoryStore::new(MemoryConfig::default()).with_sink(sink.clone(), fast_retries()));
    let cancel = CancellationToken::new();
    let workers = store.spawn_workers(cancel.clone());

    let started = std::time::Instant::now();
    let outcome = store.record_entities(
        "u1",
        &[Entity::new(EntityKind::Product, "Sourdough").with_attribute("sku", "sku-sourdough")],
        &[],
    );
    assert!(started.elapsed() < Duration::from_millis(100));
    assert_eq!(outcome.persistence, PersistState::Queued);

    // visible to the next read before any sink acknowledgement
    let snapshot = store.snapshot_graph("u1");
    assert!(snapshot.get("product:sourdough").is_some());
    assert_eq!(snapshot.unpersisted_count(), 1);

    let stats = wait_for(&store, |s| s.failures >= 2).await;
    assert!(stats.retries_scheduled >= 1);
    assert_eq!(stats.persisted, 0);
    assert!(sink.calls.load(Ordering::SeqCst) >= 2);
    assert!(store.snapshot_graph("u1").get("product:sourdough").is_some());

    cancel.cancel();
    for worker in workers {
        worker.await.unwrap();
    }
}

#[tokio::test]
async fn test_sqlite_sink_receives_changes() {
    let sink = Arc::new(SqliteGraphSink::in_memory().await.unwrap());
    let store = Arc::new(
        MemoryStore::new(MemoryConfig::default()).with_sink(sink.clone(), PersistenceConfig::default()),
    );
    let cancel = CancellationToken::new();
    let workers = store.spawn_workers(cancel.clone());

    store.record_entities(
        "u1",
        &[Entity::new(EntityKind::Category, "Bakery")],
        &[RelationshipObservation::new("product:milk", "product:bread", RelationKind::UsedTogether)],
    );
    wait_for(&store, |s| s.persisted == 1).await;

    assert_eq!(store.snapshot_graph("u1").unpersisted_count(), 0);
    assert_eq!(sink.load_entities("u1").await.unwrap().len(), 3);
    assert_eq!(sink.load_relationships("u1").await.unwrap().len(), 1);

    cancel.cancel();
    for worker in workers {
        worker.await.unwrap();
    }
}

#[tokio::test]
async fn test_evict_expired_sessions() {
    let store = store();
    store.get_session("s1", "u1").await.unwrap();
    assert_eq!(store.evict_expired(Utc::now()), 0);
    let later = Utc::now() + chrono::Duration::hours(2);
    assert_eq!(store.evict_expired(later), 1);
    assert_eq!(store.session_count(), 0);
    assert!(store.session_owner("s1").is_none());
}
