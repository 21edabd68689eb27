//! SqliteGraphSink - SQLite persistence for user graphs.
//!
//! Tables: `graph_entities`, `graph_relationships`. Writes are upserts of
//! absolute state, guarded so a stale or duplicated batch never regresses
//! a newer row.

use crate::error::{Error, Result};
use crate::sink::{DurableGraphSink, PersistBatch, SinkError};
use crate::types::{Entity, EntityKind, RelationKind, Relationship};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::collections::BTreeMap;
use tracing::{debug, info};

/// SQLite-backed durable graph sink.
#[derive(Clone)]
pub struct SqliteGraphSink {
    pool: SqlitePool,
}

fn ts(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("bad timestamp {raw}: {e}")))
}

impl SqliteGraphSink {
    /// Open (or create) a sink database at the given path.
    pub async fn from_path(db_path: &std::path::Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Error::Internal(format!("mkdir: {e}")))?;
        }
        let url = format!("sqlite:{}?mode=rwc", db_path.display());
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await?;

        // Enable WAL for read/write concurrency
        sqlx::query("PRAGMA journal_mode=WAL")
            .execute(&pool)
            .await?;

        let sink = Self { pool };
        sink.run_migrations().await?;
        info!("Graph sink initialized at {}", db_path.display());
        Ok(sink)
    }

    /// In-memory sink (for tests).
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let sink = Self { pool };
        sink.run_migrations().await?;
        debug!("In-memory graph sink initialized");
        Ok(sink)
    }

    async fn run_migrations(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS graph_entities (
                user_id     TEXT NOT NULL,
                entity_id   TEXT NOT NULL,
                kind        TEXT NOT NULL,
                name        TEXT NOT NULL,
                attributes  TEXT NOT NULL,
                confidence  REAL NOT NULL,
                observed_at TEXT NOT NULL,
                PRIMARY KEY (user_id, entity_id)
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS graph_relationships (
                user_id      TEXT NOT NULL,
                from_entity  TEXT NOT NULL,
                to_entity    TEXT NOT NULL,
                kind         TEXT NOT NULL,
                weight       REAL NOT NULL,
                last_seen_at TEXT NOT NULL,
                PRIMARY KEY (user_id, from_entity, to_entity, kind)
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_relationships_target
             ON graph_relationships(user_id, to_entity)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn write_batch(&self, batch: &PersistBatch) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for entity in &batch.entities {
            sqlx::query(
                "INSERT INTO graph_entities
                 (user_id, entity_id, kind, name, attributes, confidence, observed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(user_id, entity_id) DO UPDATE SET
                    kind = excluded.kind,
                    name = excluded.name,
                    attributes = excluded.attributes,
                    confidence = excluded.confidence,
                    observed_at = excluded.observed_at
                 WHERE excluded.confidence > graph_entities.confidence
                    OR (excluded.confidence = graph_entities.confidence
                        AND excluded.observed_at >= graph_entities.observed_at)",
            )
            .bind(&batch.user_id)
            .bind(&entity.entity_id)
            .bind(entity.kind.to_string())
            .bind(&entity.name)
            .bind(serde_json::to_string(&entity.attributes)?)
            .bind(entity.confidence)
            .bind(ts(&entity.observed_at))
            .execute(&mut *tx)
            .await?;
        }

        for rel in &batch.relationships {
            sqlx::query(
                "INSERT INTO graph_relationships
                 (user_id, from_entity, to_entity, kind, weight, last_seen_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(user_id, from_entity, to_entity, kind) DO UPDATE SET
                    weight = MAX(graph_relationships.weight, excluded.weight),
                    last_seen_at = MAX(graph_relationships.last_seen_at, excluded.last_seen_at)",
            )
            .bind(&batch.user_id)
            .bind(&rel.from_entity)
            .bind(&rel.to_entity)
            .bind(rel.kind.to_string())
            .bind(rel.weight)
            .bind(ts(&rel.last_seen_at))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Load every persisted entity of a user, ordered by ID.
    pub async fn load_entities(&self, user_id: &str) -> Result<Vec<Entity>> {
        let rows = sqlx::query(
            "SELECT entity_id, kind, name, attributes, confidence, observed_at
             FROM graph_entities WHERE user_id = ?1 ORDER BY entity_id",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let kind: String = row.try_get("kind")?;
                let attributes: String = row.try_get("attributes")?;
                let observed_at: String = row.try_get("observed_at")?;
                Ok(Entity {
                    entity_id: row.try_get("entity_id")?,
                    kind: EntityKind::from_str_lossy(&kind),
                    name: row.try_get("name")?,
                    attributes: serde_json::from_str::<BTreeMap<String, serde_json::Value>>(
                        &attributes,
                    )?,
                    confidence: row.try_get("confidence")?,
                    observed_at: parse_ts(&observed_at)?,
                    persisted: true,
                })
            })
            .collect()
    }

    /// Load every persisted relationship of a user.
    pub async fn load_relationships(&self, user_id: &str) -> Result<Vec<Relationship>> {
        let rows = sqlx::query(
            "SELECT from_entity, to_entity, kind, weight, last_seen_at
             FROM graph_relationships WHERE user_id = ?1
             ORDER BY from_entity, to_entity, kind",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            let kind: String = row.try_get("kind")?;
            let Some(kind) = RelationKind::from_str_lossy(&kind) else {
                continue;
            };
            let last_seen_at: String = row.try_get("last_seen_at")?;
            out.push(Relationship {
                from_entity: row.try_get("from_entity")?,
                to_entity: row.try_get("to_entity")?,
                kind,
                weight: row.try_get("weight")?,
                last_seen_at: parse_ts(&last_seen_at)?,
            });
        }
        Ok(out)
    }
}

#[async_trait]
impl DurableGraphSink for SqliteGraphSink {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn persist(&self, batch: &PersistBatch) -> std::result::Result<(), SinkError> {
        self.write_batch(batch).await.map_err(|e| match e {
            Error::Database(db) => SinkError::Unreachable(db.to_string()),
            other => SinkError::Rejected(other.to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RelationKind;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn batch(entities: Vec<Entity>, relationships: Vec<Relationship>) -> PersistBatch {
        PersistBatch {
            user_id: "u1".into(),
            graph_version: 1,
            entities,
            relationships,
        }
    }

    fn used_together(weight: f64, secs: i64) -> Relationship {
        Relationship {
            from_entity: "product:milk".into(),
            to_entity: "product:bread".into(),
            kind: RelationKind::UsedTogether,
            weight,
            last_seen_at: at(secs),
        }
    }

    #[tokio::test]
    async fn test_persist_and_load() {
        let sink = SqliteGraphSink::in_memory().await.unwrap();
        let milk = Entity::new(EntityKind::Product, "Milk")
            .with_attribute("sku", "sku-milk")
            .observed_at(at(0));
        sink.persist(&batch(vec![milk], vec![used_together(3.0, 0)]))
            .await
            .unwrap();

        let entities = sink.load_entities("u1").await.unwrap();
        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].attr_str("sku"), Some("sku-milk"));
        assert_eq!(entities[0].observed_at, at(0));
        assert!(entities[0].persisted);

        let rels = sink.load_relationships("u1").await.unwrap();
        assert_eq!(rels, vec![used_together(3.0, 0)]);
        assert!(sink.load_entities("u2").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_and_stale_batches_do_not_regress() {
        let sink = SqliteGraphSink::in_memory().await.unwrap();
        let strong = Entity::new(EntityKind::Preference, "gluten")
            .with_attribute("dietary", "restriction")
            .with_confidence(0.9)
            .observed_at(at(10));
        let weak = Entity::new(EntityKind::Preference, "gluten")
            .with_attribute("dietary", "preference")
            .with_confidence(0.3)
            .observed_at(at(20));

        let newer = batch(vec![strong.clone()], vec![used_together(5.0, 50)]);
        let older = batch(vec![weak], vec![used_together(2.0, 10)]);
        sink.persist(&newer).await.unwrap();
        sink.persist(&newer).await.unwrap();
        sink.persist(&older).await.unwrap();

        let entities = sink.load_entities("u1").await.unwrap();
        assert_eq!(entities[0].confidence, 0.9);
        assert_eq!(entities[0].attr_str("dietary"), Some("restriction"));
        let rels = sink.load_relationships("u1").await.unwrap();
        assert_eq!(rels[0].weight, 5.0);
        assert_eq!(rels[0].last_seen_at, at(50));
    }

    #[tokio::test]
    async fn test_file_backed_sink() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("graph.db");
        let sink = SqliteGraphSink::from_path(&path).await.unwrap();
        sink.persist(&batch(vec![Entity::new(EntityKind::Brand, "Acme")], vec![]))
            .await
            .unwrap();
        drop(sink);

        let reopened = SqliteGraphSink::from_path(&path).await.unwrap();
        assert_eq!(reopened.load_entities("u1").await.unwrap().len(), 1);
    }
}
