//! Application bootstrap
//!
//! Builds the memory store, catalog, classifier and pipeline from
//! [`AppConfig`], starts the background workers and stops them again.
//!
//! ## Module Structure
//!
//! - `config`: Configuration types
//! - `loader`: Layered configuration loading
//! - `validation`: Configuration checks

pub mod config;
mod loader;
mod validation;

pub use config::AppConfig;
pub use loader::load_config;
pub use validation::validate_config;

use anyhow::{Context, Result};
use cartwise_core::{
    AnalyticsEmitter, Catalog, KeywordClassifier, Pipeline, ResponseEnvelope, ShoppingRequest,
    TracingAnalyticsSink,
};
use cartwise_memory::{MemoryStore, SqliteGraphSink};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// A running pipeline plus the workers it depends on.
pub struct App {
    pipeline: Pipeline,
    memory: Arc<MemoryStore>,
    analytics: Option<Arc<AnalyticsEmitter>>,
    cancel: CancellationToken,
    workers: Vec<JoinHandle<()>>,
}

impl App {
    /// Build every component and start the background workers.
    pub async fn start(config: &AppConfig) -> Result<Self> {
        validate_config(config)?;

        let catalog = match &config.catalog.path {
            Some(path) => Catalog::from_path(path)
                .with_context(|| format!("Failed to load catalog from {}", path.display()))?,
            None => Catalog::demo().context("Failed to load the bundled catalog")?,
        };
        let catalog = Arc::new(catalog);

        let mut memory = MemoryStore::new(config.memory.to_memory_config());
        if let Some(path) = &config.persistence.database_path {
            let sink = SqliteGraphSink::from_path(path)
                .await
                .with_context(|| format!("Failed to open graph database {}", path.display()))?;
            memory = memory.with_sink(Arc::new(sink), config.persistence.to_persistence_config());
        }
        let memory = Arc::new(memory);

        let cancel = CancellationToken::new();
        let mut workers = memory.spawn_workers(cancel.clone());

        let classifier = Arc::new(KeywordClassifier::from_catalog(&catalog));
        let mut pipeline = Pipeline::new(
            Arc::clone(&memory),
            Arc::clone(&catalog),
            classifier,
            config.pipeline(),
        );

        let analytics = if config.analytics.enabled {
            let emitter = Arc::new(AnalyticsEmitter::new(
                Arc::new(TracingAnalyticsSink),
                config.analytics.queue_capacity,
            ));
            workers.push(emitter.spawn(cancel.clone()));
            pipeline = pipeline.with_analytics(Arc::clone(&emitter));
            Some(emitter)
        } else {
            None
        };

        info!(
            products = catalog.len(),
            durable = config.persistence.database_path.is_some(),
            analytics = config.analytics.enabled,
            "Cartwise started"
        );

        Ok(Self {
            pipeline,
            memory,
            analytics,
            cancel,
            workers,
        })
    }

    /// Handle one request.
    pub async fn handle(&self, request: ShoppingRequest) -> ResponseEnvelope {
        self.pipeline.handle(request).await
    }

    /// Shared memory store.
    pub fn memory(&self) -> &Arc<MemoryStore> {
        &self.memory
    }

    /// Cancel the workers and wait for them to drain their queues.
    pub async fn shutdown(self) {
        info!("Shutting down");
        self.cancel.cancel();
        for worker in self.workers {
            if let Err(e) = worker.await {
                warn!(error = %e, "Background worker ended abnormally");
            }
        }
        if let Some(stats) = self.memory.persistence_stats() {
            info!(
                persisted = stats.persisted,
                failures = stats.failures,
                dropped = stats.dropped,
                "Persistence worker stopped"
            );
        }
        if let Some(analytics) = &self.analytics {
            let stats = analytics.stats();
            info!(
                delivered = stats.delivered,
                failed = stats.failed,
                dropped = stats.dropped,
                "Analytics worker stopped"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cartwise_core::{CartCommand, ResponseStatus};

    #[tokio::test]
    async fn test_start_handle_shutdown_in_memory() {
        let app = App::start(&AppConfig::default()).await.unwrap();
        let envelope = app.handle(ShoppingRequest::text("u1", "s1", "bread")).await;
        assert_eq!(envelope.status, ResponseStatus::Ok);
        assert!(!envelope.data.candidates.is_empty());
        app.shutdown().await;
    }

    #[tokio::test]
    async fn test_start_with_sqlite_persists_graph() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("graph.db");
        let mut config = AppConfig::default();
        config.persistence.database_path = Some(db.clone());
        config.analytics.enabled = false;

        let app = App::start(&config).await.unwrap();
        let added = app
            .handle(ShoppingRequest::command(
                "u1",
                "s1",
                CartCommand::Add {
                    item: "BRD-001".into(),
                    quantity: 1,
                },
            ))
            .await;
        assert_eq!(added.status, ResponseStatus::Ok);

        let memory = Arc::clone(app.memory());
        let waited = std::time::Instant::now();
        while memory.persistence_stats().map_or(0, |s| s.persisted) == 0
            && waited.elapsed() < std::time::Duration::from_secs(5)
        {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        app.shutdown().await;

        let sink = SqliteGraphSink::from_path(&db).await.unwrap();
        let entities = sink.load_entities("u1").await.unwrap();
        assert!(entities.iter().any(|e| e.entity_id == "product:brd-001"));
    }

    #[tokio::test]
    async fn test_invalid_config_refuses_to_start() {
        let mut config = AppConfig::default();
        config.router.nlu_confidence_threshold = 2.0;
        assert!(App::start(&config).await.is_err());
    }
}
