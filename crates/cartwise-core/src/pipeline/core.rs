//! Pipeline structure
//!
//! Contains the `Pipeline` struct and its builder methods.

use crate::analytics::AnalyticsEmitter;
use crate::catalog::Catalog;
use crate::compiler::{ResponseCompiler, Summarizer};
use crate::nlu::IntentClassifier;
use crate::providers::{
    CandidateProvider, CartProvider, CatalogSearchProvider, ComplementaryProvider, ProviderKind,
};
use crate::ranking::PersonalizationEngine;
use crate::router::Router;
use cartwise_memory::MemoryStore;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

use super::config::PipelineConfig;

/// Handles shopping requests end to end.
pub struct Pipeline {
    pub(crate) memory: Arc<MemoryStore>,
    pub(crate) catalog: Arc<Catalog>,
    pub(crate) router: Router,
    pub(crate) providers: BTreeMap<ProviderKind, Arc<dyn CandidateProvider>>,
    pub(crate) ranking: PersonalizationEngine,
    pub(crate) compiler: ResponseCompiler,
    pub(crate) summarizer: Option<Arc<dyn Summarizer>>,
    pub(crate) analytics: Option<Arc<AnalyticsEmitter>>,
}

impl Pipeline {
    /// Create a pipeline with the default catalog-backed providers.
    #[must_use]
    pub fn new(
        memory: Arc<MemoryStore>,
        catalog: Arc<Catalog>,
        classifier: Arc<dyn IntentClassifier>,
        config: PipelineConfig,
    ) -> Self {
        let mut providers: BTreeMap<ProviderKind, Arc<dyn CandidateProvider>> = BTreeMap::new();
        providers.insert(
            ProviderKind::Search,
            Arc::new(CatalogSearchProvider::new(Arc::clone(&catalog))),
        );
        providers.insert(
            ProviderKind::Complementary,
            Arc::new(ComplementaryProvider::new(Arc::clone(&memory), Arc::clone(&catalog))),
        );
        providers.insert(
            ProviderKind::Cart,
            Arc::new(CartProvider::new(Arc::clone(&memory), Arc::clone(&catalog))),
        );

        info!(
            products = catalog.len(),
            deadline_ms = config.router.per_request_deadline_ms,
            "Shopping pipeline initialized"
        );

        Self {
            memory,
            catalog,
            router: Router::new(classifier, config.router),
            providers,
            ranking: PersonalizationEngine::new(config.ranking),
            compiler: ResponseCompiler::default(),
            summarizer: None,
            analytics: None,
        }
    }

    /// Replace the provider for its strategy slot.
    #[must_use]
    pub fn with_provider(mut self, provider: Arc<dyn CandidateProvider>) -> Self {
        self.providers.insert(provider.kind(), provider);
        self
    }

    /// Use a different summarizer.
    #[must_use]
    pub fn with_summarizer(mut self, summarizer: Arc<dyn Summarizer>) -> Self {
        self.summarizer = Some(summarizer);
        self.rebuild_compiler();
        self
    }

    /// Emit one analytics event per response.
    #[must_use]
    pub fn with_analytics(mut self, emitter: Arc<AnalyticsEmitter>) -> Self {
        self.analytics = Some(emitter);
        self.rebuild_compiler();
        self
    }

    fn rebuild_compiler(&mut self) {
        let mut compiler = match &self.summarizer {
            Some(summarizer) => ResponseCompiler::new(Arc::clone(summarizer)),
            None => ResponseCompiler::default(),
        };
        if let Some(analytics) = &self.analytics {
            compiler = compiler.with_analytics(Arc::clone(analytics));
        }
        self.compiler = compiler;
    }

    /// Shared memory store.
    pub fn memory(&self) -> &Arc<MemoryStore> {
        &self.memory
    }

    /// Product catalog.
    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    /// Router in use.
    pub fn router(&self) -> &Router {
        &self.router
    }
}
