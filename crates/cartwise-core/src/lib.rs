//! Cartwise Core - shopping request pipeline
//!
//! This crate turns a shopper's message or cart command into a ranked,
//! explained response:
//! - NLU: Keyword intent classification and attribute extraction
//! - Router: Intent to provider strategy, bounded by a per-request deadline
//! - Providers: Catalog search, complementary products and cart operations
//! - Ranking: Personalized rerank against the user's entity graph
//! - Compiler: Response envelope, summaries and analytics
//! - Signals: Entity and relationship observations fed back into memory

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod analytics;
pub mod catalog;
pub mod compiler;
pub mod config;
pub mod error;
pub mod intent;
pub mod nlu;
pub mod pipeline;
pub mod providers;
pub mod ranking;
pub mod router;
pub mod signals;

pub use analytics::{
    AnalyticsEmitter, AnalyticsEvent, AnalyticsSink, AnalyticsStats, TracingAnalyticsSink,
};
pub use catalog::{Catalog, CatalogProduct};
pub use compiler::{
    ProviderReport, ResponseCompiler, ResponseData, ResponseEnvelope, ResponseMeta,
    ResponseStatus, Summarizer, TemplateSummarizer,
};
pub use config::{RankingConfig, RouterConfig};
pub use error::{Error, Result};
pub use intent::{
    CartCommand, DietaryStance, DietaryStatement, ExtractedAttributes, Intent, IntentKind,
};
pub use nlu::{Classification, ClassifyContext, IntentClassifier, KeywordClassifier};
pub use pipeline::{Pipeline, PipelineConfig, RequestContext, ShoppingRequest};
pub use providers::{
    Candidate, CandidateProvider, CartEffect, CartProvider, CatalogSearchProvider,
    ComplementaryProvider, ProviderKind, ProviderOutput, ProviderParams, ProviderStatus,
};
pub use ranking::{
    Boost, BoostLabel, FilteredCandidate, PersonalizationEngine, ProfileSnapshot,
    RankedCandidate, RankedCandidates,
};
pub use router::{RoutedClassification, Router, Strategy};
