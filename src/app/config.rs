//! Application configuration types
//!
//! Contains all configuration structures for the Cartwise binary.

use cartwise_core::{PipelineConfig, RankingConfig, RouterConfig};
use cartwise_memory::{CircuitBreakerConfig, MemoryConfig, PersistenceConfig, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub router: RouterConfig,
    #[serde(default)]
    pub ranking: RankingConfig,
    #[serde(default)]
    pub memory: MemoryAppConfig,
    #[serde(default)]
    pub persistence: PersistenceAppConfig,
    #[serde(default)]
    pub analytics: AnalyticsAppConfig,
    #[serde(default)]
    pub catalog: CatalogAppConfig,
}

impl AppConfig {
    /// Router and ranking sections as the pipeline expects them
    pub fn pipeline(&self) -> PipelineConfig {
        PipelineConfig::new(self.router.clone(), self.ranking.clone())
    }
}

/// Session memory configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryAppConfig {
    /// Idle seconds before a session is evicted
    #[serde(default = "default_cache_ttl_seconds")]
    pub cache_ttl_seconds: u64,
    #[serde(default = "default_max_turns")]
    pub max_turns_per_session: usize,
    /// How long a request waits for a busy session
    #[serde(default = "default_contention_timeout_ms")]
    pub contention_timeout_ms: u64,
    #[serde(default = "default_eviction_interval_secs")]
    pub eviction_interval_secs: u64,
}

impl Default for MemoryAppConfig {
    fn default() -> Self {
        Self {
            cache_ttl_seconds: default_cache_ttl_seconds(),
            max_turns_per_session: default_max_turns(),
            contention_timeout_ms: default_contention_timeout_ms(),
            eviction_interval_secs: default_eviction_interval_secs(),
        }
    }
}

impl MemoryAppConfig {
    pub fn to_memory_config(&self) -> MemoryConfig {
        MemoryConfig {
            cache_ttl: Duration::from_secs(self.cache_ttl_seconds),
            max_turns_per_session: self.max_turns_per_session,
            contention_timeout: Duration::from_millis(self.contention_timeout_ms),
            eviction_interval: Duration::from_secs(self.eviction_interval_secs),
        }
    }
}

fn default_cache_ttl_seconds() -> u64 {
    3600
}
fn default_max_turns() -> usize {
    50
}
fn default_contention_timeout_ms() -> u64 {
    250
}
fn default_eviction_interval_secs() -> u64 {
    60
}

/// Durable graph persistence configuration
///
/// Without a `database_path` the entity graph lives in process only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceAppConfig {
    #[serde(default)]
    pub database_path: Option<PathBuf>,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_attempt_timeout_ms")]
    pub attempt_timeout_ms: u64,
    #[serde(default = "default_breaker_failure_threshold")]
    pub breaker_failure_threshold: u32,
    #[serde(default = "default_breaker_reset_secs")]
    pub breaker_reset_secs: u64,
}

impl Default for PersistenceAppConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            queue_capacity: default_queue_capacity(),
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            attempt_timeout_ms: default_attempt_timeout_ms(),
            breaker_failure_threshold: default_breaker_failure_threshold(),
            breaker_reset_secs: default_breaker_reset_secs(),
        }
    }
}

impl PersistenceAppConfig {
    pub fn to_persistence_config(&self) -> PersistenceConfig {
        PersistenceConfig {
            queue_capacity: self.queue_capacity,
            retry: RetryPolicy::new()
                .with_max_attempts(self.max_attempts)
                .with_initial_delay(Duration::from_millis(self.initial_backoff_ms))
                .with_max_delay(Duration::from_millis(self.max_backoff_ms)),
            attempt_timeout: Duration::from_millis(self.attempt_timeout_ms),
            breaker: CircuitBreakerConfig {
                failure_threshold: self.breaker_failure_threshold,
                reset_timeout: Duration::from_secs(self.breaker_reset_secs),
            },
        }
    }
}

fn default_queue_capacity() -> usize {
    1024
}
fn default_max_attempts() -> u32 {
    8
}
fn default_initial_backoff_ms() -> u64 {
    200
}
fn default_max_backoff_ms() -> u64 {
    30_000
}
fn default_attempt_timeout_ms() -> u64 {
    2000
}
fn default_breaker_failure_threshold() -> u32 {
    5
}
fn default_breaker_reset_secs() -> u64 {
    30
}

/// Analytics configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsAppConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for AnalyticsAppConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            queue_capacity: default_queue_capacity(),
        }
    }
}

fn default_true() -> bool {
    true
}

/// Product catalog source
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogAppConfig {
    /// JSON catalog file; the bundled demo catalog when unset
    #[serde(default)]
    pub path: Option<PathBuf>,
}
