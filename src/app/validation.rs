//! Configuration validation
//!
//! Rejects values the pipeline cannot run with; warns about the rest.

use super::config::AppConfig;
use anyhow::{bail, Context, Result};
use tracing::warn;

/// Validate the loaded configuration
pub fn validate_config(config: &AppConfig) -> Result<()> {
    config
        .pipeline()
        .validate()
        .context("Invalid pipeline configuration")?;

    if config.memory.max_turns_per_session == 0 {
        bail!("memory.max_turns_per_session must be greater than zero");
    }
    if config.memory.eviction_interval_secs == 0 {
        bail!("memory.eviction_interval_secs must be greater than zero");
    }
    if config.persistence.queue_capacity == 0 || config.analytics.queue_capacity == 0 {
        bail!("queue_capacity must be greater than zero");
    }
    if config.persistence.initial_backoff_ms > config.persistence.max_backoff_ms {
        bail!("persistence.initial_backoff_ms must not exceed persistence.max_backoff_ms");
    }

    if config.memory.contention_timeout_ms >= config.router.per_request_deadline_ms {
        warn!(
            contention_timeout_ms = config.memory.contention_timeout_ms,
            deadline_ms = config.router.per_request_deadline_ms,
            "Session contention timeout is not shorter than the request deadline"
        );
    }
    if config.persistence.database_path.is_none() {
        warn!("No persistence.database_path set; the entity graph is kept in memory only");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&AppConfig::default()).is_ok());
    }

    #[test]
    fn test_rejects_out_of_range_threshold() {
        let mut config = AppConfig::default();
        config.ranking.dietary_confidence_threshold = 1.5;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_rejects_zero_deadline() {
        let mut config = AppConfig::default();
        config.router.per_request_deadline_ms = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_rejects_inverted_backoff() {
        let mut config = AppConfig::default();
        config.persistence.initial_backoff_ms = 60_000;
        assert!(validate_config(&config).is_err());
    }
}
