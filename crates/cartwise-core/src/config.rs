//! Router and ranking configuration
//!
//! Both sections deserialize straight from the application config file;
//! missing keys fall back to the defaults below.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Routing, deadline and blend-weight settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Hard deadline for a whole request, in milliseconds
    pub per_request_deadline_ms: u64,
    /// Classifications below this confidence become `Unknown`
    pub nlu_confidence_threshold: f64,
    /// Blend weight when no signal moves it
    pub default_blend_weight: f64,
    /// Blend weight for queries naming a brand or SKU
    pub exact_blend_weight: f64,
    /// Blend weight for vague or exploratory queries
    pub exploratory_blend_weight: f64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            per_request_deadline_ms: 800,
            nlu_confidence_threshold: 0.4,
            default_blend_weight: 0.5,
            exact_blend_weight: 0.2,
            exploratory_blend_weight: 0.8,
        }
    }
}

impl RouterConfig {
    /// Request deadline as a `Duration`.
    #[must_use]
    pub fn deadline(&self) -> Duration {
        Duration::from_millis(self.per_request_deadline_ms)
    }

    /// Set the request deadline
    #[must_use]
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.per_request_deadline_ms = u64::try_from(deadline.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Reject out-of-range values.
    pub fn validate(&self) -> Result<()> {
        if self.per_request_deadline_ms == 0 {
            return Err(invalid("router.per_request_deadline_ms", "must be greater than zero"));
        }
        unit("router.nlu_confidence_threshold", self.nlu_confidence_threshold)?;
        unit("router.default_blend_weight", self.default_blend_weight)?;
        unit("router.exact_blend_weight", self.exact_blend_weight)?;
        unit("router.exploratory_blend_weight", self.exploratory_blend_weight)
    }
}

/// Personalization boosts and dietary thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RankingConfig {
    /// Restrictions at or above this confidence exclude candidates outright
    pub dietary_confidence_threshold: f64,
    /// Penalty scale for low-confidence dietary conflicts
    pub dietary_penalty: f64,
    /// Boost for a category the user bought before
    pub past_purchase_boost: f64,
    /// Boost for matching a dietary preference
    pub dietary_preference_boost: f64,
    /// Scale of the `USED_TOGETHER` boost
    pub used_together_boost: f64,
    /// Boost for a brand the user bought before
    pub preferred_brand_boost: f64,
    /// Half-life of `USED_TOGETHER` evidence; `None` disables decay
    pub recency_half_life_days: Option<f64>,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            dietary_confidence_threshold: 0.7,
            dietary_penalty: 0.5,
            past_purchase_boost: 0.15,
            dietary_preference_boost: 0.1,
            used_together_boost: 0.1,
            preferred_brand_boost: 0.1,
            recency_half_life_days: None,
        }
    }
}

impl RankingConfig {
    /// Reject out-of-range values.
    pub fn validate(&self) -> Result<()> {
        unit(
            "ranking.dietary_confidence_threshold",
            self.dietary_confidence_threshold,
        )?;
        for (field, value) in [
            ("ranking.dietary_penalty", self.dietary_penalty),
            ("ranking.past_purchase_boost", self.past_purchase_boost),
            ("ranking.dietary_preference_boost", self.dietary_preference_boost),
            ("ranking.used_together_boost", self.used_together_boost),
            ("ranking.preferred_brand_boost", self.preferred_brand_boost),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(invalid(field, "must be a non-negative number"));
            }
        }
        match self.recency_half_life_days {
            Some(days) if !days.is_finite() || days <= 0.0 => Err(invalid(
                "ranking.recency_half_life_days",
                "must be positive when set",
            )),
            _ => Ok(()),
        }
    }
}

fn invalid(field: &str, message: &str) -> Error {
    Error::InvalidConfig {
        field: field.to_string(),
        message: message.to_string(),
    }
}

fn unit(field: &str, value: f64) -> Result<()> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(invalid(field, "must be within 0..=1"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(RouterConfig::default().validate().is_ok());
        assert!(RankingConfig::default().validate().is_ok());
        assert_eq!(RouterConfig::default().deadline(), Duration::from_millis(800));
    }

    #[test]
    fn test_rejects_out_of_range() {
        let router = RouterConfig {
            default_blend_weight: 1.5,
            ..RouterConfig::default()
        };
        assert!(matches!(
            router.validate(),
            Err(Error::InvalidConfig { field, .. }) if field == "router.default_blend_weight"
        ));

        let zero = RouterConfig::default().with_deadline(Duration::ZERO);
        assert!(zero.validate().is_err());

        let ranking = RankingConfig {
            recency_half_life_days: Some(0.0),
            ..RankingConfig::default()
        };
        assert!(ranking.validate().is_err());
    }

    #[test]
    fn test_partial_deserialize_uses_defaults() {
        let cfg: RankingConfig =
            serde_json::from_str(r#"{"dietary_confidence_threshold": 0.9}"#).unwrap();
        assert_eq!(cfg.dietary_confidence_threshold, 0.9);
        assert_eq!(cfg.past_purchase_boost, 0.15);
    }
}
