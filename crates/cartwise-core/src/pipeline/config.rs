//! Pipeline configuration

use crate::config::{RankingConfig, RouterConfig};
use crate::error::Result;
use serde::{Deserialize, Serialize};

/// Settings the pipeline needs from the application config.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Routing and deadline settings
    pub router: RouterConfig,
    /// Personalization settings
    pub ranking: RankingConfig,
}

impl PipelineConfig {
    /// Create from sections.
    pub fn new(router: RouterConfig, ranking: RankingConfig) -> Self {
        Self { router, ranking }
    }

    /// Validate both sections.
    pub fn validate(&self) -> Result<()> {
        self.router.validate()?;
        self.ranking.validate()
    }
}
