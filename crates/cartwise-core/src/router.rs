//! Strategy Selector / Router
//!
//! Two steps:
//! - [`Router::classify`] calls the NLU collaborator under the request
//!   deadline; failure, timeout or low confidence yield `Unknown`
//! - [`select_strategy`] maps the verdict to providers and a blend weight
//!   as a pure function of its inputs

use crate::config::RouterConfig;
use crate::intent::{ExtractedAttributes, Intent};
use crate::nlu::{Classification, ClassifyContext, IntentClassifier};
use crate::providers::ProviderKind;
use serde::Serialize;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, warn};

/// How a request will be served.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Strategy {
    /// Providers to invoke, in merge order
    pub providers: Vec<ProviderKind>,
    /// Exact (0.0) to broad (1.0) matching trade-off
    pub blend_weight: f64,
    /// Favour products matching requested dietary tags
    pub dietary_emphasis: bool,
    /// Skip the personalization reranker
    pub skip_personalization: bool,
    /// Skip summary generation
    pub skip_compilation: bool,
}

/// Classifier verdict plus whether the classifier itself failed.
#[derive(Debug, Clone)]
pub struct RoutedClassification {
    /// Verdict after thresholding
    pub classification: Classification,
    /// Why the classifier could not answer, if it could not
    pub failure: Option<String>,
}

/// Pick providers and blend weight for a classified request.
///
/// `cart_is_empty` is the only session signal consulted.
#[must_use]
pub fn select_strategy(
    config: &RouterConfig,
    intent: &Intent,
    attributes: &ExtractedAttributes,
    cart_is_empty: bool,
) -> Strategy {
    let blend_weight = if attributes.is_exact() {
        config.exact_blend_weight
    } else if attributes.exploratory {
        config.exploratory_blend_weight
    } else {
        config.default_blend_weight
    };

    let (providers, skip_personalization, skip_compilation) = match intent {
        Intent::ProductSearch { .. } => {
            let mut providers = vec![ProviderKind::Search];
            if !cart_is_empty {
                providers.push(ProviderKind::Complementary);
            }
            (providers, false, !attributes.exploratory)
        }
        Intent::CartOperation { .. } => (vec![ProviderKind::Cart], true, true),
        Intent::DietaryQuery { .. } => (vec![ProviderKind::Search], false, false),
        Intent::Conversational | Intent::Unknown => (Vec::new(), true, false),
    };

    let dietary_emphasis = match intent {
        Intent::DietaryQuery { .. } => true,
        Intent::ProductSearch { .. } => !attributes.dietary_tags.is_empty(),
        Intent::CartOperation { .. } | Intent::Conversational | Intent::Unknown => false,
    };

    Strategy {
        providers,
        blend_weight,
        dietary_emphasis,
        skip_personalization,
        skip_compilation,
    }
}

/// Classifies requests and selects strategies.
pub struct Router {
    classifier: Arc<dyn IntentClassifier>,
    config: RouterConfig,
}

impl Router {
    /// Create a router over an NLU collaborator.
    pub fn new(classifier: Arc<dyn IntentClassifier>, config: RouterConfig) -> Self {
        Self { classifier, config }
    }

    /// Router configuration.
    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Classify under the deadline. Never fails.
    pub async fn classify(
        &self,
        text: &str,
        context: &ClassifyContext,
        deadline: Instant,
    ) -> RoutedClassification {
        let result = tokio::time::timeout_at(deadline, self.classifier.classify(text, context)).await;
        let (classification, failure) = match result {
            Ok(Ok(c)) => (c, None),
            Ok(Err(e)) => {
                warn!(event = "ClassificationFailure", error = %e, "Classifier failed, falling back to unknown");
                (Classification::unknown(), Some(e.code().to_string()))
            }
            Err(_) => {
                warn!(event = "ClassificationFailure", "Classifier timed out, falling back to unknown");
                (Classification::unknown(), Some("classification_timeout".to_string()))
            }
        };

        let confident = classification.confidence.is_finite()
            && classification.confidence >= self.config.nlu_confidence_threshold;
        if !confident && classification.intent != Intent::Unknown
        {
            debug!(
                intent = %classification.intent.kind(),
                confidence = classification.confidence,
                threshold = self.config.nlu_confidence_threshold,
                "Low confidence classification treated as unknown"
            );
            return RoutedClassification {
                classification: Classification {
                    intent: Intent::Unknown,
                    ..classification
                },
                failure,
            };
        }

        RoutedClassification {
            classification,
            failure,
        }
    }

    /// [`select_strategy`] with this router's configuration.
    #[must_use]
    pub fn select_strategy(
        &self,
        intent: &Intent,
        attributes: &ExtractedAttributes,
        cart_is_empty: bool,
    ) -> Strategy {
        select_strategy(&self.config, intent, attributes, cart_is_empty)
    }
}
