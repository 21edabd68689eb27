//! Response Compiler
//!
//! Assembles the uniform [`ResponseEnvelope`] for every intent, optionally
//! asks a [`Summarizer`] for a short summary under the request deadline,
//! and emits exactly one analytics event per response.

use crate::analytics::{AnalyticsEmitter, AnalyticsEvent};
use crate::error::{Error, Result};
use crate::intent::{CartCommand, Intent, IntentKind};
use crate::pipeline::RequestContext;
use crate::providers::{ProviderKind, ProviderOutput, ProviderStatus};
use crate::ranking::{FilteredCandidate, RankedCandidate, RankedCandidates};
use crate::router::Strategy;
use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

/// Overall outcome of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    /// Everything on the essential path succeeded
    Ok,
    /// Something was skipped, timed out or failed
    Degraded,
}

/// What one provider contributed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderReport {
    /// Provider
    pub provider: ProviderKind,
    /// Call outcome
    pub status: ProviderStatus,
    /// Candidates it returned
    pub candidates: usize,
}

/// Intent-agnostic response body.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResponseData {
    /// Ranked candidates, best first
    pub candidates: Vec<RankedCandidate>,
    /// Candidates removed by dietary restrictions
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub filtered: Vec<FilteredCandidate>,
    /// Non-candidate payload (cart contents, order confirmation)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    /// Short human-readable message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Generated summary
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

/// Response metadata.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResponseMeta {
    /// Request ID
    pub request_id: String,
    /// Session ID
    pub session_id: String,
    /// Detected intent
    pub intent: IntentKind,
    /// Classifier confidence
    pub confidence: f64,
    /// Strategy used, when routing got that far
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy: Option<Strategy>,
    /// Per-provider outcomes
    pub providers: Vec<ProviderReport>,
    /// Providers that timed out or failed
    pub degraded_providers: Vec<ProviderKind>,
    /// Machine-readable error code, when degraded
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    /// Human-readable error, when degraded
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// A summary was requested but dropped
    pub summary_skipped: bool,
    /// Personalization signals applied
    pub signals_used: usize,
    /// Candidates removed by dietary restrictions
    pub filtered_count: usize,
    /// Wall time spent on the request
    pub elapsed_ms: u64,
}

/// Uniform response wrapper.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResponseEnvelope {
    /// Overall status
    pub status: ResponseStatus,
    /// Body
    pub data: ResponseData,
    /// Metadata
    pub meta: ResponseMeta,
}

impl ResponseEnvelope {
    /// Whether the response is degraded.
    pub fn is_degraded(&self) -> bool {
        self.status == ResponseStatus::Degraded
    }

    /// Pretty JSON for display.
    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Text generation collaborator.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Summarizer: Send + Sync {
    /// Summarize a response body for the shopper.
    async fn summarize(&self, intent: &Intent, data: &ResponseData) -> Result<String>;
}

/// Deterministic template summaries.
#[derive(Debug, Default, Clone, Copy)]
pub struct TemplateSummarizer;

#[async_trait]
impl Summarizer for TemplateSummarizer {
    async fn summarize(&self, intent: &Intent, data: &ResponseData) -> Result<String> {
        let Some(top) = data.candidates.first() else {
            return data
                .message
                .clone()
                .ok_or_else(|| Error::Summarization("nothing to summarize".to_string()));
        };

        let names: Vec<&str> = data
            .candidates
            .iter()
            .take(3)
            .map(|c| c.candidate.name.as_str())
            .collect();
        let list = match names.as_slice() {
            [one] => (*one).to_string(),
            [init @ .., last] => format!("{} and {last}", init.join(", ")),
            [] => String::new(),
        };

        let mut summary = match intent.query() {
            Some(query) => format!("Top picks for \"{query}\": {list}."),
            None => format!("Top picks: {list}."),
        };
        if let Some(boost) = top.boosts.iter().find(|b| b.amount > 0.0) {
            summary.push_str(&format!(" {} is first: {}.", top.candidate.name, boost.explanation));
        }
        if !data.filtered.is_empty() {
            summary.push_str(&format!(
                " {} item(s) hidden because of your dietary restrictions.",
                data.filtered.len()
            ));
        }
        Ok(summary)
    }
}

fn default_message(intent: &Intent, data: &ResponseData) -> Option<String> {
    match intent {
        Intent::Conversational => Some(
            "Hi! I can find products, manage your cart, or check dietary details.".to_string(),
        ),
        Intent::Unknown => Some(
            "Sorry, I didn't catch that. Try something like \"gluten free bread\" or \"add 2 oat milk\"."
                .to_string(),
        ),
        Intent::CartOperation { command } => Some(
            match command {
                CartCommand::Add { .. } => "Added to your cart.",
                CartCommand::Remove { .. } => "Removed from your cart.",
                CartCommand::SetQuantity { .. } => "Cart updated.",
                CartCommand::View => "Here is your cart.",
                CartCommand::Confirm => "Order confirmed.",
            }
            .to_string(),
        ),
        Intent::ProductSearch { query } | Intent::DietaryQuery { query, .. } => {
            if data.candidates.is_empty() {
                Some(format!("No products matched \"{query}\"."))
            } else {
                None
            }
        }
    }
}

/// Builds envelopes and emits analytics.
pub struct ResponseCompiler {
    summarizer: Arc<dyn Summarizer>,
    analytics: Option<Arc<AnalyticsEmitter>>,
}

impl Default for ResponseCompiler {
    fn default() -> Self {
        Self::new(Arc::new(TemplateSummarizer))
    }
}

impl ResponseCompiler {
    /// Compiler without analytics.
    pub fn new(summarizer: Arc<dyn Summarizer>) -> Self {
        Self {
            summarizer,
            analytics: None,
        }
    }

    /// Emit analytics through `emitter`.
    #[must_use]
    pub fn with_analytics(mut self, emitter: Arc<AnalyticsEmitter>) -> Self {
        self.analytics = Some(emitter);
        self
    }

    /// Compile a response from provider outputs and ranked candidates.
    ///
    /// With `generate_summary` set, the summarizer runs under the request
    /// deadline; a failed or late summary is dropped and noted in
    /// `meta.summary_skipped`.
    pub async fn compile(
        &self,
        ctx: &RequestContext,
        outputs: &[ProviderOutput],
        ranked: RankedCandidates,
        generate_summary: bool,
    ) -> ResponseEnvelope {
        let mut meta = self.base_meta(ctx);
        meta.signals_used = ranked.signals_used;
        meta.filtered_count = ranked.filtered.len();

        let mut failure_message = None;
        for output in outputs {
            meta.providers.push(ProviderReport {
                provider: output.provider,
                status: output.status.clone(),
                candidates: output.candidates.len(),
            });
            match &output.status {
                ProviderStatus::Ok => {}
                ProviderStatus::TimedOut => {
                    meta.degraded_providers.push(output.provider);
                    meta.error_code.get_or_insert_with(|| "provider_timeout".to_string());
                }
                ProviderStatus::Failed { code, message } => {
                    meta.degraded_providers.push(output.provider);
                    meta.error_code.get_or_insert_with(|| code.clone());
                    failure_message.get_or_insert_with(|| message.clone());
                }
            }
        }
        if let Some(code) = &ctx.classification_failure {
            meta.error_code.get_or_insert_with(|| code.clone());
        }

        let mut data = ResponseData {
            candidates: ranked.candidates,
            filtered: ranked.filtered,
            details: outputs.iter().find_map(|o| o.data.clone()),
            message: None,
            summary: None,
        };
        let message = failure_message
            .clone()
            .or_else(|| default_message(&ctx.intent, &data));
        data.message = message;
        meta.error_message = failure_message;

        if generate_summary {
            match tokio::time::timeout_at(ctx.deadline, self.summarizer.summarize(&ctx.intent, &data)).await {
                Ok(Ok(summary)) => data.summary = Some(summary),
                Ok(Err(e)) => {
                    debug!(request_id = %ctx.request_id, error = %e, "Summary dropped");
                    meta.summary_skipped = true;
                }
                Err(_) => {
                    warn!(request_id = %ctx.request_id, "Summary timed out, dropped");
                    meta.summary_skipped = true;
                }
            }
        }

        let status = if meta.error_code.is_some() || !meta.degraded_providers.is_empty() {
            ResponseStatus::Degraded
        } else {
            ResponseStatus::Ok
        };
        meta.elapsed_ms = elapsed_ms(ctx);
        let envelope = ResponseEnvelope { status, data, meta };
        self.emit(ctx, &envelope);
        envelope
    }

    /// Degraded envelope for a request that failed on the essential path.
    pub fn failure(&self, ctx: &RequestContext, error: &Error) -> ResponseEnvelope {
        let mut meta = self.base_meta(ctx);
        meta.error_code = Some(error.code().to_string());
        meta.error_message = Some(error.user_message());
        meta.elapsed_ms = elapsed_ms(ctx);
        let envelope = ResponseEnvelope {
            status: ResponseStatus::Degraded,
            data: ResponseData {
                message: Some(error.user_message()),
                ..ResponseData::default()
            },
            meta,
        };
        self.emit(ctx, &envelope);
        envelope
    }

    fn base_meta(&self, ctx: &RequestContext) -> ResponseMeta {
        ResponseMeta {
            request_id: ctx.request_id.clone(),
            session_id: ctx.session_id.clone(),
            intent: ctx.intent.kind(),
            confidence: ctx.confidence,
            strategy: ctx.strategy.clone(),
            providers: Vec::new(),
            degraded_providers: Vec::new(),
            error_code: None,
            error_message: None,
            summary_skipped: false,
            signals_used: 0,
            filtered_count: 0,
            elapsed_ms: 0,
        }
    }

    fn emit(&self, ctx: &RequestContext, envelope: &ResponseEnvelope) {
        let Some(analytics) = &self.analytics else {
            return;
        };
        let status = match envelope.status {
            ResponseStatus::Ok => "ok",
            ResponseStatus::Degraded => "degraded",
        };
        analytics.emit(AnalyticsEvent {
            request_id: ctx.request_id.clone(),
            session_id: ctx.session_id.clone(),
            user_id: ctx.user_id.clone(),
            intent: envelope.meta.intent.to_string(),
            status: status.to_string(),
            providers: envelope.meta.providers.iter().map(|p| p.provider.to_string()).collect(),
            degraded_providers: envelope
                .meta
                .degraded_providers
                .iter()
                .map(ToString::to_string)
                .collect(),
            error_code: envelope.meta.error_code.clone(),
            candidate_count: envelope.data.candidates.len(),
            filtered_count: envelope.meta.filtered_count,
            signals_used: envelope.meta.signals_used,
            summary_skipped: envelope.meta.summary_skipped,
            elapsed_ms: envelope.meta.elapsed_ms,
            at: Utc::now(),
        });
    }
}

fn elapsed_ms(ctx: &RequestContext) -> u64 {
    u64::try_from(ctx.started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::TracingAnalyticsSink;
    use crate::providers::Candidate;
    use std::time::Duration;
    use tokio::time::Instant;

    fn ctx(intent: Intent) -> RequestContext {
        RequestContext::new("u1", "s1", Instant::now() + Duration::from_millis(800)).with_intent(intent, 0.9)
    }

    fn search() -> Intent {
        Intent::ProductSearch {
            query: "bread".into(),
        }
    }

    fn ranked() -> RankedCandidates {
        RankedCandidates::passthrough(vec![
            Candidate::new("BRD-001", "Country White Bread", 0.9),
            Candidate::new("BRD-002", "Sourdough Bread", 0.8),
        ])
    }

    #[tokio::test]
    async fn test_ok_envelope_without_summary() {
        let compiler = ResponseCompiler::default();
        let outputs = [ProviderOutput::ok(ProviderKind::Search, Vec::new())];
        let envelope = compiler.compile(&ctx(search()), &outputs, ranked(), false).await;
        assert_eq!(envelope.status, ResponseStatus::Ok);
        assert_eq!(envelope.data.candidates.len(), 2);
        assert!(envelope.data.summary.is_none());
        assert!(!envelope.meta.summary_skipped);
        assert_eq!(envelope.meta.intent, IntentKind::ProductSearch);

        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["data"]["candidates"][0]["id"], "BRD-001");
        assert_eq!(json["data"]["candidates"][0]["final_score"], 0.9);
    }

    #[tokio::test]
    async fn test_template_summary() {
        let compiler = ResponseCompiler::default();
        let envelope = compiler.compile(&ctx(search()), &[], ranked(), true).await;
        assert_eq!(
            envelope.data.summary.as_deref(),
            Some("Top picks for \"bread\": Country White Bread and Sourdough Bread.")
        );
    }

    #[tokio::test]
    async fn test_failed_summary_is_dropped() {
        let mut summarizer = MockSummarizer::new();
        summarizer
            .expect_summarize()
            .returning(|_, _| Err(Error::Summarization("model offline".into())));
        let compiler = ResponseCompiler::new(Arc::new(summarizer));
        let envelope = compiler.compile(&ctx(search()), &[], ranked(), true).await;
        assert_eq!(envelope.status, ResponseStatus::Ok);
        assert!(envelope.data.summary.is_none());
        assert!(envelope.meta.summary_skipped);
    }

    #[tokio::test]
    async fn test_timed_out_provider_degrades() {
        let compiler = ResponseCompiler::default();
        let outputs = [
            ProviderOutput::ok(ProviderKind::Search, Vec::new()),
            ProviderOutput::timed_out(ProviderKind::Complementary),
        ];
        let envelope = compiler.compile(&ctx(search()), &outputs, ranked(), false).await;
        assert!(envelope.is_degraded());
        assert_eq!(envelope.meta.degraded_providers, vec![ProviderKind::Complementary]);
        assert_eq!(envelope.meta.error_code.as_deref(), Some("provider_timeout"));
        assert_eq!(envelope.data.candidates.len(), 2);
    }

    #[tokio::test]
    async fn test_failed_cart_command_surfaces_message() {
        let compiler = ResponseCompiler::default();
        let intent = Intent::CartOperation {
            command: CartCommand::Add {
                item: "caviar".into(),
                quantity: 1,
            },
        };
        let outputs = [ProviderOutput::failed(
            ProviderKind::Cart,
            "unknown_item",
            "No product matches \"caviar\".",
        )];
        let envelope = compiler
            .compile(&ctx(intent), &outputs, RankedCandidates::default(), false)
            .await;
        assert!(envelope.is_degraded());
        assert_eq!(envelope.meta.error_code.as_deref(), Some("unknown_item"));
        assert_eq!(envelope.data.message.as_deref(), Some("No product matches \"caviar\"."));
    }

    #[tokio::test]
    async fn test_unknown_intent_gets_clarifying_message() {
        let compiler = ResponseCompiler::default();
        let envelope = compiler
            .compile(&ctx(Intent::Unknown), &[], RankedCandidates::default(), true)
            .await;
        assert_eq!(envelope.status, ResponseStatus::Ok);
        assert!(envelope.data.message.as_deref().unwrap().starts_with("Sorry"));
        assert_eq!(envelope.data.summary, envelope.data.message);
    }

    #[tokio::test]
    async fn test_one_analytics_event_per_response() {
        let emitter = Arc::new(AnalyticsEmitter::new(Arc::new(TracingAnalyticsSink), 16));
        let compiler = ResponseCompiler::default().with_analytics(Arc::clone(&emitter));
        compiler.compile(&ctx(search()), &[], ranked(), false).await;
        compiler.failure(&ctx(search()), &Error::Internal("boom".into()));
        assert_eq!(emitter.stats().queued, 2);
        assert_eq!(emitter.pending(), 2);
    }

    #[test]
    fn test_failure_envelope() {
        let compiler = ResponseCompiler::default();
        let err = Error::Memory(cartwise_memory::Error::SessionOwnership {
            session_id: "s1".into(),
            user_id: "u2".into(),
        });
        let envelope = compiler.failure(&ctx(Intent::Unknown), &err);
        assert!(envelope.is_degraded());
        assert_eq!(envelope.meta.error_code.as_deref(), Some("session_ownership"));
        assert!(envelope.data.candidates.is_empty());
    }
}
