//! Pipeline main loop
//!
//! Contains `handle`: classify, route, query providers in parallel under
//! the deadline, rerank, compile, then record memory updates.

use crate::compiler::ResponseEnvelope;
use crate::error::Error;
use crate::intent::Intent;
use crate::nlu::{Classification, ClassifyContext};
use crate::providers::{Candidate, ProviderKind, ProviderOutput, ProviderParams};
use crate::ranking::{ProfileSnapshot, RankedCandidates};
use cartwise_memory::{Session, TurnRole};
use chrono::Utc;
use futures::future::join_all;
use std::collections::HashSet;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::core::Pipeline;
use super::request::{RequestContext, ShoppingRequest};

impl Pipeline {
    /// Handle one request. Never fails: problems on the essential path
    /// produce a `degraded` envelope with an error code.
    #[tracing::instrument(skip(self, request), fields(
        user_id = %request.user_id(),
        session_id = %request.session_id()
    ))]
    pub async fn handle(&self, request: ShoppingRequest) -> ResponseEnvelope {
        let deadline = Instant::now() + self.router.config().deadline();
        let mut ctx = RequestContext::new(request.user_id(), request.session_id(), deadline);

        let session = match self.memory.get_session(&ctx.session_id, &ctx.user_id).await {
            Ok(session) => session,
            Err(e) => {
                let err = Error::from(e);
                warn!(request_id = %ctx.request_id, error = %err, "Session unavailable");
                return self.compiler.failure(&ctx, &err);
            }
        };

        let classification = match &request {
            ShoppingRequest::Text { text, .. } => {
                ctx = ctx.with_text(text.clone());
                let context = classify_context(&session);
                let routed = self.router.classify(text, &context, deadline).await;
                ctx.classification_failure = routed.failure;
                routed.classification
            }
            ShoppingRequest::Structured { command, .. } => Classification {
                intent: Intent::CartOperation {
                    command: command.clone(),
                },
                confidence: 1.0,
                attributes: Default::default(),
            },
        };

        let strategy = self.router.select_strategy(
            &classification.intent,
            &classification.attributes,
            session.cart.is_empty(),
        );
        ctx = ctx
            .with_intent(classification.intent.clone(), classification.confidence)
            .with_strategy(strategy.clone());
        debug!(
            request_id = %ctx.request_id,
            intent = %ctx.intent.kind(),
            confidence = ctx.confidence,
            providers = ?strategy.providers,
            blend_weight = strategy.blend_weight,
            "Request routed"
        );

        let params = ProviderParams {
            request_id: ctx.request_id.clone(),
            user_id: ctx.user_id.clone(),
            session_id: ctx.session_id.clone(),
            intent: classification.intent.clone(),
            attributes: classification.attributes.clone(),
            blend_weight: strategy.blend_weight,
            dietary_emphasis: strategy.dietary_emphasis,
            cart: session.cart.clone(),
        };
        let outputs = self.run_providers(&strategy.providers, &params, deadline).await;
        let candidates = merge_candidates(&outputs);

        let ranked = if strategy.skip_personalization {
            RankedCandidates::passthrough(candidates)
        } else {
            let profile = ProfileSnapshot::capture(&self.memory, &ctx.user_id, &session.cart);
            self.ranking.rerank(candidates, &profile, Utc::now())
        };

        let envelope = self
            .compiler
            .compile(&ctx, &outputs, ranked, !strategy.skip_compilation)
            .await;

        self.record_memory_updates(&ctx, &request, &classification, &outputs, &envelope)
            .await;

        info!(
            request_id = %ctx.request_id,
            intent = %ctx.intent.kind(),
            status = ?envelope.status,
            candidates = envelope.data.candidates.len(),
            elapsed_ms = envelope.meta.elapsed_ms,
            "Request handled"
        );
        envelope
    }

    /// Query every provider in parallel, each bounded by the deadline.
    async fn run_providers(
        &self,
        kinds: &[ProviderKind],
        params: &ProviderParams,
        deadline: Instant,
    ) -> Vec<ProviderOutput> {
        let calls = kinds.iter().map(|&kind| async move {
            let Some(provider) = self.providers.get(&kind) else {
                warn!(provider = %kind, "No provider registered");
                return ProviderOutput::failed(kind, "provider_unavailable", format!("{kind} is not available"));
            };
            match tokio::time::timeout_at(deadline, provider.query(params, deadline)).await {
                Ok(Ok(output)) => output,
                Ok(Err(e)) => {
                    warn!(
                        request_id = %params.request_id,
                        provider = %kind,
                        error = %e,
                        "Provider failed"
                    );
                    ProviderOutput::failed(kind, e.code(), e.user_message())
                }
                Err(_) => {
                    let err = Error::ProviderTimeout {
                        provider: kind.to_string(),
                    };
                    warn!(
                        request_id = %params.request_id,
                        provider = %kind,
                        error = %err,
                        "Provider abandoned at deadline"
                    );
                    ProviderOutput::timed_out(kind)
                }
            }
        });
        join_all(calls).await
    }
}

fn classify_context(session: &Session) -> ClassifyContext {
    ClassifyContext {
        cart_skus: session.cart.skus(),
        last_intent: session
            .conversation_turns
            .iter()
            .rev()
            .find(|t| t.role == TurnRole::User)
            .and_then(|t| t.intent.clone()),
    }
}

/// Concatenate provider candidates in strategy order, first occurrence wins.
fn merge_candidates(outputs: &[ProviderOutput]) -> Vec<Candidate> {
    let mut seen = HashSet::new();
    outputs
        .iter()
        .flat_map(|o| o.candidates.iter())
        .filter(|c| seen.insert(c.id.clone()))
        .cloned()
        .collect()
}
