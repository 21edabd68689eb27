//! Memory updates after a response is assembled
//!
//! Nothing here can change the response: failures are logged and dropped.

use crate::compiler::ResponseEnvelope;
use crate::intent::Intent;
use crate::nlu::Classification;
use crate::providers::{CartEffect, ProviderOutput};
use crate::signals;
use cartwise_memory::{Entity, RelationshipObservation, Turn};
use chrono::Utc;
use tracing::debug;

use super::core::Pipeline;
use super::request::{RequestContext, ShoppingRequest};

impl Pipeline {
    pub(super) async fn record_memory_updates(
        &self,
        ctx: &RequestContext,
        request: &ShoppingRequest,
        classification: &Classification,
        outputs: &[ProviderOutput],
        envelope: &ResponseEnvelope,
    ) {
        let label = ctx.intent.kind().to_string();
        let reply = envelope
            .data
            .summary
            .clone()
            .or_else(|| envelope.data.message.clone())
            .unwrap_or_else(|| format!("{} result(s)", envelope.data.candidates.len()));
        for turn in [
            Turn::user(request.turn_text()).with_intent(label.clone()),
            Turn::assistant(reply).with_intent(label),
        ] {
            if let Err(e) = self.memory.append_turn(&ctx.session_id, turn).await {
                debug!(session_id = %ctx.session_id, error = %e, "Turn not recorded");
            }
        }

        let now = Utc::now();
        let mut entities: Vec<Entity> = Vec::new();
        let mut observations: Vec<RelationshipObservation> = Vec::new();
        let mut order_confirmed = false;

        match &ctx.intent {
            Intent::ProductSearch { query } | Intent::DietaryQuery { query, .. } => {
                let skus: Vec<String> = envelope
                    .data
                    .candidates
                    .iter()
                    .map(|c| c.candidate.id.clone())
                    .collect();
                if !query.is_empty() {
                    let (e, o) = signals::searched_for(query, &skus, now);
                    entities.extend(e);
                    observations.extend(o);
                }
            }
            Intent::CartOperation { .. } | Intent::Conversational | Intent::Unknown => {}
        }

        for effect in outputs.iter().filter_map(|o| o.effect.as_ref()) {
            match effect {
                CartEffect::Added { sku, quantity } => {
                    let (e, o) = signals::added_to_cart(&self.catalog, &ctx.session_id, sku, *quantity, now);
                    entities.extend(e);
                    observations.extend(o);
                }
                CartEffect::Confirmed { order } => {
                    let (e, o) = signals::order_confirmed(&self.catalog, order, now);
                    entities.extend(e);
                    observations.extend(o);
                    order_confirmed = true;
                }
            }
        }

        entities.extend(signals::dietary_preferences(
            &classification.attributes.dietary_statements,
            now,
        ));

        if entities.is_empty() && observations.is_empty() {
            return;
        }
        let outcome = self
            .memory
            .record_entities(&ctx.user_id, &entities, &observations);
        if order_confirmed {
            self.memory.invalidate_dietary_profile(&ctx.user_id);
        }
        debug!(
            request_id = %ctx.request_id,
            user_id = %ctx.user_id,
            version = outcome.graph_version,
            entities = outcome.changed_entities,
            relationships = outcome.changed_relationships,
            persistence = ?outcome.persistence,
            "Memory updated"
        );
    }
}
