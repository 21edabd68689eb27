//! Cart and order operations through the memory store.

use super::{CandidateProvider, CartEffect, ProviderKind, ProviderOutput, ProviderParams};
use crate::catalog::Catalog;
use crate::error::{Error, Result};
use crate::intent::{CartCommand, Intent};
use async_trait::async_trait;
use cartwise_memory::{Cart, CartMutation, MemoryStore};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info};
use uuid::Uuid;

/// Executes cart commands against the session cart.
pub struct CartProvider {
    memory: Arc<MemoryStore>,
    catalog: Arc<Catalog>,
}

fn cart_view(cart: &Cart) -> Value {
    json!({
        "items": cart.items(),
        "item_count": cart.len(),
        "subtotal": cart.subtotal(),
    })
}

impl CartProvider {
    /// Create a provider over the shared memory store.
    pub fn new(memory: Arc<MemoryStore>, catalog: Arc<Catalog>) -> Self {
        Self { memory, catalog }
    }

    /// SKU for an item phrase: a cart row first, then the catalog.
    fn resolve(&self, item: &str, cart: &Cart) -> Option<String> {
        let upper = item.trim().to_uppercase();
        if cart.contains(&upper) {
            return Some(upper);
        }
        self.catalog.resolve(item).map(|p| p.sku.clone())
    }

    async fn mutate(&self, params: &ProviderParams, mutation: CartMutation) -> Result<ProviderOutput> {
        let session = self.memory.mutate_cart(&params.session_id, &mutation).await?;
        Ok(ProviderOutput::ok(ProviderKind::Cart, Vec::new()).with_data(cart_view(&session.cart)))
    }

    async fn execute(&self, params: &ProviderParams, command: &CartCommand) -> Result<ProviderOutput> {
        let unknown = |item: &str| {
            ProviderOutput::failed(
                ProviderKind::Cart,
                "unknown_item",
                format!("No product matches \"{item}\"."),
            )
        };

        match command {
            CartCommand::Add { item, quantity } => {
                let Some(product) = self.catalog.resolve(item) else {
                    return Ok(unknown(item));
                };
                let mutation = CartMutation::add(product.sku.clone(), *quantity).with_unit_price(product.price);
                let output = self.mutate(params, mutation).await?;
                let added = u32::try_from(*quantity).unwrap_or(0);
                Ok(output.with_effect(CartEffect::Added {
                    sku: product.sku.clone(),
                    quantity: added,
                }))
            }
            CartCommand::Remove { item } => match self.resolve(item, &params.cart) {
                Some(sku) => self.mutate(params, CartMutation::remove(sku)).await,
                None => Ok(unknown(item)),
            },
            CartCommand::SetQuantity { item, quantity } => match self.resolve(item, &params.cart) {
                Some(sku) => {
                    let mut mutation = CartMutation::set_quantity(sku.clone(), *quantity);
                    if let Some(product) = self.catalog.get(&sku) {
                        mutation = mutation.with_unit_price(product.price);
                    }
                    self.mutate(params, mutation).await
                }
                None => Ok(unknown(item)),
            },
            CartCommand::View => {
                let cart = self
                    .memory
                    .find_session(&params.session_id)
                    .await
                    .map(|s| s.cart)
                    .unwrap_or_default();
                Ok(ProviderOutput::ok(ProviderKind::Cart, Vec::new()).with_data(cart_view(&cart)))
            }
            CartCommand::Confirm => {
                let order = self.memory.take_cart(&params.session_id).await?;
                if order.is_empty() {
                    return Ok(ProviderOutput::failed(
                        ProviderKind::Cart,
                        "empty_cart",
                        "There is nothing in the cart to confirm.",
                    ));
                }
                let order_id = Uuid::new_v4();
                info!(
                    session_id = %params.session_id,
                    user_id = %params.user_id,
                    %order_id,
                    items = order.len(),
                    "Order confirmed"
                );
                let data = json!({
                    "order_id": order_id,
                    "items": order.items(),
                    "item_count": order.len(),
                    "subtotal": order.subtotal(),
                });
                Ok(ProviderOutput::ok(ProviderKind::Cart, Vec::new())
                    .with_data(data)
                    .with_effect(CartEffect::Confirmed { order }))
            }
        }
    }
}

#[async_trait]
impl CandidateProvider for CartProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Cart
    }

    async fn query(&self, params: &ProviderParams, _deadline: Instant) -> Result<ProviderOutput> {
        let Intent::CartOperation { command } = &params.intent else {
            return Err(Error::Provider {
                provider: "cart".to_string(),
                message: format!("cannot handle {} intent", params.intent.kind()),
            });
        };
        debug!(
            request_id = %params.request_id,
            provider = "cart",
            op = command.op(),
            "Executing cart command"
        );
        match self.execute(params, command).await {
            Err(Error::Memory(e @ cartwise_memory::Error::InvalidMutation { .. })) => {
                let err = Error::Memory(e);
                Ok(ProviderOutput::failed(ProviderKind::Cart, err.code(), err.to_string()))
            }
            other => other,
        }
    }
}
