//! Shopping cart: an insertion-ordered mapping from SKU to [`CartItem`].
//!
//! Quantities are always positive. Bringing an item to zero deletes the
//! row; there is never a zero-quantity entry.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A line in the cart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CartItem {
    /// Product SKU
    pub sku: String,
    /// Quantity, always > 0
    pub quantity: u32,
    /// Unit price at the time the item was added
    pub unit_price: f64,
    /// When the SKU first entered the cart
    pub added_at: DateTime<Utc>,
    /// Last quantity change
    pub modified_at: DateTime<Utc>,
}

/// Cart mutation operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CartOp {
    /// Add `quantity` units (creates the row if absent)
    Add,
    /// Remove `quantity` units, or the whole row when `quantity` is 0
    Remove,
    /// Set the quantity; 0 deletes the row
    SetQuantity,
}

impl std::fmt::Display for CartOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Add => write!(f, "add"),
            Self::Remove => write!(f, "remove"),
            Self::SetQuantity => write!(f, "set_quantity"),
        }
    }
}

/// A mutation command issued against one session's cart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CartMutation {
    /// Operation
    pub op: CartOp,
    /// Target SKU
    pub sku: String,
    /// Signed so that negative requests can be rejected with a clear error
    pub quantity: i64,
    /// Price used when the SKU is new to the cart
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit_price: Option<f64>,
}

impl CartMutation {
    /// Add `quantity` units of `sku`.
    pub fn add(sku: impl Into<String>, quantity: i64) -> Self {
        Self {
            op: CartOp::Add,
            sku: sku.into(),
            quantity,
            unit_price: None,
        }
    }

    /// Remove the whole row for `sku`.
    pub fn remove(sku: impl Into<String>) -> Self {
        Self {
            op: CartOp::Remove,
            sku: sku.into(),
            quantity: 0,
            unit_price: None,
        }
    }

    /// Set the quantity of `sku`.
    pub fn set_quantity(sku: impl Into<String>, quantity: i64) -> Self {
        Self {
            op: CartOp::SetQuantity,
            sku: sku.into(),
            quantity,
            unit_price: None,
        }
    }

    /// Attach the unit price for newly added SKUs.
    #[must_use]
    pub fn with_unit_price(mut self, price: f64) -> Self {
        self.unit_price = Some(price);
        self
    }
}

/// Insertion-ordered cart.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Cart {
    items: Vec<CartItem>,
}

impl Cart {
    /// Items in insertion order.
    pub fn items(&self) -> &[CartItem] {
        &self.items
    }

    /// Look up a SKU.
    pub fn get(&self, sku: &str) -> Option<&CartItem> {
        self.items.iter().find(|i| i.sku == sku)
    }

    /// Whether the SKU is in the cart.
    pub fn contains(&self, sku: &str) -> bool {
        self.get(sku).is_some()
    }

    /// Number of distinct SKUs.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the cart has no items.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Sum of quantity × unit price.
    pub fn subtotal(&self) -> f64 {
        self.items
            .iter()
            .map(|i| f64::from(i.quantity) * i.unit_price)
            .sum()
    }

    /// SKUs in insertion order.
    pub fn skus(&self) -> Vec<String> {
        self.items.iter().map(|i| i.sku.clone()).collect()
    }

    pub(crate) fn clear(&mut self) {
        self.items.clear();
    }

    /// Apply a mutation. On error the cart is left unchanged.
    pub fn apply(&mut self, mutation: &CartMutation, now: DateTime<Utc>) -> Result<()> {
        let sku = mutation.sku.as_str();
        if sku.trim().is_empty() {
            return Err(Error::invalid(sku, "sku must not be empty"));
        }
        if mutation.quantity < 0 {
            return Err(Error::invalid(
                sku,
                format!("quantity must not be negative (got {})", mutation.quantity),
            ));
        }
        let quantity = u32::try_from(mutation.quantity)
            .map_err(|_| Error::invalid(sku, format!("quantity {} is too large", mutation.quantity)))?;
        let position = self.items.iter().position(|i| i.sku == sku);

        match mutation.op {
            CartOp::Add => {
                if quantity == 0 {
                    return Err(Error::invalid(sku, "add requires a positive quantity"));
                }
                match position {
                    Some(idx) => {
                        let item = &mut self.items[idx];
                        item.quantity = item
                            .quantity
                            .checked_add(quantity)
                            .ok_or_else(|| Error::invalid(sku, "quantity overflow"))?;
                        item.modified_at = now;
                    }
                    None => {
                        let unit_price = mutation.unit_price.unwrap_or(0.0);
                        if !unit_price.is_finite() || unit_price < 0.0 {
                            return Err(Error::invalid(sku, "unit price must be a non-negative number"));
                        }
                        self.items.push(CartItem {
                            sku: sku.to_string(),
                            quantity,
                            unit_price,
                            added_at: now,
                            modified_at: now,
                        });
                    }
                }
            }
            CartOp::Remove => {
                let idx = position.ok_or_else(|| Error::invalid(sku, "sku is not in the cart"))?;
                if quantity == 0 || quantity >= self.items[idx].quantity {
                    self.items.remove(idx);
                } else {
                    let item = &mut self.items[idx];
                    item.quantity -= quantity;
                    item.modified_at = now;
                }
            }
            CartOp::SetQuantity => match (position, quantity) {
                (Some(idx), 0) => {
                    self.items.remove(idx);
                }
                (Some(idx), q) => {
                    let item = &mut self.items[idx];
                    item.quantity = q;
                    item.modified_at = now;
                }
                (None, 0) => {}
                (None, _) => {
                    return Err(Error::invalid(sku, "cannot set quantity of a sku not in the cart"));
                }
            },
        }
        Ok(())
    }
}
