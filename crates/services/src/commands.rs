//! Allocation commands.

use chrono::NaiveDate;
use common::{BatchReference, OrderId, Sku};
use serde::Deserialize;

/// Command to register a newly purchased batch.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AddBatch {
    /// Unique reference of the batch.
    pub reference: BatchReference,

    /// The SKU the batch holds.
    pub sku: Sku,

    /// Units purchased.
    pub purchased_quantity: u32,

    /// Expected arrival, or `None` if the stock is already in the warehouse.
    #[serde(default)]
    pub eta: Option<NaiveDate>,
}

impl AddBatch {
    /// Creates a new AddBatch command.
    pub fn new(
        reference: impl Into<BatchReference>,
        sku: impl Into<Sku>,
        purchased_quantity: u32,
        eta: Option<NaiveDate>,
    ) -> Self {
        Self {
            reference: reference.into(),
            sku: sku.into(),
            purchased_quantity,
            eta,
        }
    }

    /// Returns true if the command carries a reference, a SKU and a positive quantity.
    pub fn is_valid(&self) -> bool {
        !self.reference.is_blank() && !self.sku.is_blank() && self.purchased_quantity > 0
    }
}

/// Command to allocate an order line to stock.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Allocate {
    pub order_id: OrderId,
    pub sku: Sku,
    pub quantity: u32,
}

impl Allocate {
    /// Creates a new Allocate command.
    pub fn new(order_id: impl Into<OrderId>, sku: impl Into<Sku>, quantity: u32) -> Self {
        Self {
            order_id: order_id.into(),
            sku: sku.into(),
            quantity,
        }
    }
}
