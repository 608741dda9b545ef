//! Order line value object.

use common::{OrderId, Sku};

use crate::DomainError;

/// A request for a quantity of one SKU within a customer order.
///
/// Order lines are values: two lines with the same order id, SKU and quantity
/// are the same line. Fields are private so a line can never change after it
/// has been placed in a batch's allocation set. The derived ordering over
/// `(order_id, sku, quantity)` is the allocation set's key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OrderLine {
    order_id: OrderId,
    sku: Sku,
    quantity: u32,
}

impl OrderLine {
    /// Creates an order line, rejecting a zero quantity.
    pub fn new(
        order_id: impl Into<OrderId>,
        sku: impl Into<Sku>,
        quantity: u32,
    ) -> Result<Self, DomainError> {
        if quantity == 0 {
            return Err(DomainError::InvalidQuantity { quantity });
        }
        Ok(Self {
            order_id: order_id.into(),
            sku: sku.into(),
            quantity,
        })
    }

    pub fn order_id(&self) -> &OrderId {
        &self.order_id
    }

    pub fn sku(&self) -> &Sku {
        &self.sku
    }

    pub fn quantity(&self) -> u32 {
        self.quantity
    }
}
