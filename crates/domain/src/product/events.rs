//! Product domain events.

use common::Sku;
use serde::{Deserialize, Serialize};

use crate::aggregate::DomainEvent;

/// Events recorded by the product aggregate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ProductEvent {
    /// No batch could satisfy an order line.
    OutOfStock(OutOfStockData),
}

impl DomainEvent for ProductEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ProductEvent::OutOfStock(_) => Self::OUT_OF_STOCK,
        }
    }
}

/// Data for OutOfStock event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutOfStockData {
    /// The SKU that could not be allocated.
    pub sku: Sku,
}

impl ProductEvent {
    /// Event type of [`ProductEvent::OutOfStock`], for message bus subscriptions.
    pub const OUT_OF_STOCK: &'static str = "OutOfStock";

    /// Creates an OutOfStock event.
    pub fn out_of_stock(sku: Sku) -> Self {
        ProductEvent::OutOfStock(OutOfStockData { sku })
    }

    /// Returns the SKU the event concerns.
    pub fn sku(&self) -> &Sku {
        match self {
            ProductEvent::OutOfStock(data) => &data.sku,
        }
    }
}
