//! Domain error types.

use common::{BatchReference, Sku};
use thiserror::Error;

/// Errors raised when domain values or aggregates would become invalid.
///
/// Running out of stock is not an error here: `Product::allocate` reports it
/// through its return value and an `OutOfStock` event.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomainError {
    /// Order lines must request at least one unit.
    #[error("Invalid quantity: {quantity} (must be greater than 0)")]
    InvalidQuantity { quantity: u32 },

    /// A batch was offered to a product with a different SKU.
    #[error("Batch {reference} has sku {actual}, expected {expected}")]
    SkuMismatch {
        reference: BatchReference,
        expected: Sku,
        actual: Sku,
    },

    /// The product already owns a batch with this reference.
    #[error("Batch {0} already exists")]
    DuplicateBatch(BatchReference),
}
