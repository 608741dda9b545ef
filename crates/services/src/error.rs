//! Service error types.

use common::Sku;
use domain::DomainError;
use store::StoreError;
use thiserror::Error;

/// Errors returned by the allocation entry operations.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// No product or batch carries the SKU.
    #[error("Invalid sku {0}")]
    InvalidSku(Sku),

    /// Every batch of the SKU is too small for the order line.
    #[error("Out of stock for sku {0}")]
    OutOfStock(Sku),

    /// The batch is missing a reference or SKU, or has no units.
    #[error("Invalid batch data")]
    InvalidBatch,

    /// Domain error.
    #[error("{0}")]
    Domain(#[from] DomainError),

    /// Store error.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl ServiceError {
    /// Returns true for business rejections caused by the request itself.
    pub fn is_rejection(&self) -> bool {
        match self {
            ServiceError::InvalidSku(_)
            | ServiceError::OutOfStock(_)
            | ServiceError::InvalidBatch
            | ServiceError::Domain(_) => true,
            ServiceError::Store(e) => e.is_rejection(),
        }
    }

    /// Returns true if retrying the whole operation may succeed.
    pub fn is_conflict(&self) -> bool {
        matches!(self, ServiceError::Store(e) if e.is_conflict())
    }
}

/// Convenience type alias for service results.
pub type Result<T> = std::result::Result<T, ServiceError>;
