use common::{BatchReference, Sku};
use domain::Version;
use thiserror::Error;

use crate::UowState;

/// Errors that can occur when loading or committing through a unit of work.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The product changed in storage after this unit of work loaded it.
    #[error(
        "Concurrency conflict for product {sku}: expected version {expected}, found {actual}"
    )]
    ConcurrencyConflict {
        sku: Sku,
        expected: Version,
        actual: Version,
    },

    /// A product added in this unit of work already exists in storage.
    #[error("Product already exists: {0}")]
    DuplicateProduct(Sku),

    /// The product was already loaded or added in this unit of work.
    #[error("Product already tracked in this unit of work: {0}")]
    AlreadyTracked(Sku),

    /// A batch reference is already used by another product.
    #[error("Batch reference already in use: {0}")]
    BatchReferenceTaken(BatchReference),

    /// Another unit of work committed a batch with this reference on the same
    /// product after this one loaded it.
    #[error("Batch {0} was added concurrently")]
    ConcurrentBatchAddition(BatchReference),

    /// The unit of work is not in a state that allows the operation.
    #[error("Cannot {action} a unit of work that is {state}")]
    InvalidState {
        action: &'static str,
        state: UowState,
    },

    /// A stored row could not be turned back into a domain value.
    #[error("Corrupt row: {0}")]
    CorruptRow(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl StoreError {
    /// Returns true for errors a caller may resolve by retrying the whole unit of work.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            StoreError::ConcurrencyConflict { .. }
                | StoreError::DuplicateProduct(_)
                | StoreError::ConcurrentBatchAddition(_)
        )
    }

    /// Returns true for errors caused by the caller's input rather than by
    /// storage or by racing writers.
    pub fn is_rejection(&self) -> bool {
        matches!(self, StoreError::BatchReferenceTaken(_))
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
