//! Allocation service providing the entry operations.

use common::BatchReference;
use domain::{Batch, OrderLine, Product};
use store::{Repository, UnitOfWork, UnitOfWorkFactory};

use crate::commands::{AddBatch, Allocate};
use crate::error::{Result, ServiceError};

/// Service for adding stock and allocating order lines.
///
/// Each call opens one unit of work, commits it at most once and never retries.
/// Conflicts surface as [`ServiceError::is_conflict`] errors for the caller to
/// retry.
#[derive(Debug, Clone)]
pub struct AllocationService<F: UnitOfWorkFactory> {
    uow_factory: F,
}

impl<F: UnitOfWorkFactory> AllocationService<F> {
    /// Creates a new allocation service over the given unit of work factory.
    pub fn new(uow_factory: F) -> Self {
        Self { uow_factory }
    }

    /// Returns a reference to the underlying unit of work factory.
    pub fn uow_factory(&self) -> &F {
        &self.uow_factory
    }

    /// Adds a batch, creating the product on its first batch.
    #[tracing::instrument(skip(self), fields(batch_ref = %cmd.reference, sku = %cmd.sku))]
    pub async fn add_batch(&self, cmd: AddBatch) -> Result<()> {
        if !cmd.is_valid() {
            return Err(ServiceError::InvalidBatch);
        }
        let AddBatch {
            reference,
            sku,
            purchased_quantity,
            eta,
        } = cmd;
        let batch = Batch::new(reference, sku.clone(), purchased_quantity, eta);

        let mut uow = self.uow_factory.begin().await?;
        match uow.products().get(&sku).await? {
            Some(product) => product.add_batch(batch)?,
            None => uow.products().add(Product::new(sku, vec![batch])?)?,
        }
        uow.commit().await?;

        metrics::counter!("batches_added_total").increment(1);
        Ok(())
    }

    /// Allocates an order line and returns the chosen batch reference.
    ///
    /// Fails with [`ServiceError::InvalidSku`] without committing when nothing
    /// is stocked under the SKU. When no batch can take the line the unit of
    /// work still commits, so the `OutOfStock` event is published, and then
    /// [`ServiceError::OutOfStock`] is returned.
    #[tracing::instrument(skip(self), fields(order_id = %cmd.order_id, sku = %cmd.sku))]
    pub async fn allocate(&self, cmd: Allocate) -> Result<BatchReference> {
        let line = OrderLine::new(cmd.order_id, cmd.sku, cmd.quantity)?;
        let sku = line.sku().clone();

        let mut uow = self.uow_factory.begin().await?;
        let allocated = match uow.products().get(&sku).await? {
            Some(product) if !product.batches().is_empty() => Some(product.allocate(&line)),
            _ => None,
        };
        let Some(allocated) = allocated else {
            uow.rollback().await?;
            tracing::debug!("unknown sku");
            return Err(ServiceError::InvalidSku(sku));
        };
        uow.commit().await?;

        match allocated {
            Some(batch_ref) => {
                metrics::counter!("allocations_total").increment(1);
                tracing::info!(%batch_ref, "order line allocated");
                Ok(batch_ref)
            }
            None => {
                metrics::counter!("allocations_out_of_stock_total").increment(1);
                Err(ServiceError::OutOfStock(sku))
            }
        }
    }
}
