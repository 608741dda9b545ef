//! Product aggregate implementation.

use common::{BatchReference, Sku};

use crate::DomainError;
use crate::aggregate::{Aggregate, Version};

use super::{Batch, OrderLine, ProductEvent};

/// Product aggregate root.
///
/// Owns every batch of one SKU. All allocations go through [`Product::allocate`],
/// which picks the batch, bumps the version and records events. The version is
/// the optimistic concurrency token checked when a unit of work commits.
#[derive(Debug, Clone)]
pub struct Product {
    /// The SKU shared by all batches.
    sku: Sku,

    /// Batches in the order they were added.
    batches: Vec<Batch>,

    /// Current version for optimistic concurrency.
    version: Version,

    /// Events recorded since load, waiting for a commit. Never persisted.
    events: Vec<ProductEvent>,
}

impl Aggregate for Product {
    type Event = ProductEvent;
    type Id = Sku;

    fn aggregate_type() -> &'static str {
        "Product"
    }

    fn id(&self) -> &Sku {
        &self.sku
    }

    fn version(&self) -> Version {
        self.version
    }

    fn pending_events(&self) -> &[ProductEvent] {
        &self.events
    }

    fn pop_event(&mut self) -> Option<ProductEvent> {
        if self.events.is_empty() {
            None
        } else {
            Some(self.events.remove(0))
        }
    }

    fn record(&mut self, event: ProductEvent) {
        self.events.push(event);
    }

    fn clear_events(&mut self) {
        self.events.clear();
    }
}

impl Product {
    /// Creates a new product at the initial version.
    ///
    /// Fails if any batch carries a different SKU or two batches share a reference.
    pub fn new(sku: impl Into<Sku>, batches: Vec<Batch>) -> Result<Self, DomainError> {
        let mut product = Self {
            sku: sku.into(),
            batches: Vec::with_capacity(batches.len()),
            version: Version::initial(),
            events: Vec::new(),
        };
        for batch in batches {
            product.add_batch(batch)?;
        }
        Ok(product)
    }

    /// Rebuilds a product from stored state.
    ///
    /// The event queue always starts empty: events belong to the unit of work
    /// that recorded them and are never reloaded.
    pub fn restore(sku: Sku, batches: Vec<Batch>, version: Version) -> Self {
        Self {
            sku,
            batches,
            version,
            events: Vec::new(),
        }
    }

    pub fn sku(&self) -> &Sku {
        &self.sku
    }

    pub fn batches(&self) -> &[Batch] {
        &self.batches
    }

    /// Looks up a batch by reference.
    pub fn batch(&self, reference: &BatchReference) -> Option<&Batch> {
        self.batches.iter().find(|b| b.reference() == reference)
    }

    /// Total units still free across all batches.
    pub fn available_quantity(&self) -> u64 {
        self.batches
            .iter()
            .map(|b| u64::from(b.available_quantity()))
            .sum()
    }

    /// Adds a newly purchased batch.
    ///
    /// The version is left unchanged; only allocations advance it.
    pub fn add_batch(&mut self, batch: Batch) -> Result<(), DomainError> {
        if batch.sku() != &self.sku {
            return Err(DomainError::SkuMismatch {
                reference: batch.reference().clone(),
                expected: self.sku.clone(),
                actual: batch.sku().clone(),
            });
        }
        if self.batch(batch.reference()).is_some() {
            return Err(DomainError::DuplicateBatch(batch.reference().clone()));
        }
        self.batches.push(batch);
        Ok(())
    }

    /// Allocates the line to the preferred batch.
    ///
    /// In-warehouse batches win over shipments, and earlier shipments over
    /// later ones; among equals the first added wins. Returns the chosen batch
    /// reference and advances the version by one. If no batch can take the
    /// line, records an `OutOfStock` event, leaves the version alone and
    /// returns `None`.
    pub fn allocate(&mut self, line: &OrderLine) -> Option<BatchReference> {
        let chosen = self
            .batches
            .iter_mut()
            .filter(|batch| batch.can_allocate(line))
            .min_by(|a, b| a.cmp_by_eta(b));

        match chosen {
            Some(batch) => {
                batch.allocate(line);
                let reference = batch.reference().clone();
                self.version = self.version.next();
                tracing::debug!(
                    sku = %self.sku,
                    order_id = %line.order_id(),
                    batch_ref = %reference,
                    version = %self.version,
                    "order line allocated"
                );
                Some(reference)
            }
            None => {
                tracing::debug!(sku = %line.sku(), order_id = %line.order_id(), "out of stock");
                self.record(ProductEvent::out_of_stock(line.sku().clone()));
                None
            }
        }
    }
}
