//! Stock batch entity.

use std::cmp::Ordering;
use std::collections::BTreeSet;

use chrono::NaiveDate;
use common::{BatchReference, Sku};

use super::OrderLine;

/// A purchased lot of one SKU that order lines can be allocated to.
///
/// Identity is the batch reference: two batches with the same reference are
/// the same batch whatever their other fields say.
#[derive(Debug, Clone)]
pub struct Batch {
    reference: BatchReference,
    sku: Sku,
    purchased_quantity: u32,
    /// `None` means the stock is already in the warehouse.
    eta: Option<NaiveDate>,
    allocations: BTreeSet<OrderLine>,
}

impl Batch {
    /// Creates a batch with no allocations.
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
            allocations: BTreeSet::new(),
        }
    }

    /// Rebuilds a batch from stored state.
    ///
    /// Stored allocations are taken as-is; they were checked when first made.
    pub fn restore(
        reference: BatchReference,
        sku: Sku,
        purchased_quantity: u32,
        eta: Option<NaiveDate>,
        allocations: impl IntoIterator<Item = OrderLine>,
    ) -> Self {
        Self {
            reference,
            sku,
            purchased_quantity,
            eta,
            allocations: allocations.into_iter().collect(),
        }
    }

    pub fn reference(&self) -> &BatchReference {
        &self.reference
    }

    pub fn sku(&self) -> &Sku {
        &self.sku
    }

    pub fn eta(&self) -> Option<NaiveDate> {
        self.eta
    }

    pub fn purchased_quantity(&self) -> u32 {
        self.purchased_quantity
    }

    /// Returns the allocated order lines in key order.
    pub fn allocations(&self) -> impl Iterator<Item = &OrderLine> {
        self.allocations.iter()
    }

    /// Returns true if the line is allocated to this batch.
    pub fn is_allocated(&self, line: &OrderLine) -> bool {
        self.allocations.contains(line)
    }

    /// Sum of the quantities of all allocated lines.
    pub fn allocated_quantity(&self) -> u32 {
        self.allocations
            .iter()
            .fold(0u32, |total, line| total.saturating_add(line.quantity()))
    }

    /// Units still free for allocation.
    pub fn available_quantity(&self) -> u32 {
        self.purchased_quantity
            .saturating_sub(self.allocated_quantity())
    }

    /// Returns true if the line matches this batch's SKU and fits in the remaining stock.
    pub fn can_allocate(&self, line: &OrderLine) -> bool {
        self.sku == *line.sku() && self.available_quantity() >= line.quantity()
    }

    /// Allocates the line if it fits; otherwise does nothing.
    ///
    /// Allocating a line that is already present is a no-op.
    pub fn allocate(&mut self, line: &OrderLine) {
        if self.can_allocate(line) {
            self.allocations.insert(line.clone());
        }
    }

    /// Removes the line if present.
    pub fn deallocate(&mut self, line: &OrderLine) {
        self.allocations.remove(line);
    }

    /// Compares two batches by arrival: in-warehouse stock (no eta) first,
    /// then earlier etas. Two in-warehouse batches compare equal.
    pub fn cmp_by_eta(&self, other: &Batch) -> Ordering {
        match (self.eta, other.eta) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
            (Some(a), Some(b)) => a.cmp(&b),
        }
    }
}

impl PartialEq for Batch {
    fn eq(&self, other: &Self) -> bool {
        self.reference == other.reference
    }
}

impl Eq for Batch {}

impl std::hash::Hash for Batch {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.reference.hash(state);
    }
}
