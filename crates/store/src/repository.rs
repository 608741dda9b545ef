use async_trait::async_trait;
use common::{BatchReference, Sku};
use domain::{Aggregate, Product, ProductEvent, Version};

use crate::{Result, StoreError};

/// How a tracked product entered the unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Created in this unit of work; must not exist in storage at commit.
    Added,
    /// Read from storage at this version; storage must still hold it at commit.
    Loaded { version: Version },
}

/// A product tracked by a repository, together with its origin.
#[derive(Debug)]
pub struct Tracked {
    product: Product,
    origin: Origin,
    loaded_batches: Vec<BatchReference>,
}

impl Tracked {
    pub fn product(&self) -> &Product {
        &self.product
    }

    pub fn origin(&self) -> Origin {
        self.origin
    }

    /// Version storage is expected to hold at commit, or `None` for a new product.
    pub fn expected_version(&self) -> Option<Version> {
        match self.origin {
            Origin::Added => None,
            Origin::Loaded { version } => Some(version),
        }
    }

    /// Returns true if `reference` was not among the batches read from storage.
    ///
    /// New batches must be inserted; only loaded ones may be written over.
    pub fn is_new_batch(&self, reference: &BatchReference) -> bool {
        !self.loaded_batches.contains(reference)
    }

    /// Returns true if the product's allocations may differ from storage.
    ///
    /// Allocations only change through `Product::allocate`, which always
    /// advances the version.
    pub fn allocations_changed(&self) -> bool {
        match self.origin {
            Origin::Added => true,
            Origin::Loaded { version } => self.product.version() != version,
        }
    }
}

/// The products a repository has handed out during one unit of work.
///
/// Acts as an identity map: a SKU is loaded at most once per unit of work and
/// later `get` calls return the same in-memory product. The unit of work
/// flushes and drains events from exactly this set.
#[derive(Debug, Default)]
pub struct SeenProducts {
    entries: Vec<Tracked>,
}

impl SeenProducts {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, sku: &Sku) -> bool {
        self.position(sku).is_some()
    }

    pub fn get(&self, sku: &Sku) -> Option<&Product> {
        self.position(sku).map(|i| &self.entries[i].product)
    }

    pub fn get_mut(&mut self, sku: &Sku) -> Option<&mut Product> {
        self.position(sku).map(|i| &mut self.entries[i].product)
    }

    /// Iterates tracked entries in the order they were first seen.
    pub fn iter(&self) -> impl Iterator<Item = &Tracked> {
        self.entries.iter()
    }

    /// Starts tracking a product read from storage.
    pub fn track_loaded(&mut self, product: Product) -> Result<()> {
        let version = product.version();
        self.track(product, Origin::Loaded { version })
    }

    /// Starts tracking a product created in this unit of work.
    pub fn track_added(&mut self, product: Product) -> Result<()> {
        self.track(product, Origin::Added)
    }

    /// Returns true if any tracked product has undispatched events.
    pub fn has_pending_events(&self) -> bool {
        self.entries.iter().any(|e| e.product.has_pending_events())
    }

    /// Pops the oldest event of the first product that still has one.
    ///
    /// Calling this until it returns `None` drains every product, including
    /// events recorded while earlier ones were being handled.
    pub fn pop_next_event(&mut self) -> Option<ProductEvent> {
        self.entries
            .iter_mut()
            .find(|e| e.product.has_pending_events())
            .and_then(|e| e.product.pop_event())
    }

    /// Drops all pending events without dispatching them.
    pub fn discard_events(&mut self) {
        for entry in &mut self.entries {
            entry.product.clear_events();
        }
    }

    /// Forgets every tracked product.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    fn track(&mut self, product: Product, origin: Origin) -> Result<()> {
        if self.contains(product.sku()) {
            return Err(StoreError::AlreadyTracked(product.sku().clone()));
        }
        let loaded_batches = match origin {
            Origin::Added => Vec::new(),
            Origin::Loaded { .. } => product
                .batches()
                .iter()
                .map(|b| b.reference().clone())
                .collect(),
        };
        self.entries.push(Tracked {
            product,
            origin,
            loaded_batches,
        });
        Ok(())
    }

    fn position(&self, sku: &Sku) -> Option<usize> {
        self.entries.iter().position(|e| e.product.sku() == sku)
    }
}

/// Storage-agnostic access to products, bound to one unit of work.
///
/// Implementations only provide the storage read; tracking and the identity
/// map are shared. `get` on an unknown SKU returns `Ok(None)`; errors are
/// reserved for infrastructure failures.
#[async_trait]
pub trait Repository: Send {
    /// Reads a product from storage, bypassing the seen set.
    async fn load(&mut self, sku: &Sku) -> Result<Option<Product>>;

    /// Products seen in this unit of work.
    fn seen(&self) -> &SeenProducts;

    /// Mutable access to the products seen in this unit of work.
    fn seen_mut(&mut self) -> &mut SeenProducts;

    /// Registers a new product. It is written when the unit of work commits.
    fn add(&mut self, product: Product) -> Result<()> {
        tracing::debug!(sku = %product.sku(), "product added");
        self.seen_mut().track_added(product)
    }

    /// Returns the product for `sku`, loading it on first access.
    async fn get<'a>(&'a mut self, sku: &Sku) -> Result<Option<&'a mut Product>> {
        if !self.seen().contains(sku) {
            match self.load(sku).await? {
                Some(product) => {
                    tracing::debug!(%sku, version = %product.version(), "product loaded");
                    self.seen_mut().track_loaded(product)?;
                }
                None => return Ok(None),
            }
        }
        Ok(self.seen_mut().get_mut(sku))
    }
}
