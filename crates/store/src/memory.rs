use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use common::{BatchReference, Sku};
use domain::{Aggregate, Batch, Product, Version};
use tokio::sync::RwLock;

use crate::repository::{Repository, SeenProducts, Tracked};
use crate::unit_of_work::{after_commit, after_failed_commit, ensure_open};
use crate::{MessageBus, Result, StoreError, UnitOfWork, UnitOfWorkFactory, UowState};

type Products = Arc<RwLock<HashMap<Sku, Product>>>;

/// In-memory product storage for tests and local runs.
///
/// Applies the same commit rules as the PostgreSQL backend: version checks on
/// loaded products, uniqueness of new products and batch references, and
/// per-batch writes so concurrent `add_batch` calls on one product both land.
/// A batch added in a unit of work is never written over a stored one.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    products: Products,
    bus: Arc<MessageBus>,
}

impl InMemoryStore {
    /// Creates an empty store with no event handlers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty store that publishes committed events on `bus`.
    pub fn with_message_bus(bus: MessageBus) -> Self {
        Self {
            products: Products::default(),
            bus: Arc::new(bus),
        }
    }

    /// Returns the number of stored products.
    pub async fn product_count(&self) -> usize {
        self.products.read().await.len()
    }

    /// Returns a copy of the stored product, if any.
    pub async fn product(&self, sku: &Sku) -> Option<Product> {
        self.products.read().await.get(sku).map(detached)
    }

    /// Removes every product.
    pub async fn clear(&self) {
        self.products.write().await.clear();
    }
}

#[async_trait]
impl UnitOfWorkFactory for InMemoryStore {
    type Uow = InMemoryUnitOfWork;

    async fn begin(&self) -> Result<InMemoryUnitOfWork> {
        Ok(InMemoryUnitOfWork {
            repo: InMemoryRepository {
                products: Arc::clone(&self.products),
                seen: SeenProducts::new(),
            },
            bus: Arc::clone(&self.bus),
            state: UowState::Open,
        })
    }
}

/// Repository over an [`InMemoryStore`].
pub struct InMemoryRepository {
    products: Products,
    seen: SeenProducts,
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn load(&mut self, sku: &Sku) -> Result<Option<Product>> {
        Ok(self.products.read().await.get(sku).map(detached))
    }

    fn seen(&self) -> &SeenProducts {
        &self.seen
    }

    fn seen_mut(&mut self) -> &mut SeenProducts {
        &mut self.seen
    }
}

/// Unit of work over an [`InMemoryStore`].
pub struct InMemoryUnitOfWork {
    repo: InMemoryRepository,
    bus: Arc<MessageBus>,
    state: UowState,
}

impl InMemoryUnitOfWork {
    async fn flush(&self) -> Result<()> {
        let mut stored = self.repo.products.write().await;
        validate(&stored, &self.repo.seen)?;
        for tracked in self.repo.seen.iter() {
            let sku = tracked.product().sku();
            let merged = merge(stored.get(sku), tracked);
            stored.insert(sku.clone(), merged);
        }
        Ok(())
    }
}

#[async_trait]
impl UnitOfWork for InMemoryUnitOfWork {
    type Repo = InMemoryRepository;

    fn products(&mut self) -> &mut InMemoryRepository {
        &mut self.repo
    }

    fn state(&self) -> UowState {
        self.state
    }

    #[tracing::instrument(skip(self), fields(backend = "memory"))]
    async fn commit(&mut self) -> Result<()> {
        ensure_open(self.state, "commit")?;
        let started = Instant::now();

        if let Err(e) = self.flush().await {
            after_failed_commit(&mut self.repo.seen, &e);
            self.state = UowState::RolledBack;
            return Err(e);
        }

        self.state = UowState::Committed;
        after_commit(&self.bus, &mut self.repo.seen, started);
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        if self.state != UowState::Open {
            return Ok(());
        }
        self.repo.seen.discard_events();
        self.repo.seen.clear();
        self.state = UowState::RolledBack;
        metrics::counter!("uow_rollbacks_total").increment(1);
        tracing::debug!("unit of work rolled back");
        Ok(())
    }
}

impl Drop for InMemoryUnitOfWork {
    fn drop(&mut self) {
        if self.state == UowState::Open && !self.repo.seen.is_empty() {
            tracing::debug!(products = self.repo.seen.len(), "unit of work dropped without commit");
        }
    }
}

/// Copies a stored product into a fresh aggregate with an empty event queue.
fn detached(product: &Product) -> Product {
    Product::restore(
        product.sku().clone(),
        product.batches().to_vec(),
        product.version(),
    )
}

/// Checks every tracked product against storage before anything is written.
fn validate(stored: &HashMap<Sku, Product>, seen: &SeenProducts) -> Result<()> {
    let mut owners: HashMap<&BatchReference, &Sku> = stored
        .values()
        .filter(|p| !seen.contains(p.sku()))
        .flat_map(|p| p.batches().iter().map(move |b| (b.reference(), p.sku())))
        .collect();

    for tracked in seen.iter() {
        let product = tracked.product();
        let sku = product.sku();
        let current = stored.get(sku);

        match (tracked.expected_version(), current) {
            (None, Some(_)) => return Err(StoreError::DuplicateProduct(sku.clone())),
            (Some(expected), Some(current)) if current.version() != expected => {
                return Err(StoreError::ConcurrencyConflict {
                    sku: sku.clone(),
                    expected,
                    actual: current.version(),
                });
            }
            (Some(expected), None) => {
                return Err(StoreError::ConcurrencyConflict {
                    sku: sku.clone(),
                    expected,
                    actual: Version::initial(),
                });
            }
            _ => {}
        }

        if let Some(current) = current
            && let Some(batch) = product
                .batches()
                .iter()
                .find(|b| tracked.is_new_batch(b.reference()) && current.batch(b.reference()).is_some())
        {
            return Err(StoreError::ConcurrentBatchAddition(batch.reference().clone()));
        }

        let batches = product
            .batches()
            .iter()
            .chain(current.into_iter().flat_map(|p| p.batches().iter()));
        for batch in batches {
            if let Some(owner) = owners.insert(batch.reference(), sku)
                && owner != sku
            {
                return Err(StoreError::BatchReferenceTaken(batch.reference().clone()));
            }
        }
    }
    Ok(())
}

/// Builds the product to store from what is stored now and what was tracked.
///
/// Loaded batches are replaced by reference and new ones appended. Stored
/// batches the unit of work never saw are kept, and stored allocations are kept unless the tracked product
/// allocated.
fn merge(current: Option<&Product>, tracked: &Tracked) -> Product {
    let product = tracked.product();
    let rewrite_allocations = tracked.allocations_changed();
    let mut batches: Vec<Batch> = current.map(|p| p.batches().to_vec()).unwrap_or_default();

    for batch in product.batches() {
        let position = batches.iter().position(|b| b.reference() == batch.reference());
        let merged = match position {
            Some(i) if !rewrite_allocations => Batch::restore(
                batch.reference().clone(),
                batch.sku().clone(),
                batch.purchased_quantity(),
                batch.eta(),
                batches[i].allocations().cloned(),
            ),
            _ => batch.clone(),
        };
        match position {
            Some(i) => batches[i] = merged,
            None => batches.push(merged),
        }
    }

    Product::restore(product.sku().clone(), batches, product.version())
}
