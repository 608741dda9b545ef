use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::NaiveDate;
use common::{BatchReference, OrderId, Sku};
use domain::{Aggregate, Batch, OrderLine, Product, Version};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgConnection, PgPool, Postgres, Row, Transaction};

use crate::repository::{Repository, SeenProducts, Tracked};
use crate::unit_of_work::{after_commit, after_failed_commit, ensure_open};
use crate::{MessageBus, Result, StoreError, UnitOfWork, UnitOfWorkFactory, UowState};

/// Connection settings for the PostgreSQL backend.
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    pub url: String,
    pub max_connections: u32,
}

impl PostgresConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_connections: 10,
        }
    }

    /// Opens a connection pool.
    pub async fn connect(&self) -> Result<PgPool> {
        let pool = PgPoolOptions::new()
            .max_connections(self.max_connections)
            .connect(&self.url)
            .await?;
        Ok(pool)
    }
}

/// Opens PostgreSQL-backed units of work, one transaction each.
#[derive(Debug, Clone)]
pub struct PostgresUnitOfWorkFactory {
    pool: PgPool,
    bus: Arc<MessageBus>,
}

impl PostgresUnitOfWorkFactory {
    /// Creates a factory with no event handlers.
    pub fn new(pool: PgPool) -> Self {
        Self::with_message_bus(pool, MessageBus::new())
    }

    /// Creates a factory whose units of work publish committed events on `bus`.
    pub fn with_message_bus(pool: PgPool, bus: MessageBus) -> Self {
        Self {
            pool,
            bus: Arc::new(bus),
        }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl UnitOfWorkFactory for PostgresUnitOfWorkFactory {
    type Uow = PostgresUnitOfWork;

    async fn begin(&self) -> Result<PostgresUnitOfWork> {
        let tx = self.pool.begin().await?;
        Ok(PostgresUnitOfWork {
            repo: PostgresRepository {
                tx: Some(tx),
                seen: SeenProducts::new(),
                state: UowState::Open,
            },
            bus: Arc::clone(&self.bus),
        })
    }
}

/// Repository reading through the unit of work's transaction.
///
/// Reads see writes made earlier in the same transaction.
pub struct PostgresRepository {
    tx: Option<Transaction<'static, Postgres>>,
    seen: SeenProducts,
    state: UowState,
}

impl PostgresRepository {
    fn connection(&mut self, action: &'static str) -> Result<&mut PgConnection> {
        let state = self.state;
        self.tx
            .as_deref_mut()
            .ok_or(StoreError::InvalidState { action, state })
    }
}

#[async_trait]
impl Repository for PostgresRepository {
    async fn load(&mut self, sku: &Sku) -> Result<Option<Product>> {
        let conn = self.connection("load through")?;
        load_product(conn, sku).await
    }

    fn seen(&self) -> &SeenProducts {
        &self.seen
    }

    fn seen_mut(&mut self) -> &mut SeenProducts {
        &mut self.seen
    }
}

/// Unit of work over one PostgreSQL transaction.
///
/// Dropping it while open rolls the transaction back.
pub struct PostgresUnitOfWork {
    repo: PostgresRepository,
    bus: Arc<MessageBus>,
}

impl PostgresUnitOfWork {
    /// Rolls back after a failed flush. A failed rollback replaces the original error.
    async fn abort(&mut self, error: StoreError) -> StoreError {
        after_failed_commit(&mut self.repo.seen, &error);
        self.repo.state = UowState::RolledBack;
        let Some(tx) = self.repo.tx.take() else {
            return error;
        };
        match tx.rollback().await {
            Ok(()) => error,
            Err(rollback_error) => {
                tracing::error!(
                    error = %error,
                    rollback_error = %rollback_error,
                    "rollback after failed commit failed"
                );
                StoreError::Database(rollback_error)
            }
        }
    }
}

#[async_trait]
impl UnitOfWork for PostgresUnitOfWork {
    type Repo = PostgresRepository;

    fn products(&mut self) -> &mut PostgresRepository {
        &mut self.repo
    }

    fn state(&self) -> UowState {
        self.repo.state
    }

    #[tracing::instrument(skip(self), fields(backend = "postgres"))]
    async fn commit(&mut self) -> Result<()> {
        ensure_open(self.repo.state, "commit")?;
        let started = Instant::now();

        let flushed = match self.repo.tx.as_deref_mut() {
            Some(conn) => flush(conn, &self.repo.seen).await,
            None => Err(StoreError::InvalidState {
                action: "commit",
                state: self.repo.state,
            }),
        };
        if let Err(e) = flushed {
            return Err(self.abort(e).await);
        }

        if let Some(tx) = self.repo.tx.take()
            && let Err(e) = tx.commit().await
        {
            let error = StoreError::Database(e);
            after_failed_commit(&mut self.repo.seen, &error);
            self.repo.state = UowState::RolledBack;
            return Err(error);
        }

        self.repo.state = UowState::Committed;
        after_commit(&self.bus, &mut self.repo.seen, started);
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        if self.repo.state != UowState::Open {
            return Ok(());
        }
        self.repo.seen.discard_events();
        self.repo.seen.clear();
        self.repo.state = UowState::RolledBack;
        metrics::counter!("uow_rollbacks_total").increment(1);
        if let Some(tx) = self.repo.tx.take() {
            tx.rollback().await?;
        }
        tracing::debug!("unit of work rolled back");
        Ok(())
    }
}

async fn load_product(conn: &mut PgConnection, sku: &Sku) -> Result<Option<Product>> {
    let row = sqlx::query("SELECT sku, version_number FROM products WHERE sku = $1")
        .bind(sku.as_str())
        .fetch_optional(&mut *conn)
        .await?;
    let Some(row) = row else {
        return Ok(None);
    };
    let version = Version::new(row.try_get("version_number")?);

    let allocation_rows = sqlx::query(
        r#"
        SELECT a.batch_id, a.orderid, a.sku, a.qty
        FROM allocations a
        JOIN batches b ON b.id = a.batch_id
        WHERE b.sku = $1
        "#,
    )
    .bind(sku.as_str())
    .fetch_all(&mut *conn)
    .await?;

    let mut allocations: HashMap<i64, Vec<OrderLine>> = HashMap::new();
    for row in allocation_rows {
        let batch_id: i64 = row.try_get("batch_id")?;
        allocations
            .entry(batch_id)
            .or_default()
            .push(row_to_order_line(&row)?);
    }

    let batch_rows = sqlx::query(
        r#"
        SELECT id, reference, sku, purchased_quantity, eta
        FROM batches
        WHERE sku = $1
        ORDER BY id ASC
        "#,
    )
    .bind(sku.as_str())
    .fetch_all(&mut *conn)
    .await?;

    let batches = batch_rows
        .iter()
        .map(|row| {
            let id: i64 = row.try_get("id")?;
            row_to_batch(row, allocations.remove(&id).unwrap_or_default())
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(Some(Product::restore(sku.clone(), batches, version)))
}

fn row_to_batch(row: &PgRow, allocations: Vec<OrderLine>) -> Result<Batch> {
    let reference: String = row.try_get("reference")?;
    let sku: String = row.try_get("sku")?;
    let eta: Option<NaiveDate> = row.try_get("eta")?;
    Ok(Batch::restore(
        BatchReference::new(reference),
        Sku::new(sku),
        quantity(row, "purchased_quantity")?,
        eta,
        allocations,
    ))
}

fn row_to_order_line(row: &PgRow) -> Result<OrderLine> {
    let order_id: String = row.try_get("orderid")?;
    let sku: String = row.try_get("sku")?;
    OrderLine::new(OrderId::new(order_id), Sku::new(sku), quantity(row, "qty")?)
        .map_err(|e| StoreError::CorruptRow(format!("allocation: {e}")))
}

fn quantity(row: &PgRow, column: &str) -> Result<u32> {
    let value: i64 = row.try_get(column)?;
    u32::try_from(value)
        .map_err(|_| StoreError::CorruptRow(format!("{column} out of range: {value}")))
}

/// Writes every tracked product inside the open transaction.
async fn flush(conn: &mut PgConnection, seen: &SeenProducts) -> Result<()> {
    for tracked in seen.iter() {
        save_product(conn, tracked).await?;
    }
    Ok(())
}

async fn save_product(conn: &mut PgConnection, tracked: &Tracked) -> Result<()> {
    let product = tracked.product();
    let sku = product.sku();

    match tracked.expected_version() {
        None => {
            sqlx::query("INSERT INTO products (sku, version_number) VALUES ($1, $2)")
                .bind(sku.as_str())
                .bind(product.version().as_i64())
                .execute(&mut *conn)
                .await
                .map_err(|e| {
                    if let sqlx::Error::Database(ref db_err) = e
                        && db_err.constraint() == Some("products_pkey")
                    {
                        return StoreError::DuplicateProduct(sku.clone());
                    }
                    StoreError::Database(e)
                })?;
        }
        Some(expected) => {
            // Also takes the row lock that serializes writers of this product.
            let updated = sqlx::query(
                "UPDATE products SET version_number = $2 WHERE sku = $1 AND version_number = $3",
            )
            .bind(sku.as_str())
            .bind(product.version().as_i64())
            .bind(expected.as_i64())
            .execute(&mut *conn)
            .await?;

            if updated.rows_affected() == 0 {
                let actual: Option<i64> =
                    sqlx::query_scalar("SELECT version_number FROM products WHERE sku = $1")
                        .bind(sku.as_str())
                        .fetch_optional(&mut *conn)
                        .await?;
                return Err(StoreError::ConcurrencyConflict {
                    sku: sku.clone(),
                    expected,
                    actual: actual.map_or(Version::initial(), Version::new),
                });
            }
        }
    }

    let rewrite_allocations = tracked.allocations_changed();
    for batch in product.batches() {
        let batch_id = if tracked.is_new_batch(batch.reference()) {
            insert_batch(conn, batch).await?
        } else {
            save_batch(conn, batch).await?
        };
        if rewrite_allocations {
            save_allocations(conn, batch_id, batch).await?;
        }
    }
    Ok(())
}

/// Inserts a batch created in this unit of work. An existing row with the same
/// reference is never touched.
async fn insert_batch(conn: &mut PgConnection, batch: &Batch) -> Result<i64> {
    let id: Option<i64> = sqlx::query_scalar(
        r#"
        INSERT INTO batches (reference, sku, purchased_quantity, eta)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (reference) DO NOTHING
        RETURNING id
        "#,
    )
    .bind(batch.reference().as_str())
    .bind(batch.sku().as_str())
    .bind(i64::from(batch.purchased_quantity()))
    .bind(batch.eta())
    .fetch_optional(&mut *conn)
    .await?;

    if let Some(id) = id {
        return Ok(id);
    }

    let owner: Option<String> = sqlx::query_scalar("SELECT sku FROM batches WHERE reference = $1")
        .bind(batch.reference().as_str())
        .fetch_optional(&mut *conn)
        .await?;
    let reference = batch.reference().clone();
    match owner {
        Some(owner) if owner == batch.sku().as_str() => {
            Err(StoreError::ConcurrentBatchAddition(reference))
        }
        _ => Err(StoreError::BatchReferenceTaken(reference)),
    }
}

/// Writes a batch that was loaded in this unit of work.
async fn save_batch(conn: &mut PgConnection, batch: &Batch) -> Result<i64> {
    let id: Option<i64> = sqlx::query_scalar(
        r#"
        INSERT INTO batches (reference, sku, purchased_quantity, eta)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (reference) DO UPDATE
            SET purchased_quantity = EXCLUDED.purchased_quantity, eta = EXCLUDED.eta
            WHERE batches.sku = EXCLUDED.sku
        RETURNING id
        "#,
    )
    .bind(batch.reference().as_str())
    .bind(batch.sku().as_str())
    .bind(i64::from(batch.purchased_quantity()))
    .bind(batch.eta())
    .fetch_optional(&mut *conn)
    .await?;

    id.ok_or_else(|| StoreError::BatchReferenceTaken(batch.reference().clone()))
}

async fn save_allocations(conn: &mut PgConnection, batch_id: i64, batch: &Batch) -> Result<()> {
    sqlx::query("DELETE FROM allocations WHERE batch_id = $1")
        .bind(batch_id)
        .execute(&mut *conn)
        .await?;

    for line in batch.allocations() {
        sqlx::query("INSERT INTO allocations (batch_id, orderid, sku, qty) VALUES ($1, $2, $3, $4)")
            .bind(batch_id)
            .bind(line.order_id().as_str())
            .bind(line.sku().as_str())
            .bind(i64::from(line.quantity()))
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}
