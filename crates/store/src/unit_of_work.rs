//! Unit of work traits.

use std::fmt;
use std::time::Instant;

use async_trait::async_trait;

use crate::repository::{Repository, SeenProducts};
use crate::{MessageBus, Result, StoreError};

/// Lifecycle of a unit of work.
///
/// `Open` moves to `Committed` or `RolledBack` exactly once; both are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UowState {
    Open,
    Committed,
    RolledBack,
}

impl fmt::Display for UowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UowState::Open => "open",
            UowState::Committed => "committed",
            UowState::RolledBack => "rolled back",
        };
        f.write_str(s)
    }
}

/// One atomic scope of work over products.
///
/// Every mutation made through [`UnitOfWork::products`] is written by
/// [`UnitOfWork::commit`] in a single transaction, or not at all. After a
/// successful commit the events recorded on the seen products are published
/// before `commit` returns. Dropping an open unit of work is equivalent to
/// rolling it back.
#[async_trait]
pub trait UnitOfWork: Send {
    type Repo: Repository;

    /// The repository bound to this unit of work.
    fn products(&mut self) -> &mut Self::Repo;

    fn state(&self) -> UowState;

    /// Persists all tracked products and publishes their events.
    ///
    /// Fails with [`StoreError::ConcurrencyConflict`] if any loaded product
    /// changed in storage since it was read. On failure the unit of work is
    /// rolled back and no events are published.
    async fn commit(&mut self) -> Result<()>;

    /// Discards all mutations and pending events. Calling it again, or after
    /// a commit, does nothing.
    async fn rollback(&mut self) -> Result<()>;
}

/// Opens units of work against one backend.
#[async_trait]
pub trait UnitOfWorkFactory: Send + Sync {
    type Uow: UnitOfWork;

    async fn begin(&self) -> Result<Self::Uow>;
}

/// Fails unless the unit of work can still be committed.
pub(crate) fn ensure_open(state: UowState, action: &'static str) -> Result<()> {
    match state {
        UowState::Open => Ok(()),
        state => Err(StoreError::InvalidState { action, state }),
    }
}

/// Bookkeeping shared by every backend once the transaction has committed.
pub(crate) fn after_commit(bus: &MessageBus, seen: &mut SeenProducts, started: Instant) {
    metrics::counter!("uow_commits_total").increment(1);
    metrics::histogram!("uow_commit_duration_seconds").record(started.elapsed().as_secs_f64());
    let dispatched = bus.publish_all(seen);
    tracing::debug!(products = seen.len(), events = dispatched, "unit of work committed");
}

/// Bookkeeping shared by every backend when a commit fails.
pub(crate) fn after_failed_commit(seen: &mut SeenProducts, error: &StoreError) {
    seen.discard_events();
    if error.is_conflict() {
        metrics::counter!("uow_conflicts_total").increment(1);
        tracing::info!(error = %error, "unit of work commit conflicted");
    } else {
        tracing::warn!(error = %error, "unit of work commit failed");
    }
}
