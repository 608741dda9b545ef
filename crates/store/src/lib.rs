//! Persistence for the allocation service.
//!
//! A [`UnitOfWork`] wraps one transaction and hands out a [`Repository`] bound to
//! it. Products loaded or added through the repository are tracked in
//! [`SeenProducts`]; on commit they are flushed with an optimistic version check
//! and the events they recorded are published through the [`MessageBus`].
//!
//! Two backends share this contract: [`InMemoryStore`] for tests and local runs,
//! and [`PostgresUnitOfWorkFactory`] for durable storage.

pub mod error;
pub mod memory;
pub mod messagebus;
pub mod postgres;
pub mod repository;
pub mod unit_of_work;

pub use error::{Result, StoreError};
pub use memory::{InMemoryRepository, InMemoryStore, InMemoryUnitOfWork};
pub use messagebus::{EventHandler, EventSink, HandlerError, MessageBus};
pub use postgres::{PostgresConfig, PostgresRepository, PostgresUnitOfWork, PostgresUnitOfWorkFactory};
pub use repository::{Origin, Repository, SeenProducts, Tracked};
pub use unit_of_work::{UnitOfWork, UnitOfWorkFactory, UowState};
