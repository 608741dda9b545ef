//! Domain layer for the allocation service.
//!
//! This crate provides the core domain abstractions including:
//! - Aggregate trait for consistency boundaries that record domain events
//! - DomainEvent trait for domain events
//! - Version, the optimistic concurrency token carried by aggregates
//! - Product aggregate with its batches and order lines

pub mod aggregate;
pub mod error;
pub mod product;

pub use aggregate::{Aggregate, DomainEvent, Version};
pub use common::{BatchReference, OrderId, Sku};
pub use error::DomainError;
pub use product::{Batch, OrderLine, OutOfStockData, Product, ProductEvent};
