//! Entry operations of the allocation service.
//!
//! [`AllocationService`] runs each operation in its own unit of work opened
//! from a [`store::UnitOfWorkFactory`]. Business rejections come back as
//! [`ServiceError`] values that callers can tell apart from storage faults.

pub mod commands;
pub mod error;
pub mod handlers;
pub mod service;

pub use commands::{AddBatch, Allocate};
pub use error::{Result, ServiceError};
pub use handlers::{OutOfStockNotifier, build_message_bus};
pub use service::AllocationService;
