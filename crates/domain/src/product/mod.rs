//! Product aggregate and related types.

mod aggregate;
mod batch;
mod events;
mod order_line;

pub use aggregate::Product;
pub use batch::Batch;
pub use events::{OutOfStockData, ProductEvent};
pub use order_line::OrderLine;
