//! Default reactions to product events.

use std::sync::Arc;

use domain::ProductEvent;
use store::{EventHandler, EventSink, HandlerError, MessageBus};

/// Reports products that ran out of stock.
///
/// Logs a warning and counts the event. Stands in for an outbound
/// notification channel.
#[derive(Debug, Default, Clone, Copy)]
pub struct OutOfStockNotifier;

impl EventHandler for OutOfStockNotifier {
    fn name(&self) -> &'static str {
        "out_of_stock_notifier"
    }

    fn handle(&self, event: &ProductEvent, _sink: &mut EventSink<'_>) -> Result<(), HandlerError> {
        let ProductEvent::OutOfStock(data) = event;
        tracing::warn!(sku = %data.sku, "out of stock");
        metrics::counter!("out_of_stock_notifications_total").increment(1);
        Ok(())
    }
}

/// Builds the message bus with the default subscriptions.
pub fn build_message_bus() -> MessageBus {
    MessageBus::new().with_handler(ProductEvent::OUT_OF_STOCK, Arc::new(OutOfStockNotifier))
}
