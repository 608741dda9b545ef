//! Post-commit event dispatch.

use std::collections::HashMap;
use std::sync::Arc;

use common::Sku;
use domain::{Aggregate, DomainEvent, Product, ProductEvent};
use thiserror::Error;

use crate::repository::SeenProducts;

/// Failure reported by an event handler.
///
/// The transaction has already committed when handlers run, so a handler
/// error is logged and counted but never undoes the commit.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct HandlerError(pub String);

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// What an event handler may touch: read access to the committed products
/// and the ability to raise follow-up events on them.
///
/// Product state is already written when handlers run, so the sink hands out
/// no mutable products.
pub struct EventSink<'a> {
    products: &'a mut SeenProducts,
}

impl<'a> EventSink<'a> {
    pub fn new(products: &'a mut SeenProducts) -> Self {
        Self { products }
    }

    /// A product seen by the committing unit of work.
    pub fn product(&self, sku: &Sku) -> Option<&Product> {
        self.products.get(sku)
    }

    /// Queues `event` on the product it names. It is dispatched later in the
    /// same drain.
    pub fn raise(&mut self, event: ProductEvent) -> Result<(), HandlerError> {
        let product = self
            .products
            .get_mut(event.sku())
            .ok_or_else(|| HandlerError::new(format!("product {} not tracked", event.sku())))?;
        product.record(event);
        Ok(())
    }
}

/// A reaction to a committed domain event.
///
/// Handlers run synchronously inside `commit`, before it returns. Through the
/// [`EventSink`] they may read the products seen by the committing unit of
/// work and raise further events on them; those are drained in the same
/// dispatch loop.
pub trait EventHandler: Send + Sync {
    /// Name used in logs and metric labels.
    fn name(&self) -> &'static str;

    fn handle(&self, event: &ProductEvent, sink: &mut EventSink<'_>) -> Result<(), HandlerError>;
}

/// Routes events to handlers by event type.
#[derive(Default, Clone)]
pub struct MessageBus {
    handlers: HashMap<&'static str, Vec<Arc<dyn EventHandler>>>,
}

impl MessageBus {
    /// Creates a bus with no subscriptions.
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes a handler to one event type. Handlers run in subscription order.
    pub fn subscribe(&mut self, event_type: &'static str, handler: Arc<dyn EventHandler>) {
        self.handlers.entry(event_type).or_default().push(handler);
    }

    /// Builder-style [`MessageBus::subscribe`].
    pub fn with_handler(mut self, event_type: &'static str, handler: Arc<dyn EventHandler>) -> Self {
        self.subscribe(event_type, handler);
        self
    }

    /// Number of handlers subscribed to `event_type`.
    pub fn handler_count(&self, event_type: &str) -> usize {
        self.handlers.get(event_type).map_or(0, Vec::len)
    }

    /// Delivers one event to every handler subscribed to its type.
    pub fn dispatch(&self, event: &ProductEvent, products: &mut SeenProducts) {
        let event_type = event.event_type();
        let Some(handlers) = self.handlers.get(event_type) else {
            tracing::trace!(event_type, "no handlers subscribed");
            return;
        };

        let mut sink = EventSink::new(products);
        for handler in handlers {
            match handler.handle(event, &mut sink) {
                Ok(()) => {
                    tracing::debug!(event_type, handler = handler.name(), "event handled");
                }
                Err(e) => {
                    tracing::error!(
                        event_type,
                        handler = handler.name(),
                        error = %e,
                        "event handler failed"
                    );
                    metrics::counter!(
                        "messagebus_handler_failures_total",
                        "handler" => handler.name()
                    )
                    .increment(1);
                }
            }
        }
    }

    /// Drains every pending event from `products`, dispatching each one.
    ///
    /// Keeps going until no product has pending events, so events recorded by
    /// handlers are dispatched too. Returns how many events were dispatched.
    pub fn publish_all(&self, products: &mut SeenProducts) -> usize {
        let mut dispatched = 0;
        while let Some(event) = products.pop_next_event() {
            self.dispatch(&event, products);
            metrics::counter!(
                "messagebus_events_dispatched_total",
                "event_type" => event.event_type()
            )
            .increment(1);
            dispatched += 1;
        }
        dispatched
    }
}

impl std::fmt::Debug for MessageBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut subscriptions: Vec<_> = self
            .handlers
            .iter()
            .map(|(event_type, handlers)| (*event_type, handlers.len()))
            .collect();
        subscriptions.sort_unstable();
        f.debug_struct("MessageBus")
            .field("subscriptions", &subscriptions)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::{Batch, OrderLine};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<Sku>>,
    }

    impl EventHandler for Recorder {
        fn name(&self) -> &'static str {
            "recorder"
        }

        fn handle(&self, event: &ProductEvent, _: &mut EventSink<'_>) -> Result<(), HandlerError> {
            self.seen.lock().unwrap().push(event.sku().clone());
            Ok(())
        }
    }

    struct Failing;

    impl EventHandler for Failing {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn handle(&self, _: &ProductEvent, _: &mut EventSink<'_>) -> Result<(), HandlerError> {
            Err(HandlerError::new("boom"))
        }
    }

    /// Re-raises out-of-stock on a second product the first time it fires.
    struct Cascade {
        target: Sku,
    }

    impl EventHandler for Cascade {
        fn name(&self) -> &'static str {
            "cascade"
        }

        fn handle(&self, event: &ProductEvent, sink: &mut EventSink<'_>) -> Result<(), HandlerError> {
            if event.sku() == &self.target {
                return Ok(());
            }
            sink.raise(ProductEvent::out_of_stock(self.target.clone()))
        }
    }

    fn exhausted(sku: &str) -> Product {
        let mut product = Product::new(sku, vec![Batch::new(format!("{sku}-1").as_str(), sku, 0, None)]).unwrap();
        product.allocate(&OrderLine::new("o1", sku, 1).unwrap());
        product
    }

    #[test]
    fn publish_all_delivers_to_subscribers() {
        let recorder = Arc::new(Recorder::default());
        let bus = MessageBus::new().with_handler("OutOfStock", recorder.clone());
        let mut products = SeenProducts::new();
        products.track_added(exhausted("LAMP")).unwrap();

        let dispatched = bus.publish_all(&mut products);

        assert_eq!(dispatched, 1);
        assert_eq!(*recorder.seen.lock().unwrap(), vec![Sku::new("LAMP")]);
        assert!(!products.has_pending_events());
    }

    #[test]
    fn events_without_subscribers_are_still_drained() {
        let bus = MessageBus::new();
        let mut products = SeenProducts::new();
        products.track_added(exhausted("LAMP")).unwrap();

        assert_eq!(bus.publish_all(&mut products), 1);
        assert!(!products.has_pending_events());
    }

    #[test]
    fn handler_failure_does_not_stop_other_handlers() {
        let recorder = Arc::new(Recorder::default());
        let bus = MessageBus::new()
            .with_handler("OutOfStock", Arc::new(Failing))
            .with_handler("OutOfStock", recorder.clone());
        let mut products = SeenProducts::new();
        products.track_added(exhausted("LAMP")).unwrap();

        bus.publish_all(&mut products);

        assert_eq!(recorder.seen.lock().unwrap().len(), 1);
        assert_eq!(bus.handler_count("OutOfStock"), 2);
    }

    #[test]
    fn events_raised_by_handlers_are_drained_until_fixed_point() {
        let recorder = Arc::new(Recorder::default());
        let bus = MessageBus::new()
            .with_handler("OutOfStock", Arc::new(Cascade { target: Sku::new("SHADE") }))
            .with_handler("OutOfStock", recorder.clone());
        let mut products = SeenProducts::new();
        products.track_added(exhausted("LAMP")).unwrap();
        products
            .track_added(Product::new("SHADE", vec![]).unwrap())
            .unwrap();

        let dispatched = bus.publish_all(&mut products);

        assert_eq!(dispatched, 2);
        assert_eq!(
            *recorder.seen.lock().unwrap(),
            vec![Sku::new("LAMP"), Sku::new("SHADE")]
        );
        assert!(!products.has_pending_events());
    }

    #[test]
    fn sink_reads_products_and_refuses_untracked_ones() {
        let mut products = SeenProducts::new();
        products.track_added(exhausted("LAMP")).unwrap();
        products.discard_events();
        let mut sink = EventSink::new(&mut products);

        assert_eq!(sink.product(&Sku::new("LAMP")).unwrap().batches().len(), 1);
        assert!(sink.raise(ProductEvent::out_of_stock(Sku::new("SHADE"))).is_err());
        sink.raise(ProductEvent::out_of_stock(Sku::new("LAMP"))).unwrap();

        assert!(products.has_pending_events());
    }
}
