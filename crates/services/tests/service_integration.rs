//! End-to-end tests of the entry operations over the in-memory backend.

use std::sync::{Arc, Mutex};

use common::{BatchReference, Sku};
use domain::{Aggregate, Batch, Product, ProductEvent, Version};
use services::{AddBatch, Allocate, AllocationService, ServiceError, build_message_bus};
use store::{
    EventHandler, EventSink, HandlerError, InMemoryStore, MessageBus, Repository, UnitOfWork,
    UnitOfWorkFactory,
};

#[derive(Default)]
struct RecordingHandler {
    skus: Mutex<Vec<Sku>>,
}

impl EventHandler for RecordingHandler {
    fn name(&self) -> &'static str {
        "recording"
    }

    fn handle(&self, event: &ProductEvent, _: &mut EventSink<'_>) -> Result<(), HandlerError> {
        self.skus.lock().unwrap().push(event.sku().clone());
        Ok(())
    }
}

fn recording_service() -> (AllocationService<InMemoryStore>, Arc<RecordingHandler>) {
    let recorder = Arc::new(RecordingHandler::default());
    let bus = build_message_bus().with_handler(ProductEvent::OUT_OF_STOCK, recorder.clone());
    (
        AllocationService::new(InMemoryStore::with_message_bus(bus)),
        recorder,
    )
}

mod allocation_flow {
    use super::*;

    #[tokio::test]
    async fn prefers_warehouse_stock_then_earliest_shipment() {
        let (service, _) = recording_service();
        let tomorrow = chrono::NaiveDate::from_ymd_opt(2030, 1, 2).unwrap();
        service
            .add_batch(AddBatch::new("shipment", "LAMP", 10, Some(tomorrow)))
            .await
            .unwrap();
        service
            .add_batch(AddBatch::new("warehouse", "LAMP", 10, None))
            .await
            .unwrap();

        let first = service.allocate(Allocate::new("o1", "LAMP", 10)).await.unwrap();
        let second = service.allocate(Allocate::new("o2", "LAMP", 10)).await.unwrap();

        assert_eq!(first, BatchReference::new("warehouse"));
        assert_eq!(second, BatchReference::new("shipment"));
        let product = service
            .uow_factory()
            .product(&Sku::new("LAMP"))
            .await
            .unwrap();
        assert_eq!(product.available_quantity(), 0);
    }

    #[tokio::test]
    async fn out_of_stock_is_committed_then_published_then_rejected() {
        let (service, recorder) = recording_service();
        service
            .add_batch(AddBatch::new("b1", "S", 10, None))
            .await
            .unwrap();
        service.allocate(Allocate::new("o1", "S", 10)).await.unwrap();
        assert!(recorder.skus.lock().unwrap().is_empty());

        let result = service.allocate(Allocate::new("o2", "S", 1)).await;

        assert!(matches!(result, Err(ServiceError::OutOfStock(_))));
        assert_eq!(*recorder.skus.lock().unwrap(), vec![Sku::new("S")]);
        let product = service
            .uow_factory()
            .product(&Sku::new("S"))
            .await
            .unwrap();
        assert_eq!(product.version(), Version::new(1));
    }

    #[tokio::test]
    async fn invalid_sku_publishes_nothing() {
        let (service, recorder) = recording_service();

        let result = service.allocate(Allocate::new("o1", "UNKNOWN", 1)).await;

        assert!(matches!(result, Err(ServiceError::InvalidSku(_))));
        assert!(recorder.skus.lock().unwrap().is_empty());
        assert_eq!(service.uow_factory().product_count().await, 0);
    }
}

mod unit_of_work_scope {
    use super::*;

    #[tokio::test]
    async fn fault_before_commit_leaves_nothing_behind() {
        let store = InMemoryStore::new();

        let outcome: Result<(), &str> = async {
            let mut uow = store.begin().await.unwrap();
            uow.products()
                .add(Product::new("MEDIUM-PLINTH", vec![Batch::new("b1", "MEDIUM-PLINTH", 100, None)]).unwrap())
                .unwrap();
            Err("fault before commit")
        }
        .await;

        assert!(outcome.is_err());
        let mut uow = store.begin().await.unwrap();
        let product = uow.products().get(&Sku::new("MEDIUM-PLINTH")).await.unwrap();
        assert!(product.is_none());
    }

    #[tokio::test]
    async fn concurrent_allocations_conflict_and_retry_succeeds() {
        let service = AllocationService::new(InMemoryStore::new());
        service
            .add_batch(AddBatch::new("b1", "LAMP", 10, None))
            .await
            .unwrap();
        let store = service.uow_factory().clone();
        let sku = Sku::new("LAMP");

        let mut stale = store.begin().await.unwrap();
        stale.products().get(&sku).await.unwrap().unwrap();
        service.allocate(Allocate::new("o1", "LAMP", 1)).await.unwrap();
        stale
            .products()
            .get(&sku)
            .await
            .unwrap()
            .unwrap()
            .allocate(&domain::OrderLine::new("o2", "LAMP", 1).unwrap());

        let err = stale.commit().await.unwrap_err();
        assert!(ServiceError::from(err).is_conflict());

        let retried = service.allocate(Allocate::new("o2", "LAMP", 1)).await.unwrap();
        assert_eq!(retried, BatchReference::new("b1"));
        let product = store.product(&sku).await.unwrap();
        assert_eq!(product.version(), Version::new(2));
        assert_eq!(product.available_quantity(), 8);
    }
}

mod event_dispatch {
    use super::*;

    /// Flags a companion product whenever the primary one runs out.
    struct Companion {
        primary: Sku,
        companion: Sku,
    }

    impl EventHandler for Companion {
        fn name(&self) -> &'static str {
            "companion"
        }

        fn handle(&self, event: &ProductEvent, sink: &mut EventSink<'_>) -> Result<(), HandlerError> {
            if event.sku() != &self.primary {
                return Ok(());
            }
            if sink.product(&self.companion).is_none() {
                return Err(HandlerError::new("companion not loaded"));
            }
            sink.raise(ProductEvent::out_of_stock(self.companion.clone()))
        }
    }

    #[tokio::test]
    async fn events_raised_during_dispatch_are_drained() {
        let recorder = Arc::new(RecordingHandler::default());
        let bus = MessageBus::new()
            .with_handler(
                ProductEvent::OUT_OF_STOCK,
                Arc::new(Companion {
                    primary: Sku::new("LAMP"),
                    companion: Sku::new("SHADE"),
                }),
            )
            .with_handler(ProductEvent::OUT_OF_STOCK, recorder.clone());
        let store = InMemoryStore::with_message_bus(bus);
        let service = AllocationService::new(store.clone());
        service
            .add_batch(AddBatch::new("lamp-1", "LAMP", 1, None))
            .await
            .unwrap();
        service
            .add_batch(AddBatch::new("shade-1", "SHADE", 1, None))
            .await
            .unwrap();

        let mut uow = store.begin().await.unwrap();
        uow.products().get(&Sku::new("SHADE")).await.unwrap().unwrap();
        let lamp = uow.products().get(&Sku::new("LAMP")).await.unwrap().unwrap();
        assert!(lamp.allocate(&domain::OrderLine::new("o1", "LAMP", 5).unwrap()).is_none());
        uow.commit().await.unwrap();

        assert_eq!(
            *recorder.skus.lock().unwrap(),
            vec![Sku::new("LAMP"), Sku::new("SHADE")]
        );
        assert!(!uow.products().seen().has_pending_events());
    }
}
