use common::Sku;
use criterion::{Criterion, criterion_group, criterion_main};
use domain::{Batch, OrderLine, Product};
use store::{InMemoryStore, Repository, UnitOfWork, UnitOfWorkFactory};

fn make_product(sku: &str, batches: usize) -> Product {
    let batches = (0..batches)
        .map(|i| Batch::new(format!("{sku}-{i}").as_str(), sku, 1_000_000, None))
        .collect();
    Product::new(sku, batches).unwrap()
}

async fn seeded_store(batches: usize) -> InMemoryStore {
    let store = InMemoryStore::new();
    let mut uow = store.begin().await.unwrap();
    uow.products().add(make_product("BENCH-SKU", batches)).unwrap();
    uow.commit().await.unwrap();
    store
}

fn bench_add_product(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("store/add_product", |b| {
        b.iter(|| {
            rt.block_on(async {
                let store = InMemoryStore::new();
                let mut uow = store.begin().await.unwrap();
                uow.products().add(make_product("BENCH-SKU", 3)).unwrap();
                uow.commit().await.unwrap();
            });
        });
    });
}

fn bench_allocate_and_commit(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let store = rt.block_on(seeded_store(10));
    let sku = Sku::new("BENCH-SKU");
    let mut counter = 0_u64;

    c.bench_function("store/allocate_and_commit", |b| {
        b.iter(|| {
            counter += 1;
            let line = OrderLine::new(format!("order-{counter}"), "BENCH-SKU", 1).unwrap();
            rt.block_on(async {
                let mut uow = store.begin().await.unwrap();
                let product = uow.products().get(&sku).await.unwrap().unwrap();
                product.allocate(&line);
                uow.commit().await.unwrap();
            });
        });
    });
}

fn bench_load_product(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let store = rt.block_on(seeded_store(100));
    let sku = Sku::new("BENCH-SKU");

    c.bench_function("store/load_product_100_batches", |b| {
        b.iter(|| {
            rt.block_on(async {
                let mut uow = store.begin().await.unwrap();
                uow.products().get(&sku).await.unwrap().unwrap();
            });
        });
    });
}

criterion_group!(
    benches,
    bench_add_product,
    bench_allocate_and_commit,
    bench_load_product
);
criterion_main!(benches);
