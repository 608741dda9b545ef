use chrono::{Days, NaiveDate};
use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use domain::{Batch, OrderLine, Product};

fn base_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 1, 1).unwrap()
}

/// Builds a product with one in-warehouse batch followed by `shipments` dated batches,
/// shuffled so the preferred batch is not at the front.
fn make_product(shipments: u64, qty: u32) -> Product {
    let mut batches: Vec<Batch> = (0..shipments)
        .rev()
        .map(|i| {
            Batch::new(
                format!("shipment-{i:04}").as_str(),
                "BENCH-SKU",
                qty,
                base_date().checked_add_days(Days::new(i)),
            )
        })
        .collect();
    batches.push(Batch::new("warehouse", "BENCH-SKU", qty, None));
    Product::new("BENCH-SKU", batches).unwrap()
}

fn bench_allocate_single_line(c: &mut Criterion) {
    let mut group = c.benchmark_group("domain/allocate");
    for shipments in [1_u64, 10, 100] {
        group.bench_with_input(
            BenchmarkId::from_parameter(shipments),
            &shipments,
            |b, &shipments| {
                let line = OrderLine::new("order-1", "BENCH-SKU", 1).unwrap();
                b.iter_batched(
                    || make_product(shipments, 10),
                    |mut product| product.allocate(&line),
                    criterion::BatchSize::SmallInput,
                );
            },
        );
    }
    group.finish();
}

fn bench_allocate_until_out_of_stock(c: &mut Criterion) {
    c.bench_function("domain/allocate_until_out_of_stock", |b| {
        b.iter_batched(
            || make_product(20, 5),
            |mut product| {
                let mut i = 0;
                loop {
                    let line = OrderLine::new(format!("order-{i}"), "BENCH-SKU", 2).unwrap();
                    if product.allocate(&line).is_none() {
                        break;
                    }
                    i += 1;
                }
            },
            criterion::BatchSize::SmallInput,
        );
    });
}

criterion_group!(
    benches,
    bench_allocate_single_line,
    bench_allocate_until_out_of_stock,
);
criterion_main!(benches);
