//! Store, index and cursor benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tessera_bench::{generate_records, random_record};
use tessera_codec::Key;
use tessera_core::{
    derive_keys, Connection, CursorDirection, Factory, IndexParams, KeyPath, StoreParams,
    TransactionMode,
};

/// Open a database with a `records` store keyed by `id` and two indexes.
fn open_records(factory: &Factory) -> Connection {
    let request = factory.open("bench", Some(1)).unwrap();
    request.on_upgrade_needed(|event| {
        let store = event
            .connection
            .create_object_store("records", StoreParams::new().key_path("id"))?;
        store.create_index("by_name", "name", IndexParams::new())?;
        store.create_index("by_tag", "tags", IndexParams::new().multi_entry(true))?;
        Ok(())
    });
    factory.run_until_idle();
    request.result().unwrap()
}

/// Open a database and fill it with `count` records.
fn seeded(count: usize) -> (Factory, Connection) {
    let factory = Factory::new();
    let connection = open_records(&factory);
    let tx = connection
        .transaction(&["records"], TransactionMode::ReadWrite)
        .unwrap();
    let store = tx.object_store("records").unwrap();
    for record in generate_records(count) {
        store.put(&record, None).unwrap();
    }
    factory.run_until_idle();
    (factory, connection)
}

/// Benchmark write transactions of varying size.
fn bench_put_batch(c: &mut Criterion) {
    let mut group = c.benchmark_group("put_batch");

    for batch_size in [10, 100, 1000].iter() {
        group.throughput(Throughput::Elements(*batch_size as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(batch_size),
            batch_size,
            |b, &batch_size| {
                let factory = Factory::new();
                let connection = open_records(&factory);
                let records = generate_records(batch_size);

                b.iter(|| {
                    let tx = connection
                        .transaction(&["records"], TransactionMode::ReadWrite)
                        .unwrap();
                    let store = tx.object_store("records").unwrap();
                    for record in &records {
                        store.put(black_box(record), None).unwrap();
                    }
                    factory.run_until_idle();
                });
            },
        );
    }
    group.finish();
}

/// Benchmark point reads by primary key.
fn bench_get(c: &mut Criterion) {
    let (factory, connection) = seeded(1000);

    c.bench_function("get_by_key", |b| {
        let mut next = 0;
        b.iter(|| {
            let tx = connection
                .transaction(&["records"], TransactionMode::ReadOnly)
                .unwrap();
            tx.object_store("records")
                .unwrap()
                .get(Key::number((next % 1000) as f64))
                .unwrap();
            next += 1;
            factory.run_until_idle();
        });
    });
}

/// Benchmark walking every record through a cursor.
fn bench_cursor_walk(c: &mut Criterion) {
    let mut group = c.benchmark_group("cursor_walk");

    for count in [100, 1000].iter() {
        group.throughput(Throughput::Elements(*count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), count, |b, &count| {
            let (factory, connection) = seeded(count);

            b.iter(|| {
                let visited = Arc::new(AtomicUsize::new(0));
                let sink = Arc::clone(&visited);
                let tx = connection
                    .transaction(&["records"], TransactionMode::ReadOnly)
                    .unwrap();
                tx.object_store("records")
                    .unwrap()
                    .open_cursor(None, CursorDirection::Next)
                    .unwrap()
                    .on_success(move |event| {
                        if let Some(cursor) = event.result().as_cursor() {
                            sink.fetch_add(1, Ordering::Relaxed);
                            cursor.continue_(None)?;
                        }
                        Ok(())
                    });
                factory.run_until_idle();
                black_box(visited.load(Ordering::Relaxed));
            });
        });
    }
    group.finish();
}

/// Benchmark deriving index keys from a record.
fn bench_derive_keys(c: &mut Criterion) {
    let mut group = c.benchmark_group("derive_keys");
    let record = random_record(7);

    group.bench_function("single", |b| {
        let path = KeyPath::from("name");
        b.iter(|| black_box(derive_keys(&path, false, black_box(&record))));
    });

    group.bench_function("multi_entry", |b| {
        let path = KeyPath::from("tags");
        b.iter(|| black_box(derive_keys(&path, true, black_box(&record))));
    });

    group.bench_function("composite", |b| {
        let path = KeyPath::from(vec!["name", "email"]);
        b.iter(|| black_box(derive_keys(&path, false, black_box(&record))));
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_put_batch,
    bench_get,
    bench_cursor_walk,
    bench_derive_keys,
);

criterion_main!(benches);
