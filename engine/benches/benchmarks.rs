//! Performance benchmarks for beaver-sync

use beaver_sync::entity::normalize_snapshot;
use beaver_sync::wire::{RawDocument, ServerMessage};
use beaver_sync::{resolve_path, sanitize_segment, Identity, StoragePath};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use serde_json::{json, Value};

fn snapshot(size: usize) -> Vec<RawDocument> {
    (0..size)
        .map(|i| {
            let Value::Object(fields) = json!({
                "id": format!("stale_{}", i),
                "name": format!("Product {}", i),
                "price": 9.99,
                "stock": i,
                "createdAt": "2024-01-01T00:00:00.000Z",
                "lastUpdated": "2024-01-02T00:00:00.000Z"
            }) else {
                unreachable!()
            };
            RawDocument::new(format!("doc_{}", i), fields)
        })
        .collect()
}

fn bench_paths(c: &mut Criterion) {
    let mut group = c.benchmark_group("paths");

    let identity = Identity::registered("user.with/odd#chars");

    group.bench_function("resolve_path", |b| {
        b.iter(|| resolve_path(black_box("my.tenant"), black_box(&identity), black_box("products")))
    });

    group.bench_function("sanitize_segment", |b| {
        b.iter(|| sanitize_segment(black_box("a.b/c#d?e%f[g]h*i~j k")))
    });

    group.bench_function("parse", |b| {
        b.iter(|| StoragePath::parse(black_box("tenants/acme/users/u1/products")))
    });

    group.finish();
}

fn bench_normalize(c: &mut Criterion) {
    let mut group = c.benchmark_group("normalize");

    for size in [10, 100, 1000].iter() {
        group.bench_with_input(BenchmarkId::new("snapshot", size), size, |b, &size| {
            let documents = snapshot(size);
            b.iter(|| normalize_snapshot(black_box(documents.clone())))
        });
    }

    group.finish();
}

fn bench_wire(c: &mut Criterion) {
    let mut group = c.benchmark_group("wire");

    let path = StoragePath::parse("tenants/acme/users/u1/products").unwrap();
    for size in [10, 100, 1000].iter() {
        let message = ServerMessage::snapshot(path.clone(), snapshot(*size));
        let encoded = serde_json::to_string(&message).unwrap();

        group.bench_with_input(BenchmarkId::new("encode_snapshot", size), &message, |b, m| {
            b.iter(|| serde_json::to_string(black_box(m)).unwrap())
        });
        group.bench_with_input(BenchmarkId::new("decode_snapshot", size), &encoded, |b, s| {
            b.iter(|| serde_json::from_str::<ServerMessage>(black_box(s)).unwrap())
        });
    }

    group.finish();
}

criterion_group!(benches, bench_paths, bench_normalize, bench_wire);
criterion_main!(benches);
