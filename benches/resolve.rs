//! Benchmarks for capability resolution.

use criterion::{BatchSize, Criterion, black_box, criterion_group, criterion_main};

use structura::catalog::Catalog;
use structura::registry::Registry;
use structura::samples;
use structura::subject::SubjectType;

fn standard_registry() -> (Registry, SubjectType) {
    let registry = Registry::new();
    Catalog::standard().unwrap().apply(&registry).unwrap();
    let z5 = samples::register_cyclic(&registry, 5).unwrap();
    (registry, z5)
}

fn bench_cached(c: &mut Criterion) {
    let (registry, z5) = standard_registry();
    registry.resolve("OrderedCommGroup", &z5).unwrap();

    c.bench_function("resolve_cached", |bench| {
        bench.iter(|| black_box(registry.resolve("OrderedCommGroup", &z5).unwrap()))
    });
}

fn bench_synthesis(c: &mut Criterion) {
    c.bench_function("resolve_ordered_group_fresh", |bench| {
        bench.iter_batched(
            standard_registry,
            |(registry, z5)| black_box(registry.resolve("OrderedCommGroup", &z5).unwrap()),
            BatchSize::SmallInput,
        )
    });

    c.bench_function("resolve_dual_twin_fresh", |bench| {
        bench.iter_batched(
            standard_registry,
            |(registry, z5)| {
                let subject = z5.order_dual().additive();
                black_box(registry.resolve("OrderedAddCommGroup", &subject).unwrap())
            },
            BatchSize::SmallInput,
        )
    });
}

fn bench_held(c: &mut Criterion) {
    c.bench_function("held_capabilities_fresh", |bench| {
        bench.iter_batched(
            standard_registry,
            |(registry, z5)| black_box(registry.held_capabilities(&z5).unwrap()),
            BatchSize::SmallInput,
        )
    });
}

criterion_group!(benches, bench_cached, bench_synthesis, bench_held);
criterion_main!(benches);
