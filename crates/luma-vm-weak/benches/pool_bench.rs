//! Weak-ref pool benchmarks
//!
//! Measures the pool hot paths: handle lookup, marking, and the full
//! mark/collect/extract cycle.
//!
//! Run with: `cargo bench -p luma-vm-weak`

use std::hint::black_box;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use luma_vm_core::gc::AllocationRegistry;
use luma_vm_core::object::tags;
use luma_vm_core::{GcRef, Table, Value};
use luma_vm_gc::GcHeader;
use luma_vm_weak::{MarkFlags, WeakRefPool};

fn table(registry: &AllocationRegistry) -> Value {
    Value::Table(GcRef::alloc_in(registry, tags::TABLE, Table::new()))
}

/// Benchmark canonical handle lookup for an already-registered value
fn get_benchmark(c: &mut Criterion) {
    let registry = AllocationRegistry::new();
    let pool = WeakRefPool::new(&registry);
    let value = table(&registry);
    let _keep = pool.get(&value);

    c.bench_function("pool_get_existing", |b| {
        b.iter(|| black_box(pool.get(black_box(&value))));
    });
}

/// Benchmark the full mark -> die -> extract pipeline
fn finalize_cycle_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("finalize_cycle");

    for num_values in [10usize, 100, 1000].iter() {
        group.bench_with_input(
            BenchmarkId::new("values", num_values),
            num_values,
            |b, &n| {
                b.iter(|| {
                    let registry = AllocationRegistry::new();
                    let pool = WeakRefPool::new(&registry);

                    for _ in 0..n {
                        let value = table(&registry);
                        pool.mark(&value, MarkFlags::FINALIZE);
                    }

                    // All values are unrooted: one cycle queues them all
                    let roots: Vec<*const GcHeader> = pool.pending_root_headers();
                    registry.collect(&roots);

                    let extracted = pool.extract_pending_finalize();
                    black_box(extracted.len())
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, get_benchmark, finalize_cycle_benchmark);
criterion_main!(benches);
