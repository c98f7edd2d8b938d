//! Allocation-cycle benchmarks.
//!
//! Compares the pool's debug and production layouts against the global
//! allocator for the short-lived homogeneous objects the pool targets.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use objpool::{PoolAllocator, PoolConfig, PoolPtr};

#[derive(Default)]
#[allow(dead_code)]
struct Particle {
    position: [f32; 3],
    velocity: [f32; 3],
    ttl: u32,
}

fn bench_alloc_free_cycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("alloc_free_cycle");
    group.throughput(Throughput::Elements(1));

    group.bench_function("pool_production", |b| {
        let pool = PoolAllocator::<Particle>::new(PoolConfig::production()).unwrap();
        b.iter(|| {
            let block = pool.insert(Particle::default());
            black_box(block);
            unsafe { pool.free(block).unwrap() };
        });
    });

    group.bench_function("pool_debug", |b| {
        let pool = PoolAllocator::<Particle>::new(PoolConfig::debug()).unwrap();
        b.iter(|| {
            let block = pool.insert(Particle::default());
            black_box(block);
            unsafe { pool.free(block).unwrap() };
        });
    });

    group.bench_function("global_box", |b| {
        b.iter(|| {
            let boxed = Box::new(Particle::default());
            black_box(&boxed);
        });
    });

    group.finish();
}

fn bench_pointer_traffic(c: &mut Criterion) {
    let mut group = c.benchmark_group("pointer_traffic");
    group.throughput(Throughput::Elements(1));

    group.bench_function("pool_ptr_clone_drop", |b| {
        let pool = PoolAllocator::<Particle>::new(PoolConfig::debug()).unwrap();
        let p = PoolPtr::new_in(Particle::default(), &pool);
        b.iter(|| {
            let q = p.clone();
            black_box(&q);
        });
    });

    group.finish();
}

criterion_group!(benches, bench_alloc_free_cycle, bench_pointer_traffic);
criterion_main!(benches);
