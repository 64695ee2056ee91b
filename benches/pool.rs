//! Brick pool benchmarks.
//!
//! Measures the hot paths of the RAM-limited manager: brick allocation
//! (including buffer file growth), checkouts served from resident buffers,
//! and checkouts that evict and reload under memory pressure.

use std::path::Path;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tempfile::tempdir;

use brickpool::{BrickPoolManager, RamLimitedBrickPool};

const BRICK_SIZE: usize = 8 * 1024; // 16^3 voxels at two bytes each

fn pool_with(dir: &Path, max_buffer_size: usize, ram_limit: usize) -> RamLimitedBrickPool {
    let mut pool = RamLimitedBrickPool::builder(dir)
        .max_buffer_size(max_buffer_size)
        .ram_limit(ram_limit)
        .build();
    pool.initialize(BRICK_SIZE).unwrap();
    pool
}

fn bench_allocate(c: &mut Criterion) {
    let mut group = c.benchmark_group("brick_allocate");

    for count in [256, 1024].iter() {
        group.throughput(Throughput::Elements(*count as u64));
        group.bench_with_input(BenchmarkId::new("grow", count), count, |b, &count| {
            b.iter_with_setup(
                || {
                    let dir = tempdir().unwrap();
                    let pool = pool_with(dir.path(), 64 * BRICK_SIZE, 256 * BRICK_SIZE);
                    (dir, pool)
                },
                |(dir, pool)| {
                    for _ in 0..count {
                        black_box(pool.allocate_brick().unwrap());
                    }
                    (dir, pool)
                },
            );
        });
    }

    group.finish();
}

fn bench_checkout(c: &mut Criterion) {
    let mut group = c.benchmark_group("brick_checkout");
    group.throughput(Throughput::Bytes(BRICK_SIZE as u64));

    // two buffers, eight slots: every access is a cache hit
    let dir = tempdir().unwrap();
    let pool = pool_with(dir.path(), 32 * BRICK_SIZE, 256 * BRICK_SIZE);
    let addrs: Vec<_> = (0..64).map(|_| pool.allocate_brick().unwrap()).collect();

    let mut next = 0;
    group.bench_function("read_resident", |b| {
        b.iter(|| {
            let addr = addrs[next % addrs.len()];
            next += 1;
            let brick = pool.get_brick(addr).unwrap().unwrap();
            black_box(brick[0]);
        })
    });

    let mut next = 0;
    group.bench_function("write_resident", |b| {
        b.iter(|| {
            let addr = addrs[next % addrs.len()];
            next += 1;
            let mut brick = pool.get_writable_brick(addr).unwrap().unwrap();
            brick[0] = brick[0].wrapping_add(1);
            black_box(brick[0]);
        })
    });

    group.finish();
}

fn bench_eviction_pressure(c: &mut Criterion) {
    let mut group = c.benchmark_group("brick_eviction");
    group.sample_size(20);

    // sixteen buffers on disk, two resident slots
    let dir = tempdir().unwrap();
    let pool = pool_with(dir.path(), 8 * BRICK_SIZE, 16 * BRICK_SIZE);
    let addrs: Vec<_> = (0..128).map(|_| pool.allocate_brick().unwrap()).collect();

    let mut next = 0;
    group.bench_function("read_cold", |b| {
        b.iter(|| {
            // stride past the buffer size so consecutive reads land in
            // different buffers and keep the pool evicting
            let addr = addrs[next % addrs.len()];
            next += 9;
            let brick = pool.get_brick(addr).unwrap().unwrap();
            black_box(brick[0]);
        })
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_allocate,
    bench_checkout,
    bench_eviction_pressure
);
criterion_main!(benches);
