//! Allocator Benchmarks
//!
//! Sub-allocation throughput per arena strategy, the paged manager's
//! allocate/free path and lifetime cache churn.
//!
//! Run: cargo bench --bench allocator_bench

use std::hint::black_box;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};

use myth_gpu::core::memory::{ArenaStrategy, MemoryUsageClass};
use myth_gpu::core::settings::GpuSettings;
use myth_gpu::memory::{ResourceAllocationManager, ResourceDescription, create_arena};
use myth_gpu::render::{HeadlessBackend, LifetimeCache};

const PAGE: u64 = 64 * 1024 * 1024;

/// Deterministic request sizes between 256 bytes and 64 KiB.
fn request_sizes(count: usize) -> Vec<u64> {
    let mut state = 0x9e37_79b9_7f4a_7c15_u64;
    (0..count)
        .map(|_| {
            state = state
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            256 << ((state >> 33) % 9)
        })
        .collect()
}

// ===========================================================================
// Arenas
// ===========================================================================

fn bench_arena_fill_and_free(c: &mut Criterion) {
    let sizes = request_sizes(1024);
    let mut group = c.benchmark_group("arena/fill_free");
    group.throughput(Throughput::Elements(sizes.len() as u64));

    for strategy in [ArenaStrategy::Linear, ArenaStrategy::Buddy, ArenaStrategy::FreeList] {
        group.bench_with_input(BenchmarkId::from_parameter(format!("{strategy:?}")), &sizes, |b, sizes| {
            let mut arena = create_arena(strategy, PAGE);
            let mut offsets = Vec::with_capacity(sizes.len());
            b.iter(|| {
                for &size in sizes {
                    if let Ok(sub) = arena.allocate(size, 256) {
                        offsets.push(sub.offset);
                    }
                }
                if strategy == ArenaStrategy::Linear {
                    offsets.clear();
                    arena.reset();
                } else {
                    // Every other range first, so the free list has to merge.
                    for &offset in offsets.iter().step_by(2).chain(offsets.iter().skip(1).step_by(2)) {
                        let _ = arena.free(offset);
                    }
                    offsets.clear();
                }
                black_box(arena.used());
            });
        });
    }
    group.finish();
}

// ===========================================================================
// Manager
// ===========================================================================

fn bench_manager_allocate_free(c: &mut Criterion) {
    let backend = HeadlessBackend::new();
    let mut memory = ResourceAllocationManager::new(&GpuSettings {
        default_page_size_bytes: PAGE,
        ..Default::default()
    });
    let descs: Vec<_> = request_sizes(256).into_iter().map(ResourceDescription::buffer).collect();

    let mut group = c.benchmark_group("manager");
    group.throughput(Throughput::Elements(descs.len() as u64));
    group.bench_function("allocate_free_immediate", |b| {
        b.iter(|| {
            for desc in &descs {
                if let Ok(id) = memory.allocate(&backend, desc, MemoryUsageClass::GpuOnly) {
                    let _ = memory.free(&backend, black_box(id), true);
                }
            }
        });
    });
    group.finish();
    let _ = memory.release(&backend);
}

// ===========================================================================
// LifetimeCache
// ===========================================================================

fn bench_lifetime_cache_churn(c: &mut Criterion) {
    let mut group = c.benchmark_group("lifetime_cache");
    for live in [64_u64, 1024] {
        group.bench_with_input(BenchmarkId::new("tick", live), &live, |b, &live| {
            let mut cache: LifetimeCache<u64, u64> = LifetimeCache::new();
            let mut next = 0_u64;
            b.iter(|| {
                cache.update_tick();
                for key in next..next + live / 8 {
                    let _ = cache.insert(key, key);
                }
                for key in (next.saturating_sub(live)..next).step_by(3) {
                    black_box(cache.refer(&key));
                }
                next += live / 8;
                cache.check(8, |_, _| {});
            });
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_arena_fill_and_free,
    bench_manager_allocate_free,
    bench_lifetime_cache_churn
);
criterion_main!(benches);
