//! Micro-benchmarks for the victim selector and the on-disk codec.

use std::collections::HashSet;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use boc_swap::{select_victim, Codec, Cown, Registry, SwapCown, SwapPolicy};

fn build_registry(count: usize) -> (Registry, Vec<Cown<Vec<u8>>>) {
    let registry = Registry::new();
    let cowns: Vec<Cown<Vec<u8>>> = (0..count).map(|_| Cown::new(vec![0u8; 64])).collect();
    for (index, cown) in cowns.iter().enumerate() {
        let erased: Arc<dyn SwapCown> = Arc::clone(cown.inner());
        registry.add(&erased, 64);
        // Uneven access pattern so the policies have something to rank.
        for _ in 0..(index % 7) {
            cown.inner().meta().record_access();
        }
    }
    (registry, cowns)
}

fn bench_select_victim(c: &mut Criterion) {
    let policies = [
        SwapPolicy::Lru,
        SwapPolicy::Lfu,
        SwapPolicy::Random,
        SwapPolicy::RoundRobin,
        SwapPolicy::SecondChance,
    ];
    let (registry, _cowns) = build_registry(10_000);
    let shutdown = AtomicBool::new(false);
    let excluded = HashSet::new();

    let mut group = c.benchmark_group("select_victim");
    for policy in policies {
        group.bench_function(policy.to_string(), |b| {
            b.iter(|| {
                let mut inner = registry.lock();
                black_box(select_victim(&mut inner, policy, &shutdown, &excluded))
            })
        });
    }
    group.finish();
}

fn bench_codec_round_trip(c: &mut Criterion) {
    let tmp = tempfile::tempdir().unwrap();
    let codec = Codec::open(tmp.path().join("cowns")).unwrap();
    let cown = Cown::new(vec![0xA5u8; 1024 * 1024]);
    let path = codec.path_for(cown.id());

    c.bench_function("codec_round_trip_1mb", |b| {
        b.iter(|| {
            // Safety: nothing else touches the cown during the benchmark.
            unsafe {
                cown.inner().swap_out(&path).unwrap();
                cown.inner().fetch_in(&path).unwrap();
            }
        })
    });
}

criterion_group!(benches, bench_select_victim, bench_codec_round_trip);
criterion_main!(benches);
