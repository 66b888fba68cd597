//! Criterion benchmarks for the explorer.
//!
//! Run with: cargo bench -p tessera-mc

use criterion::{criterion_group, criterion_main, Criterion};
use tessera_mc::{CheckerKind, ExploreConfig, Explorer, Model};
use tessera_models::{Bakery, Counters, Ring};
use tessera_store::{BackendKind, StoreConfig};

fn bench_explore<M, F>(c: &mut Criterion, name: &str, make: F, config: ExploreConfig)
where
    M: Model,
    F: Fn() -> M,
{
    c.bench_function(name, |b| {
        b.iter(|| {
            let mut explorer = Explorer::new(make(), config.clone()).unwrap();
            explorer.run().unwrap();
        })
    });
}

fn benchmarks(c: &mut Criterion) {
    let base = ExploreConfig {
        collect_stats: false,
        store: StoreConfig {
            root_log2: 18,
            data_log2: 19,
            arena_log2: 22,
            ..Default::default()
        },
        ..Default::default()
    };

    let single = ExploreConfig {
        checker: CheckerKind::SingleCoreSimple,
        ..base.clone()
    };

    let simple = ExploreConfig {
        checker: CheckerKind::MulticoreSimple,
        ..base.clone()
    };

    // Flat store, one worker
    bench_explore(c, "bakery_P3_T8_single", || Bakery::new(3, 8), single.clone());
    bench_explore(c, "counters_N4_MAX9_single", || Counters::new(4, 9), single.clone());

    // Work distribution
    bench_explore(c, "bakery_P3_T8_simple", || Bakery::new(3, 8), simple);
    bench_explore(c, "bakery_P3_T8_bitbetter", || Bakery::new(3, 8), base.clone());

    // Backends
    for kind in BackendKind::ALL {
        let config = ExploreConfig {
            storage: kind,
            ..base.clone()
        };
        bench_explore(c, &format!("ring_N6_V4_{kind}"), || Ring::new(6, 4), config);
    }
}

criterion_group!(benches, benchmarks);
criterion_main!(benches);
