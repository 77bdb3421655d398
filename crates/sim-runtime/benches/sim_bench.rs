use criterion::{criterion_group, criterion_main, Criterion};
use sim_core::{baseline, Scenario};

fn bench_runs(c: &mut Criterion) {
    let config = baseline::config();
    let assumptions = baseline::assumptions(config.horizon_months);
    let engine = sim_runtime::Engine::new(
        baseline::catalog(),
        &assumptions,
        &Scenario::baseline(),
        config.clone(),
    );
    c.bench_function("baseline_240_months", |b| {
        b.iter(|| {
            let _ = engine.run();
        })
    });
    c.bench_function("compounding_cache_build", |b| {
        b.iter(|| {
            let _ = sim_runtime::CompoundingCache::build(
                &assumptions,
                config.horizon_months,
                config.efficiency_ceiling,
            );
        })
    });
}

criterion_group!(benches, bench_runs);
criterion_main!(benches);
