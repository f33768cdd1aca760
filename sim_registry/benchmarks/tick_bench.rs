use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use sim_registry::{
    build_headless_app_with_config, run_tick, seed_scenario, ScenarioSettings, SimulationConfig,
    SimulationConfigMetadata,
};

fn bench_tick(c: &mut Criterion) {
    let mut group = c.benchmark_group("tick");

    for villagers in [32u32, 256, 1024, 4096] {
        group.bench_with_input(
            BenchmarkId::new("villagers", villagers),
            &villagers,
            |b, &villagers| {
                b.iter_batched(
                    || {
                        let mut app = build_headless_app_with_config(
                            SimulationConfig::builtin(),
                            SimulationConfigMetadata::default(),
                        );
                        seed_scenario(
                            &mut app,
                            ScenarioSettings {
                                villagers,
                                creatures: villagers / 4,
                                resource_nodes: villagers / 8,
                                ..ScenarioSettings::default()
                            },
                        );
                        app
                    },
                    |mut app| {
                        run_tick(&mut app);
                    },
                    BatchSize::SmallInput,
                )
            },
        );
    }

    group.finish();
}

criterion_group!(tick_benches, bench_tick);
criterion_main!(tick_benches);
