use criterion::{BatchSize, Criterion, criterion_group, criterion_main};
use savanna_core::{CreatureTraits, SavannaConfig, World};
use std::time::Duration;

fn bench_world_steps(c: &mut Criterion) {
    let mut group = c.benchmark_group("world_step");
    let samples: usize = std::env::var("SAVANNA_BENCH_SAMPLES")
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(30);
    group.sample_size(samples);
    group.warm_up_time(Duration::from_secs(2));
    group.measurement_time(Duration::from_secs(8));

    let steps: usize = std::env::var("SAVANNA_BENCH_STEPS")
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(64);

    for &creatures in &[256_usize, 1024, 4096] {
        group.bench_function(format!("steps{steps}_creatures{creatures}"), |b| {
            b.iter_batched(
                || {
                    let config = SavannaConfig {
                        world_width: 512.0,
                        world_height: 512.0,
                        creature_capacity: creatures,
                        food_capacity: creatures * 2,
                        rng_seed: Some(0xBEEF),
                        default_traits: CreatureTraits {
                            // High starting energy keeps the whole herd
                            // alive for the measured window.
                            energy: 1.0e5,
                            ..CreatureTraits::default()
                        },
                        ..SavannaConfig::default()
                    };
                    let mut world = World::new(config).expect("world");
                    for _ in 0..creatures {
                        let _ = world.spawn_creature();
                    }
                    world
                },
                |mut world| {
                    for _ in 0..steps {
                        world.step(0.1);
                    }
                    world
                },
                BatchSize::LargeInput,
            );
        });
    }
    group.finish();
}

criterion_group!(benches, bench_world_steps);
criterion_main!(benches);
