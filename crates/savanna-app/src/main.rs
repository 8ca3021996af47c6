use anyhow::Result;
use savanna_core::{SavannaConfig, Vec2, World};
use tracing::{info, warn};

/// Simulated seconds per tick.
const TICK_DT: f32 = 0.1;
/// Ticks executed per outer frame; the simulation fast-forwards by running
/// the kernel several times per frame rather than by scaling dt.
const TIME_FACTOR: u32 = 4;

const FRAMES: u32 = 1_500;
const REPORT_EVERY: u32 = 50;

fn main() -> Result<()> {
    init_tracing();
    let mut world = bootstrap_world()?;
    info!("Starting savanna simulation shell");

    world.set_time_factor(TIME_FACTOR);
    for frame in 0..FRAMES {
        let report = world.advance(TICK_DT);
        if frame % REPORT_EVERY == 0 {
            info!(
                tick = report.tick,
                population = report.population,
                births = report.births,
                deaths = report.deaths,
                live_food = world.live_food_count(),
                food_ms = report.timings.food.as_secs_f64() * 1e3,
                creature_ms = report.timings.creatures.as_secs_f64() * 1e3,
                "Frame complete",
            );
        }
        if report.population == 0 {
            warn!(tick = report.tick, "Population died out; ending the run");
            break;
        }
    }

    match world.inspect_nearest(Vec2::ZERO) {
        Some(snapshot) => info!(?snapshot, "Nearest entity to the world origin"),
        None => info!("Nothing within pick radius of the world origin"),
    }
    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn bootstrap_world() -> Result<World> {
    let config = SavannaConfig {
        creature_capacity: 512,
        food_capacity: 1024,
        rng_seed: Some(0xFACA_DE00_2026_u64),
        ..SavannaConfig::default()
    };
    let mut world = World::new(config)?;

    for _ in 0..48 {
        if world.spawn_creature().is_none() {
            break;
        }
    }
    info!(
        population = world.population_count(),
        creature_capacity = world.creatures().capacity(),
        food_capacity = world.foods().capacity(),
        "Seeded initial creatures",
    );
    Ok(world)
}
