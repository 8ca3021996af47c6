//! Core simulation kernel for the savanna artificial-life ecosystem.
//!
//! A fixed population of creature slots and food slots is advanced in
//! discrete ticks. Each tick rebuilds a spatial index of live food, runs the
//! food regrowth state machine and the per-creature behaviour step in
//! parallel over slot ranges, and then drains the deferred death and
//! reproduction queues sequentially against the entity pool. Creatures and
//! food share no mutable state except the food records themselves, which are
//! protected by an atomic claim protocol: a creature owns a food's energy
//! only while the food's claimant field holds that creature's id.

use ordered_float::OrderedFloat;
use rand::{Rng, SeedableRng, rngs::SmallRng};
use rayon::prelude::*;
use savanna_index::{GridIndex, IndexError, Tracked};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::ops::{Add, Mul, Sub};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Sentinel coordinate assigned to pooled or eaten entities. Far enough
/// outside any configured world bounds that spatial queries never reach it.
pub const INACTIVE_POSITION: Vec2 = Vec2 { x: 1.0e6, y: 1.0e6 };

/// Errors surfaced while building a world.
#[derive(Debug, Error)]
pub enum WorldError {
    /// Indicates an invalid configuration value.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
    #[error(transparent)]
    Index(#[from] IndexError),
}

/// 2D vector in world units.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

impl Vec2 {
    pub const ZERO: Self = Self { x: 0.0, y: 0.0 };

    #[must_use]
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    #[must_use]
    pub fn length_squared(self) -> f32 {
        self.x * self.x + self.y * self.y
    }

    #[must_use]
    pub fn distance_squared(self, other: Self) -> f32 {
        (self - other).length_squared()
    }

    /// Unit vector in the same direction, or zero for a degenerate input.
    #[must_use]
    pub fn normalized(self) -> Self {
        let length_squared = self.length_squared();
        if length_squared <= f32::EPSILON {
            return Self::ZERO;
        }
        let inverse = length_squared.sqrt().recip();
        Self::new(self.x * inverse, self.y * inverse)
    }

    #[must_use]
    pub fn is_zero(self) -> bool {
        self.x == 0.0 && self.y == 0.0
    }
}

impl Add for Vec2 {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        Self::new(self.x + other.x, self.y + other.y)
    }
}

impl Sub for Vec2 {
    type Output = Self;

    fn sub(self, other: Self) -> Self {
        Self::new(self.x - other.x, self.y - other.y)
    }
}

impl Mul<f32> for Vec2 {
    type Output = Self;

    fn mul(self, scale: f32) -> Self {
        Self::new(self.x * scale, self.y * scale)
    }
}

/// Axis-aligned world rectangle, immutable for a simulation run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WorldBounds {
    pub min: Vec2,
    pub max: Vec2,
}

impl WorldBounds {
    /// Rectangle of the given size centered on the origin.
    #[must_use]
    pub fn centered(width: f32, height: f32) -> Self {
        Self {
            min: Vec2::new(-width * 0.5, -height * 0.5),
            max: Vec2::new(width * 0.5, height * 0.5),
        }
    }

    #[must_use]
    pub fn contains(&self, point: Vec2) -> bool {
        point.x >= self.min.x && point.x <= self.max.x && point.y >= self.min.y && point.y <= self.max.y
    }

    /// Uniformly random point inside the rectangle shrunk by `margin`.
    pub fn random_interior(&self, rng: &mut SmallRng, margin: f32) -> Vec2 {
        Vec2::new(
            rng.random_range((self.min.x + margin)..(self.max.x - margin)),
            rng.random_range((self.min.y + margin)..(self.max.y - margin)),
        )
    }
}

/// Heritable creature parameters. Every field mutates independently at
/// reproduction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CreatureTraits {
    pub speed: f32,
    pub size: f32,
    pub energy: f32,
    pub energy_to_reproduce: f32,
    pub die_chance: f32,
    pub view_radius: f32,
}

impl Default for CreatureTraits {
    fn default() -> Self {
        Self {
            speed: 1.0,
            size: 1.0,
            energy: 2500.0,
            energy_to_reproduce: 3000.0,
            die_chance: 0.2,
            view_radius: 3.0,
        }
    }
}

impl CreatureTraits {
    /// Copy of these traits with an independent uniform perturbation of
    /// `value * fraction` applied to each field.
    #[must_use]
    pub fn mutated(&self, rng: &mut SmallRng, fraction: f32) -> Self {
        Self {
            speed: mutate_value(rng, self.speed, fraction),
            size: mutate_value(rng, self.size, fraction),
            energy: mutate_value(rng, self.energy, fraction),
            energy_to_reproduce: mutate_value(rng, self.energy_to_reproduce, fraction),
            die_chance: mutate_value(rng, self.die_chance, fraction),
            view_radius: mutate_value(rng, self.view_radius, fraction),
        }
    }
}

/// Uniform sample from `[-range, range]`. Safe for a zero range, unlike
/// `random_range` on an empty interval.
fn jitter(rng: &mut SmallRng, range: f32) -> f32 {
    (rng.random::<f32>() * 2.0 - 1.0) * range
}

fn mutate_value(rng: &mut SmallRng, value: f32, fraction: f32) -> f32 {
    value + jitter(rng, value * fraction)
}

fn random_unit_direction(rng: &mut SmallRng) -> Vec2 {
    let angle = rng.random_range(0.0..std::f32::consts::TAU);
    Vec2::new(angle.cos(), angle.sin())
}

/// Per-slot RNG derived from a per-tick base seed, so parallel phases stay
/// deterministic under any thread count.
fn slot_rng(base_seed: u64, id: u32) -> SmallRng {
    SmallRng::seed_from_u64(base_seed ^ u64::from(id).wrapping_mul(0x9E37_79B9_7F4A_7C15))
}

/// Static configuration for a savanna world.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SavannaConfig {
    /// Width of the world in world units; bounds are centered on the origin.
    pub world_width: f32,
    /// Height of the world in world units.
    pub world_height: f32,
    /// Edge length of one spatial-index cell in world units.
    pub cell_size: f32,
    /// Fixed number of creature slots; the population can never exceed it.
    pub creature_capacity: usize,
    /// Fixed number of food slots.
    pub food_capacity: usize,
    /// Optional RNG seed for reproducible runs.
    pub rng_seed: Option<u64>,
    /// Trait values given (with one round of mutation) to seeded creatures.
    pub default_traits: CreatureTraits,
    /// Per-trait mutation range as a fraction of the parent value.
    pub mutation_fraction: f32,
    /// Fraction of energy-to-reproduce kept as the post-reproduction reserve.
    pub reserve_fraction: f32,
    /// Movement cost coefficient: a moving creature loses
    /// `(size^2 + speed^2) * energy_loss_coeff` per tick.
    pub energy_loss_coeff: f32,
    /// Bite size per unit of creature area: an eating creature drains
    /// `bite_energy_per_area * size^2` per tick.
    pub bite_energy_per_area: f32,
    /// Distance at which a creature can start eating its target.
    pub min_eat_distance: f32,
    /// Seconds of wandering between random direction changes.
    pub direction_change_interval: f32,
    /// Baseline energy assigned to regrown food.
    pub food_base_energy: f32,
    /// Regrowth energy spread as a fraction of the baseline.
    pub food_energy_jitter: f32,
    /// Seconds an eaten food slot waits before regrowing.
    pub time_to_regrowth: f32,
    /// Energy floor below which available food counts as depleted.
    pub min_food_energy: f32,
    /// Per-slot offset applied to the initial regrowth timers so startup
    /// regrowth is staggered instead of a single synchronized burst.
    pub regrowth_stagger_step: f32,
    /// Inset from the world edge when placing regrown food.
    pub food_margin: f32,
    /// Search radius for nearest-entity inspection queries.
    pub pick_radius: f32,
}

impl Default for SavannaConfig {
    fn default() -> Self {
        Self {
            world_width: 128.0,
            world_height: 64.0,
            cell_size: 5.0,
            creature_capacity: 1024,
            food_capacity: 2048,
            rng_seed: None,
            default_traits: CreatureTraits::default(),
            mutation_fraction: 0.15,
            reserve_fraction: 0.30,
            energy_loss_coeff: 0.3,
            bite_energy_per_area: 10.0,
            min_eat_distance: 0.5,
            direction_change_interval: 10.0,
            food_base_energy: 500.0,
            food_energy_jitter: 0.2,
            time_to_regrowth: 30.0,
            min_food_energy: 0.1,
            regrowth_stagger_step: 0.25,
            food_margin: 1.0,
            pick_radius: 0.5,
        }
    }
}

impl SavannaConfig {
    /// World rectangle centered on the origin.
    #[must_use]
    pub fn bounds(&self) -> WorldBounds {
        WorldBounds::centered(self.world_width, self.world_height)
    }

    /// Validates every field before the first tick; configuration errors are
    /// never tolerated mid-run.
    pub fn validate(&self) -> Result<(), WorldError> {
        if !(self.world_width > 0.0) || !(self.world_height > 0.0) {
            return Err(WorldError::InvalidConfig("world dimensions must be positive"));
        }
        if !(self.cell_size > 0.0) {
            return Err(WorldError::InvalidConfig("cell_size must be positive"));
        }
        if self.creature_capacity == 0 || self.food_capacity == 0 {
            return Err(WorldError::InvalidConfig("capacities must be non-zero"));
        }
        if !(self.food_margin >= 0.0)
            || self.world_width <= self.food_margin * 2.0
            || self.world_height <= self.food_margin * 2.0
        {
            return Err(WorldError::InvalidConfig("food_margin must leave a usable interior"));
        }
        let traits = &self.default_traits;
        if !(traits.speed > 0.0)
            || !(traits.size > 0.0)
            || !(traits.energy > 0.0)
            || !(traits.energy_to_reproduce > 0.0)
            || !(traits.view_radius > 0.0)
        {
            return Err(WorldError::InvalidConfig("default traits must be positive"));
        }
        if !(0.0..=1.0).contains(&traits.die_chance) {
            return Err(WorldError::InvalidConfig("die_chance must lie in [0, 1]"));
        }
        if !(0.0..1.0).contains(&self.mutation_fraction) {
            return Err(WorldError::InvalidConfig("mutation_fraction must lie in [0, 1)"));
        }
        if !(0.0..1.0).contains(&self.reserve_fraction) {
            return Err(WorldError::InvalidConfig("reserve_fraction must lie in [0, 1)"));
        }
        if !(self.energy_loss_coeff >= 0.0) {
            return Err(WorldError::InvalidConfig("energy_loss_coeff must be non-negative"));
        }
        if !(self.bite_energy_per_area > 0.0) {
            return Err(WorldError::InvalidConfig("bite_energy_per_area must be positive"));
        }
        if !(self.min_eat_distance > 0.0) {
            return Err(WorldError::InvalidConfig("min_eat_distance must be positive"));
        }
        if !(self.direction_change_interval > 0.0) {
            return Err(WorldError::InvalidConfig("direction_change_interval must be positive"));
        }
        if !(self.food_base_energy > 0.0) {
            return Err(WorldError::InvalidConfig("food_base_energy must be positive"));
        }
        if !(0.0..1.0).contains(&self.food_energy_jitter) {
            return Err(WorldError::InvalidConfig("food_energy_jitter must lie in [0, 1)"));
        }
        if !(self.time_to_regrowth > 0.0) {
            return Err(WorldError::InvalidConfig("time_to_regrowth must be positive"));
        }
        if !(self.min_food_energy >= 0.0) {
            return Err(WorldError::InvalidConfig("min_food_energy must be non-negative"));
        }
        if !(self.regrowth_stagger_step >= 0.0) {
            return Err(WorldError::InvalidConfig("regrowth_stagger_step must be non-negative"));
        }
        if !(self.pick_radius > 0.0) {
            return Err(WorldError::InvalidConfig("pick_radius must be positive"));
        }
        Ok(())
    }

    /// Returns the configured RNG, seeded from entropy when no seed is set.
    fn seeded_rng(&self) -> SmallRng {
        match self.rng_seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => {
                let seed: u64 = rand::random();
                SmallRng::seed_from_u64(seed)
            }
        }
    }
}

/// Point-in-time copy of a live food slot, published into the spatial index
/// for one tick.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FoodTracker {
    pub id: u32,
    pub position: Vec2,
    pub energy: f32,
    pub claimant: u32,
}

impl Tracked for FoodTracker {
    fn position(&self) -> (f32, f32) {
        (self.position.x, self.position.y)
    }
}

/// Point-in-time copy of a live creature, kept for inspection queries.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CreatureTracker {
    pub id: u32,
    pub position: Vec2,
    pub energy: f32,
}

impl Tracked for CreatureTracker {
    fn position(&self) -> (f32, f32) {
        (self.position.x, self.position.y)
    }
}

/// Dense per-creature record. Slot N holds id N + 1; ids are stable for the
/// lifetime of the world and id 0 means "none" wherever ids are referenced.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CreatureRecord {
    pub id: u32,
    pub position: Vec2,
    pub direction: Vec2,
    pub speed: f32,
    pub size: f32,
    pub energy: f32,
    pub energy_to_reproduce: f32,
    pub die_chance: f32,
    pub view_radius: f32,
    /// Id of the claimed food, 0 when seeking.
    pub target_food: u32,
    pub is_eating: bool,
    pub is_dead: bool,
    /// Seconds of wandering since the last random direction change.
    pub direction_timer: f32,
    /// Energy floor kept after reproducing; recomputed whenever traits
    /// mutate.
    pub reserve_energy: f32,
}

impl CreatureRecord {
    fn inactive(id: u32, traits: CreatureTraits) -> Self {
        Self {
            id,
            position: INACTIVE_POSITION,
            direction: Vec2::ZERO,
            speed: traits.speed,
            size: traits.size,
            energy: traits.energy,
            energy_to_reproduce: traits.energy_to_reproduce,
            die_chance: traits.die_chance,
            view_radius: traits.view_radius,
            target_food: 0,
            is_eating: false,
            is_dead: true,
            direction_timer: 0.0,
            reserve_energy: 0.0,
        }
    }

    /// Snapshot of the heritable trait fields.
    #[must_use]
    pub fn traits(&self) -> CreatureTraits {
        CreatureTraits {
            speed: self.speed,
            size: self.size,
            energy: self.energy,
            energy_to_reproduce: self.energy_to_reproduce,
            die_chance: self.die_chance,
            view_radius: self.view_radius,
        }
    }

    fn apply_traits(&mut self, traits: &CreatureTraits, reserve_fraction: f32) {
        self.speed = traits.speed;
        self.size = traits.size;
        self.energy = traits.energy;
        self.energy_to_reproduce = traits.energy_to_reproduce;
        self.die_chance = traits.die_chance;
        self.view_radius = traits.view_radius;
        self.reserve_energy = traits.energy_to_reproduce * reserve_fraction;
    }

    fn reset_transient(&mut self) {
        self.direction = Vec2::ZERO;
        self.target_food = 0;
        self.is_eating = false;
        self.direction_timer = 0.0;
    }

    fn deactivate(&mut self) {
        self.position = INACTIVE_POSITION;
        self.is_dead = true;
        self.reset_transient();
    }
}

/// Read-only copy of a food slot for external consumers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FoodSnapshot {
    pub id: u32,
    pub position: Vec2,
    pub energy: f32,
    pub claimant: u32,
    pub is_eaten: bool,
}

/// Nearest-entity inspection result.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum InspectSnapshot {
    Creature(CreatureRecord),
    Food(FoodSnapshot),
}

/// Per-slot food record.
///
/// The position, eaten flag, and regrowth timer are written only by the food
/// phase, which holds each slot exclusively. Energy and the claimant are
/// shared with the parallel creature phase and therefore live in atomics:
/// the claimant is acquired with compare-and-swap, and the holder of a claim
/// is the only writer of the food's energy.
#[derive(Debug)]
pub struct FoodRecord {
    id: u32,
    position: Vec2,
    is_eaten: bool,
    regrowth_timer: f32,
    energy_bits: AtomicU32,
    claimant: AtomicU32,
}

impl FoodRecord {
    fn new(id: u32, regrowth_timer: f32) -> Self {
        Self {
            id,
            position: INACTIVE_POSITION,
            is_eaten: true,
            regrowth_timer,
            energy_bits: AtomicU32::new(0.0_f32.to_bits()),
            claimant: AtomicU32::new(0),
        }
    }

    #[must_use]
    pub const fn id(&self) -> u32 {
        self.id
    }

    #[must_use]
    pub const fn position(&self) -> Vec2 {
        self.position
    }

    #[must_use]
    pub const fn is_eaten(&self) -> bool {
        self.is_eaten
    }

    #[must_use]
    pub fn energy(&self) -> f32 {
        f32::from_bits(self.energy_bits.load(Ordering::Relaxed))
    }

    fn set_energy(&self, value: f32) {
        self.energy_bits.store(value.to_bits(), Ordering::Relaxed);
    }

    /// Id of the creature currently holding the claim, 0 when unclaimed.
    #[must_use]
    pub fn claimant(&self) -> u32 {
        self.claimant.load(Ordering::Acquire)
    }

    fn clear_claim(&self) {
        self.claimant.store(0, Ordering::Release);
    }

    /// Attempt to claim this food for `creature`. Succeeds when the food is
    /// unclaimed or already claimed by the same creature; exactly one of two
    /// racing creatures can win.
    pub(crate) fn try_claim(&self, creature: u32) -> bool {
        match self
            .claimant
            .compare_exchange(0, creature, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => true,
            Err(current) => current == creature,
        }
    }

    /// Release the claim if `creature` holds it; a claim held by somebody
    /// else is left untouched.
    pub(crate) fn release_claim(&self, creature: u32) {
        let _ = self
            .claimant
            .compare_exchange(creature, 0, Ordering::AcqRel, Ordering::Acquire);
    }

    /// Drain up to `amount` energy, returning what was actually consumed:
    /// `min(amount, energy)`, never negative.
    pub fn consume(&self, amount: f32) -> f32 {
        let mut eaten = 0.0;
        let _ = self
            .energy_bits
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |bits| {
                let energy = f32::from_bits(bits);
                eaten = amount.min(energy).max(0.0);
                Some((energy - eaten).to_bits())
            });
        eaten
    }

    #[must_use]
    pub fn snapshot(&self) -> FoodSnapshot {
        FoodSnapshot {
            id: self.id,
            position: self.position,
            energy: self.energy(),
            claimant: self.claimant(),
            is_eaten: self.is_eaten,
        }
    }

    /// Advance the regrowth/depletion state machine by `dt`, returning the
    /// tracker to publish when the slot is available this tick.
    fn advance(
        &mut self,
        dt: f32,
        config: &SavannaConfig,
        bounds: WorldBounds,
        rng: &mut SmallRng,
    ) -> Option<FoodTracker> {
        if self.is_eaten {
            self.regrowth_timer += dt;
            if self.regrowth_timer < config.time_to_regrowth {
                return None;
            }
            self.regrowth_timer = 0.0;
            self.is_eaten = false;
            self.position = bounds.random_interior(rng, config.food_margin);
            let spread = config.food_base_energy * config.food_energy_jitter;
            self.set_energy(config.food_base_energy + jitter(rng, spread));
            self.clear_claim();
        } else if self.energy() <= config.min_food_energy {
            // Depleted; park the slot at the sentinel until it regrows.
            self.is_eaten = true;
            self.position = INACTIVE_POSITION;
            self.set_energy(0.0);
            self.clear_claim();
            return None;
        }

        Some(FoodTracker {
            id: self.id,
            position: self.position,
            energy: self.energy(),
            claimant: self.claimant(),
        })
    }
}

/// Fixed-capacity creature arena with a free list of inactive slot ids.
#[derive(Debug)]
pub struct CreaturePool {
    records: Vec<CreatureRecord>,
    free: VecDeque<u32>,
}

impl CreaturePool {
    fn new(capacity: usize, defaults: CreatureTraits) -> Self {
        let records = (1..=capacity as u32)
            .map(|id| CreatureRecord::inactive(id, defaults))
            .collect();
        let free = (1..=capacity as u32).collect();
        Self { records, free }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.records.len()
    }

    /// Number of live creatures.
    #[must_use]
    pub fn population_count(&self) -> usize {
        self.records.len() - self.free.len()
    }

    /// Pop an inactive slot id. `None` means the population cap is reached,
    /// which is a steady-state condition rather than an error.
    pub fn acquire(&mut self) -> Option<u32> {
        self.free.pop_front()
    }

    /// Teleport the record to the sentinel, reset its transient state, and
    /// return the slot to the free list.
    pub fn release(&mut self, id: u32) {
        if let Some(record) = self.get_mut(id) {
            record.deactivate();
            self.free.push_back(id);
        }
    }

    #[must_use]
    pub fn get(&self, id: u32) -> Option<&CreatureRecord> {
        if id == 0 {
            return None;
        }
        self.records.get(id as usize - 1)
    }

    pub fn get_mut(&mut self, id: u32) -> Option<&mut CreatureRecord> {
        if id == 0 {
            return None;
        }
        self.records.get_mut(id as usize - 1)
    }

    #[must_use]
    pub fn records(&self) -> &[CreatureRecord] {
        &self.records
    }

    fn records_mut(&mut self) -> &mut [CreatureRecord] {
        &mut self.records
    }
}

/// Fixed array of food slots. Food is never destroyed; an eaten slot parks
/// at the sentinel position until its regrowth timer expires.
#[derive(Debug)]
pub struct FoodStore {
    records: Vec<FoodRecord>,
}

impl FoodStore {
    fn new(config: &SavannaConfig) -> Self {
        // Every slot starts eaten with regrowth due at startup, staggered by
        // slot index so the first wave of food does not appear all at once.
        let records = (0..config.food_capacity)
            .map(|slot| {
                let lag = (slot % 32) as f32 * config.regrowth_stagger_step;
                FoodRecord::new(slot as u32 + 1, (config.time_to_regrowth - lag).max(0.0))
            })
            .collect();
        Self { records }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn get(&self, id: u32) -> Option<&FoodRecord> {
        if id == 0 {
            return None;
        }
        self.records.get(id as usize - 1)
    }

    #[must_use]
    pub fn records(&self) -> &[FoodRecord] {
        &self.records
    }

    fn records_mut(&mut self) -> &mut [FoodRecord] {
        &mut self.records
    }

    /// Number of food slots currently available for eating.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.records.iter().filter(|record| !record.is_eaten).count()
    }
}

/// Wall-clock cost of the parallel phases of one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TickTimings {
    pub food: Duration,
    pub creatures: Duration,
    pub total: Duration,
}

/// Digest of a single tick.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TickSummary {
    pub tick: u64,
    pub population: usize,
    pub births: usize,
    pub deaths: usize,
    pub live_food: usize,
    pub timings: TickTimings,
}

/// Aggregate over the ticks executed by one `advance` call.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct FrameReport {
    pub tick: u64,
    pub ticks_run: u32,
    pub population: usize,
    pub births: usize,
    pub deaths: usize,
    pub timings: TickTimings,
}

/// Immutable view passed into the parallel creature step.
struct CreatureContext<'a> {
    foods: &'a [FoodRecord],
    index: &'a GridIndex<FoodTracker>,
    config: &'a SavannaConfig,
    bounds: WorldBounds,
    dt: f32,
}

impl CreatureContext<'_> {
    fn food(&self, id: u32) -> &FoodRecord {
        &self.foods[id as usize - 1]
    }
}

/// Deferred signals produced by one creature in one tick, drained by the
/// scheduler after the parallel phase.
#[derive(Debug, Clone, Copy, Default)]
struct CreatureOutcome {
    died: bool,
    reproduced: bool,
}

#[derive(Debug, Clone, Copy, Default)]
struct ReproductionResult {
    born: bool,
    parent_died: bool,
}

/// If the projected position crosses a boundary, reflect the direction about
/// that boundary's normal. Checks run in fixed priority order and at most
/// one axis is corrected per tick; corner overshoots resolve to whichever
/// test matches first.
fn reflect_direction(projected: Vec2, direction: Vec2, bounds: WorldBounds) -> Option<Vec2> {
    if projected.x > bounds.max.x || projected.x < bounds.min.x {
        Some(Vec2::new(-direction.x, direction.y))
    } else if projected.y > bounds.max.y || projected.y < bounds.min.y {
        Some(Vec2::new(direction.x, -direction.y))
    } else {
        None
    }
}

/// One creature's full behaviour step: target upkeep, movement or feeding,
/// then the death and reproduction checks. Writes only this creature's
/// record and (through the claim protocol) the claimed food's record.
fn step_creature(
    creature: &mut CreatureRecord,
    context: &CreatureContext<'_>,
    rng: &mut SmallRng,
) -> CreatureOutcome {
    let mut outcome = CreatureOutcome::default();
    if creature.is_dead {
        return outcome;
    }

    let config = context.config;

    // Drop a target that went stale since last tick: the food was eaten out
    // from under us, or another creature holds the claim now. Self-heals by
    // falling through to a fresh search.
    if creature.target_food != 0 {
        let food = context.food(creature.target_food);
        if food.is_eaten() || food.claimant() != creature.id {
            creature.target_food = 0;
            creature.is_eating = false;
        }
    }

    if creature.target_food == 0 {
        let creature_id = creature.id;
        let origin = (creature.position.x, creature.position.y);
        let found = context.index.query_nearest(origin, creature.view_radius, |tracker| {
            let claimant = context.food(tracker.id).claimant();
            claimant == 0 || claimant == creature_id
        });
        if let Some(tracker) = found {
            // The claim has to land in the shared food record, not the
            // tracker copy, so the rest of this parallel pass observes it.
            // Losing the compare-and-swap means another creature got here
            // first; stay seeking and search again next tick.
            if context.food(tracker.id).try_claim(creature.id) {
                creature.target_food = tracker.id;
            }
        }
    }

    let movement_loss =
        (creature.size * creature.size + creature.speed * creature.speed) * config.energy_loss_coeff;

    if creature.target_food == 0 {
        // Wander: re-roll the direction on a timer, reflect off the world
        // edge, and pay the movement cost whether or not we reflected.
        creature.is_eating = false;
        creature.direction_timer += context.dt;
        if creature.direction_timer >= config.direction_change_interval {
            creature.direction_timer = 0.0;
            creature.direction = random_unit_direction(rng);
        }
        if creature.direction.is_zero() {
            creature.direction = random_unit_direction(rng);
        }
        let step = creature.direction * (creature.speed * context.dt);
        if let Some(reflected) = reflect_direction(creature.position + step, creature.direction, context.bounds)
        {
            creature.direction = reflected;
        }
        creature.position = creature.position + creature.direction * (creature.speed * context.dt);
        creature.energy -= movement_loss;
    } else {
        creature.direction_timer = 0.0;
        let food = context.food(creature.target_food);
        let to_food = food.position() - creature.position;
        let eat_distance_squared = config.min_eat_distance * config.min_eat_distance;

        if to_food.length_squared() < eat_distance_squared {
            // In range: stand still and bite.
            creature.is_eating = true;
            creature.direction = Vec2::ZERO;
            let desired = config.bite_energy_per_area * creature.size * creature.size;
            let eaten = food.consume(desired);
            creature.energy += eaten;
            if eaten <= 0.0 || food.energy() <= config.min_food_energy {
                food.release_claim(creature.id);
                creature.target_food = 0;
                creature.is_eating = false;
            }
        } else {
            // Track the target; no boundary reflection is needed while
            // heading at an in-bounds food.
            creature.is_eating = false;
            creature.direction = to_food.normalized();
            creature.position = creature.position + creature.direction * (creature.speed * context.dt);
            creature.energy -= movement_loss;
        }
    }

    if creature.energy <= 0.0 {
        creature.is_dead = true;
        creature.is_eating = false;
        if creature.target_food != 0 {
            context.food(creature.target_food).release_claim(creature.id);
            creature.target_food = 0;
        }
        outcome.died = true;
        return outcome;
    }

    if creature.energy >= creature.energy_to_reproduce + creature.reserve_energy {
        creature.energy -= creature.energy_to_reproduce;
        outcome.reproduced = true;
    }

    outcome
}

/// Aggregate simulation state and tick scheduler.
pub struct World {
    config: SavannaConfig,
    bounds: WorldBounds,
    tick: u64,
    time_factor: u32,
    rng: SmallRng,
    creatures: CreaturePool,
    foods: FoodStore,
    food_index: GridIndex<FoodTracker>,
    creature_index: GridIndex<CreatureTracker>,
}

impl std::fmt::Debug for World {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("World")
            .field("tick", &self.tick)
            .field("time_factor", &self.time_factor)
            .field("population", &self.creatures.population_count())
            .field("live_food", &self.foods.live_count())
            .finish()
    }
}

impl World {
    /// Build a world from the supplied configuration, failing fast on any
    /// invalid value.
    pub fn new(config: SavannaConfig) -> Result<Self, WorldError> {
        config.validate()?;
        let bounds = config.bounds();
        let rng = config.seeded_rng();
        let creatures = CreaturePool::new(config.creature_capacity, config.default_traits);
        let foods = FoodStore::new(&config);
        let food_index = GridIndex::new(config.cell_size)?;
        let creature_index = GridIndex::new(config.cell_size)?;
        Ok(Self {
            config,
            bounds,
            tick: 0,
            time_factor: 1,
            rng,
            creatures,
            foods,
            food_index,
            creature_index,
        })
    }

    #[must_use]
    pub fn config(&self) -> &SavannaConfig {
        &self.config
    }

    #[must_use]
    pub const fn bounds(&self) -> WorldBounds {
        self.bounds
    }

    /// Current simulation tick.
    #[must_use]
    pub const fn tick(&self) -> u64 {
        self.tick
    }

    /// Number of ticks executed per `advance` call; 0 pauses the simulation.
    #[must_use]
    pub const fn time_factor(&self) -> u32 {
        self.time_factor
    }

    pub fn set_time_factor(&mut self, time_factor: u32) {
        self.time_factor = time_factor;
    }

    /// Number of live creatures.
    #[must_use]
    pub fn population_count(&self) -> usize {
        self.creatures.population_count()
    }

    /// Number of food slots currently available for eating.
    #[must_use]
    pub fn live_food_count(&self) -> usize {
        self.foods.live_count()
    }

    #[must_use]
    pub fn creatures(&self) -> &CreaturePool {
        &self.creatures
    }

    #[must_use]
    pub fn foods(&self) -> &FoodStore {
        &self.foods
    }

    /// Mutable access to a creature record, for collaborators that adjust
    /// state between ticks.
    pub fn creature_mut(&mut self, id: u32) -> Option<&mut CreatureRecord> {
        self.creatures.get_mut(id)
    }

    /// Copy of a live creature's record, `None` for pooled slots.
    #[must_use]
    pub fn snapshot_creature(&self, id: u32) -> Option<CreatureRecord> {
        self.creatures.get(id).filter(|record| !record.is_dead).copied()
    }

    #[must_use]
    pub fn snapshot_food(&self, id: u32) -> Option<FoodSnapshot> {
        self.foods.get(id).map(FoodRecord::snapshot)
    }

    /// Activate one creature from the pool with mutated default traits at a
    /// random position. `None` when the population cap is reached.
    pub fn spawn_creature(&mut self) -> Option<u32> {
        let id = self.creatures.acquire()?;
        let traits = self
            .config
            .default_traits
            .mutated(&mut self.rng, self.config.mutation_fraction);
        let position = self.bounds.random_interior(&mut self.rng, 0.0);
        let reserve_fraction = self.config.reserve_fraction;
        if let Some(record) = self.creatures.get_mut(id) {
            record.apply_traits(&traits, reserve_fraction);
            record.position = position;
            record.reset_transient();
            record.is_dead = false;
        }
        Some(id)
    }

    /// Nearest live creature or food to a world-space point, within the
    /// configured pick radius. A creature wins only when strictly closer
    /// than the nearest food.
    #[must_use]
    pub fn inspect_nearest(&self, point: Vec2) -> Option<InspectSnapshot> {
        let origin = (point.x, point.y);
        let radius = self.config.pick_radius;
        let creature = self.creature_index.query_nearest(origin, radius, |_| true);
        let food = self.food_index.query_nearest(origin, radius, |_| true);
        match (creature, food) {
            (Some(near_creature), Some(near_food)) => {
                let creature_distance = OrderedFloat(near_creature.position.distance_squared(point));
                let food_distance = OrderedFloat(near_food.position.distance_squared(point));
                if creature_distance < food_distance {
                    self.snapshot_creature(near_creature.id).map(InspectSnapshot::Creature)
                } else {
                    self.snapshot_food(near_food.id).map(InspectSnapshot::Food)
                }
            }
            (Some(near_creature), None) => {
                self.snapshot_creature(near_creature.id).map(InspectSnapshot::Creature)
            }
            (None, Some(near_food)) => self.snapshot_food(near_food.id).map(InspectSnapshot::Food),
            (None, None) => None,
        }
    }

    /// Execute exactly one simulation tick.
    pub fn step(&mut self, dt: f32) -> TickSummary {
        let tick_start = Instant::now();

        // Phase 1 and 2: clear the index, advance every food slot in
        // parallel, then publish the surviving trackers in slot order so
        // bucket contents are deterministic.
        let food_start = Instant::now();
        self.food_index.clear();
        let food_seed: u64 = self.rng.random();
        let config = &self.config;
        let bounds = self.bounds;
        let trackers: Vec<Option<FoodTracker>> = self
            .foods
            .records_mut()
            .par_iter_mut()
            .map(|record| {
                let mut rng = slot_rng(food_seed, record.id());
                record.advance(dt, config, bounds, &mut rng)
            })
            .collect();
        for tracker in trackers.into_iter().flatten() {
            self.food_index.insert(tracker);
        }
        let food_time = food_start.elapsed();

        // Phase 3: step every creature in parallel. Claims are settled
        // through the atomic claimant on the shared food records; everything
        // else each creature writes is its own slot.
        let creature_start = Instant::now();
        let creature_seed: u64 = self.rng.random();
        let context = CreatureContext {
            foods: self.foods.records(),
            index: &self.food_index,
            config: &self.config,
            bounds: self.bounds,
            dt,
        };
        let outcomes: Vec<CreatureOutcome> = self
            .creatures
            .records_mut()
            .par_iter_mut()
            .map(|creature| {
                let mut rng = slot_rng(creature_seed, creature.id);
                step_creature(creature, &context, &mut rng)
            })
            .collect();
        let creature_time = creature_start.elapsed();

        // Rebuild the creature tracker index for inspection queries.
        self.creature_index.clear();
        for record in self.creatures.records() {
            if !record.is_dead {
                self.creature_index.insert(CreatureTracker {
                    id: record.id,
                    position: record.position,
                    energy: record.energy,
                });
            }
        }

        // Phase 4: drain deaths sequentially; the pool is only ever touched
        // from this thread.
        let mut deaths = 0;
        for (slot, outcome) in outcomes.iter().enumerate() {
            if outcome.died {
                self.creatures.release(slot as u32 + 1);
                deaths += 1;
            }
        }

        // Phase 5: drain reproductions sequentially, in slot order.
        let mut births = 0;
        for (slot, outcome) in outcomes.iter().enumerate() {
            if outcome.reproduced {
                let result = self.reproduce(slot as u32 + 1);
                if result.born {
                    births += 1;
                }
                if result.parent_died {
                    deaths += 1;
                }
            }
        }

        self.tick += 1;
        TickSummary {
            tick: self.tick,
            population: self.creatures.population_count(),
            births,
            deaths,
            live_food: self.foods.live_count(),
            timings: TickTimings {
                food: food_time,
                creatures: creature_time,
                total: tick_start.elapsed(),
            },
        }
    }

    /// Run `time_factor` ticks of length `dt` (none when paused) and report
    /// the aggregate, including per-phase timings for diagnostics.
    pub fn advance(&mut self, dt: f32) -> FrameReport {
        let mut report = FrameReport::default();
        for _ in 0..self.time_factor {
            let summary = self.step(dt);
            report.ticks_run += 1;
            report.births += summary.births;
            report.deaths += summary.deaths;
            report.timings.food += summary.timings.food;
            report.timings.creatures += summary.timings.creatures;
            report.timings.total += summary.timings.total;
        }
        report.tick = self.tick;
        report.population = self.creatures.population_count();
        report
    }

    /// Create a child from `parent_id`'s traits. The parent already paid the
    /// reproduction cost during its step; here the child slot is acquired
    /// (or the birth dropped at capacity), traits are mutated, and the
    /// parent rolls its post-reproduction mortality.
    fn reproduce(&mut self, parent_id: u32) -> ReproductionResult {
        let (parent_traits, parent_position) = match self.creatures.get(parent_id) {
            Some(parent) if !parent.is_dead => (parent.traits(), parent.position),
            _ => return ReproductionResult::default(),
        };
        let Some(child_id) = self.creatures.acquire() else {
            // Population cap reached; the energy already spent is the cost
            // of the failed attempt.
            return ReproductionResult::default();
        };

        let child_traits = parent_traits.mutated(&mut self.rng, self.config.mutation_fraction);
        let reserve_fraction = self.config.reserve_fraction;
        if let Some(child) = self.creatures.get_mut(child_id) {
            child.apply_traits(&child_traits, reserve_fraction);
            child.position = parent_position;
            child.reset_transient();
            child.is_dead = false;
        }

        let parent_died = self.rng.random::<f32>() < parent_traits.die_chance;
        if parent_died {
            // Same cleanup as the starvation path: a claim held by a pooled
            // slot would lock its food until the slot id gets reused.
            let parent_target = self.creatures.get(parent_id).map_or(0, |parent| parent.target_food);
            if parent_target != 0 {
                if let Some(food) = self.foods.get(parent_target) {
                    food.release_claim(parent_id);
                }
            }
            self.creatures.release(parent_id);
        }
        ReproductionResult {
            born: true,
            parent_died,
        }
    }
}
