//! Core types shared across the petridish workspace.
//!
//! The crate hosts the genome virtual machine ([`genome`], [`brain`], [`isa`]),
//! cell biology ([`cell`], [`object`]) and the world that schedules every cell
//! once per tick ([`world`]).

use rand::{SeedableRng, rngs::SmallRng};
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;

pub mod brain;
pub mod cell;
pub mod genome;
pub mod grid;
pub mod isa;
pub mod object;
pub mod world;

pub use brain::{Brain, Sensor, StackFrame, TriggerSource};
pub use cell::{Bag, Body, Cell, Lineage, Mind, Vitals};
pub use genome::{GENOME_LENGTH, Genome};
pub use grid::{Occupant, OccupancyGrid, ResourceField};
pub use isa::{ObjectKind, OPCODES, Opcode, OpcodeInfo, OperandKind};
pub use object::{CellId, Direction, Lively, Movable, Object, ObjectType, Pickable, Position};
pub use world::{Phase, TickEvents, Turn, World};

/// Largest grid, in cells, a world may allocate.
pub const MAX_GRID_CELLS: u64 = 1 << 24;

/// High level simulation clock (ticks processed since boot).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct Tick(pub u64);

impl Tick {
    /// Returns the next sequential tick.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// Resets the tick counter back to zero.
    #[must_use]
    pub const fn zero() -> Self {
        Self(0)
    }
}

/// Errors that can occur when constructing or mutating world state.
#[derive(Debug, Error)]
pub enum WorldError {
    /// Indicates an invalid configuration value.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
    /// The worker pool could not be started.
    #[error("failed to build worker pool: {0}")]
    ThreadPool(String),
    /// No free grid cell exists around the requested position.
    #[error("no free place near ({x}, {y})")]
    NoFreePlace { x: i32, y: i32 },
    /// A parent id does not resolve to a registered cell.
    #[error("unknown parent cell {0}")]
    UnknownParent(CellId),
    /// Two restored objects claim the same id.
    #[error("duplicate cell id {0}")]
    DuplicateId(CellId),
    /// A restored object lies outside the world or on an occupied cell.
    #[error("cannot place cell {id} at ({x}, {y})")]
    Unplaceable { id: CellId, x: i32, y: i32 },
}

/// Linear resource gradient over the vertical axis.
///
/// Rows in `[round(H * begin_pos), round(H * end_pos))` receive a value
/// interpolated from `begin_value` to `end_value`, scaled by `multiplier`.
/// Every other row is zero.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourceBand {
    pub begin_value: f32,
    pub end_value: f32,
    pub begin_pos: f32,
    pub end_pos: f32,
    pub multiplier: f32,
}

impl ResourceBand {
    fn validate(&self) -> Result<(), WorldError> {
        if !(0.0..=1.0).contains(&self.begin_pos)
            || !(0.0..=1.0).contains(&self.end_pos)
            || self.begin_pos > self.end_pos
        {
            return Err(WorldError::InvalidConfig(
                "resource band positions must satisfy 0 <= begin <= end <= 1",
            ));
        }
        if self.begin_value < 0.0 || self.end_value < 0.0 || self.multiplier < 0.0 {
            return Err(WorldError::InvalidConfig(
                "resource band values and multiplier must be non-negative",
            ));
        }
        Ok(())
    }
}

/// Static configuration for a petridish world.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DishConfig {
    /// Width of the world in grid cells; the X axis wraps.
    pub world_width: u32,
    /// Height of the world in grid cells; rows outside are walls.
    pub world_height: u32,
    /// Minimum wall-clock time per tick in milliseconds. 0 disables throttling.
    pub tick_interval_ms: u64,
    /// Optional RNG seed for reproducible worlds.
    pub rng_seed: Option<u64>,
    /// Worker threads for the Handle phase. `None` lets rayon decide.
    pub worker_threads: Option<usize>,
    /// Ticks in one year; cells age once per year.
    pub ticks_per_year: u32,
    /// Years in one epoch.
    pub years_per_epoch: u32,
    /// Sunlight gradient harvested by `RECYCLE` kind 1.
    pub sunlight: ResourceBand,
    /// Mineral gradient harvested by `RECYCLE` kind 3.
    pub minerals: ResourceBand,
    /// Health of a freshly created cell.
    pub base_health: u8,
    /// Energy of a freshly created cell; children are capped at this value.
    pub base_energy: u8,
    /// Weight of a freshly created cell.
    pub base_weight: u8,
    /// Energy charged for every executed instruction.
    pub base_energy_decrement: u8,
    /// Extra health lost whenever an energy charge cannot be covered.
    pub base_health_decrement: u8,
    /// Per-year surcharge on energy costs, health losses and bite strength.
    pub age_influence: f32,
    /// Energy cost of a successful reproduction; half of it on failure.
    pub reproduce_energy_cost: u8,
    /// Number of genome positions rewritten per reproduction.
    pub mutation_rate: usize,
    /// Base strength of a bite before age and defender weight are applied.
    pub bite_strength: u8,
    /// Maximum energy handed over by one `SHARE`.
    pub share_amount: u8,
    /// Ticks between corpse weight losses. 0 keeps corpses forever.
    pub corpse_decay_interval: u32,
    /// Energy granted per unit of corpse weight when recycled.
    pub corpse_energy_per_weight: u8,
}

impl Default for DishConfig {
    fn default() -> Self {
        Self {
            world_width: 200,
            world_height: 100,
            tick_interval_ms: 12,
            rng_seed: None,
            worker_threads: None,
            ticks_per_year: 10,
            years_per_epoch: 100,
            sunlight: ResourceBand {
                begin_value: 12.0,
                end_value: 0.0,
                begin_pos: 0.0,
                end_pos: 0.85,
                multiplier: 1.0,
            },
            minerals: ResourceBand {
                begin_value: 1.0,
                end_value: 4.0,
                begin_pos: 0.4,
                end_pos: 1.0,
                multiplier: 1.0,
            },
            base_health: 50,
            base_energy: 25,
            base_weight: 5,
            base_energy_decrement: 1,
            base_health_decrement: 5,
            age_influence: 0.05,
            reproduce_energy_cost: 30,
            mutation_rate: 1,
            bite_strength: 40,
            share_amount: 10,
            corpse_decay_interval: 20,
            corpse_energy_per_weight: 8,
        }
    }
}

impl DishConfig {
    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), WorldError> {
        if self.world_width == 0 || self.world_height == 0 {
            return Err(WorldError::InvalidConfig(
                "world dimensions must be non-zero",
            ));
        }
        if self.world_width > i32::MAX as u32 || self.world_height > i32::MAX as u32 {
            return Err(WorldError::InvalidConfig(
                "world dimensions must fit in a signed 32-bit coordinate",
            ));
        }
        let area = u64::from(self.world_width).checked_mul(u64::from(self.world_height));
        if area.is_none_or(|cells| cells > MAX_GRID_CELLS) {
            return Err(WorldError::InvalidConfig(
                "world area exceeds the grid cell budget",
            ));
        }
        if self.ticks_per_year == 0 || self.years_per_epoch == 0 {
            return Err(WorldError::InvalidConfig(
                "ticks_per_year and years_per_epoch must be positive",
            ));
        }
        if self.worker_threads == Some(0) {
            return Err(WorldError::InvalidConfig(
                "worker_threads must be positive when set",
            ));
        }
        if self.base_health == 0 || self.base_weight == 0 {
            return Err(WorldError::InvalidConfig(
                "base_health and base_weight must be positive",
            ));
        }
        if !self.age_influence.is_finite() || self.age_influence < 0.0 {
            return Err(WorldError::InvalidConfig(
                "age_influence must be finite and non-negative",
            ));
        }
        self.sunlight.validate()?;
        self.minerals.validate()?;
        Ok(())
    }

    /// Reproduction threshold written into the seed genome.
    #[must_use]
    pub fn seed_threshold(&self) -> u8 {
        self.base_energy.saturating_mul(3)
    }

    /// Returns the configured RNG seed, generating one from entropy if absent.
    pub(crate) fn seeded_rng(&self) -> SmallRng {
        match self.rng_seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => {
                let seed: u64 = rand::random();
                SmallRng::seed_from_u64(seed)
            }
        }
    }
}

/// Locks `mutex`, recovering the data if another worker panicked while holding it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
