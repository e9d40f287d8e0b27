//! The world: registry, grid, resource fields and the tick scheduler.
//!
//! One tick runs a serial Prepare pass in ascending id order, then a parallel
//! Handle pass with one task per cell. Structural changes requested while the
//! Handle pass runs are queued and committed after the join: removals first,
//! then births in id order.

use crate::cell::Cell;
use crate::grid::{OccupancyGrid, ResourceField};
use crate::object::{CellId, Direction, Lively, Object, Position};
use crate::{DishConfig, Tick, WorldError, lock};
use rand::{Rng, SeedableRng, rngs::SmallRng};
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Scheduler state, visible to cells through [`World::phase`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum Phase {
    Idle = 0,
    Preparing = 1,
    Handling = 2,
}

impl Phase {
    const fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Preparing,
            2 => Self::Handling,
            _ => Self::Idle,
        }
    }
}

/// Per-task context for one cell's turn.
#[derive(Debug)]
pub struct Turn {
    pub rng: SmallRng,
    /// The tick crossed a year boundary; living cells age by one.
    pub year_changed: bool,
}

/// Events emitted after processing a world tick.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TickEvents {
    pub tick: Tick,
    pub year_rolled: bool,
    pub epoch_rolled: bool,
    pub births: usize,
    pub deaths: usize,
    pub removals: usize,
    pub population: usize,
}

pub struct World {
    config: DishConfig,
    tick: Tick,
    year: u64,
    epoch: u64,
    paused: bool,
    grid: OccupancyGrid,
    sunlight: ResourceField,
    minerals: ResourceField,
    cells: BTreeMap<CellId, Cell>,
    id_counter: AtomicU64,
    phase: AtomicU8,
    removals: Mutex<Vec<CellId>>,
    births: Mutex<Vec<Cell>>,
    rng: SmallRng,
    pool: ThreadPool,
    last_tick: Option<Instant>,
    tick_rate: f64,
}

impl World {
    /// Instantiate an empty world using the provided configuration.
    pub fn new(config: DishConfig) -> Result<Self, WorldError> {
        config.validate()?;
        let (width, height) = (config.world_width, config.world_height);
        let grid = OccupancyGrid::new(width, height)?;
        let sunlight = ResourceField::from_band(width, height, &config.sunlight)?;
        let minerals = ResourceField::from_band(width, height, &config.minerals)?;

        let mut builder =
            ThreadPoolBuilder::new().thread_name(|index| format!("petridish-worker-{index}"));
        if let Some(threads) = config.worker_threads {
            builder = builder.num_threads(threads);
        }
        let pool = builder
            .build()
            .map_err(|err| WorldError::ThreadPool(err.to_string()))?;
        let rng = config.seeded_rng();

        Ok(Self {
            config,
            tick: Tick::zero(),
            year: 0,
            epoch: 0,
            paused: false,
            grid,
            sunlight,
            minerals,
            cells: BTreeMap::new(),
            id_counter: AtomicU64::new(0),
            phase: AtomicU8::new(Phase::Idle as u8),
            removals: Mutex::new(Vec::new()),
            births: Mutex::new(Vec::new()),
            rng,
            pool,
            last_tick: None,
            tick_rate: 0.0,
        })
    }

    /// Execute one simulation tick returning emitted events.
    pub fn handle(&mut self) -> TickEvents {
        if self.paused {
            return TickEvents {
                tick: self.tick,
                population: self.cells.len(),
                ..TickEvents::default()
            };
        }

        let previous_epoch = self.epoch;
        let year_rolled = self.advance_clock();
        let living_before = self.living_count();

        let mut removals = self.stage_prepare();
        self.stage_handle(year_rolled);
        self.set_phase(Phase::Preparing);
        removals += self.drain_removals();
        let births = self.commit_births();
        self.set_phase(Phase::Idle);
        self.throttle();

        let living_after = self.living_count();
        let events = TickEvents {
            tick: self.tick,
            year_rolled,
            epoch_rolled: self.epoch != previous_epoch,
            births,
            deaths: (living_before + births).saturating_sub(living_after),
            removals,
            population: self.cells.len(),
        };
        debug!(
            tick = events.tick.0,
            population = events.population,
            births = events.births,
            deaths = events.deaths,
            removals = events.removals,
            "tick complete"
        );
        events
    }

    fn advance_clock(&mut self) -> bool {
        self.tick = self.tick.next();
        if !self
            .tick
            .0
            .is_multiple_of(u64::from(self.config.ticks_per_year))
        {
            return false;
        }
        self.year += 1;
        if self.year.is_multiple_of(u64::from(self.config.years_per_epoch)) {
            self.epoch += 1;
        }
        true
    }

    fn living_count(&self) -> usize {
        self.cells.values().filter(|cell| !cell.is_died()).count()
    }

    /// Serial pass in ascending id order. Removals apply as soon as the
    /// requesting object is done.
    fn stage_prepare(&mut self) -> usize {
        self.set_phase(Phase::Preparing);
        let ids: Vec<CellId> = self.cells.keys().copied().collect();
        let mut removed = 0;
        for id in ids {
            let seed = self.rng.random();
            if let Some(cell) = self.cells.get(&id) {
                let mut turn = Turn {
                    rng: SmallRng::seed_from_u64(seed),
                    year_changed: false,
                };
                cell.prepare(self, &mut turn);
            }
            removed += self.drain_removals();
        }
        removed
    }

    fn stage_handle(&mut self, year_changed: bool) {
        let seeds: Vec<u64> = (0..self.cells.len()).map(|_| self.rng.random()).collect();
        self.set_phase(Phase::Handling);
        let world: &World = self;
        let tasks: Vec<(&Cell, u64)> = world.cells.values().zip(seeds).collect();
        world.pool.install(|| {
            tasks.par_iter().for_each(|&(cell, seed)| {
                let mut turn = Turn {
                    rng: SmallRng::seed_from_u64(seed),
                    year_changed,
                };
                cell.handle(world, &mut turn);
            });
        });
    }

    /// Applies every queued removal. Returns how many objects left the registry.
    pub fn drain_removals(&mut self) -> usize {
        let pending = std::mem::take(
            self.removals
                .get_mut()
                .unwrap_or_else(PoisonError::into_inner),
        );
        pending
            .into_iter()
            .filter(|&id| self.remove_object(id))
            .count()
    }

    /// Registers queued newborns in id order. Returns how many were added.
    pub(crate) fn commit_births(&mut self) -> usize {
        let mut born = std::mem::take(
            self.births
                .get_mut()
                .unwrap_or_else(PoisonError::into_inner),
        );
        born.sort_by_key(|cell| cell.id());
        let count = born.len();
        for cell in born {
            trace!(id = %cell.id(), "birth committed");
            self.cells.insert(cell.id(), cell);
        }
        count
    }

    /// Deregisters `id` and clears its grid slot. Carried items go with it;
    /// a carried item is taken out of its carrier's bag.
    pub fn remove_object(&mut self, id: CellId) -> bool {
        let Some(mut cell) = self.cells.remove(&id) else {
            return false;
        };
        let body = cell.body_mut();
        if body.picked {
            for carrier in self.cells.values_mut() {
                for slot in &mut carrier.body_mut().bag.items {
                    if *slot == id {
                        *slot = CellId::NONE;
                    }
                }
            }
        } else {
            self.grid.vacate(body.position, id);
        }
        let carried: Vec<CellId> = body.bag.ids().collect();
        for item in carried {
            self.remove_object(item);
        }
        true
    }

    fn throttle(&mut self) {
        let interval = Duration::from_millis(self.config.tick_interval_ms);
        if let Some(last) = self.last_tick
            && !interval.is_zero()
        {
            let elapsed = last.elapsed();
            if elapsed < interval {
                std::thread::sleep(interval - elapsed);
            }
        }
        let now = Instant::now();
        if let Some(last) = self.last_tick {
            let seconds = now.duration_since(last).as_secs_f64();
            if seconds > 0.0 {
                self.tick_rate = 1.0 / seconds;
            }
        }
        self.last_tick = Some(now);
    }

    /// Adds a cell near `near`: a seed cell, or a mutated child of `parent`
    /// (the parent is not charged).
    pub fn spawn_cell(
        &mut self,
        parent: Option<CellId>,
        near: Position,
    ) -> Result<CellId, WorldError> {
        let parent = match parent {
            Some(parent_id) => {
                let cell = self
                    .cells
                    .get(&parent_id)
                    .ok_or(WorldError::UnknownParent(parent_id))?;
                Some((parent_id, cell.snapshot()))
            }
            None => None,
        };
        let position = self.free_place_near(near).ok_or(WorldError::NoFreePlace {
            x: near.x,
            y: near.y,
        })?;
        let id = self.reserve_id();
        let cell = match parent {
            Some((parent_id, (body, mind))) => {
                let genome = mind.genome.mutate(&mut self.rng, self.config.mutation_rate);
                Cell::offspring(id, parent_id, &body, genome, position, &self.config)
            }
            None => Cell::seed(id, position, &self.config),
        };
        if !self.grid.claim(position, id) {
            return Err(WorldError::NoFreePlace {
                x: position.x,
                y: position.y,
            });
        }
        trace!(id = %id, x = position.x, y = position.y, "cell spawned");
        self.cells.insert(id, cell);
        Ok(id)
    }

    /// Registers a cell read back from a snapshot at its stored position.
    pub fn insert_restored(&mut self, cell: Cell) -> Result<(), WorldError> {
        let id = cell.id();
        if id.is_none() || self.cells.contains_key(&id) {
            return Err(WorldError::DuplicateId(id));
        }
        let body = cell.body().clone();
        if !body.picked {
            let placed = self.grid.normalize(body.position) == Some(body.position)
                && self.grid.claim(body.position, id);
            if !placed {
                return Err(WorldError::Unplaceable {
                    id,
                    x: body.position.x,
                    y: body.position.y,
                });
            }
        }
        self.id_counter.fetch_max(id.get(), Ordering::Relaxed);
        self.cells.insert(id, cell);
        Ok(())
    }

    /// Restores clock counters and the id counter from a snapshot.
    pub fn restore_clock(&mut self, tick: Tick, year: u64, epoch: u64, id_counter: u64) {
        self.tick = tick;
        self.year = year;
        self.epoch = epoch;
        self.id_counter.fetch_max(id_counter, Ordering::Relaxed);
    }

    /// First free cell among `near` and its eight neighbours.
    #[must_use]
    pub fn free_place_near(&self, near: Position) -> Option<Position> {
        std::iter::once(near)
            .chain((0..Direction::COUNT).map(|d| near.step(Direction::new(d))))
            .filter_map(|candidate| self.grid.normalize(candidate))
            .find(|&candidate| self.grid.is_free(candidate))
    }

    /// Where the first seed cell goes: centred, one twelfth below the surface.
    #[must_use]
    pub fn seed_position(&self) -> Position {
        Position::new(
            (self.config.world_width / 2) as i32,
            (self.config.world_height / 12) as i32,
        )
    }

    /// Fills an empty world with seed cells: one every fourth column, four
    /// rows apart through the top quarter, odd columns shifted down a row.
    /// Returns how many were placed.
    pub fn seed_lattice(&mut self) -> usize {
        let (width, height) = (self.config.world_width, self.config.world_height);
        let mut placed = 0;
        for x in (0..width).step_by(4) {
            for y in 0..height / 4 {
                let at = Position::new((x + 2) as i32, (y * 4 + (x / 4) % 2) as i32);
                if self.spawn_cell(None, at).is_ok() {
                    placed += 1;
                }
            }
        }
        debug!(placed, "seed lattice planted");
        placed
    }

    /// The neighbouring grid position in an absolute `direction`.
    #[must_use]
    pub fn neighbor(&self, position: Position, direction: Direction) -> Option<Position> {
        self.grid.normalize(position.step(direction))
    }

    /// Allocates a fresh, never reused id.
    pub fn reserve_id(&self) -> CellId {
        CellId(self.id_counter.fetch_add(1, Ordering::Relaxed) + 1)
    }

    /// Queues `id` for deregistration at the next drain point.
    pub fn request_removal(&self, id: CellId) {
        lock(&self.removals).push(id);
    }

    /// Queues a newborn whose grid slot is already claimed.
    pub fn queue_birth(&self, cell: Cell) {
        lock(&self.births).push(cell);
    }

    /// Runs `f` on the newborn `id` if it is still waiting in the birth queue.
    pub fn with_pending_birth<R>(&self, id: CellId, f: impl FnOnce(&Cell) -> R) -> Option<R> {
        lock(&self.births).iter().find(|cell| cell.id() == id).map(f)
    }

    #[must_use]
    pub fn pending_removals(&self) -> Vec<CellId> {
        lock(&self.removals).clone()
    }

    #[must_use]
    pub fn config(&self) -> &DishConfig {
        &self.config
    }

    #[must_use]
    pub const fn width(&self) -> u32 {
        self.config.world_width
    }

    #[must_use]
    pub const fn height(&self) -> u32 {
        self.config.world_height
    }

    #[must_use]
    pub const fn tick(&self) -> Tick {
        self.tick
    }

    /// Ticks processed since the world was created.
    #[must_use]
    pub const fn ticks(&self) -> u64 {
        self.tick.0
    }

    #[must_use]
    pub const fn year(&self) -> u64 {
        self.year
    }

    #[must_use]
    pub const fn epoch(&self) -> u64 {
        self.epoch
    }

    #[must_use]
    pub fn phase(&self) -> Phase {
        Phase::from_u8(self.phase.load(Ordering::Acquire))
    }

    fn set_phase(&self, phase: Phase) {
        self.phase.store(phase as u8, Ordering::Release);
    }

    #[must_use]
    pub const fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
    }

    /// Ticks per second measured over the last tick.
    #[must_use]
    pub const fn tick_rate(&self) -> f64 {
        self.tick_rate
    }

    /// Last id handed out; the next one is strictly larger.
    #[must_use]
    pub fn id_counter(&self) -> u64 {
        self.id_counter.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn grid(&self) -> &OccupancyGrid {
        &self.grid
    }

    /// Occupancy copied row by row, for renderers.
    #[must_use]
    pub fn grid_snapshot(&self) -> Vec<CellId> {
        self.grid.snapshot()
    }

    #[must_use]
    pub fn sunlight(&self) -> &ResourceField {
        &self.sunlight
    }

    #[must_use]
    pub fn minerals(&self) -> &ResourceField {
        &self.minerals
    }

    #[must_use]
    pub fn sunlight_at(&self, position: Position) -> u8 {
        self.sunlight.at(position)
    }

    #[must_use]
    pub fn minerals_at(&self, position: Position) -> u8 {
        self.minerals.at(position)
    }

    /// Registered cells in ascending id order.
    pub fn cells(&self) -> impl Iterator<Item = (&CellId, &Cell)> {
        self.cells.iter()
    }

    #[must_use]
    pub fn cell(&self, id: CellId) -> Option<&Cell> {
        self.cells.get(&id)
    }

    pub fn cell_mut(&mut self, id: CellId) -> Option<&mut Cell> {
        self.cells.get_mut(&id)
    }

    #[must_use]
    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }
}
