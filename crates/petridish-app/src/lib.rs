//! Shared application plumbing for the headless petridish runner.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{Context, Result, anyhow};
use petridish_core::{DishConfig, World};
use tracing::{debug, info, warn};

pub type SharedWorld = Arc<Mutex<World>>;

/// JSON file with a (possibly partial) [`DishConfig`].
pub const CONFIG_ENV: &str = "PETRIDISH_CONFIG";
/// Number of ticks to run; unset means until extinction.
pub const TICKS_ENV: &str = "PETRIDISH_TICKS";
/// Snapshot restored on start (when present) and written on exit.
pub const SNAPSHOT_ENV: &str = "PETRIDISH_SNAPSHOT";

/// What the runner was asked to do.
#[derive(Debug, Clone, Default)]
pub struct RunSettings {
    pub config: DishConfig,
    pub ticks: Option<u64>,
    pub snapshot: Option<PathBuf>,
}

impl RunSettings {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds settings from any variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let config = match lookup(CONFIG_ENV) {
            Some(path) => load_config(Path::new(&path))?,
            None => DishConfig::default(),
        };
        let ticks = lookup(TICKS_ENV)
            .map(|raw| {
                raw.trim()
                    .parse::<u64>()
                    .with_context(|| format!("{TICKS_ENV} must be a tick count, got {raw:?}"))
            })
            .transpose()?;
        let snapshot = lookup(SNAPSHOT_ENV)
            .filter(|path| !path.is_empty())
            .map(PathBuf::from);
        Ok(Self {
            config,
            ticks,
            snapshot,
        })
    }
}

/// Reads a JSON config; missing fields keep their defaults.
pub fn load_config(path: &Path) -> Result<DishConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    parse_config(&raw).with_context(|| format!("parsing config {}", path.display()))
}

pub fn parse_config(raw: &str) -> Result<DishConfig> {
    let config: DishConfig = serde_json::from_str(raw)?;
    config.validate()?;
    Ok(config)
}

/// Restores the snapshot named in `settings` or seeds a fresh dish.
pub fn bootstrap_world(settings: &RunSettings) -> Result<SharedWorld> {
    let world = match &settings.snapshot {
        Some(path) if path.exists() => {
            let world = petridish_storage::load_from_path(path, settings.config.clone())
                .with_context(|| format!("restoring snapshot {}", path.display()))?;
            info!(
                path = %path.display(),
                tick = world.ticks(),
                population = world.cell_count(),
                "Restored world from snapshot"
            );
            world
        }
        _ => {
            let mut world = World::new(settings.config.clone())?;
            let mut seeds = world.seed_lattice();
            // Dishes under four rows tall get a single centred seed.
            if seeds == 0 {
                let origin = world.seed_position();
                world.spawn_cell(None, origin)?;
                seeds = 1;
            }
            info!(
                width = world.width(),
                height = world.height(),
                seeds,
                "Seeded a fresh dish"
            );
            world
        }
    };
    Ok(Arc::new(Mutex::new(world)))
}

/// Totals over one [`run`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunReport {
    pub ticks: u64,
    pub births: usize,
    pub deaths: usize,
    pub population: usize,
}

fn lock_world(world: &SharedWorld) -> Result<MutexGuard<'_, World>> {
    world.lock().map_err(|_| anyhow!("world lock poisoned"))
}

/// Ticks the world until the configured count is reached or every cell is
/// gone, logging a summary once per simulated year.
pub fn run(world: &SharedWorld, settings: &RunSettings) -> Result<RunReport> {
    let mut report = RunReport::default();
    loop {
        if settings.ticks.is_some_and(|limit| report.ticks >= limit) {
            break;
        }
        let events = {
            let mut guard = lock_world(world)?;
            guard.handle()
        };
        report.ticks += 1;
        report.births += events.births;
        report.deaths += events.deaths;
        report.population = events.population;

        if events.year_rolled {
            let guard = lock_world(world)?;
            info!(
                tick = events.tick.0,
                year = guard.year(),
                epoch = guard.epoch(),
                population = events.population,
                tick_rate = guard.tick_rate(),
                "Year complete"
            );
        }
        if events.epoch_rolled {
            debug!(tick = events.tick.0, "Epoch complete");
        }
        if events.population == 0 {
            warn!(tick = events.tick.0, "Dish is empty; stopping");
            break;
        }
    }

    if let Some(path) = &settings.snapshot {
        let guard = lock_world(world)?;
        petridish_storage::save_to_path(&guard, path)
            .with_context(|| format!("writing snapshot {}", path.display()))?;
        info!(path = %path.display(), tick = guard.ticks(), "Snapshot written");
    }
    Ok(report)
}
