//! Cells: biology, lineage, carried items and the capability implementations.
//!
//! A cell's state is split across two locks. `mind` (genome and brain) is held
//! by the cell's own Handle task for its whole turn. `body` (vitals, position,
//! lineage, bag) is what other cells touch when they bite, share or pick up.
//! A task never holds two body locks at once.

use crate::brain::Brain;
use crate::genome::Genome;
use crate::isa::{self, Machine, ObjectKind, recycle};
use crate::lock;
use crate::object::{
    CellId, Direction, Lively, Movable, Object, ObjectType, Pickable, Position,
};
use crate::world::{Turn, World};
use crate::DishConfig;
use rand::RngCore;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::trace;

pub const LINEAGE_DEPTH: usize = 6;
pub const BAG_SIZE: usize = 4;

/// Ancestor ids, nearest first. [`CellId::NONE`] marks an unknown ancestor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Lineage(pub [CellId; LINEAGE_DEPTH]);

impl Lineage {
    /// The chain of a child of `parent`: the parent first, then its ancestors
    /// shifted down one level.
    #[must_use]
    pub fn descend(parent: CellId, parent_lineage: &Self) -> Self {
        let mut chain = [CellId::NONE; LINEAGE_DEPTH];
        chain[0] = parent;
        chain[1..].copy_from_slice(&parent_lineage.0[..LINEAGE_DEPTH - 1]);
        Self(chain)
    }

    #[must_use]
    pub fn contains(&self, id: CellId) -> bool {
        !id.is_none() && self.0.contains(&id)
    }

    /// Two cells are related when either descends from the other within the
    /// tracked depth, or both share a known ancestor at the same depth.
    #[must_use]
    pub fn related(a: CellId, a_lineage: &Self, b: CellId, b_lineage: &Self) -> bool {
        a_lineage.contains(b)
            || b_lineage.contains(a)
            || a_lineage
                .0
                .iter()
                .zip(&b_lineage.0)
                .any(|(x, y)| !x.is_none() && x == y)
    }
}

/// Scalars shared by every energy and health computation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Metabolism {
    pub age_influence: f32,
    pub health_decrement: u8,
}

impl Metabolism {
    #[must_use]
    pub fn from_config(config: &DishConfig) -> Self {
        Self {
            age_influence: config.age_influence,
            health_decrement: config.base_health_decrement,
        }
    }
}

/// Result of one bite on a defender.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BiteOutcome {
    /// Damage dealt, already clamped to `1..=255`; 0 when the bite glanced off.
    pub strength: u8,
    pub harvest: u8,
    pub lethal: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Vitals {
    pub age: u32,
    pub health: u8,
    pub energy: u8,
    pub weight: u8,
    pub died: bool,
    pub killed: bool,
}

impl Vitals {
    fn age_term(&self, metabolism: &Metabolism) -> f32 {
        self.age as f32 * metabolism.age_influence
    }

    /// Charges `round(amount + age * f)` energy. A shortfall empties the
    /// reserve and costs `round(shortfall + health_decrement + age * f)` health.
    /// Returns whether the energy reserve covered the charge.
    pub fn spend_energy(&mut self, amount: u8, metabolism: &Metabolism) -> bool {
        if self.died {
            return false;
        }
        let age_term = self.age_term(metabolism);
        let cost = (f32::from(amount) + age_term).round() as u32;
        let energy = u32::from(self.energy);
        if cost <= energy {
            self.energy = (energy - cost) as u8;
            return true;
        }
        let shortfall = (cost - energy) as f32;
        self.energy = 0;
        let loss = (shortfall + f32::from(metabolism.health_decrement) + age_term)
            .round()
            .min(255.0) as u8;
        self.lose_health(loss);
        false
    }

    pub fn lose_health(&mut self, amount: u8) -> bool {
        if self.died {
            return false;
        }
        if amount < self.health {
            self.health -= amount;
        } else {
            self.die();
        }
        true
    }

    pub fn heal_health(&mut self, amount: u8) -> bool {
        if self.died {
            return false;
        }
        self.health = self.health.saturating_add(amount);
        true
    }

    pub fn increase_energy(&mut self, amount: u8) -> bool {
        if self.died {
            return false;
        }
        self.energy = self.energy.saturating_add(amount);
        true
    }

    pub fn die(&mut self) {
        self.health = 0;
        self.died = true;
    }

    /// Applies a bite of base `strength` to this defender.
    pub fn take_bite(&mut self, strength: u8, metabolism: &Metabolism) -> BiteOutcome {
        if self.died {
            return BiteOutcome::default();
        }
        let age_term = self.age_term(metabolism);
        let raw = (f32::from(strength) + age_term - f32::from(self.weight)).round();
        if raw <= 0.0 {
            return BiteOutcome::default();
        }
        let strength = raw.min(255.0) as u8;
        let residual = self.energy;
        self.spend_energy(strength, metabolism);
        if self.died {
            self.killed = true;
            return BiteOutcome {
                strength,
                harvest: residual,
                lethal: true,
            };
        }
        let harvest = (f32::from(strength) - age_term.round() + f32::from(self.weight))
            .clamp(0.0, 255.0) as u8;
        BiteOutcome {
            strength,
            harvest,
            lethal: false,
        }
    }
}

/// Carried items and the slot selected by `BAGACTIVE`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Bag {
    pub items: [CellId; BAG_SIZE],
    pub selected: usize,
}

impl Bag {
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.iter().filter(|id| !id.is_none()).count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn selected_item(&self) -> CellId {
        self.items[self.selected % BAG_SIZE]
    }

    pub fn take_selected(&mut self) -> CellId {
        std::mem::take(&mut self.items[self.selected % BAG_SIZE])
    }

    /// Stores `id` in the first free slot.
    pub fn insert(&mut self, id: CellId) -> bool {
        match self.items.iter_mut().find(|slot| slot.is_none()) {
            Some(slot) => {
                *slot = id;
                true
            }
            None => false,
        }
    }

    pub fn has_room(&self) -> bool {
        self.items.iter().any(|slot| slot.is_none())
    }

    pub fn ids(&self) -> impl Iterator<Item = CellId> + '_ {
        self.items.iter().copied().filter(|id| !id.is_none())
    }
}

/// State other cells may read or change during a turn.
#[derive(Debug, Clone, PartialEq)]
pub struct Body {
    pub generation: u64,
    pub lineage: Lineage,
    pub vitals: Vitals,
    /// Carried by another cell and therefore off the grid.
    pub picked: bool,
    pub position: Position,
    pub rotation: Direction,
    pub bag: Bag,
}

/// State only the cell's own turn touches.
#[derive(Debug, Clone, PartialEq)]
pub struct Mind {
    pub genome: Genome,
    pub brain: Brain,
}

#[derive(Debug)]
pub struct Cell {
    id: CellId,
    body: Mutex<Body>,
    mind: Mutex<Mind>,
}

impl Cell {
    /// A first-generation cell running the seed program.
    #[must_use]
    pub fn seed(id: CellId, position: Position, config: &DishConfig) -> Self {
        let body = Body {
            generation: 0,
            lineage: Lineage::default(),
            vitals: Vitals {
                age: 0,
                health: config.base_health,
                energy: config.base_energy,
                weight: config.base_weight,
                died: false,
                killed: false,
            },
            picked: false,
            position,
            rotation: Direction::EAST,
            bag: Bag::default(),
        };
        let mind = Mind {
            genome: Genome::seed(config.seed_threshold()),
            brain: Brain::default(),
        };
        Self::from_parts(id, body, mind)
    }

    /// A child of `parent` carrying `genome`, with a fresh brain.
    #[must_use]
    pub fn offspring(
        id: CellId,
        parent_id: CellId,
        parent: &Body,
        genome: Genome,
        position: Position,
        config: &DishConfig,
    ) -> Self {
        let body = Body {
            generation: parent.generation + 1,
            lineage: Lineage::descend(parent_id, &parent.lineage),
            vitals: Vitals {
                age: 0,
                health: config.base_health,
                energy: config.base_energy.min(parent.vitals.energy),
                weight: config.base_weight,
                died: false,
                killed: false,
            },
            picked: false,
            position,
            rotation: parent.rotation,
            bag: Bag::default(),
        };
        let mind = Mind {
            genome,
            brain: Brain::default(),
        };
        Self::from_parts(id, body, mind)
    }

    #[must_use]
    pub fn from_parts(id: CellId, body: Body, mind: Mind) -> Self {
        Self {
            id,
            body: Mutex::new(body),
            mind: Mutex::new(mind),
        }
    }

    pub fn body(&self) -> MutexGuard<'_, Body> {
        lock(&self.body)
    }

    pub fn mind(&self) -> MutexGuard<'_, Mind> {
        lock(&self.mind)
    }

    pub fn body_mut(&mut self) -> &mut Body {
        self.body.get_mut().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn mind_mut(&mut self) -> &mut Mind {
        self.mind.get_mut().unwrap_or_else(PoisonError::into_inner)
    }

    /// Copies both halves of the state.
    #[must_use]
    pub fn snapshot(&self) -> (Body, Mind) {
        let body = self.body().clone();
        let mind = self.mind().clone();
        (body, mind)
    }

    /// The grid position one step in `direction`, relative to the facing.
    /// `None` when that step leaves the world vertically.
    fn facing(&self, direction: Direction, world: &World) -> Option<Position> {
        let (position, rotation) = {
            let body = self.body();
            (body.position, body.rotation)
        };
        world.neighbor(position, rotation.turned(direction))
    }

    /// The live (or dead) cell one step in `direction`.
    fn neighbour<'w>(&self, direction: Direction, world: &'w World) -> Option<&'w Cell> {
        let target = self.facing(direction, world)?;
        match world.grid().occupant(target) {
            crate::grid::Occupant::Object(id) if id != self.id => world.cell(id),
            _ => None,
        }
    }

    fn metabolism(world: &World) -> Metabolism {
        Metabolism::from_config(world.config())
    }

    /// Summed weight of carried items.
    fn carried_weight(&self, world: &World) -> u8 {
        let items = self.body().bag;
        items
            .ids()
            .filter_map(|id| world.cell(id))
            .fold(0u8, |total, item| total.saturating_add(item.weight()))
    }

    /// Bites the live cell in `direction`, feeding on the harvest.
    pub fn bite_toward(&self, direction: Direction, world: &World) -> bool {
        let Some(target) = self.neighbour(direction, world) else {
            return false;
        };
        if target.is_died() {
            return false;
        }
        let outcome = target.bite(world.config().bite_strength, world);
        if outcome.strength == 0 {
            return false;
        }
        self.increase_energy(outcome.harvest);
        true
    }

    /// Pays `share_amount` and hands the live cell in `direction` whatever of
    /// it the donor actually held. A shortfall in payment comes out of health.
    pub fn share_toward(&self, direction: Direction, world: &World) -> bool {
        let Some(target) = self.neighbour(direction, world) else {
            return false;
        };
        let amount = {
            let mut body = self.body();
            if body.vitals.died {
                return false;
            }
            let share = world.config().share_amount;
            let amount = share.min(body.vitals.energy);
            body.vitals.spend_energy(share, &Self::metabolism(world));
            amount
        };
        amount > 0 && target.increase_energy(amount)
    }

    /// Converts a resource into energy; see [`recycle`] for the kinds.
    pub fn recycle(&self, kind: u8, world: &World) -> bool {
        match kind {
            recycle::SUNLIGHT | recycle::MINERALS => {
                let position = self.body().position;
                let gain = if kind == recycle::SUNLIGHT {
                    world.sunlight_at(position)
                } else {
                    world.minerals_at(position)
                };
                gain > 0 && self.increase_energy(gain)
            }
            recycle::BAG => {
                let item = self.body().bag.selected_item();
                let Some(food) = world.cell(item) else {
                    return false;
                };
                let gain = food.nutrition(world);
                self.body().bag.take_selected();
                world.request_removal(item);
                self.increase_energy(gain);
                true
            }
            _ => false,
        }
    }

    /// Lifts the corpse in `direction` into the first free bag slot.
    pub fn pick_up_toward(&self, direction: Direction, world: &World) -> bool {
        if !self.body().bag.has_room() {
            return false;
        }
        let Some(target) = self.neighbour(direction, world) else {
            return false;
        };
        if !target.pick_up(world) {
            return false;
        }
        self.body().bag.insert(target.id());
        true
    }

    /// Puts the selected item down in `direction`.
    pub fn drop_toward(&self, direction: Direction, world: &World) -> bool {
        let item = self.body().bag.selected_item();
        let Some(carried) = world.cell(item) else {
            return false;
        };
        let Some(target) = self.facing(direction, world) else {
            return false;
        };
        if !carried.drop_at(target, world) {
            return false;
        }
        self.body().bag.take_selected();
        true
    }

    #[must_use]
    pub fn bag_size(&self) -> u8 {
        self.body().bag.len() as u8
    }

    pub fn select_bag_slot(&self, slot: u8) {
        self.body().bag.selected = usize::from(slot) % BAG_SIZE;
    }

    /// Nutrition of the selected item; 0 for an empty slot.
    #[must_use]
    pub fn bag_energy(&self, world: &World) -> u8 {
        let item = self.body().bag.selected_item();
        world.cell(item).map_or(0, |food| food.nutrition(world))
    }

    #[must_use]
    pub fn bag_check(&self, world: &World) -> ObjectKind {
        let item = self.body().bag.selected_item();
        match world.cell(item) {
            Some(_) => ObjectKind::Dead,
            None => ObjectKind::Empty,
        }
    }
}

impl Object for Cell {
    fn id(&self) -> CellId {
        self.id
    }

    fn object_type(&self) -> ObjectType {
        ObjectType::Cell
    }

    fn prepare(&self, world: &World, turn: &mut Turn) {
        let mut body = self.body();
        if body.vitals.died {
            let interval = u64::from(world.config().corpse_decay_interval);
            if interval > 0 && world.ticks().is_multiple_of(interval) {
                body.vitals.weight = body.vitals.weight.saturating_sub(1);
            }
            if body.vitals.weight == 0 {
                if !body.picked {
                    world.grid().vacate(body.position, self.id);
                }
                trace!(id = %self.id, "corpse decayed");
                world.request_removal(self.id);
            }
            return;
        }
        if body.vitals.health == 0 {
            body.vitals.die();
            trace!(id = %self.id, "cell died");
            return;
        }
        if body.picked {
            return;
        }
        drop(body);

        let mut mind = self.mind();
        let Mind { genome, brain } = &mut *mind;
        let mut machine = Machine {
            cell: self,
            world,
            genome,
            brain: &mut *brain,
            rng: &mut turn.rng,
        };
        isa::step(&mut machine);
        self.spend_energy(world.config().base_energy_decrement, world);
        let (energy, health) = {
            let body = self.body();
            (body.vitals.energy, body.vitals.health)
        };
        brain.sample_sensors(energy, health);
    }

    fn handle(&self, world: &World, turn: &mut Turn) {
        {
            let mut body = self.body();
            if body.vitals.died || body.picked {
                return;
            }
            if body.vitals.health == 0 {
                body.vitals.die();
                return;
            }
        }

        let decrement = world.config().base_energy_decrement;
        let mut mind = self.mind();
        let Mind { genome, brain } = &mut *mind;
        brain.service_sensors();
        let mut machine = Machine {
            cell: self,
            world,
            genome,
            brain,
            rng: &mut turn.rng,
        };
        for _ in 0..crate::GENOME_LENGTH {
            let ends_turn = isa::step(&mut machine);
            self.spend_energy(decrement, world);
            if ends_turn || self.is_died() {
                break;
            }
        }
        drop(mind);

        if turn.year_changed {
            let mut body = self.body();
            if !body.vitals.died {
                body.vitals.age = body.vitals.age.saturating_add(1);
            }
        }
    }

    fn energy(&self) -> u8 {
        self.body().vitals.energy
    }

    fn spend_energy(&self, amount: u8, world: &World) -> bool {
        self.body()
            .vitals
            .spend_energy(amount, &Self::metabolism(world))
    }

    fn increase_energy(&self, amount: u8) -> bool {
        self.body().vitals.increase_energy(amount)
    }
}

impl Lively for Cell {
    fn age(&self) -> u32 {
        self.body().vitals.age
    }

    fn health(&self) -> u8 {
        self.body().vitals.health
    }

    fn generation(&self) -> u64 {
        self.body().generation
    }

    fn ancestors(&self) -> Lineage {
        self.body().lineage
    }

    fn genome_hash(&self) -> u64 {
        self.mind().genome.hash()
    }

    fn is_died(&self) -> bool {
        self.body().vitals.died
    }

    fn is_killed(&self) -> bool {
        self.body().vitals.killed
    }

    fn lose_health(&self, amount: u8) -> bool {
        self.body().vitals.lose_health(amount)
    }

    fn heal_health(&self, amount: u8) -> bool {
        self.body().vitals.heal_health(amount)
    }

    fn die(&self) {
        self.body().vitals.die();
    }

    /// A lethal bite takes the body off the grid at once and queues its removal.
    fn bite(&self, strength: u8, world: &World) -> BiteOutcome {
        let mut body = self.body();
        let outcome = body.vitals.take_bite(strength, &Self::metabolism(world));
        if outcome.lethal {
            world.grid().vacate(body.position, self.id);
            drop(body);
            trace!(id = %self.id, "cell killed");
            world.request_removal(self.id);
        }
        outcome
    }

    fn is_related(&self, other: &dyn Lively) -> bool {
        let own = self.ancestors();
        let theirs = other.ancestors();
        Lineage::related(self.id, &own, other.id(), &theirs)
    }

    fn reproduce(
        &self,
        direction: Direction,
        genome: &Genome,
        world: &World,
        rng: &mut dyn RngCore,
    ) -> bool {
        let config = world.config();
        let cost = config.reproduce_energy_cost;
        let penalty = cost / 2;
        let parent = self.body().clone();
        if parent.vitals.died {
            return false;
        }
        if parent.vitals.energy <= penalty {
            self.spend_energy(penalty, world);
            return false;
        }

        let child_id = world.reserve_id();
        let target = world
            .neighbor(parent.position, parent.rotation.turned(direction))
            .filter(|&target| world.grid().claim(target, child_id));
        let Some(target) = target else {
            self.spend_energy(penalty, world);
            return false;
        };

        let child_genome = genome.mutate(rng, config.mutation_rate);
        let child = Cell::offspring(child_id, self.id, &parent, child_genome, target, config);
        trace!(parent = %self.id, child = %child_id, "cell reproduced");
        world.queue_birth(child);
        self.spend_energy(cost, world);
        true
    }
}

impl Movable for Cell {
    fn position(&self) -> Position {
        self.body().position
    }

    fn rotation(&self) -> Direction {
        self.body().rotation
    }

    fn move_in_direction(&self, direction: Direction, world: &World) -> bool {
        let own = self.weight();
        let load = own.saturating_add(self.carried_weight(world));
        self.spend_energy(load, world);

        let mut body = self.body();
        if body.vitals.died || body.picked {
            return false;
        }
        let Some(target) = world.neighbor(body.position, body.rotation.turned(direction)) else {
            return false;
        };
        if !world.grid().relocate(self.id, body.position, target) {
            return false;
        }
        body.position = target;
        true
    }

    fn move_to_position(&self, position: Position) -> bool {
        self.body().position = position;
        true
    }

    fn rotate(&self, by: Direction) -> bool {
        let mut body = self.body();
        body.rotation = body.rotation.turned(by);
        true
    }

    fn look(&self, direction: Direction, world: &World, kinship: bool) -> ObjectKind {
        let Some(target) = self.facing(direction, world) else {
            return ObjectKind::Wall;
        };
        let id = match world.grid().occupant(target) {
            crate::grid::Occupant::Wall => return ObjectKind::Wall,
            crate::grid::Occupant::Empty => return ObjectKind::Empty,
            crate::grid::Occupant::Object(id) => id,
        };
        // Cells born this tick hold their slot before they are registered.
        let Some(other) = world.cell(id) else {
            if !kinship {
                return ObjectKind::Body;
            }
            return match world.with_pending_birth(id, |child| self.is_related(child)) {
                Some(true) => ObjectKind::Related,
                _ => ObjectKind::Unrelated,
            };
        };
        if other.is_died() {
            return ObjectKind::Dead;
        }
        if !kinship {
            return ObjectKind::Body;
        }
        if self.is_related(other) {
            ObjectKind::Related
        } else {
            ObjectKind::Unrelated
        }
    }
}

impl Pickable for Cell {
    fn weight(&self) -> u8 {
        self.body().vitals.weight
    }

    fn is_picked(&self) -> bool {
        self.body().picked
    }

    fn nutrition(&self, world: &World) -> u8 {
        let weight = self.weight();
        weight.saturating_mul(world.config().corpse_energy_per_weight)
    }

    fn pick_up(&self, world: &World) -> bool {
        let mut body = self.body();
        if !body.vitals.died || body.picked {
            return false;
        }
        if !world.grid().vacate(body.position, self.id) {
            return false;
        }
        body.picked = true;
        true
    }

    fn drop_at(&self, position: Position, world: &World) -> bool {
        let mut body = self.body();
        if !body.picked {
            return false;
        }
        let Some(position) = world.grid().normalize(position) else {
            return false;
        };
        if !world.grid().claim(position, self.id) {
            return false;
        }
        body.picked = false;
        body.position = position;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::tests::quiet_world;
    use rand::SeedableRng;

    fn metabolism(age_influence: f32) -> Metabolism {
        Metabolism {
            age_influence,
            health_decrement: 5,
        }
    }

    fn vitals(energy: u8, health: u8) -> Vitals {
        Vitals {
            age: 0,
            health,
            energy,
            weight: 5,
            died: false,
            killed: false,
        }
    }

    #[test]
    fn spend_energy_drains_reserve_before_health() {
        let m = metabolism(0.0);
        let mut v = vitals(10, 50);
        assert!(v.spend_energy(4, &m));
        assert_eq!((v.energy, v.health), (6, 50));

        assert!(v.spend_energy(6, &m));
        assert_eq!((v.energy, v.health), (0, 50));

        // Shortfall 3 plus the flat decrement of 5.
        assert!(!v.spend_energy(3, &m));
        assert_eq!((v.energy, v.health), (0, 42));
    }

    #[test]
    fn age_raises_costs() {
        let m = metabolism(0.5);
        let mut v = vitals(20, 50);
        v.age = 4;
        assert!(v.spend_energy(3, &m));
        assert_eq!(v.energy, 15);

        v.energy = 1;
        // cost 5, shortfall 4, loss = 4 + 5 + 2.
        v.spend_energy(3, &m);
        assert_eq!((v.energy, v.health), (0, 39));
    }

    #[test]
    fn health_exhaustion_kills_exactly_once() {
        let m = metabolism(0.0);
        let mut v = vitals(0, 6);
        v.spend_energy(1, &m);
        assert!(v.died);
        assert_eq!(v.health, 0);
        assert!(!v.lose_health(1));
        assert!(!v.spend_energy(1, &m));
        assert!(!v.increase_energy(10));
        assert_eq!(v.energy, 0);
    }

    #[test]
    fn energy_and_health_saturate() {
        let mut v = vitals(250, 250);
        assert!(v.increase_energy(10));
        assert!(v.heal_health(10));
        assert_eq!((v.energy, v.health), (255, 255));
    }

    #[test]
    fn bite_of_forty_against_weight_five() {
        let m = metabolism(0.0);
        let mut defender = vitals(100, 50);
        let outcome = defender.take_bite(40, &m);
        assert_eq!(outcome.strength, 35);
        assert_eq!(outcome.harvest, 40);
        assert!(!outcome.lethal);
        assert_eq!((defender.energy, defender.health), (65, 50));
    }

    #[test]
    fn weak_bite_glances_off() {
        let m = metabolism(0.0);
        let mut defender = vitals(100, 50);
        defender.weight = 40;
        assert_eq!(defender.take_bite(40, &m), BiteOutcome::default());
        assert_eq!(defender.energy, 100);
    }

    #[test]
    fn lethal_bite_harvests_residual_energy() {
        let m = metabolism(0.0);
        let mut defender = vitals(12, 10);
        let outcome = defender.take_bite(40, &m);
        assert!(outcome.lethal);
        assert_eq!(outcome.harvest, 12);
        assert!(defender.died && defender.killed);
    }

    #[test]
    fn lineage_descends_and_relates() {
        let grandparent = Lineage::default();
        let parent = Lineage::descend(CellId(1), &grandparent);
        let child = Lineage::descend(CellId(2), &parent);
        assert_eq!(child.0[0], CellId(2));
        assert_eq!(child.0[1], CellId(1));

        assert!(Lineage::related(CellId(3), &child, CellId(2), &parent));
        assert!(Lineage::related(CellId(2), &parent, CellId(3), &child));
        let sibling = Lineage::descend(CellId(2), &parent);
        assert!(Lineage::related(CellId(3), &child, CellId(4), &sibling));
        assert!(!Lineage::related(CellId(5), &grandparent, CellId(6), &grandparent));
    }

    #[test]
    fn bag_tracks_slots() {
        let mut bag = Bag::default();
        assert!(bag.is_empty());
        assert!(bag.insert(CellId(9)));
        assert!(bag.insert(CellId(10)));
        assert_eq!(bag.len(), 2);
        bag.selected = 1;
        assert_eq!(bag.take_selected(), CellId(10));
        assert_eq!(bag.ids().collect::<Vec<_>>(), vec![CellId(9)]);
    }

    fn prepare_cell(world: &mut World, at: Position, energy: u8) -> CellId {
        let id = world.spawn_cell(None, at).expect("spawn");
        world.cell_mut(id).expect("cell").body_mut().vitals.energy = energy;
        id
    }

    fn reproduce(world: &World, id: CellId, direction: u8) -> bool {
        let cell = world.cell(id).expect("cell");
        let genome = cell.mind().genome.clone();
        let mut rng = rand::rngs::SmallRng::seed_from_u64(3);
        cell.reproduce(Direction::new(direction), &genome, world, &mut rng)
    }

    #[test]
    fn starved_reproduction_charges_half_the_cost() {
        let mut world = quiet_world(8, 8);
        let id = prepare_cell(&mut world, Position::new(3, 3), 15);
        assert!(!reproduce(&world, id, 0));
        let cell = world.cell(id).expect("cell");
        assert_eq!((cell.energy(), cell.health()), (0, 50));
        world.commit_births();
        assert_eq!(world.cell_count(), 1);
    }

    #[test]
    fn reproduction_places_child_and_charges_full_cost() {
        let mut world = quiet_world(8, 8);
        let id = prepare_cell(&mut world, Position::new(3, 3), 100);
        assert!(reproduce(&world, id, 0));
        assert_eq!(world.cell(id).expect("cell").energy(), 70);
        assert!(!world.grid().is_free(Position::new(4, 3)));

        let births = world.commit_births();
        assert_eq!(births, 1);
        let (child_id, child) = world
            .cells()
            .find(|(child_id, _)| **child_id != id)
            .expect("child");
        assert_eq!(child.ancestors().0[0], id);
        assert_eq!(child.generation(), 1);
        assert_eq!(child.energy(), 25);
        assert_eq!(child.position(), Position::new(4, 3));
        assert!(*child_id > id);
    }

    #[test]
    fn blocked_reproduction_charges_half_the_cost() {
        let mut world = quiet_world(8, 8);
        let id = prepare_cell(&mut world, Position::new(3, 0), 100);
        // Direction 2 is north of the top row: a wall.
        assert!(!reproduce(&world, id, 2));
        assert_eq!(world.cell(id).expect("cell").energy(), 85);
    }

    #[test]
    fn lethal_bite_removes_defender_from_grid() {
        let mut world = quiet_world(8, 8);
        let attacker = prepare_cell(&mut world, Position::new(3, 3), 20);
        let victim = prepare_cell(&mut world, Position::new(4, 3), 10);
        world.cell_mut(victim).expect("cell").body_mut().vitals.health = 5;

        let cell = world.cell(attacker).expect("cell");
        assert!(cell.bite_toward(Direction::EAST, &world));
        assert_eq!(cell.energy(), 30);
        assert!(world.grid().is_free(Position::new(4, 3)));
        assert!(world.cell(victim).expect("victim").is_killed());
        assert_eq!(world.pending_removals(), vec![victim]);
    }

    #[test]
    fn unregistered_newborns_answer_kinship_checks() {
        let mut world = quiet_world(8, 8);
        let parent = prepare_cell(&mut world, Position::new(3, 3), 200);
        let stranger = prepare_cell(&mut world, Position::new(5, 3), 10);
        assert!(reproduce(&world, parent, 0));
        assert!(world.cell(CellId(3)).is_none());

        let parent = world.cell(parent).expect("cell");
        assert_eq!(parent.look(Direction::EAST, &world, false), ObjectKind::Body);
        assert_eq!(parent.look(Direction::EAST, &world, true), ObjectKind::Related);
        let stranger = world.cell(stranger).expect("cell");
        assert_eq!(
            stranger.look(Direction::WEST, &world, true),
            ObjectKind::Unrelated
        );
    }

    #[test]
    fn share_moves_energy_to_neighbour() {
        let mut world = quiet_world(8, 8);
        let donor = prepare_cell(&mut world, Position::new(3, 3), 6);
        let recipient = prepare_cell(&mut world, Position::new(3, 4), 1);
        let cell = world.cell(donor).expect("cell");
        assert!(cell.share_toward(Direction::SOUTH, &world));
        assert_eq!((cell.energy(), cell.health()), (0, 41));
        assert_eq!(world.cell(recipient).expect("cell").energy(), 7);

        assert!(!cell.share_toward(Direction::NORTH, &world));
        assert_eq!(cell.health(), 41);

        assert!(!cell.share_toward(Direction::SOUTH, &world));
        assert_eq!(cell.health(), 26);
        assert_eq!(world.cell(recipient).expect("cell").energy(), 7);
    }

    #[test]
    fn corpses_can_be_carried_dropped_and_eaten() {
        let mut world = quiet_world(8, 8);
        let carrier = prepare_cell(&mut world, Position::new(3, 3), 10);
        let corpse = prepare_cell(&mut world, Position::new(4, 3), 10);
        world.cell_mut(corpse).expect("cell").body_mut().vitals.die();

        let cell = world.cell(carrier).expect("cell");
        assert!(cell.pick_up_toward(Direction::EAST, &world));
        assert!(world.grid().is_free(Position::new(4, 3)));
        assert_eq!(cell.bag_size(), 1);
        assert_eq!(cell.bag_check(&world), ObjectKind::Dead);
        assert_eq!(cell.bag_energy(&world), 40);

        assert!(cell.drop_toward(Direction::SOUTH, &world));
        assert_eq!(cell.bag_size(), 0);
        assert_eq!(world.cell(corpse).expect("corpse").position(), Position::new(3, 4));

        assert!(cell.pick_up_toward(Direction::SOUTH, &world));
        assert!(cell.recycle(recycle::BAG, &world));
        assert_eq!(cell.energy(), 50);
        assert_eq!(cell.bag_size(), 0);
        assert_eq!(world.pending_removals(), vec![corpse]);
    }

    #[test]
    fn living_cells_cannot_be_picked_up() {
        let mut world = quiet_world(8, 8);
        let carrier = prepare_cell(&mut world, Position::new(3, 3), 10);
        prepare_cell(&mut world, Position::new(4, 3), 10);
        let cell = world.cell(carrier).expect("cell");
        assert!(!cell.pick_up_toward(Direction::EAST, &world));
        assert_eq!(cell.bag_size(), 0);
    }

    #[test]
    fn move_pays_weight_and_relocates() {
        let mut world = quiet_world(8, 8);
        let id = prepare_cell(&mut world, Position::new(7, 3), 20);
        let cell = world.cell(id).expect("cell");
        assert!(cell.move_forward(&world));
        assert_eq!(cell.position(), Position::new(0, 3));
        assert_eq!(cell.energy(), 15);
        assert_eq!(
            world.grid().occupant(Position::new(0, 3)),
            crate::grid::Occupant::Object(id)
        );
        assert!(world.grid().is_free(Position::new(7, 3)));
    }
}
