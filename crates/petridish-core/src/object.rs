//! Identity, geometry and the capability traits implemented by world objects.

use crate::cell::{BiteOutcome, Lineage};
use crate::genome::Genome;
use crate::isa::ObjectKind;
use crate::world::{Turn, World};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable numeric handle for world objects. Ids start at 1 and are never reused.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct CellId(pub u64);

impl CellId {
    /// Sentinel for "no object" (empty grid cell, empty ancestor slot, empty bag slot).
    pub const NONE: Self = Self(0);

    #[must_use]
    pub const fn is_none(self) -> bool {
        self.0 == 0
    }

    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Grid coordinates. `y` grows downwards.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Position {
    pub x: i32,
    pub y: i32,
}

impl Position {
    #[must_use]
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// The neighbouring coordinates in `direction`, without any wrapping.
    #[must_use]
    pub const fn step(self, direction: Direction) -> Self {
        let (dx, dy) = direction.offset();
        Self {
            x: self.x.wrapping_add(dx),
            y: self.y.wrapping_add(dy),
        }
    }
}

/// One of eight compass directions in 45 degree steps, counter-clockwise from east.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Direction(u8);

impl Direction {
    pub const COUNT: u8 = 8;
    pub const EAST: Self = Self(0);
    pub const NORTH: Self = Self(2);
    pub const WEST: Self = Self(4);
    pub const SOUTH: Self = Self(6);

    /// Wraps any byte into a direction.
    #[must_use]
    pub const fn new(value: u8) -> Self {
        Self(value % Self::COUNT)
    }

    #[must_use]
    pub const fn value(self) -> u8 {
        self.0
    }

    #[must_use]
    pub const fn degrees(self) -> u16 {
        self.0 as u16 * 45
    }

    /// Composes two rotations.
    #[must_use]
    pub const fn turned(self, by: Self) -> Self {
        Self((self.0 + by.0) % Self::COUNT)
    }

    #[must_use]
    pub const fn opposite(self) -> Self {
        self.turned(Self::WEST)
    }

    /// Grid delta for one step in this direction.
    #[must_use]
    pub const fn offset(self) -> (i32, i32) {
        match self.0 {
            0 => (1, 0),
            1 => (1, -1),
            2 => (0, -1),
            3 => (-1, -1),
            4 => (-1, 0),
            5 => (-1, 1),
            6 => (0, 1),
            _ => (1, 1),
        }
    }
}

/// Persistence tag for object variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u64)]
pub enum ObjectType {
    Cell = 0,
}

impl ObjectType {
    #[must_use]
    pub const fn from_tag(tag: u64) -> Option<Self> {
        match tag {
            0 => Some(Self::Cell),
            _ => None,
        }
    }
}

/// Anything the world schedules every tick.
///
/// All methods take `&self`: implementors guard their state internally so the
/// Handle phase can run many objects in parallel against a shared `&World`.
pub trait Object: Send + Sync {
    fn id(&self) -> CellId;

    fn object_type(&self) -> ObjectType;

    /// Serial pre-turn step: death check and decay, then one instruction for
    /// live cells followed by sensor sampling.
    fn prepare(&self, world: &World, turn: &mut Turn);

    /// One full turn.
    fn handle(&self, world: &World, turn: &mut Turn);

    fn energy(&self) -> u8;

    /// Charges `amount` energy; any shortfall is paid in health.
    fn spend_energy(&self, amount: u8, world: &World) -> bool;

    /// Saturating energy gain. Refused once the object has died.
    fn increase_energy(&self, amount: u8) -> bool;
}

/// Living objects: ageing, health, combat and reproduction.
pub trait Lively: Object {
    fn age(&self) -> u32;

    fn health(&self) -> u8;

    fn generation(&self) -> u64;

    fn ancestors(&self) -> Lineage;

    fn genome_hash(&self) -> u64;

    fn is_died(&self) -> bool;

    fn is_killed(&self) -> bool;

    fn lose_health(&self, amount: u8) -> bool;

    fn heal_health(&self, amount: u8) -> bool;

    /// Terminal transition to a corpse.
    fn die(&self);

    /// Applies a bite of `strength` to this object; the outcome carries the
    /// attacker's harvest.
    fn bite(&self, strength: u8, world: &World) -> BiteOutcome;

    fn is_related(&self, other: &dyn Lively) -> bool;

    /// Spawns a mutated offspring into `direction`, relative to the current facing.
    fn reproduce(
        &self,
        direction: Direction,
        genome: &Genome,
        world: &World,
        rng: &mut dyn RngCore,
    ) -> bool;
}

/// Objects that occupy and move across the grid.
pub trait Movable: Object {
    fn position(&self) -> Position;

    fn rotation(&self) -> Direction;

    /// Moves one step in `direction`, relative to the current facing.
    fn move_in_direction(&self, direction: Direction, world: &World) -> bool;

    fn move_forward(&self, world: &World) -> bool {
        self.move_in_direction(Direction::EAST, world)
    }

    fn move_backward(&self, world: &World) -> bool {
        self.move_in_direction(Direction::WEST, world)
    }

    fn move_left(&self, world: &World) -> bool {
        self.move_in_direction(Direction::NORTH, world)
    }

    fn move_right(&self, world: &World) -> bool {
        self.move_in_direction(Direction::SOUTH, world)
    }

    /// Places the object at an absolute position it has already claimed.
    fn move_to_position(&self, position: Position) -> bool;

    fn rotate(&self, by: Direction) -> bool;

    /// Classifies the neighbouring cell in `direction`, relative to the facing.
    fn look(&self, direction: Direction, world: &World, kinship: bool) -> ObjectKind;
}

/// Objects that can be carried in another object's bag.
pub trait Pickable: Object {
    fn weight(&self) -> u8;

    fn is_picked(&self) -> bool;

    /// Energy granted when the object is recycled from a bag.
    fn nutrition(&self, world: &World) -> u8;

    /// Lifts the object off the grid.
    fn pick_up(&self, world: &World) -> bool;

    /// Puts a carried object back onto the grid at `position`.
    fn drop_at(&self, position: Position, world: &World) -> bool;
}
