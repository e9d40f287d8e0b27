//! Spatial storage: the lock-free occupancy grid and static resource fields.

use crate::object::{CellId, Position};
use crate::{ResourceBand, WorldError};
use std::sync::atomic::{AtomicU64, Ordering};

/// What a coordinate resolves to on the grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Occupant {
    /// Outside the vertical bounds.
    Wall,
    Empty,
    Object(CellId),
}

/// One atomic object id per grid cell (0 = empty).
///
/// The X axis wraps around; rows outside `0..height` are walls. Slots are
/// claimed and vacated with compare-exchange so Handle tasks can move in
/// parallel without a global lock.
#[derive(Debug)]
pub struct OccupancyGrid {
    width: u32,
    height: u32,
    slots: Vec<AtomicU64>,
}

impl OccupancyGrid {
    pub fn new(width: u32, height: u32) -> Result<Self, WorldError> {
        if width == 0 || height == 0 {
            return Err(WorldError::InvalidConfig(
                "grid dimensions must be non-zero",
            ));
        }
        let slots = (0..(width as usize) * (height as usize))
            .map(|_| AtomicU64::new(0))
            .collect();
        Ok(Self {
            width,
            height,
            slots,
        })
    }

    #[must_use]
    pub const fn width(&self) -> u32 {
        self.width
    }

    #[must_use]
    pub const fn height(&self) -> u32 {
        self.height
    }

    /// Wraps `x` onto the torus; `None` for rows outside the world.
    #[must_use]
    pub fn normalize(&self, position: Position) -> Option<Position> {
        if position.y < 0 || position.y >= self.height as i32 {
            return None;
        }
        Some(Position::new(
            position.x.rem_euclid(self.width as i32),
            position.y,
        ))
    }

    fn slot(&self, position: Position) -> Option<&AtomicU64> {
        let position = self.normalize(position)?;
        let index = (position.y as usize) * (self.width as usize) + position.x as usize;
        self.slots.get(index)
    }

    #[must_use]
    pub fn occupant(&self, position: Position) -> Occupant {
        match self.slot(position) {
            None => Occupant::Wall,
            Some(slot) => match slot.load(Ordering::Acquire) {
                0 => Occupant::Empty,
                id => Occupant::Object(CellId(id)),
            },
        }
    }

    #[must_use]
    pub fn is_free(&self, position: Position) -> bool {
        self.occupant(position) == Occupant::Empty
    }

    /// Atomically places `id` on an empty cell.
    pub fn claim(&self, position: Position, id: CellId) -> bool {
        if id.is_none() {
            return false;
        }
        self.slot(position).is_some_and(|slot| {
            slot.compare_exchange(0, id.get(), Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        })
    }

    /// Clears the cell only if `id` still occupies it.
    pub fn vacate(&self, position: Position, id: CellId) -> bool {
        self.slot(position).is_some_and(|slot| {
            slot.compare_exchange(id.get(), 0, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        })
    }

    /// Claims `to`, then releases `from`.
    pub fn relocate(&self, id: CellId, from: Position, to: Position) -> bool {
        if !self.claim(to, id) {
            return false;
        }
        self.vacate(from, id);
        true
    }

    /// Copies the current occupancy row by row.
    #[must_use]
    pub fn snapshot(&self) -> Vec<CellId> {
        self.slots
            .iter()
            .map(|slot| CellId(slot.load(Ordering::Acquire)))
            .collect()
    }

    /// Number of occupied cells.
    #[must_use]
    pub fn occupied(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| slot.load(Ordering::Relaxed) != 0)
            .count()
    }
}

/// Static per-cell resource values computed once from a [`ResourceBand`].
#[derive(Debug, Clone)]
pub struct ResourceField {
    width: u32,
    height: u32,
    cells: Vec<u8>,
}

impl ResourceField {
    pub fn from_band(width: u32, height: u32, band: &ResourceBand) -> Result<Self, WorldError> {
        if width == 0 || height == 0 {
            return Err(WorldError::InvalidConfig(
                "resource field dimensions must be non-zero",
            ));
        }
        let mut cells = vec![0; (width as usize) * (height as usize)];
        let begin = (height as f32 * band.begin_pos).round() as u32;
        let end = ((height as f32 * band.end_pos).round() as u32).min(height);
        for y in begin..end {
            let value = remap(
                y as f32,
                begin as f32,
                end as f32,
                band.begin_value,
                band.end_value,
            );
            let value = (value * band.multiplier).round().clamp(0.0, 255.0) as u8;
            let row = (y as usize) * (width as usize);
            cells[row..row + width as usize].fill(value);
        }
        Ok(Self {
            width,
            height,
            cells,
        })
    }

    #[must_use]
    pub const fn width(&self) -> u32 {
        self.width
    }

    #[must_use]
    pub const fn height(&self) -> u32 {
        self.height
    }

    #[must_use]
    pub fn cells(&self) -> &[u8] {
        &self.cells
    }

    /// Returns the flat index for `(x, y)` without bounds checks.
    #[inline]
    fn offset(&self, x: u32, y: u32) -> usize {
        (y as usize) * (self.width as usize) + (x as usize)
    }

    /// Immutable access to a specific cell.
    #[must_use]
    pub fn get(&self, x: u32, y: u32) -> Option<u8> {
        if x < self.width && y < self.height {
            Some(self.cells[self.offset(x, y)])
        } else {
            None
        }
    }

    /// Value under a world position; 0 outside the world.
    #[must_use]
    pub fn at(&self, position: Position) -> u8 {
        if position.y < 0 {
            return 0;
        }
        let x = position.x.rem_euclid(self.width as i32) as u32;
        self.get(x, position.y as u32).unwrap_or(0)
    }
}

fn remap(value: f32, in_min: f32, in_max: f32, out_min: f32, out_max: f32) -> f32 {
    if in_max <= in_min {
        return out_min;
    }
    out_min + (value - in_min) * (out_max - out_min) / (in_max - in_min)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn x_wraps_and_y_is_walled() {
        let grid = OccupancyGrid::new(10, 5).expect("grid");
        assert_eq!(grid.normalize(Position::new(-1, 2)), Some(Position::new(9, 2)));
        assert_eq!(grid.normalize(Position::new(12, 0)), Some(Position::new(2, 0)));
        assert_eq!(grid.normalize(Position::new(3, -1)), None);
        assert_eq!(grid.normalize(Position::new(3, 5)), None);
        assert_eq!(grid.occupant(Position::new(0, 7)), Occupant::Wall);
        assert!(!grid.is_free(Position::new(0, -1)));
    }

    #[test]
    fn claim_is_exclusive_and_vacate_checks_owner() {
        let grid = OccupancyGrid::new(4, 4).expect("grid");
        let spot = Position::new(1, 1);
        assert!(grid.claim(spot, CellId(3)));
        assert!(!grid.claim(spot, CellId(4)));
        assert!(!grid.claim(Position::new(0, 0), CellId::NONE));
        assert_eq!(grid.occupant(spot), Occupant::Object(CellId(3)));

        assert!(!grid.vacate(spot, CellId(4)));
        assert!(grid.vacate(spot, CellId(3)));
        assert!(!grid.vacate(spot, CellId(3)));
        assert!(grid.is_free(spot));
    }

    #[test]
    fn relocate_moves_across_the_seam() {
        let grid = OccupancyGrid::new(4, 4).expect("grid");
        assert!(grid.claim(Position::new(3, 2), CellId(1)));
        assert!(grid.relocate(CellId(1), Position::new(3, 2), Position::new(4, 2)));
        assert_eq!(grid.occupant(Position::new(0, 2)), Occupant::Object(CellId(1)));
        assert!(grid.is_free(Position::new(3, 2)));
        assert_eq!(grid.occupied(), 1);
    }

    #[test]
    fn sunlight_band_fades_with_depth() {
        let band = ResourceBand {
            begin_value: 12.0,
            end_value: 0.0,
            begin_pos: 0.0,
            end_pos: 0.85,
            multiplier: 1.0,
        };
        let field = ResourceField::from_band(4, 100, &band).expect("field");
        assert_eq!(field.at(Position::new(0, 0)), 12);
        assert_eq!(field.at(Position::new(2, 8)), 11);
        assert_eq!(field.at(Position::new(-3, 8)), 11);
        assert_eq!(field.at(Position::new(0, 85)), 0);
        assert_eq!(field.at(Position::new(0, 99)), 0);
        assert_eq!(field.at(Position::new(0, -1)), 0);
        assert!(field.at(Position::new(0, 40)) < field.at(Position::new(0, 20)));
    }

    #[test]
    fn minerals_band_starts_below_the_surface() {
        let band = ResourceBand {
            begin_value: 1.0,
            end_value: 4.0,
            begin_pos: 0.4,
            end_pos: 1.0,
            multiplier: 2.0,
        };
        let field = ResourceField::from_band(3, 10, &band).expect("field");
        assert_eq!(field.at(Position::new(0, 3)), 0);
        assert_eq!(field.at(Position::new(0, 4)), 2);
        assert_eq!(field.at(Position::new(0, 9)), 7);
    }
}
