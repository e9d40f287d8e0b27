//! Binary world snapshots for petridish.
//!
//! A snapshot is a fixed little-endian header followed by one record per
//! registered object. Loading rebuilds a fresh [`World`] and refuses any
//! snapshot whose contents would break the world's invariants.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use petridish_core::brain::{REGISTER_COUNT, STACK_DEPTH, StackFrame};
use petridish_core::cell::BAG_SIZE;
use petridish_core::{
    Bag, Body, Brain, Cell, CellId, Direction, DishConfig, GENOME_LENGTH, Genome, Lineage, Mind,
    Object, ObjectType, Position, Sensor, Tick, TriggerSource, Vitals, World, WorldError,
};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{self, BufReader, Read, Write};
use std::path::Path;
use thiserror::Error;
use tracing::{debug, warn};

/// Leading bytes of every snapshot.
pub const MAGIC: [u8; 4] = *b"PDSH";
/// Current snapshot layout.
pub const FORMAT_VERSION: u16 = 1;

const DIED_FLAG: u8 = 0b01;
const KILLED_FLAG: u8 = 0b10;

/// Storage error wrapper.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("i/o error: {0}")]
    Io(io::Error),
    #[error("snapshot ends prematurely")]
    Truncated,
    #[error("not a petridish snapshot")]
    BadMagic,
    #[error("unsupported snapshot version {0}")]
    UnsupportedVersion(u16),
    #[error("unknown object type tag {0}")]
    UnknownObjectType(u64),
    #[error("corrupt snapshot: {0}")]
    Corrupt(String),
    #[error(transparent)]
    World(#[from] WorldError),
}

impl From<io::Error> for StorageError {
    fn from(err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            Self::Truncated
        } else {
            Self::Io(err)
        }
    }
}

type Result<T> = std::result::Result<T, StorageError>;

/// Fixed header fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotHeader {
    pub width: u32,
    pub height: u32,
    pub ticks: u64,
    pub year: u64,
    pub epoch: u64,
    pub object_count: u64,
    pub id_counter: u64,
}

impl SnapshotHeader {
    fn of(world: &World) -> Self {
        Self {
            width: world.width(),
            height: world.height(),
            ticks: world.ticks(),
            year: world.year(),
            epoch: world.epoch(),
            object_count: world.cell_count() as u64,
            id_counter: world.id_counter(),
        }
    }

    fn write(&self, out: &mut Vec<u8>) -> Result<()> {
        out.write_all(&MAGIC)?;
        out.write_u16::<LittleEndian>(FORMAT_VERSION)?;
        out.write_u32::<LittleEndian>(self.width)?;
        out.write_u32::<LittleEndian>(self.height)?;
        out.write_u64::<LittleEndian>(self.ticks)?;
        out.write_u64::<LittleEndian>(self.year)?;
        out.write_u64::<LittleEndian>(self.epoch)?;
        out.write_u64::<LittleEndian>(self.object_count)?;
        out.write_u64::<LittleEndian>(self.id_counter)?;
        Ok(())
    }

    fn read<R: Read>(reader: &mut R) -> Result<Self> {
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if magic != MAGIC {
            return Err(StorageError::BadMagic);
        }
        let version = reader.read_u16::<LittleEndian>()?;
        if version != FORMAT_VERSION {
            return Err(StorageError::UnsupportedVersion(version));
        }
        Ok(Self {
            width: reader.read_u32::<LittleEndian>()?,
            height: reader.read_u32::<LittleEndian>()?,
            ticks: reader.read_u64::<LittleEndian>()?,
            year: reader.read_u64::<LittleEndian>()?,
            epoch: reader.read_u64::<LittleEndian>()?,
            object_count: reader.read_u64::<LittleEndian>()?,
            id_counter: reader.read_u64::<LittleEndian>()?,
        })
    }
}

/// Writes `world` to `writer`. The snapshot is assembled in memory first, so
/// a failing writer never sees a partial header.
pub fn save_world<W: Write>(world: &World, mut writer: W) -> Result<()> {
    let header = SnapshotHeader::of(world);
    let mut out = Vec::with_capacity(64 + world.cell_count() * 512);
    header.write(&mut out)?;
    for (_, cell) in world.cells() {
        out.write_u64::<LittleEndian>(cell.object_type() as u64)?;
        let (body, mind) = cell.snapshot();
        write_cell(&mut out, cell.id(), &body, &mind)?;
    }
    writer.write_all(&out)?;
    writer.flush()?;
    debug!(
        tick = header.ticks,
        objects = header.object_count,
        bytes = out.len(),
        "world snapshot saved"
    );
    Ok(())
}

/// Rebuilds a world from `reader`. `base` supplies every setting the snapshot
/// does not carry; width and height come from the snapshot.
pub fn load_world<R: Read>(mut reader: R, base: DishConfig) -> Result<World> {
    read_world(&mut reader, base).inspect_err(|err| warn!(error = %err, "snapshot rejected"))
}

pub fn save_to_path(world: &World, path: impl AsRef<Path>) -> Result<()> {
    let file = File::create(path)?;
    save_world(world, file)
}

pub fn load_from_path(path: impl AsRef<Path>, base: DishConfig) -> Result<World> {
    let file = File::open(path)?;
    load_world(BufReader::new(file), base)
}

fn read_world<R: Read>(reader: &mut R, base: DishConfig) -> Result<World> {
    let header = SnapshotHeader::read(reader)?;
    let config = DishConfig {
        world_width: header.width,
        world_height: header.height,
        ..base
    };
    let mut world = World::new(config)?;

    let mut cells = Vec::with_capacity(header.object_count.min(1 << 16) as usize);
    for _ in 0..header.object_count {
        let tag = reader.read_u64::<LittleEndian>()?;
        match ObjectType::from_tag(tag) {
            Some(ObjectType::Cell) => cells.push(read_cell(reader)?),
            None => return Err(StorageError::UnknownObjectType(tag)),
        }
    }
    verify_bags(&cells)?;

    world.restore_clock(Tick(header.ticks), header.year, header.epoch, header.id_counter);
    for cell in cells {
        world.insert_restored(cell)?;
    }
    debug!(
        tick = header.ticks,
        objects = header.object_count,
        "world snapshot loaded"
    );
    Ok(world)
}

/// Every carried id must name a loaded, picked object held by exactly one
/// bag, and every picked object must be carried.
fn verify_bags(cells: &[Cell]) -> Result<()> {
    let picked: BTreeMap<CellId, bool> = cells
        .iter()
        .map(|cell| (cell.id(), cell.body().picked))
        .collect();
    let mut carried = BTreeSet::new();
    for cell in cells {
        for item in cell.body().bag.ids() {
            match picked.get(&item) {
                None => {
                    return Err(StorageError::Corrupt(format!(
                        "cell {} carries unknown object {item}",
                        cell.id()
                    )));
                }
                Some(false) => {
                    return Err(StorageError::Corrupt(format!(
                        "cell {} carries {item}, which lies on the grid",
                        cell.id()
                    )));
                }
                Some(true) => {}
            }
            if item == cell.id() || !carried.insert(item) {
                return Err(StorageError::Corrupt(format!(
                    "object {item} is carried more than once"
                )));
            }
        }
    }
    if let Some((id, _)) = picked
        .iter()
        .find(|&(id, &is_picked)| is_picked && !carried.contains(id))
    {
        return Err(StorageError::Corrupt(format!(
            "object {id} is picked but no bag holds it"
        )));
    }
    Ok(())
}

fn narrow<T: TryFrom<usize>>(value: usize, what: &str) -> Result<T> {
    T::try_from(value).map_err(|_| StorageError::Corrupt(format!("{what} {value} out of range")))
}

/// Reads a genome-relative address and checks it.
fn read_address<R: Read>(reader: &mut R, what: &str) -> Result<usize> {
    let address = usize::from(reader.read_u16::<LittleEndian>()?);
    if address >= GENOME_LENGTH {
        return Err(StorageError::Corrupt(format!(
            "{what} {address} outside the genome"
        )));
    }
    Ok(address)
}

fn write_cell(out: &mut Vec<u8>, id: CellId, body: &Body, mind: &Mind) -> Result<()> {
    out.write_u64::<LittleEndian>(id.get())?;
    out.write_u64::<LittleEndian>(body.generation)?;
    for ancestor in body.lineage.0 {
        out.write_u64::<LittleEndian>(ancestor.get())?;
    }

    let vitals = &body.vitals;
    out.write_u32::<LittleEndian>(vitals.age)?;
    out.write_u8(vitals.health)?;
    out.write_u8(vitals.energy)?;
    out.write_u8(vitals.weight)?;
    let mut flags = 0;
    if vitals.died {
        flags |= DIED_FLAG;
    }
    if vitals.killed {
        flags |= KILLED_FLAG;
    }
    out.write_u8(flags)?;
    out.write_u8(u8::from(body.picked))?;

    out.write_all(mind.genome.code())?;
    out.write_u64::<LittleEndian>(mind.genome.hash())?;
    write_brain(out, &mind.brain)?;

    out.write_i32::<LittleEndian>(body.position.x)?;
    out.write_i32::<LittleEndian>(body.position.y)?;
    out.write_u8(body.rotation.value())?;
    out.write_u8(narrow(body.bag.selected, "bag slot")?)?;
    for item in body.bag.items {
        out.write_u64::<LittleEndian>(item.get())?;
    }
    Ok(())
}

fn write_brain(out: &mut Vec<u8>, brain: &Brain) -> Result<()> {
    out.write_all(&brain.registers)?;
    out.write_all(&brain.memory)?;
    for frame in &brain.stack {
        out.write_u16::<LittleEndian>(narrow(frame.return_address, "return address")?)?;
        out.write_all(&frame.registers)?;
        out.write_u8(frame.compare_flag)?;
    }
    for sensor in &brain.sensors {
        out.write_u16::<LittleEndian>(narrow(sensor.jump, "sensor jump")?)?;
        out.write_u8(sensor.trigger as u8)?;
        out.write_u8(u8::from(sensor.triggered))?;
    }
    out.write_u8(narrow(brain.stack_counter, "stack counter")?)?;
    out.write_u16::<LittleEndian>(narrow(brain.command_counter, "command counter")?)?;
    out.write_u8(brain.compare_flag)?;
    Ok(())
}

fn read_cell<R: Read>(reader: &mut R) -> Result<Cell> {
    let id = CellId(reader.read_u64::<LittleEndian>()?);
    if id.is_none() {
        return Err(StorageError::Corrupt("object with id 0".to_string()));
    }
    let generation = reader.read_u64::<LittleEndian>()?;
    let mut lineage = Lineage::default();
    for slot in &mut lineage.0 {
        *slot = CellId(reader.read_u64::<LittleEndian>()?);
    }

    let age = reader.read_u32::<LittleEndian>()?;
    let health = reader.read_u8()?;
    let energy = reader.read_u8()?;
    let weight = reader.read_u8()?;
    let flags = reader.read_u8()?;
    let picked = reader.read_u8()? != 0;
    let vitals = Vitals {
        age,
        health,
        energy,
        weight,
        died: flags & DIED_FLAG != 0,
        killed: flags & KILLED_FLAG != 0,
    };
    if picked && !vitals.died {
        return Err(StorageError::Corrupt(format!(
            "living cell {id} is marked as carried"
        )));
    }

    let mut code = [0u8; GENOME_LENGTH];
    reader.read_exact(&mut code)?;
    let stored_hash = reader.read_u64::<LittleEndian>()?;
    let genome = Genome::from_code(code);
    if genome.hash() != stored_hash {
        return Err(StorageError::Corrupt(format!(
            "genome hash mismatch for cell {id}: stored {stored_hash}, computed {}",
            genome.hash()
        )));
    }
    let brain = read_brain(reader)?;

    let position = Position::new(
        reader.read_i32::<LittleEndian>()?,
        reader.read_i32::<LittleEndian>()?,
    );
    let rotation = reader.read_u8()?;
    if rotation >= Direction::COUNT {
        return Err(StorageError::Corrupt(format!(
            "rotation {rotation} of cell {id}"
        )));
    }
    let selected = usize::from(reader.read_u8()?);
    if selected >= BAG_SIZE {
        return Err(StorageError::Corrupt(format!(
            "bag slot {selected} of cell {id}"
        )));
    }
    let mut bag = Bag {
        selected,
        ..Bag::default()
    };
    for slot in &mut bag.items {
        *slot = CellId(reader.read_u64::<LittleEndian>()?);
    }

    let body = Body {
        generation,
        lineage,
        vitals,
        picked,
        position,
        rotation: Direction::new(rotation),
        bag,
    };
    Ok(Cell::from_parts(id, body, Mind { genome, brain }))
}

fn read_brain<R: Read>(reader: &mut R) -> Result<Brain> {
    let mut brain = Brain::default();
    reader.read_exact(&mut brain.registers)?;
    reader.read_exact(&mut brain.memory)?;
    for frame in &mut brain.stack {
        let return_address = read_address(reader, "return address")?;
        let mut registers = [0u8; REGISTER_COUNT];
        reader.read_exact(&mut registers)?;
        *frame = StackFrame {
            return_address,
            registers,
            compare_flag: reader.read_u8()?,
        };
    }
    for sensor in &mut brain.sensors {
        let jump = read_address(reader, "sensor jump")?;
        *sensor = Sensor {
            jump,
            trigger: TriggerSource::from_byte(reader.read_u8()?),
            triggered: reader.read_u8()? != 0,
        };
    }
    brain.stack_counter = usize::from(reader.read_u8()?);
    if brain.stack_counter > STACK_DEPTH {
        return Err(StorageError::Corrupt(format!(
            "stack counter {} exceeds depth {STACK_DEPTH}",
            brain.stack_counter
        )));
    }
    brain.command_counter = read_address(reader, "command counter")?;
    brain.compare_flag = reader.read_u8()?;
    Ok(brain)
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::ByteOrder;

    fn config(width: u32, height: u32) -> DishConfig {
        DishConfig {
            world_width: width,
            world_height: height,
            tick_interval_ms: 0,
            rng_seed: Some(11),
            worker_threads: Some(1),
            ..DishConfig::default()
        }
    }

    fn saved(world: &World) -> Vec<u8> {
        let mut bytes = Vec::new();
        save_world(world, &mut bytes).expect("save");
        bytes
    }

    /// Header (4 + 2 + 4 + 4 + 5 * 8) then the first record's type tag.
    const FIRST_RECORD: usize = 54;

    #[test]
    fn header_is_little_endian() {
        let mut world = World::new(config(12, 9)).expect("world");
        world.spawn_cell(None, Position::new(3, 2)).expect("spawn");
        world.handle();
        let bytes = saved(&world);
        assert_eq!(&bytes[..4], b"PDSH");
        assert_eq!(LittleEndian::read_u16(&bytes[4..6]), FORMAT_VERSION);
        assert_eq!(LittleEndian::read_u32(&bytes[6..10]), 12);
        assert_eq!(LittleEndian::read_u32(&bytes[10..14]), 9);
        assert_eq!(LittleEndian::read_u64(&bytes[14..22]), 1);
        assert_eq!(LittleEndian::read_u64(&bytes[38..46]), world.cell_count() as u64);
        assert_eq!(LittleEndian::read_u64(&bytes[FIRST_RECORD..FIRST_RECORD + 8]), 0);
    }

    #[test]
    fn killed_flag_survives() {
        let mut world = World::new(config(8, 8)).expect("world");
        let id = world.spawn_cell(None, Position::new(2, 2)).expect("spawn");
        {
            let vitals = &mut world.cell_mut(id).expect("cell").body_mut().vitals;
            vitals.die();
            vitals.killed = true;
        }
        let restored = load_world(saved(&world).as_slice(), config(1, 1)).expect("load");
        let vitals = restored.cell(id).expect("cell").body().vitals;
        assert!(vitals.died && vitals.killed);
    }

    #[test]
    fn io_errors_map_eof_to_truncated() {
        let eof = io::Error::new(io::ErrorKind::UnexpectedEof, "eof");
        assert!(matches!(StorageError::from(eof), StorageError::Truncated));
        let denied = io::Error::new(io::ErrorKind::PermissionDenied, "nope");
        assert!(matches!(StorageError::from(denied), StorageError::Io(_)));
    }

    #[test]
    fn command_counter_outside_genome_is_rejected() {
        let mut world = World::new(config(8, 8)).expect("world");
        world.spawn_cell(None, Position::new(2, 2)).expect("spawn");
        let mut bytes = saved(&world);
        // The command counter sits just before the flag byte and the trailing
        // position, rotation, bag slot and bag ids (8 + 2 + 32 bytes).
        let at = bytes.len() - 42 - 1 - 2;
        bytes[at..at + 2].copy_from_slice(&300u16.to_le_bytes());
        assert!(matches!(
            load_world(bytes.as_slice(), config(8, 8)),
            Err(StorageError::Corrupt(_))
        ));
    }
}
