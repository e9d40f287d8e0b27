use petridish_core::{CellId, Direction, DishConfig, Pickable, Position, World, WorldError};
use petridish_storage::{
    FORMAT_VERSION, MAGIC, StorageError, load_from_path, load_world, save_to_path, save_world,
};

fn config() -> DishConfig {
    DishConfig {
        world_width: 48,
        world_height: 32,
        tick_interval_ms: 0,
        rng_seed: Some(0xD15C),
        worker_threads: Some(1),
        ..DishConfig::default()
    }
}

fn grown_world(ticks: usize) -> World {
    let mut world = World::new(config()).expect("world");
    let origin = world.seed_position();
    world.spawn_cell(None, origin).expect("seed");
    for _ in 0..ticks {
        world.handle();
    }
    world
}

fn bytes_of(world: &World) -> Vec<u8> {
    let mut bytes = Vec::new();
    save_world(world, &mut bytes).expect("save");
    bytes
}

fn assert_same_world(left: &World, right: &World) {
    assert_eq!(left.tick(), right.tick());
    assert_eq!(left.year(), right.year());
    assert_eq!(left.epoch(), right.epoch());
    assert_eq!(left.id_counter(), right.id_counter());
    assert_eq!((left.width(), left.height()), (right.width(), right.height()));
    assert_eq!(left.grid_snapshot(), right.grid_snapshot());
    let left_cells: Vec<_> = left.cells().map(|(id, cell)| (*id, cell.snapshot())).collect();
    let right_cells: Vec<_> = right.cells().map(|(id, cell)| (*id, cell.snapshot())).collect();
    assert_eq!(left_cells, right_cells);
}

#[test]
fn save_then_load_restores_the_world() {
    let world = grown_world(60);
    assert!(world.cell_count() > 1);
    let restored = load_world(bytes_of(&world).as_slice(), config()).expect("load");
    assert_same_world(&world, &restored);
    assert_eq!(bytes_of(&restored), bytes_of(&world));
}

#[test]
fn restored_world_keeps_ticking() {
    let world = grown_world(40);
    let mut restored = load_world(bytes_of(&world).as_slice(), config()).expect("load");
    assert_eq!(restored.reserve_id().get(), world.id_counter() + 1);
    for _ in 0..20 {
        let events = restored.handle();
        assert_eq!(events.population, restored.cell_count());
    }
    assert_eq!(restored.ticks(), world.ticks() + 20);
}

#[test]
fn carried_corpses_round_trip() {
    let mut world = World::new(config()).expect("world");
    let carrier = world.spawn_cell(None, Position::new(10, 5)).expect("spawn");
    let corpse = world.spawn_cell(None, Position::new(11, 5)).expect("spawn");
    world
        .cell_mut(corpse)
        .expect("corpse")
        .body_mut()
        .vitals
        .die();
    let picked = world
        .cell(carrier)
        .expect("carrier")
        .pick_up_toward(Direction::EAST, &world);
    assert!(picked);

    let restored = load_world(bytes_of(&world).as_slice(), config()).expect("load");
    assert_same_world(&world, &restored);
    assert!(restored.cell(corpse).expect("corpse").is_picked());
    assert!(restored.grid().is_free(Position::new(11, 5)));
    assert_eq!(
        restored.cell(carrier).expect("carrier").body().bag.items[0],
        corpse
    );
}

#[test]
fn path_helpers_use_the_same_format() {
    let world = grown_world(20);
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("dish.pdsh");
    save_to_path(&world, &path).expect("save");
    let restored = load_from_path(&path, config()).expect("load");
    assert_same_world(&world, &restored);
}

#[test]
fn every_truncation_is_rejected() {
    let bytes = bytes_of(&grown_world(5));
    for len in [0, 3, 5, 20, 53, 60, bytes.len() / 2, bytes.len() - 1] {
        assert!(
            matches!(
                load_world(&bytes[..len], config()),
                Err(StorageError::Truncated)
            ),
            "prefix of {len} bytes was accepted"
        );
    }
}

#[test]
fn bad_magic_and_version_are_rejected() {
    let mut bytes = bytes_of(&grown_world(1));
    bytes[0] = b'X';
    assert!(matches!(
        load_world(bytes.as_slice(), config()),
        Err(StorageError::BadMagic)
    ));

    let mut bytes = bytes_of(&grown_world(1));
    bytes[4..6].copy_from_slice(&(FORMAT_VERSION + 1).to_le_bytes());
    assert!(matches!(
        load_world(bytes.as_slice(), config()),
        Err(StorageError::UnsupportedVersion(v)) if v == FORMAT_VERSION + 1
    ));
}

#[test]
fn oversized_dimensions_are_rejected_before_allocation() {
    let side = i32::MAX as u32;
    let mut bytes = Vec::new();
    bytes.extend_from_slice(&MAGIC);
    bytes.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    bytes.extend_from_slice(&side.to_le_bytes());
    bytes.extend_from_slice(&side.to_le_bytes());
    bytes.extend_from_slice(&[0; 40]);
    assert!(matches!(
        load_world(bytes.as_slice(), config()),
        Err(StorageError::World(WorldError::InvalidConfig(_)))
    ));
}

#[test]
fn unknown_object_tag_is_rejected() {
    let mut bytes = bytes_of(&grown_world(1));
    bytes[54..62].copy_from_slice(&9u64.to_le_bytes());
    assert!(matches!(
        load_world(bytes.as_slice(), config()),
        Err(StorageError::UnknownObjectType(9))
    ));
}

#[test]
fn tampered_genome_fails_the_hash_check() {
    let mut bytes = bytes_of(&grown_world(1));
    // Tag, id, generation, six ancestors, age, four vitals bytes, picked.
    let genome_start = 54 + 8 + 8 + 8 + 6 * 8 + 4 + 4 + 1;
    bytes[genome_start + 3] ^= 0x11;
    assert!(matches!(
        load_world(bytes.as_slice(), config()),
        Err(StorageError::Corrupt(_))
    ));
}

#[test]
fn overlapping_cells_are_rejected() {
    let mut world = World::new(config()).expect("world");
    let a = world.spawn_cell(None, Position::new(4, 4)).expect("spawn");
    let b = world.spawn_cell(None, Position::new(4, 4)).expect("spawn");
    let target = world.cell(a).expect("a").body().position;
    let mut bytes = bytes_of(&world);

    // Second record's position: header, first record, then the same offset.
    let record_len = (bytes.len() - 54) / 2;
    let position_offset = record_len - 32 - 1 - 1 - 8;
    let at = 54 + record_len + position_offset;
    bytes[at..at + 4].copy_from_slice(&target.x.to_le_bytes());
    bytes[at + 4..at + 8].copy_from_slice(&target.y.to_le_bytes());

    assert!(matches!(
        load_world(bytes.as_slice(), config()),
        Err(StorageError::World(_))
    ));
    assert_ne!(a, b);
}

#[test]
fn dangling_bag_reference_is_rejected() {
    let mut world = World::new(config()).expect("world");
    let id = world.spawn_cell(None, Position::new(6, 6)).expect("spawn");
    world.cell_mut(id).expect("cell").body_mut().bag.items[1] = CellId(99);
    assert!(matches!(
        load_world(bytes_of(&world).as_slice(), config()),
        Err(StorageError::Corrupt(_))
    ));
}
