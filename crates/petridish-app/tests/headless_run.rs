use petridish_app::{
    CONFIG_ENV, RunSettings, SNAPSHOT_ENV, TICKS_ENV, bootstrap_world, parse_config, run,
};
use petridish_core::DishConfig;
use std::collections::HashMap;

fn small_config() -> DishConfig {
    DishConfig {
        world_width: 40,
        world_height: 24,
        tick_interval_ms: 0,
        rng_seed: Some(99),
        worker_threads: Some(2),
        ..DishConfig::default()
    }
}

#[test]
fn partial_json_keeps_defaults() {
    let config = parse_config(r#"{ "world_width": 40, "bite_strength": 12 }"#).expect("config");
    let defaults = DishConfig::default();
    assert_eq!(config.world_width, 40);
    assert_eq!(config.bite_strength, 12);
    assert_eq!(config.world_height, defaults.world_height);
    assert_eq!(config.ticks_per_year, defaults.ticks_per_year);
}

#[test]
fn invalid_json_config_is_rejected() {
    assert!(parse_config(r#"{ "ticks_per_year": 0 }"#).is_err());
    assert!(parse_config("not json").is_err());
}

#[test]
fn settings_come_from_the_environment() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config_path = dir.path().join("dish.json");
    std::fs::write(&config_path, r#"{ "world_height": 30 }"#).expect("write config");

    let vars: HashMap<&str, String> = HashMap::from([
        (CONFIG_ENV, config_path.display().to_string()),
        (TICKS_ENV, " 25 ".to_string()),
        (SNAPSHOT_ENV, "out.pdsh".to_string()),
    ]);
    let settings = RunSettings::from_lookup(|name| vars.get(name).cloned()).expect("settings");
    assert_eq!(settings.config.world_height, 30);
    assert_eq!(settings.ticks, Some(25));
    assert_eq!(
        settings.snapshot.as_deref(),
        Some(std::path::Path::new("out.pdsh"))
    );

    let bad = RunSettings::from_lookup(|name| (name == TICKS_ENV).then(|| "soon".to_string()));
    assert!(bad.is_err());
}

#[test]
fn fresh_dish_is_seeded_with_a_lattice() {
    let settings = RunSettings {
        config: small_config(),
        ticks: Some(0),
        snapshot: None,
    };
    let world = bootstrap_world(&settings).expect("bootstrap");
    let guard = world.lock().expect("lock");
    // Ten columns of seeds, six per column in a 24-row dish.
    assert_eq!(guard.cell_count(), 60);

    let shallow = RunSettings {
        config: DishConfig {
            world_height: 3,
            ..small_config()
        },
        ticks: Some(0),
        snapshot: None,
    };
    let world = bootstrap_world(&shallow).expect("bootstrap");
    assert_eq!(world.lock().expect("lock").cell_count(), 1);
}

#[test]
fn run_writes_a_snapshot_that_resumes() {
    let dir = tempfile::tempdir().expect("tempdir");
    let settings = RunSettings {
        config: small_config(),
        ticks: Some(30),
        snapshot: Some(dir.path().join("dish.pdsh")),
    };

    let world = bootstrap_world(&settings).expect("bootstrap");
    let report = run(&world, &settings).expect("run");
    assert_eq!(report.ticks, 30);
    assert!(report.population >= 1);
    assert!(settings.snapshot.as_ref().is_some_and(|path| path.exists()));

    let resumed = bootstrap_world(&settings).expect("resume");
    let guard = resumed.lock().expect("lock");
    assert_eq!(guard.ticks(), 30);
    assert_eq!(guard.cell_count(), report.population);
}
