use anyhow::Result;
use petridish_app::{RunSettings, bootstrap_world, run};
use tracing::info;

fn main() -> Result<()> {
    init_tracing();
    let settings = RunSettings::from_env()?;
    let world = bootstrap_world(&settings)?;
    info!(ticks = ?settings.ticks, "Starting petridish");
    let report = run(&world, &settings)?;
    info!(
        ticks = report.ticks,
        births = report.births,
        deaths = report.deaths,
        population = report.population,
        "Simulation finished"
    );
    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}
