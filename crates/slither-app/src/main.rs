use anyhow::Result;
use slither_brain::{EvoTrainer, TrainerConfig, TrainingSummary};
use slither_core::{PitState, SimConfig};
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

mod options;

use options::Options;

const OPTIONS_PATH: &str = "slitherbots-options.json";

// Generations can run arbitrarily long on a pathological looping population
// even with the starvation clock; the cap keeps training moving.
const TICKS_PER_GENERATION: u64 = 20_000;

// The starvation clock is wall-clock time, so the tick rate is part of the
// game's balance. SLITHERBOTS_FAST=1 drops the pacing for batch training.
const TICK_INTERVAL: Duration = Duration::from_millis(33);

fn main() -> Result<()> {
    init_tracing();

    let options_path = Path::new(OPTIONS_PATH);
    let (mut options, reset) = Options::load_or_reset(options_path)?;
    if reset {
        warn!("Options file missing or unreadable; wrote defaults back");
    }
    if options.sanitize() {
        warn!("Corrected out-of-range options back to defaults");
    }
    info!(
        generations = options.generations,
        population = options.population,
        high_score = options.high_score,
        "Starting slitherbots training shell"
    );

    let summary = train(&options)?;
    info!(
        generations = summary.generations_run,
        brain = summary.brain_kind.as_str(),
        best_fitness = summary.best_fitness,
        best_score = summary.best_score,
        "Training finished"
    );

    if options.record_score(summary.best_score) {
        info!(high_score = options.high_score, "New high score");
    }
    options.save(options_path)?;
    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn train(options: &Options) -> Result<TrainingSummary> {
    let sim_config = SimConfig {
        tick_budget: TICKS_PER_GENERATION,
        ..SimConfig::default()
    };
    sim_config.validate()?;

    let trainer_config = TrainerConfig {
        population: options.population,
        ..TrainerConfig::default()
    };
    let mut trainer = EvoTrainer::new(trainer_config);
    let paced = std::env::var_os("SLITHERBOTS_FAST").is_none();

    let summary = trainer.run(options.generations, |generation| {
        // Evaluation failures abort the generation with an empty report
        // rather than the whole run; the trainer re-breeds from elites.
        match PitState::new(sim_config.clone(), generation) {
            Ok(mut pit) => {
                while !pit.is_finished() {
                    pit.step();
                    if paced {
                        std::thread::sleep(TICK_INTERVAL);
                    }
                }
                pit.finish()
            }
            Err(error) => {
                warn!(%error, "Skipping generation that failed to start");
                slither_core::GenerationReport {
                    ticks: slither_core::Tick::zero(),
                    results: Vec::new(),
                    best_score: 0,
                    best_fitness: None,
                    deaths: 0,
                }
            }
        }
    });

    Ok(summary)
}
