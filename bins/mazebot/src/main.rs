//! mazebot — CLI entry point for the maze-exploration SLAM engine.
//!
//! Grounded on `bins/bvrd/src/main.rs`'s `clap`-derive `Args` struct,
//! `tracing_subscriber::fmt` initialization, and top-level `anyhow::Result`
//! error handling, generalized to a single positional `map` argument and
//! exit-code contract: exit 0 on mission completion or user interrupt,
//! non-zero on a malformed map.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use engine::{Engine, EngineConfig, MapRecord, StepOutcome};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Autonomous maze-exploration and SLAM engine.
#[derive(Parser)]
#[command(name = "mazebot", about = "Autonomous maze-exploration and SLAM engine")]
struct Args {
    /// Path to the map record (JSON: segments, start_point, optional goal_point)
    map: PathBuf,

    /// Path to an engine configuration file (TOML). Missing file falls back to defaults.
    #[arg(long, default_value = "mazebot.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("mazebot={level}")));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}

fn load_map(path: &PathBuf) -> Result<MapRecord> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read map file '{}'", path.display()))?;
    serde_json::from_str(&contents)
        .with_context(|| format!("map file '{}' is not a well-formed map record", path.display()))
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(&args.log_level);

    let map = match load_map(&args.map) {
        Ok(map) => map,
        Err(err) => {
            error!(error = %err, "malformed map, aborting");
            return ExitCode::FAILURE;
        }
    };

    let config = EngineConfig::load(&args.config);

    let mut engine = match Engine::new(map, config) {
        Ok(engine) => engine,
        Err(err) => {
            error!(error = %err, "failed to initialize engine");
            return ExitCode::FAILURE;
        }
    };

    let handle = engine.cancellation_handle();
    if let Err(err) = ctrlc_handler(handle) {
        error!(error = %err, "failed to install interrupt handler, continuing without it");
    }

    info!(map = %args.map.display(), "starting mission");
    let outcome = engine.run();
    let snapshot = engine.snapshot();

    match outcome {
        StepOutcome::MissionComplete => {
            info!(
                tick = snapshot.tick,
                exploration_ratio = snapshot.exploration_ratio,
                exit_pose = ?snapshot.exit_pose,
                "mission complete"
            );
            ExitCode::SUCCESS
        }
        StepOutcome::Cancelled => {
            info!(tick = snapshot.tick, "mission interrupted by user");
            ExitCode::SUCCESS
        }
        StepOutcome::Timeout => {
            error!(tick = snapshot.tick, "mission timed out");
            ExitCode::FAILURE
        }
        StepOutcome::MaxStepsReached => {
            error!(tick = snapshot.tick, "mission aborted: step cap reached");
            ExitCode::FAILURE
        }
        StepOutcome::Continue => unreachable!("run() only returns on a terminal outcome"),
    }
}

/// Installs a SIGINT handler that sets the engine's cancellation flag
/// rather than terminating the process abruptly, so a user interrupt is
/// reported as a clean mission outcome.
fn ctrlc_handler(flag: std::sync::Arc<std::sync::atomic::AtomicBool>) -> Result<()> {
    ctrlc::set_handler(move || {
        flag.store(true, std::sync::atomic::Ordering::Relaxed);
    })
    .context("failed to register SIGINT handler")
}
