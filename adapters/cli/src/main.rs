#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Command-line adapter that runs a headless challenge session.

mod catalog;
mod host;
mod player;
mod simulation;

use std::{path::PathBuf, time::Duration};

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::simulation::{Simulation, SimulationConfig};

/// Simulates a play session against a challenge definition catalog.
#[derive(Debug, Parser)]
#[command(name = "challenge-sim", version)]
struct Args {
    /// JSON catalog of challenge definitions; the builtin catalog is used when omitted.
    #[arg(long)]
    catalog: Option<PathBuf>,
    /// Seed shared by the scheduler, spawn resolution and the scripted player.
    #[arg(long, default_value_t = 0x5eed)]
    seed: u64,
    /// Simulated session length in seconds.
    #[arg(long, default_value_t = 900)]
    duration_secs: u64,
    /// Length of one simulation tick in milliseconds.
    #[arg(long, default_value_t = 500)]
    tick_millis: u64,
    /// Level the player starts the session at.
    #[arg(long, default_value_t = 1)]
    player_level: u32,
    /// Seconds between world-event spawn attempts.
    #[arg(long, default_value_t = 15)]
    spawn_interval_secs: u64,
    /// Maximum number of concurrent world events.
    #[arg(long, default_value_t = 3)]
    max_world_events: usize,
    /// Number of zones laid out around the origin.
    #[arg(long, default_value_t = 6)]
    zones: u32,
}

/// Entry point for the challenge simulator.
fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    let args = Args::parse();
    let catalog = catalog::load(args.catalog.as_deref()).with_context(|| match &args.catalog {
        Some(path) => format!("loading catalog {}", path.display()),
        None => "loading builtin catalog".to_owned(),
    })?;

    let config = SimulationConfig {
        seed: args.seed,
        duration: Duration::from_secs(args.duration_secs),
        tick: Duration::from_millis(args.tick_millis),
        player_level: args.player_level.max(1),
        spawn_interval: Duration::from_secs(args.spawn_interval_secs),
        max_world_events: args.max_world_events,
        zone_count: args.zones,
    };
    let report = Simulation::new(catalog, config)
        .run()
        .context("running challenge session")?;
    println!("{report}");
    Ok(())
}
