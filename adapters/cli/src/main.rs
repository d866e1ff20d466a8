#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Headless command-line driver for the horde-nav engine.
//!
//! Generates a deterministic demo map, spawns a mixed horde, runs the
//! simulation for a fixed number of ticks with a mid-run building placement,
//! and prints an event summary.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::info;

use horde_nav_core::{tuning::NavTuning, AgentId, AgentProfile, CellIndex, NavEvent, TerrainTile};
use horde_nav_grid::Grid;
use horde_nav_system_movement::{MovementSystem, TickContext};
use horde_nav_system_scheduler::Scheduler;

/// Command-line options for the demo driver.
#[derive(Debug, Parser)]
#[command(name = "horde-nav", about = "Headless horde movement demo")]
struct Args {
    /// Number of simulation ticks to run.
    #[arg(long, default_value_t = 1_000)]
    ticks: u32,
    /// Map width in tiles.
    #[arg(long, default_value_t = 24)]
    width: u32,
    /// Map height in tiles.
    #[arg(long, default_value_t = 16)]
    height: u32,
    /// Number of hostile creatures to spawn along the top edge.
    #[arg(long, default_value_t = 12)]
    hostiles: u32,
    /// Number of gidlet swarm units to spawn near the keep.
    #[arg(long, default_value_t = 4)]
    gidlets: u32,
    /// Seed shared by map generation and every agent RNG.
    #[arg(long, default_value_t = 0x5eed)]
    seed: u64,
    /// Difficulty setting in [0, 1].
    #[arg(long, default_value_t = 0.5)]
    difficulty: f32,
    /// Optional TOML file overriding the default tuning.
    #[arg(long)]
    tuning: Option<PathBuf>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let tuning = load_tuning(args.tuning.as_deref())?;

    let mut rng = ChaCha8Rng::seed_from_u64(args.seed);
    let mut grid = generate_map(args.width, args.height, &mut rng)?;
    let keep = CellIndex::pack(args.width as i32 / 2, args.height as i32 - 1);

    let mut scheduler = Scheduler::new();
    let mut movement = MovementSystem::new(args.seed);
    let spawned = spawn_horde(&args, keep, &mut movement, &mut grid);
    info!(spawned, "horde registered");

    let mut summary = Summary::default();
    let rush_targets = [keep];
    let mut events = Vec::new();

    for tick in 0..args.ticks {
        events.clear();

        // Drop a building in the middle of the run so cached paths through
        // its footprint get rethought.
        if tick == args.ticks / 2 {
            let origin = CellIndex::pack(args.width as i32 / 2 - 1, args.height as i32 / 2 - 1);
            let region = grid.place_structure(origin, 2, 2);
            movement.invalidate_region(region, &mut scheduler, &mut events);
        }
        if tick % 50 == 0 {
            grid.decay_danger(10);
        }

        let ctx = TickContext {
            difficulty: args.difficulty,
            wave_ticks: tick,
            rush_targets: &rush_targets,
        };
        movement.tick(&mut grid, &mut scheduler, &tuning, &ctx, &mut events);
        summary.absorb(&events, &mut grid);
        summary.peak_budget = summary.peak_budget.max(scheduler.steps_consumed());
    }

    println!("ran {} ticks over a {}x{} map", args.ticks, args.width, args.height);
    println!("steps taken      : {}", summary.steps);
    println!("goal arrivals    : {}", summary.arrivals);
    println!("search failures  : {}", summary.failures);
    println!("stuck agents     : {}", summary.stuck);
    println!("rethinks queued  : {}", summary.rethinks);
    println!("peak search steps: {}/{}", summary.peak_budget, tuning.budget.global_steps);

    Ok(())
}

fn load_tuning(path: Option<&std::path::Path>) -> Result<NavTuning> {
    let Some(path) = path else {
        return Ok(NavTuning::default());
    };
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading tuning file {}", path.display()))?;
    toml::from_str(&raw).with_context(|| format!("parsing tuning file {}", path.display()))
}

/// Scatters wall blocks and bog patches, keeping the spawn and keep rows
/// clear so every archetype has somewhere to stand.
fn generate_map(width: u32, height: u32, rng: &mut ChaCha8Rng) -> Result<Grid> {
    let mut grid = Grid::new(width, height).context("constructing demo grid")?;
    if height <= 4 {
        return Ok(grid);
    }

    let obstacles = (width * height) / 24;
    for _ in 0..obstacles {
        let x = rng.gen_range(0..width) as i32;
        let y = rng.gen_range(2..height - 2) as i32;
        grid.set_ground(CellIndex::pack(x, y), TerrainTile::wall());
    }

    let bogs = (width * height) / 40;
    for _ in 0..bogs {
        let x = rng.gen_range(0..width) as i32;
        let y = rng.gen_range(2..height - 2) as i32;
        grid.set_ground(CellIndex::pack(x, y), TerrainTile::bog());
    }

    Ok(grid)
}

fn spawn_horde(
    args: &Args,
    keep: CellIndex,
    movement: &mut MovementSystem,
    grid: &mut Grid,
) -> u32 {
    let mut spawned = 0;
    let mut next_id = 0;

    for index in 0..args.hostiles {
        let mut profile = AgentProfile::hostile(0.25);
        match index % 5 {
            0 => profile.boss = true,
            1 => profile.wraith = true,
            2 => profile.diagonal_preferred = true,
            _ => {}
        }

        let x = (index * args.width.max(1) / args.hostiles.max(1)) as i32;
        let spawn = CellIndex::pack(x.min(args.width as i32 - 1), 0);
        let agent = AgentId::new(next_id);
        next_id += 1;
        if movement.register(agent, profile, spawn, grid).is_ok() {
            movement.set_goal(agent, keep);
            spawned += 1;
        }
    }

    for index in 0..args.gidlets {
        let x = (index as i32 * 2 + 1).min(args.width as i32 - 1);
        let spawn = CellIndex::pack(x, args.height as i32 - 1);
        let agent = AgentId::new(next_id);
        next_id += 1;
        if movement
            .register(agent, AgentProfile::gidlet(0.35), spawn, grid)
            .is_ok()
        {
            movement.set_goal(agent, keep);
            spawned += 1;
        }
    }

    spawned
}

#[derive(Debug, Default)]
struct Summary {
    steps: u64,
    arrivals: u64,
    failures: u64,
    stuck: u64,
    rethinks: u64,
    peak_budget: u32,
}

impl Summary {
    fn absorb(&mut self, events: &[NavEvent], grid: &mut Grid) {
        for event in events {
            match event {
                NavEvent::Stepped { .. } => self.steps += 1,
                NavEvent::ArrivedAtGoal { .. } => self.arrivals += 1,
                NavEvent::SearchFailed { .. } => self.failures += 1,
                NavEvent::AgentStuck { agent, .. } => {
                    self.stuck += 1;
                    // A permanently stuck agent reads as a casualty; mark the
                    // ground so the rest of the horde detours.
                    if let Some(cell) = grid_cell_of(agent, grid) {
                        grid.raise_danger(cell, 200);
                    }
                }
                NavEvent::RethinkQueued { .. } => self.rethinks += 1,
            }
        }
    }
}

fn grid_cell_of(agent: &AgentId, grid: &Grid) -> Option<CellIndex> {
    for y in 0..grid.height() as i32 {
        for x in 0..grid.width() as i32 {
            let cell = CellIndex::pack(x, y);
            if grid.occupant(cell) == Some(*agent) {
                return Some(cell);
            }
        }
    }
    None
}
