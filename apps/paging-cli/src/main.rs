mod city;

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use glam::{Vec2, Vec3};
use paging_common::{CameraPose, StoreId, StructureKey};
use paging_stream::{FlatHeight, Grid, PagingConfig, StoreRegistry};
use tracing_subscriber::EnvFilter;

use crate::city::CityStore;

const CITY: StoreId = StoreId(1);

#[derive(Parser)]
#[command(name = "paging-cli", about = "Drive the structure paging grid from the command line")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print crate info
    Info,
    /// Print the default paging config as JSON
    Config,
    /// Fly a camera over a synthetic city and page buildings in and out
    Simulate {
        /// Number of buildings
        #[arg(short, long, default_value = "5000")]
        structures: usize,
        /// World edge length
        #[arg(short, long, default_value = "4096")]
        world: f32,
        /// Grid dimension (cells per side)
        #[arg(short, long, default_value = "64")]
        dimension: u32,
        /// Visibility range
        #[arg(short, long, default_value = "600")]
        range: f32,
        /// Page-out distance requested each tick (clamped to range + margin)
        #[arg(long, default_value = "800")]
        page_out: f32,
        /// Soft cap on simultaneously built buildings
        #[arg(short, long, default_value = "1500")]
        budget: usize,
        /// Number of 60 Hz ticks to simulate
        #[arg(short, long, default_value = "3000")]
        ticks: u32,
        /// Seed for city generation
        #[arg(long, default_value = "42")]
        seed: u64,
        /// Make every Nth building fail to construct
        #[arg(long)]
        fail_every: Option<u32>,
        /// Print a status line every N ticks
        #[arg(long, default_value = "300")]
        report_every: u32,
        /// JSON paging config
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

struct SimulateArgs {
    structures: usize,
    world: f32,
    dimension: u32,
    range: f32,
    page_out: f32,
    budget: usize,
    ticks: u32,
    seed: u64,
    fail_every: Option<u32>,
    report_every: u32,
    config: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match cli.command {
        Commands::Info => {
            println!("paging-cli v{}", env!("CARGO_PKG_VERSION"));
            println!("stream: {}", paging_stream::crate_info());
        }
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&PagingConfig::default())?);
        }
        Commands::Simulate {
            structures,
            world,
            dimension,
            range,
            page_out,
            budget,
            ticks,
            seed,
            fail_every,
            report_every,
            config,
        } => simulate(SimulateArgs {
            structures,
            world,
            dimension,
            range,
            page_out,
            budget,
            ticks,
            seed,
            fail_every,
            report_every,
            config,
        })?,
    }

    Ok(())
}

/// Camera path: a lap around the city centre that pauses for a second every
/// quarter turn so idle bursts kick in.
fn camera_at(tick: u32, ticks: u32, world: f32) -> CameraPose {
    let pause = 60;
    let leg = (ticks / 4).max(pause + 1);
    let moving = (tick % leg).min(leg - pause) + (tick / leg) * (leg - pause);
    let t = moving as f32 / (4 * (leg - pause)) as f32;
    let angle = t * std::f32::consts::TAU;

    let centre = Vec2::splat(world * 0.5);
    let radius = world * 0.3;
    let pos = centre + Vec2::new(angle.cos(), angle.sin()) * radius;
    // Tangent of the circle, counter-clockwise.
    let forward = Vec3::new(-angle.sin(), 0.0, angle.cos());
    CameraPose {
        position: Vec3::new(pos.x, 40.0, pos.y),
        forward,
    }
}

fn simulate(args: SimulateArgs) -> anyhow::Result<()> {
    let config = match &args.config {
        Some(path) => PagingConfig::load(path)?,
        None => PagingConfig::default(),
    };

    let city = CityStore::generate(args.structures, args.world, args.seed, args.fail_every);
    let count = city.len();
    let mut stores = StoreRegistry::new();
    stores.register(CITY, Box::new(city));

    let mut grid = Grid::setup(
        Vec2::ZERO,
        Vec2::splat(args.world),
        args.dimension,
        args.range,
        FlatHeight(0.0),
        config,
    )?;

    let mut unplaced = 0;
    for i in 0..count as u32 {
        if let Err(err) = grid.append(StructureKey::new(CITY, i), &mut stores) {
            tracing::warn!(%err, "building skipped");
            unplaced += 1;
        }
    }
    println!(
        "City: {count} buildings in {} cells ({unplaced} unplaced), range={} page_out={}",
        grid.populated_cells(),
        grid.visibility_range(),
        grid.page_out_distance()
    );

    let frame = Duration::from_micros(16_667);
    for tick in 0..args.ticks {
        let camera = camera_at(tick, args.ticks, args.world);
        let visible = grid.cull(camera.position, &stores);
        let now = frame * tick;
        let report = grid.do_paging(&mut stores, &camera, args.budget, args.page_out, now);

        if args.report_every > 0 && tick % args.report_every == 0 {
            let since_load = grid
                .since_last_load(now)
                .map_or_else(|| "never".to_string(), |d| format!("{d:.2?}"));
            println!(
                "tick {tick:>5}: visible={:<4} queue={:<5} built={:<5} phase={:?} last_load={since_load}",
                visible.len(),
                report.queue_len,
                report.total_constructed,
                report.phase
            );
        }
    }

    println!("Stats: {}", grid.stats());
    println!(
        "Paging call latency: avg {:?}, max {:?} (last {} calls)",
        grid.latency().average(),
        grid.latency().max(),
        grid.latency().count()
    );

    let violations = grid.check_invariants(&stores);
    for v in &violations {
        println!("invariant violated: {v}");
    }

    grid.teardown(&mut stores);
    println!("After teardown: built={}, queue={}", grid.total_constructed(), grid.queue_len());

    if !violations.is_empty() {
        anyhow::bail!("{} invariant violations", violations.len());
    }
    Ok(())
}
