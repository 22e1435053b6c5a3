use anyhow::{Context, Result, bail};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};
use voxbots_sim::{
    GenerationOutcome, Morphology, RunOptions, Simulation, SimulationSettings,
};

#[derive(Parser, Debug)]
#[command(
    name = "voxbots",
    version,
    about = "Stage a demo generation of voxel soft-body robots and run it through the simulator"
)]
struct Cli {
    /// Path to the simulator executable (voxcraft-sim or compatible).
    #[arg(long)]
    exec_path: PathBuf,

    /// Path to the simulator's node worker executable.
    #[arg(long)]
    worker_path: PathBuf,

    /// Root directory that holds generation subdirectories.
    #[arg(long, default_value = "./generations")]
    storage: PathBuf,

    /// Name of the generation directory to stage.
    #[arg(long, default_value = "gen_0000")]
    generation: String,

    /// Fraction of the device heap the simulator may claim.
    #[arg(long, default_value_t = 0.5)]
    heap_fraction: f64,

    /// Simulated duration in seconds.
    #[arg(long, default_value_t = 5.0)]
    sim_time: f64,

    /// Number of demo organisms to stage.
    #[arg(long, default_value_t = 3)]
    organisms: u32,

    /// Record intermediate frames every this many steps (0 = final state only).
    #[arg(long, default_value_t = 0)]
    step_size: u32,

    /// Kill the simulator after this many seconds.
    #[arg(long)]
    timeout_secs: Option<u64>,
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let settings = SimulationSettings::with_default_materials(cli.heap_fraction, cli.sim_time)
        .context("invalid simulation settings")?;
    let simulation = Simulation::new(&cli.exec_path, &cli.worker_path, &cli.storage, settings);

    let mut generation = simulation
        .stage_generation(&cli.generation)
        .context("failed to stage generation directory")?;
    for id in 0..cli.organisms {
        let morphology = demo_morphology(id);
        simulation
            .encode_morphology(&mut generation, &morphology, "org", id, cli.step_size)
            .with_context(|| format!("failed to encode organism {id}"))?;
    }
    info!(
        organisms = cli.organisms,
        path = %generation.path().display(),
        "generation staged"
    );

    let options = RunOptions {
        timeout: cli.timeout_secs.map(Duration::from_secs),
        ..RunOptions::default()
    };
    match simulation
        .simulate_generation(&generation, &options)
        .context("simulation failed")?
    {
        GenerationOutcome::Completed { fitness, history } => {
            for (id, score) in &fitness {
                println!("org_{id}\t{score}");
            }
            info!(bytes = history.len(), "captured simulator history");
        }
        GenerationOutcome::TimedOut => {
            warn!("simulator run timed out");
            bail!("simulator did not finish within the configured timeout");
        }
        GenerationOutcome::Canceled => bail!("simulator run was canceled"),
    }
    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// A solid block of passive material with an actuated bottom slab, phase
/// shifted along x by the organism id so the demo robots differ.
fn demo_morphology(id: u32) -> Morphology {
    let mut morphology = Morphology::zeros((4, 4, 3));
    morphology.fill(1);
    let (nx, ny, _) = morphology.dim();
    for x in 0..nx {
        for y in 0..ny {
            if (x + id as usize) % 2 == 0 {
                morphology[[x, y, 0]] = 2;
            }
        }
    }
    morphology
}
