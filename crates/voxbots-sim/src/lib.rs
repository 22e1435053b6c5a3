//! Simulation orchestration for evolved voxel soft-body robots.
//!
//! This crate is the contract layer between an evolutionary loop and an
//! external voxel-physics simulator. It stages a generation directory with
//! one shared settings snapshot and one descriptor per organism, runs the
//! simulator executable over the directory, and parses the resulting report
//! into per-organism fitness. It does not interpret the physics, retry
//! failed runs, or schedule the compute device the simulator claims.
//!
//! A generation directory moves through a fixed lifecycle: staged empty,
//! populated with descriptors, handed to the simulator, then parsed once
//! the report file exists. Restaging under the same name wipes every trace
//! of the previous generation.

pub mod generation;
pub mod morphology;
pub mod report;
pub mod runner;
pub mod settings;

pub use generation::{BASE_SETTINGS_FILE, GenerationDir, REPORT_FILE, StageError};
pub use morphology::{
    DescriptorReadError, EncodeError, Morphology, encode_morphology, read_descriptor,
};
pub use report::{FitnessReport, ReportError, parse_report};
pub use runner::{CancelToken, RunError, RunOptions, RunOutcome, run_simulation};
pub use settings::{
    ConfigError, MAX_MATERIALS, Material, MaterialPalette, Rgba, SimulationSettings,
    ThermalSettings,
};

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Umbrella error for callers driving a whole generation cycle.
#[derive(Debug, Error)]
pub enum SimulationError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Encode(#[from] EncodeError),
    #[error(transparent)]
    Stage(#[from] StageError),
    #[error(transparent)]
    Run(#[from] RunError),
    #[error(transparent)]
    Report(#[from] ReportError),
}

/// Outcome of simulating one staged generation.
#[derive(Debug)]
pub enum GenerationOutcome {
    /// The simulator finished and its report parsed cleanly.
    Completed {
        fitness: FitnessReport,
        /// Raw simulator output, suitable for diagnostics or visualization.
        history: String,
    },
    /// The run outlived the configured timeout and was killed.
    TimedOut,
    /// The run was canceled through the token and killed.
    Canceled,
}

/// Orchestrates staging, execution, and result retrieval for one simulator
/// installation and one settings snapshot.
#[derive(Debug)]
pub struct Simulation {
    exec_path: PathBuf,
    worker_path: PathBuf,
    storage_root: PathBuf,
    settings: SimulationSettings,
}

impl Simulation {
    /// Bind a simulator executable, its node worker, and a storage root to
    /// a settings snapshot.
    pub fn new(
        exec_path: impl Into<PathBuf>,
        worker_path: impl Into<PathBuf>,
        storage_root: impl Into<PathBuf>,
        settings: SimulationSettings,
    ) -> Self {
        Self {
            exec_path: exec_path.into(),
            worker_path: worker_path.into(),
            storage_root: storage_root.into(),
            settings,
        }
    }

    pub fn settings(&self) -> &SimulationSettings {
        &self.settings
    }

    pub fn storage_root(&self) -> &Path {
        &self.storage_root
    }

    /// Stage a clean generation directory under the storage root.
    pub fn stage_generation(&self, name: &str) -> Result<GenerationDir, StageError> {
        GenerationDir::stage(&self.storage_root, name, &self.settings)
    }

    /// Encode one organism's morphology into a staged generation.
    pub fn encode_morphology(
        &self,
        generation: &mut GenerationDir,
        morphology: &Morphology,
        label: &str,
        id: u32,
        step_size: u32,
    ) -> Result<(), EncodeError> {
        encode_morphology(
            self.settings.palette(),
            generation,
            morphology,
            label,
            id,
            step_size,
        )?;
        Ok(())
    }

    /// Run the simulator over a fully staged generation and parse the
    /// report. Timeout and cancellation surface as non-completed outcomes;
    /// every failure mode keeps its own error type.
    pub fn simulate_generation(
        &self,
        generation: &GenerationDir,
        options: &RunOptions,
    ) -> Result<GenerationOutcome, SimulationError> {
        match run_simulation(&self.exec_path, &self.worker_path, generation, options)? {
            RunOutcome::Completed { history } => {
                let fitness = parse_report(generation)?;
                Ok(GenerationOutcome::Completed { fitness, history })
            }
            RunOutcome::TimedOut => Ok(GenerationOutcome::TimedOut),
            RunOutcome::Canceled => Ok(GenerationOutcome::Canceled),
        }
    }
}
