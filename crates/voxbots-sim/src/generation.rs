//! Per-generation staging directories.
//!
//! A generation directory is ephemeral: it is wiped on staging, filled with
//! one settings snapshot plus one descriptor per organism, handed to the
//! simulator, and eventually reused. Staging the same path from two callers
//! at once is not supported; callers must serialize per directory name.

use crate::settings::SimulationSettings;
use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

/// Name of the shared settings snapshot inside a generation directory.
pub const BASE_SETTINGS_FILE: &str = "base.vxa";
/// Name of the simulator's output report inside a generation directory.
pub const REPORT_FILE: &str = "results.xml";

/// Filesystem failures while preparing a generation directory.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("failed to create generation directory {path}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to wipe generation directory {path}")]
    Wipe {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to write settings snapshot {path}")]
    WriteSettings {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// A staged generation directory and the descriptor ids written into it.
///
/// The id set is what ties the simulator's report back to the organisms
/// actually staged; report records with no matching descriptor are treated
/// as parse failures rather than silently dropped.
#[derive(Debug)]
pub struct GenerationDir {
    path: PathBuf,
    descriptor_ids: BTreeSet<String>,
}

impl GenerationDir {
    /// Resolve `root/name`, wipe any residue from a prior generation, and
    /// write the shared settings snapshot.
    pub fn stage(
        root: &Path,
        name: &str,
        settings: &SimulationSettings,
    ) -> Result<Self, StageError> {
        let joined = root.join(name);
        fs::create_dir_all(&joined).map_err(|source| StageError::CreateDir {
            path: joined.clone(),
            source,
        })?;
        let path = joined.canonicalize().map_err(|source| StageError::CreateDir {
            path: joined.clone(),
            source,
        })?;
        wipe_directory(&path).map_err(|source| StageError::Wipe {
            path: path.clone(),
            source,
        })?;
        let settings_path = path.join(BASE_SETTINGS_FILE);
        settings
            .write_vxa(&settings_path)
            .map_err(|source| StageError::WriteSettings {
                path: settings_path,
                source,
            })?;
        info!(path = %path.display(), "staged generation directory");
        Ok(Self {
            path,
            descriptor_ids: BTreeSet::new(),
        })
    }

    /// Absolute path of the staged directory.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Ids of every descriptor written into this generation so far.
    pub fn descriptor_ids(&self) -> &BTreeSet<String> {
        &self.descriptor_ids
    }

    pub(crate) fn record_descriptor(&mut self, id: u32) {
        self.descriptor_ids.insert(id.to_string());
    }
}

/// Recursively delete every file and subdirectory under `path`, leaving the
/// directory itself in place. A no-op on an already-empty directory.
fn wipe_directory(path: &Path) -> io::Result<()> {
    let mut removed = 0usize;
    for entry in fs::read_dir(path)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            fs::remove_dir_all(entry.path())?;
        } else {
            fs::remove_file(entry.path())?;
        }
        removed += 1;
    }
    if removed > 0 {
        debug!(path = %path.display(), removed, "wiped stale generation entries");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::SimulationSettings;
    use tempfile::tempdir;

    fn settings() -> SimulationSettings {
        SimulationSettings::with_default_materials(0.5, 2.0).expect("settings")
    }

    fn entries(path: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(path)
            .expect("read dir")
            .map(|e| e.expect("entry").file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn staging_writes_only_the_settings_snapshot() {
        let root = tempdir().expect("tempdir");
        let generation = GenerationDir::stage(root.path(), "gen_0000", &settings()).expect("stage");
        assert_eq!(entries(generation.path()), vec![BASE_SETTINGS_FILE.to_string()]);
        assert!(generation.descriptor_ids().is_empty());
    }

    #[test]
    fn restaging_removes_prior_files_and_subdirectories() {
        let root = tempdir().expect("tempdir");
        let first = GenerationDir::stage(root.path(), "gen_0001", &settings()).expect("stage");
        fs::write(first.path().join("stale_0.vxd"), b"stale").expect("write stale");
        let nested = first.path().join("nested");
        fs::create_dir(&nested).expect("mkdir");
        fs::write(nested.join("deep.txt"), b"deep").expect("write deep");

        let second = GenerationDir::stage(root.path(), "gen_0001", &settings()).expect("restage");
        assert_eq!(entries(second.path()), vec![BASE_SETTINGS_FILE.to_string()]);
    }

    #[test]
    fn wiping_an_empty_directory_is_a_noop() {
        let root = tempdir().expect("tempdir");
        let empty = root.path().join("empty");
        fs::create_dir(&empty).expect("mkdir");
        wipe_directory(&empty).expect("wipe");
        assert!(entries(&empty).is_empty());
    }
}
