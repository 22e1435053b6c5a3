//! Invoking the external voxel-physics simulator over a staged generation.
//!
//! The simulator is an independently-versioned executable; the interchange
//! stays a directory of files on purpose. The child is spawned with the
//! four-argument contract
//! `<exec> -i <dir> -o <dir>/results.xml -w <worker> --force`, its combined
//! stdout and stderr are captured as the history log, and the call blocks
//! the caller until the child exits, the configured timeout elapses, or the
//! cancellation token fires.

use crate::generation::{GenerationDir, REPORT_FILE};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{info, warn};

/// Failures spawning or supervising the simulator process.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("failed to spawn simulator {path}")]
    Spawn {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to supervise simulator process: {0}")]
    Supervise(#[from] io::Error),
    #[error("simulator exited with {status}")]
    ProcessFailed { status: ExitStatus, history: String },
}

/// How a supervised simulator run ended.
#[derive(Debug)]
pub enum RunOutcome {
    /// The child exited successfully; `history` is its combined output.
    Completed { history: String },
    /// The configured timeout elapsed and the child was killed.
    TimedOut,
    /// The cancellation token fired and the child was killed.
    Canceled,
}

/// Shared flag for canceling an in-flight simulator run from another thread.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_canceled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Supervision options for one simulator run.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Kill the child once this much wall time has passed. `None` blocks
    /// until the child exits on its own.
    pub timeout: Option<Duration>,
    /// External cancellation signal checked between polls.
    pub cancel: Option<CancelToken>,
    /// How often to poll the child for exit, timeout, and cancellation.
    pub poll_interval: Duration,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            timeout: None,
            cancel: None,
            poll_interval: Duration::from_millis(50),
        }
    }
}

/// Run the simulator over a staged generation directory, blocking the
/// calling thread. A non-zero exit maps to [`RunError::ProcessFailed`]
/// before anyone looks at the report file.
pub fn run_simulation(
    exec_path: &Path,
    worker_path: &Path,
    generation: &GenerationDir,
    options: &RunOptions,
) -> Result<RunOutcome, RunError> {
    let report_path = generation.path().join(REPORT_FILE);
    info!(
        exec = %exec_path.display(),
        input = %generation.path().display(),
        "launching simulator"
    );
    let started = Instant::now();
    let mut child = Command::new(exec_path)
        .arg("-i")
        .arg(generation.path())
        .arg("-o")
        .arg(&report_path)
        .arg("-w")
        .arg(worker_path)
        .arg("--force")
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .stdin(Stdio::null())
        .spawn()
        .map_err(|source| RunError::Spawn {
            path: exec_path.to_path_buf(),
            source,
        })?;

    let stdout = drain_pipe(child.stdout.take());
    let stderr = drain_pipe(child.stderr.take());
    let deadline = options.timeout.map(|timeout| started + timeout);

    let status = loop {
        if let Some(status) = child.try_wait()? {
            break status;
        }
        if let Some(cancel) = &options.cancel {
            if cancel.is_canceled() {
                warn!("simulator run canceled; killing child");
                kill_child(&mut child);
                join_pipe(stdout);
                join_pipe(stderr);
                return Ok(RunOutcome::Canceled);
            }
        }
        if let Some(deadline) = deadline {
            if Instant::now() >= deadline {
                warn!(elapsed = ?started.elapsed(), "simulator run timed out; killing child");
                kill_child(&mut child);
                join_pipe(stdout);
                join_pipe(stderr);
                return Ok(RunOutcome::TimedOut);
            }
        }
        thread::sleep(options.poll_interval);
    };

    let mut history = String::from_utf8_lossy(&join_pipe(stdout)).into_owned();
    let stderr_text = join_pipe(stderr);
    if !stderr_text.is_empty() {
        history.push_str(&String::from_utf8_lossy(&stderr_text));
    }

    if !status.success() {
        return Err(RunError::ProcessFailed { status, history });
    }
    info!(elapsed = ?started.elapsed(), "simulator run completed");
    Ok(RunOutcome::Completed { history })
}

fn drain_pipe<R: Read + Send + 'static>(pipe: Option<R>) -> Option<JoinHandle<Vec<u8>>> {
    pipe.map(|mut reader| {
        thread::spawn(move || {
            let mut bytes = Vec::new();
            let _ = reader.read_to_end(&mut bytes);
            bytes
        })
    })
}

fn join_pipe(handle: Option<JoinHandle<Vec<u8>>>) -> Vec<u8> {
    handle
        .and_then(|handle| handle.join().ok())
        .unwrap_or_default()
}

fn kill_child(child: &mut Child) {
    if let Err(error) = child.kill() {
        warn!(%error, "failed to kill simulator child");
    }
    let _ = child.wait();
}
