//! Continuous fusion on a worker thread.
//!
//! The [`Runner`] owns a [`FusionEngine`] and the camera sources. Each cycle it
//! polls every source once, runs the engine and swaps the result into a shared
//! [`PoseBoard`]. Readers only ever see complete snapshots.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::engine::{FusionEngine, WorldPoses};
use crate::error::FusionError;
use crate::rate::CycleRate;
use crate::solver::{PoseSolver, Reprojector};
use crate::source::{DetectionSource, Observation};

/// Worker loop settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerOptions {
    /// Minimum duration of one cycle in milliseconds. `None` runs as fast as the
    /// sources allow.
    pub min_period_ms: Option<u64>,
    /// Stop after this many frames. `None` runs until stopped.
    pub max_frames: Option<u64>,
}

impl RunnerOptions {
    /// Throttle the loop to at most one cycle per `period`.
    pub fn with_min_period(mut self, period: Duration) -> Self {
        self.min_period_ms = Some(period.as_millis().try_into().unwrap_or(u64::MAX));
        self
    }

    /// Stop after `frames` frames.
    pub fn with_max_frames(mut self, frames: u64) -> Self {
        self.max_frames = Some(frames);
        self
    }

    /// Minimum cycle duration, if any.
    pub fn min_period(&self) -> Option<Duration> {
        self.min_period_ms.map(Duration::from_millis)
    }
}

#[derive(Debug)]
struct Published {
    poses: Arc<WorldPoses>,
    hz: f64,
}

/// The latest published world poses.
///
/// Shared between the worker, which replaces the snapshot once per cycle, and any
/// number of readers.
#[derive(Debug)]
pub struct PoseBoard {
    latest: RwLock<Published>,
}

impl PoseBoard {
    /// A board holding `initial` until the first publication.
    pub fn new(initial: WorldPoses) -> Self {
        Self {
            latest: RwLock::new(Published {
                poses: Arc::new(initial),
                hz: 0.0,
            }),
        }
    }

    /// Replace the current snapshot.
    pub fn publish(&self, poses: WorldPoses, hz: f64) {
        let poses = Arc::new(poses);
        let mut latest = self.latest.write();
        latest.poses = poses;
        latest.hz = hz;
    }

    /// The most recent snapshot.
    pub fn snapshot(&self) -> Arc<WorldPoses> {
        Arc::clone(&self.latest.read().poses)
    }

    /// Smoothed publication rate in Hz, zero before the first cycle.
    pub fn cycles_per_second(&self) -> f64 {
        self.latest.read().hz
    }
}

/// Handle to a running fusion worker.
///
/// Dropping the handle stops the worker and waits for it.
pub struct Runner {
    board: Arc<PoseBoard>,
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<Result<(), FusionError>>>,
}

impl Runner {
    /// Start a worker that fuses `sources` (one per camera, in camera order).
    pub fn spawn<S, R>(
        mut engine: FusionEngine<S, R>,
        mut sources: Vec<Box<dyn DetectionSource>>,
        options: RunnerOptions,
    ) -> Result<Self, FusionError>
    where
        S: PoseSolver + Send + 'static,
        R: Reprojector + Send + 'static,
    {
        if sources.len() != engine.num_cameras() {
            return Err(FusionError::ObservationCountMismatch {
                expected: engine.num_cameras(),
                actual: sources.len(),
            });
        }

        let board = Arc::new(PoseBoard::new(WorldPoses::unknown(
            engine.frame(),
            engine.num_bodies(),
            engine.num_cameras(),
        )));
        let shutdown = Arc::new(AtomicBool::new(false));

        let handle = thread::Builder::new()
            .name("retinas-fusion".to_string())
            .spawn({
                let board = Arc::clone(&board);
                let shutdown = Arc::clone(&shutdown);
                move || run(&mut engine, &mut sources, &options, &board, &shutdown)
            })?;

        Ok(Self {
            board,
            shutdown,
            handle: Some(handle),
        })
    }

    /// Shared board with the latest poses.
    pub fn board(&self) -> Arc<PoseBoard> {
        Arc::clone(&self.board)
    }

    /// The cooperative shutdown flag, e.g. for a signal handler.
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Whether the worker has exited.
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Ask the worker to stop and wait for it.
    pub fn stop(mut self) -> Result<(), FusionError> {
        self.shutdown.store(true, Ordering::SeqCst);
        self.join_worker()
    }

    /// Wait for the worker to exit on its own, e.g. after `max_frames`.
    pub fn join(mut self) -> Result<(), FusionError> {
        self.join_worker()
    }

    fn join_worker(&mut self) -> Result<(), FusionError> {
        match self.handle.take() {
            Some(handle) => handle.join().map_err(|_| FusionError::WorkerPanicked)?,
            None => Ok(()),
        }
    }
}

impl Drop for Runner {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Err(err) = self.join_worker() {
            log::error!("fusion worker: {err}");
        }
    }
}

fn run<S: PoseSolver, R: Reprojector>(
    engine: &mut FusionEngine<S, R>,
    sources: &mut [Box<dyn DetectionSource>],
    options: &RunnerOptions,
    board: &PoseBoard,
    shutdown: &AtomicBool,
) -> Result<(), FusionError> {
    log::info!(
        "fusion worker started: {} cameras, {} bodies",
        engine.num_cameras(),
        engine.num_bodies()
    );
    let mut rate = CycleRate::new();

    while !shutdown.load(Ordering::SeqCst) {
        if options.max_frames.is_some_and(|max| engine.frame() >= max) {
            break;
        }
        let started = Instant::now();

        let observations: Vec<Observation> = sources.iter_mut().map(|s| s.observe()).collect();
        let estimate = match engine.process(&observations) {
            Ok(estimate) => estimate,
            Err(err) => {
                log::error!("fusion cycle {} aborted: {err}", engine.frame());
                return Err(err);
            }
        };
        rate.tick();
        board.publish(estimate.poses, rate.hz());

        if let Some(period) = options.min_period() {
            let elapsed = started.elapsed();
            if elapsed < period {
                thread::sleep(period - elapsed);
            }
        }
    }

    log::info!(
        "fusion worker stopped after {} frames ({:.1} Hz)",
        engine.frame(),
        rate.hz()
    );
    Ok(())
}
