use std::path::PathBuf;

use crate::body::Label;

/// Errors raised by the fusion engine and its runner.
#[derive(Debug, thiserror::Error)]
pub enum FusionError {
    /// Two bodies claim the same marker corner.
    #[error("label {label} is claimed by both body {first} and body {second}")]
    DuplicateLabel {
        /// The ambiguous label.
        label: Label,
        /// Index of the body that registered the label first.
        first: usize,
        /// Index of the body that registered it again.
        second: usize,
    },

    /// The reference body index does not name a body.
    #[error("reference body {reference} is out of range for {num_bodies} bodies")]
    InvalidReference {
        /// Requested reference body.
        reference: usize,
        /// Number of configured bodies.
        num_bodies: usize,
    },

    /// The number of observations does not match the number of cameras.
    #[error("expected one observation per camera ({expected}), got {actual}")]
    ObservationCountMismatch {
        /// Number of cameras.
        expected: usize,
        /// Number of observations handed in.
        actual: usize,
    },

    /// A resolved path breaks the alternating body/camera structure of the graph.
    #[error("malformed path: {0}")]
    MalformedPath(String),

    /// The worker thread could not be started.
    #[error("failed to spawn fusion worker: {0}")]
    Spawn(#[from] std::io::Error),

    /// The worker thread panicked.
    #[error("fusion worker panicked")]
    WorkerPanicked,
}

/// Errors raised by a [`PoseSolver`](crate::solver::PoseSolver).
#[derive(Debug, thiserror::Error)]
pub enum SolveError {
    /// Not enough correspondences for the solver.
    #[error("solver needs at least {required} correspondences, got {actual}")]
    TooFewCorrespondences {
        /// Solver minimum.
        required: usize,
        /// Correspondences handed in.
        actual: usize,
    },

    /// The underlying PnP solver failed.
    #[error(transparent)]
    PnP(#[from] retinas_pnp::PnPError),
}

/// Errors raised while loading or validating a rig description.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file could not be read or written.
    #[error("{path}: {source}")]
    Io {
        /// File being accessed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The document is not valid JSON for a rig.
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// A camera has unusable intrinsics.
    #[error("camera {name}: {source}")]
    Camera {
        /// Camera name.
        name: String,
        /// Underlying error.
        #[source]
        source: retinas_pnp::CameraError,
    },

    /// A body description is invalid.
    #[error("body {name}: {reason}")]
    Body {
        /// Body name.
        name: String,
        /// What is wrong with it.
        reason: String,
    },

    /// The rig cannot be turned into an engine.
    #[error(transparent)]
    Fusion(#[from] FusionError),
}
