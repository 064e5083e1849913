#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]
//!
//! Every frame, each camera reports the marker corners it sees. The engine groups
//! them per (camera, body) pair, solves a PnP problem for every pair with enough
//! points, and links bodies and cameras in a bipartite observation graph. Poses are
//! then chained along the shortest path from a reference body, whose frame is the
//! world frame.
//!
//! # Example
//!
//! ```
//! use retinas::{Body, Camera, FusionConfig, FusionEngine, Pose, Scene, SyntheticSource};
//! use retinas::source::DetectionSource;
//! use nalgebra::{Point3, Vector3};
//!
//! let bodies = vec![
//!     Body::new("floor").with_marker(0, 0.2, &Pose::identity()),
//!     Body::new("box").with_marker(1, 0.1, &Pose::identity()),
//! ];
//! let box_pose = Pose::from_rodrigues(&Vector3::new(0.0, 0.0, 0.3), &Vector3::new(0.3, 0.1, 0.0));
//! let scene = Scene::new(bodies.clone(), vec![Pose::identity(), box_pose]);
//!
//! let camera = Camera::pinhole("top", 800.0, 800.0, 640.0, 480.0);
//! let eye = Pose::look_at(&Point3::new(0.1, -0.4, 1.2), &Point3::origin(), &Vector3::z()).unwrap();
//! let mut source = SyntheticSource::new(scene, camera.model.clone(), eye);
//!
//! let mut engine = FusionEngine::new(bodies, vec![camera], FusionConfig::default()).unwrap();
//! let estimate = engine.process(&[source.observe()]).unwrap();
//!
//! assert!(estimate.poses.body(1).unwrap().approx_eq(&box_pose, 1e-6));
//! assert!(estimate.poses.camera(0).unwrap().approx_eq(&eye, 1e-6));
//! ```

/// Grouping of detections into (camera, body) correspondences.
pub mod aggregate;

/// Rigid bodies and their labelled marker corners.
pub mod body;

/// Named cameras.
pub mod camera;

/// Chaining edge transforms along a path.
pub mod compose;

pub mod config;

pub mod engine;

/// Error types.
pub mod error;

pub mod graph;

/// Convex hull of image points.
pub mod hull;

/// Rigid transforms.
pub mod pose;

/// Cycle rate counter.
pub mod rate;

pub mod runner;

/// Pair scoring.
pub mod score;

pub mod solver;

pub mod source;

pub use aggregate::{Correspondences, PairKey};
pub use body::{marker_corners, Body, Label, LabelTable};
pub use camera::Camera;
pub use config::{FusionConfig, RigConfig, SolverConfig, SolverMethod};
pub use engine::{EdgeReport, FrameEstimate, FusionEngine, WorldPoses};
pub use error::{ConfigError, FusionError, SolveError};
pub use graph::{Node, ObservationEdge, ObservationGraph, PathPolicy};
pub use pose::Pose;
pub use runner::{PoseBoard, Runner, RunnerOptions};
pub use score::{confidence, PairScorer, DEFAULT_STRENGTH};
pub use solver::{PinholeReprojector, PnPPoseSolver, PoseSolver, Reprojector};
pub use source::{DetectionSource, Observation, Scene, StaticSource, SyntheticSource};
