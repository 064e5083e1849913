//! The per-frame fusion pipeline.
//!
//! aggregate -> score -> build graph -> resolve paths -> compose poses

use std::collections::BTreeMap;

use serde::Serialize;

use crate::aggregate::{aggregate, Correspondences, PairKey};
use crate::body::{Body, LabelTable};
use crate::camera::Camera;
use crate::compose::compose_path;
use crate::config::FusionConfig;
use crate::error::FusionError;
use crate::graph::{Node, ObservationGraph};
use crate::pose::Pose;
use crate::score::PairScorer;
use crate::solver::{PinholeReprojector, PnPPoseSolver, PoseSolver, Reprojector};
use crate::source::Observation;

/// World poses of every body and camera for one frame.
///
/// Poses are expressed in the frame of the reference body. `None` means the node
/// could not be connected to an observed reference body this frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorldPoses {
    /// Frame counter of the engine, starting at 1 for the first processed frame.
    pub frame: u64,
    /// Body poses by body index.
    pub bodies: Vec<Option<Pose>>,
    /// Camera poses by camera index.
    pub cameras: Vec<Option<Pose>>,
}

impl WorldPoses {
    /// Poses with every node unknown.
    pub fn unknown(frame: u64, num_bodies: usize, num_cameras: usize) -> Self {
        Self {
            frame,
            bodies: vec![None; num_bodies],
            cameras: vec![None; num_cameras],
        }
    }

    /// Pose of a body, if known.
    pub fn body(&self, index: usize) -> Option<&Pose> {
        self.bodies.get(index).and_then(Option::as_ref)
    }

    /// Pose of a camera, if known.
    pub fn camera(&self, index: usize) -> Option<&Pose> {
        self.cameras.get(index).and_then(Option::as_ref)
    }

    /// Pose of any node, if known.
    pub fn get(&self, node: Node) -> Option<&Pose> {
        match node {
            Node::Body(i) => self.body(i),
            Node::Camera(j) => self.camera(j),
        }
    }

    /// Number of nodes with a known pose.
    pub fn num_known(&self) -> usize {
        self.bodies.iter().chain(&self.cameras).filter(|p| p.is_some()).count()
    }
}

/// Evidence behind one observation edge.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EdgeReport {
    /// Camera index.
    pub camera: usize,
    /// Body index.
    pub body: usize,
    /// Number of correspondences.
    pub correspondences: usize,
    /// Convex-hull area of the image points.
    pub area: f64,
    /// Root of the summed squared reprojection residuals.
    pub error: f64,
    /// Confidence score.
    pub score: f64,
}

/// Everything the engine computed for one frame.
#[derive(Debug, Clone)]
pub struct FrameEstimate {
    /// Resolved world poses.
    pub poses: WorldPoses,
    /// Number of raw detections over all cameras.
    pub detections: usize,
    /// Surviving edges in ascending (camera, body) order.
    pub edges: Vec<EdgeReport>,
    /// Selected path from the reference body to every reachable node.
    pub paths: BTreeMap<Node, Vec<Node>>,
}

/// Turns per-camera observations into world poses, one frame at a time.
///
/// The engine is stateless across frames apart from its frame counter: every call to
/// [`FusionEngine::process`] rebuilds the observation graph from scratch.
pub struct FusionEngine<S = PnPPoseSolver, R = PinholeReprojector> {
    bodies: Vec<Body>,
    cameras: Vec<Camera>,
    labels: LabelTable,
    config: FusionConfig,
    scorer: PairScorer<S, R>,
    frame: u64,
}

impl FusionEngine {
    /// Create an engine with the default solver and reprojector.
    pub fn new(
        bodies: Vec<Body>,
        cameras: Vec<Camera>,
        config: FusionConfig,
    ) -> Result<Self, FusionError> {
        let solver = PnPPoseSolver::new(&config.solver);
        Self::with_collaborators(bodies, cameras, config, solver, PinholeReprojector)
    }
}

impl<S: PoseSolver, R: Reprojector> FusionEngine<S, R> {
    /// Create an engine with a custom solver and reprojector.
    ///
    /// Fails when two bodies share a label or the reference body does not exist.
    pub fn with_collaborators(
        bodies: Vec<Body>,
        cameras: Vec<Camera>,
        config: FusionConfig,
        solver: S,
        reprojector: R,
    ) -> Result<Self, FusionError> {
        if config.reference_body >= bodies.len() {
            return Err(FusionError::InvalidReference {
                reference: config.reference_body,
                num_bodies: bodies.len(),
            });
        }
        let labels = LabelTable::build(&bodies)?;
        let scorer = PairScorer::new(solver, reprojector, config.strength);
        log::debug!(
            "fusion engine with {} bodies, {} cameras, {} labels",
            bodies.len(),
            cameras.len(),
            labels.len()
        );
        Ok(Self {
            bodies,
            cameras,
            labels,
            config,
            scorer,
            frame: 0,
        })
    }

    /// Configured bodies.
    pub fn bodies(&self) -> &[Body] {
        &self.bodies
    }

    /// Configured cameras.
    pub fn cameras(&self) -> &[Camera] {
        &self.cameras
    }

    /// Number of bodies.
    pub fn num_bodies(&self) -> usize {
        self.bodies.len()
    }

    /// Number of cameras.
    pub fn num_cameras(&self) -> usize {
        self.cameras.len()
    }

    /// Engine settings.
    pub fn config(&self) -> &FusionConfig {
        &self.config
    }

    /// Number of frames processed so far.
    pub fn frame(&self) -> u64 {
        self.frame
    }

    /// Group detections into (camera, body) correspondences.
    pub fn aggregate(&self, observations: &[Observation]) -> BTreeMap<PairKey, Correspondences> {
        aggregate(observations, &self.labels)
    }

    /// Score every pair and build this frame's observation graph.
    pub fn build_graph(&self, pairs: &BTreeMap<PairKey, Correspondences>) -> ObservationGraph {
        let edges = pairs.iter().filter_map(|(key, correspondences)| {
            let body = self.bodies.get(key.body)?;
            let camera = self.cameras.get(key.camera)?;
            self.scorer.score(*key, correspondences, body, camera)
        });
        ObservationGraph::new(self.bodies.len(), self.cameras.len(), edges)
    }

    /// Resolve paths from the reference body and compose world poses.
    ///
    /// Nothing resolves while no camera observes the reference body.
    pub fn resolve(
        &self,
        graph: &ObservationGraph,
    ) -> Result<(Vec<Option<Pose>>, Vec<Option<Pose>>, BTreeMap<Node, Vec<Node>>), FusionError>
    {
        let mut bodies = vec![None; self.bodies.len()];
        let mut cameras = vec![None; self.cameras.len()];

        // an unobserved reference anchors nothing, itself included
        let reference = Node::Body(self.config.reference_body);
        if graph.neighbors(reference).is_empty() {
            log::debug!("reference body {reference} not observed");
            return Ok((bodies, cameras, BTreeMap::new()));
        }
        let paths = graph.shortest_paths(reference, self.config.path_policy);
        for (node, path) in &paths {
            let pose = compose_path(path, reference, graph)?;
            let slot = match *node {
                Node::Body(i) => bodies.get_mut(i),
                Node::Camera(j) => cameras.get_mut(j),
            };
            match slot {
                Some(slot) => *slot = Some(pose),
                None => {
                    return Err(FusionError::MalformedPath(format!(
                        "path ends at unknown node {node}"
                    )))
                }
            }
        }
        Ok((bodies, cameras, paths))
    }

    /// Run the full pipeline on one observation per camera.
    pub fn process(&mut self, observations: &[Observation]) -> Result<FrameEstimate, FusionError> {
        if observations.len() != self.cameras.len() {
            return Err(FusionError::ObservationCountMismatch {
                expected: self.cameras.len(),
                actual: observations.len(),
            });
        }
        self.frame += 1;

        let detections = observations.iter().map(Observation::len).sum();
        let pairs = self.aggregate(observations);
        let graph = self.build_graph(&pairs);
        let (bodies, cameras, paths) = self.resolve(&graph)?;

        let edges: Vec<EdgeReport> = graph
            .edges()
            .map(|e| EdgeReport {
                camera: e.camera,
                body: e.body,
                correspondences: e.correspondences,
                area: e.area,
                error: e.error,
                score: e.score,
            })
            .collect();

        log::debug!(
            "frame {}: {detections} detections, {} pairs, {} edges, {} of {} nodes resolved",
            self.frame,
            pairs.len(),
            edges.len(),
            paths.len(),
            self.bodies.len() + self.cameras.len()
        );

        Ok(FrameEstimate {
            poses: WorldPoses {
                frame: self.frame,
                bodies,
                cameras,
            },
            detections,
            edges,
            paths,
        })
    }
}
