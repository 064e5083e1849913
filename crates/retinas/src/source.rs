//! Detection sources feeding the fusion engine.
//!
//! A source stands for one camera and its marker detector. The engine polls every
//! source once per cycle for its latest detections; a source with nothing to report
//! returns an empty [`Observation`].

use std::collections::BTreeSet;
use std::sync::Arc;

use nalgebra::Point2;
use parking_lot::RwLock;
use rand::{rngs::StdRng, Rng, SeedableRng};
use retinas_pnp::CameraModel;

use crate::body::{Body, Label};
use crate::pose::Pose;

/// Labelled image points detected by one camera in one frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Observation {
    /// Corner labels, one per point.
    pub labels: Vec<Label>,
    /// Pixel coordinates, one per label.
    pub points: Vec<Point2<f64>>,
}

impl Observation {
    /// An observation without detections.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Append one detection.
    pub fn push(&mut self, label: Label, point: Point2<f64>) {
        self.labels.push(label);
        self.points.push(point);
    }

    /// Number of detections.
    pub fn len(&self) -> usize {
        self.labels.len().min(self.points.len())
    }

    /// Whether there are no detections.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Detections as `(label, point)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&Label, &Point2<f64>)> {
        self.labels.iter().zip(&self.points)
    }
}

impl FromIterator<(Label, Point2<f64>)> for Observation {
    fn from_iter<I: IntoIterator<Item = (Label, Point2<f64>)>>(iter: I) -> Self {
        let (labels, points) = iter.into_iter().unzip();
        Self { labels, points }
    }
}

/// Produces the latest detections of one camera.
pub trait DetectionSource: Send {
    /// Detections of the most recent frame, empty when no frame is available.
    fn observe(&mut self) -> Observation;
}

/// A source that replays the same observation on every call.
#[derive(Debug, Clone, Default)]
pub struct StaticSource {
    observation: Observation,
}

impl StaticSource {
    /// Create a source that always reports `observation`.
    pub fn new(observation: Observation) -> Self {
        Self { observation }
    }
}

impl DetectionSource for StaticSource {
    fn observe(&mut self) -> Observation {
        self.observation.clone()
    }
}

/// Ground-truth world poses of a set of bodies, shared between synthetic cameras.
#[derive(Debug)]
pub struct Scene {
    bodies: Vec<Body>,
    poses: RwLock<Vec<Pose>>,
}

impl Scene {
    /// Create a scene where body `i` sits at `poses[i]` (body frame to world frame).
    pub fn new(bodies: Vec<Body>, poses: Vec<Pose>) -> Arc<Self> {
        Arc::new(Self {
            bodies,
            poses: RwLock::new(poses),
        })
    }

    /// Move a body. Out of range indices are ignored.
    pub fn set_pose(&self, body: usize, pose: Pose) {
        if let Some(slot) = self.poses.write().get_mut(body) {
            *slot = pose;
        }
    }

    /// Current world pose of a body.
    pub fn pose(&self, body: usize) -> Option<Pose> {
        self.poses.read().get(body).copied()
    }

    /// Bodies of the scene.
    pub fn bodies(&self) -> &[Body] {
        &self.bodies
    }
}

/// Renders the markers of a [`Scene`] through a camera model.
///
/// Stands in for a live camera plus detector: every call projects all body points
/// into the image, drops those behind the camera or outside the image, and adds
/// uniform pixel noise.
pub struct SyntheticSource {
    scene: Arc<Scene>,
    camera: CameraModel,
    camera_pose: Pose,
    image_size: Option<(f64, f64)>,
    noise_px: f64,
    rng: StdRng,
    dropout: Option<(u64, u64)>,
    hidden: BTreeSet<u32>,
    frame: u64,
}

impl SyntheticSource {
    /// A noiseless camera at `camera_pose` (camera frame to world frame).
    pub fn new(scene: Arc<Scene>, camera: CameraModel, camera_pose: Pose) -> Self {
        Self {
            scene,
            camera,
            camera_pose,
            image_size: None,
            noise_px: 0.0,
            rng: StdRng::seed_from_u64(0),
            dropout: None,
            hidden: BTreeSet::new(),
            frame: 0,
        }
    }

    /// Discard points outside a `width x height` image.
    pub fn with_image_size(mut self, width: f64, height: f64) -> Self {
        self.image_size = Some((width, height));
        self
    }

    /// Add uniform noise in `[-noise_px, noise_px]` to every coordinate.
    pub fn with_noise(mut self, noise_px: f64, seed: u64) -> Self {
        self.noise_px = noise_px.abs();
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Report nothing for `length` frames out of every `period`.
    pub fn with_dropout(mut self, period: u64, length: u64) -> Self {
        self.dropout = (period > 0).then_some((period, length));
        self
    }

    /// Never report the corners of `marker_id`.
    pub fn hide_marker(mut self, marker_id: u32) -> Self {
        self.hidden.insert(marker_id);
        self
    }

    /// Ground-truth pose of this camera.
    pub fn camera_pose(&self) -> &Pose {
        &self.camera_pose
    }

    fn in_image(&self, uv: &[f64; 2]) -> bool {
        match self.image_size {
            Some((w, h)) => uv[0] >= 0.0 && uv[1] >= 0.0 && uv[0] < w && uv[1] < h,
            None => true,
        }
    }

    fn jitter(&mut self) -> f64 {
        if self.noise_px > 0.0 {
            self.rng.random_range(-self.noise_px..=self.noise_px)
        } else {
            0.0
        }
    }
}

impl DetectionSource for SyntheticSource {
    fn observe(&mut self) -> Observation {
        let frame = self.frame;
        self.frame += 1;
        if let Some((period, length)) = self.dropout {
            if frame % period < length {
                return Observation::empty();
            }
        }

        let world_to_camera = self.camera_pose.inverse();
        let poses = self.scene.poses.read().clone();
        let scene = Arc::clone(&self.scene);

        let mut observation = Observation::empty();
        for (body, body_pose) in scene.bodies.iter().zip(&poses) {
            let body_to_camera = world_to_camera * *body_pose;
            for (label, point) in body.points() {
                if self.hidden.contains(&label.marker_id) {
                    continue;
                }
                let pc = body_to_camera.transform_point(point);
                let Some(uv) = self.camera.project(&pc.coords) else {
                    continue;
                };
                if !self.in_image(&uv) {
                    continue;
                }
                let u = uv[0] + self.jitter();
                let v = uv[1] + self.jitter();
                observation.push(*label, Point2::new(u, v));
            }
        }
        observation
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::{Point3, Vector3};

    fn scene() -> Arc<Scene> {
        let bodies = vec![
            Body::new("board").with_marker(0, 0.2, &Pose::identity()),
            Body::new("cube").with_marker(1, 0.1, &Pose::identity()),
        ];
        let poses = vec![
            Pose::identity(),
            Pose::from_rodrigues(&Vector3::zeros(), &Vector3::new(0.3, 0.0, 0.0)),
        ];
        Scene::new(bodies, poses)
    }

    fn overhead_camera() -> Pose {
        Pose::look_at(
            &Point3::new(0.0, -0.5, 1.0),
            &Point3::origin(),
            &Vector3::z(),
        )
        .unwrap()
    }

    #[test]
    fn test_observation_from_iter() {
        let obs: Observation = [
            (Label::new(1, 0), Point2::new(1.0, 2.0)),
            (Label::new(1, 1), Point2::new(3.0, 4.0)),
        ]
        .into_iter()
        .collect();
        assert_eq!(obs.len(), 2);
        assert_eq!(obs.iter().nth(1), Some((&Label::new(1, 1), &Point2::new(3.0, 4.0))));
    }

    #[test]
    fn test_synthetic_source_projects_all_corners() {
        let camera = CameraModel::default();
        let mut source = SyntheticSource::new(scene(), camera.clone(), overhead_camera());
        let obs = source.observe();
        assert_eq!(obs.len(), 8);

        // first label is corner 0 of marker 0, check against a direct projection
        let pc = overhead_camera()
            .inverse()
            .transform_point(&Point3::new(-0.1, 0.1, 0.0));
        let uv = camera.project(&pc.coords).unwrap();
        assert_eq!(obs.labels[0], Label::new(0, 0));
        assert_relative_eq!(obs.points[0], Point2::new(uv[0], uv[1]), epsilon = 1e-12);
    }

    #[test]
    fn test_synthetic_source_dropout_and_hidden() {
        let mut source = SyntheticSource::new(scene(), CameraModel::default(), overhead_camera())
            .with_dropout(3, 1)
            .hide_marker(1);
        let counts: Vec<usize> = (0..6).map(|_| source.observe().len()).collect();
        assert_eq!(counts, vec![0, 4, 4, 0, 4, 4]);
    }

    #[test]
    fn test_synthetic_source_noise_is_bounded() {
        let camera = CameraModel::default();
        let mut clean = SyntheticSource::new(scene(), camera.clone(), overhead_camera());
        let mut noisy =
            SyntheticSource::new(scene(), camera, overhead_camera()).with_noise(0.5, 42);
        let (a, b) = (clean.observe(), noisy.observe());
        assert_eq!(a.labels, b.labels);
        for (pa, pb) in a.points.iter().zip(&b.points) {
            assert!((pa - pb).amax() <= 0.5 + 1e-12);
        }
    }

    #[test]
    fn test_scene_set_pose() {
        let scene = scene();
        let moved = Pose::from_rodrigues(&Vector3::zeros(), &Vector3::new(0.0, 0.0, 5.0));
        scene.set_pose(1, moved);
        scene.set_pose(9, moved);
        assert_eq!(scene.pose(1), Some(moved));
        assert_eq!(scene.pose(9), None);
    }
}
