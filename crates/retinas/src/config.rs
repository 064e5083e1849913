//! Engine settings and JSON rig descriptions.

use std::fs;
use std::path::Path;

use nalgebra::{Point3, Vector3};
use retinas_pnp::CameraModel;
use serde::{Deserialize, Serialize};

use crate::body::{Body, Label};
use crate::camera::Camera;
use crate::engine::FusionEngine;
use crate::error::ConfigError;
use crate::graph::PathPolicy;
use crate::pose::Pose;
use crate::runner::RunnerOptions;
use crate::score::DEFAULT_STRENGTH;

/// Which PnP algorithm the default solver runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SolverMethod {
    /// Homography solver for coplanar points, EPnP otherwise.
    #[default]
    Auto,
    /// Always EPnP.
    EPnP,
    /// Always the planar homography solver.
    Planar,
}

/// Settings of the default pose solver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    /// Algorithm selection.
    pub method: SolverMethod,
    /// Whether to polish the linear estimate with Levenberg–Marquardt.
    pub refine: bool,
    /// Maximum number of refinement iterations.
    pub max_iterations: usize,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            method: SolverMethod::Auto,
            refine: true,
            max_iterations: 20,
        }
    }
}

/// Engine knobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    /// Index of the body whose frame is the world frame.
    pub reference_body: usize,
    /// Strength constant `k` of the confidence score.
    pub strength: f64,
    /// How paths from the reference body are selected.
    pub path_policy: PathPolicy,
    /// Default solver settings.
    pub solver: SolverConfig,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            reference_body: 0,
            strength: DEFAULT_STRENGTH,
            path_policy: PathPolicy::HopCount,
            solver: SolverConfig::default(),
        }
    }
}

/// A square marker placed on a body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkerConfig {
    /// Marker identifier.
    pub id: u32,
    /// Side length in body units.
    pub size: f64,
    /// Rodrigues rotation of the marker frame in the body frame.
    #[serde(default)]
    pub rotation: [f64; 3],
    /// Position of the marker centre in the body frame.
    #[serde(default)]
    pub translation: [f64; 3],
}

impl MarkerConfig {
    /// Marker frame to body frame.
    pub fn placement(&self) -> Pose {
        Pose::from_rodrigues(&Vector3::from(self.rotation), &Vector3::from(self.translation))
    }
}

/// A single labelled point given explicitly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointConfig {
    /// Label of the point.
    #[serde(flatten)]
    pub label: Label,
    /// Body-frame coordinate.
    pub position: [f64; 3],
}

/// Geometry of one body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BodyConfig {
    /// Human readable name.
    pub name: String,
    /// Square markers on the body.
    #[serde(default)]
    pub markers: Vec<MarkerConfig>,
    /// Explicit labelled points.
    #[serde(default)]
    pub points: Vec<PointConfig>,
}

impl BodyConfig {
    /// Build the body geometry.
    pub fn build(&self) -> Result<Body, ConfigError> {
        let invalid = |reason: String| ConfigError::Body {
            name: self.name.clone(),
            reason,
        };

        let mut body = Body::new(self.name.clone());
        for marker in &self.markers {
            if !(marker.size.is_finite() && marker.size > 0.0) {
                return Err(invalid(format!(
                    "marker {} has invalid size {}",
                    marker.id, marker.size
                )));
            }
            body.insert_marker(marker.id, marker.size, &marker.placement());
        }
        for point in &self.points {
            if body.point(&point.label).is_some() {
                return Err(invalid(format!("label {} is defined twice", point.label)));
            }
            body = body.with_point(point.label, Point3::from(point.position));
        }
        if body.is_empty() {
            return Err(invalid("no markers or points".to_string()));
        }
        Ok(body)
    }
}

/// A camera entry of the rig.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraConfig {
    /// Human readable name.
    pub name: String,
    /// Intrinsics and optional distortion.
    #[serde(flatten)]
    pub model: CameraModel,
}

/// Full description of a rig: cameras, bodies and engine settings.
///
/// ```json
/// {
///   "cameras": [
///     { "name": "left", "intrinsics": { "fx": 900, "fy": 900, "cx": 640, "cy": 360 } }
///   ],
///   "bodies": [
///     { "name": "world", "markers": [{ "id": 0, "size": 0.16 }] }
///   ],
///   "reference_body": 0,
///   "strength": 1.0,
///   "path_policy": "hop_count"
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RigConfig {
    /// Cameras, in source order.
    pub cameras: Vec<CameraConfig>,
    /// Bodies; the reference body is the world frame.
    pub bodies: Vec<BodyConfig>,
    /// Engine settings.
    #[serde(flatten)]
    pub fusion: FusionConfig,
    /// Worker loop settings.
    #[serde(default)]
    pub runner: RunnerOptions,
}

impl RigConfig {
    /// Load a JSON rig description from disk.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&raw)
    }

    /// Parse a JSON rig description.
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Write this rig to disk as pretty JSON.
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Build and validate all bodies.
    pub fn build_bodies(&self) -> Result<Vec<Body>, ConfigError> {
        self.bodies.iter().map(BodyConfig::build).collect()
    }

    /// Build and validate all cameras.
    pub fn build_cameras(&self) -> Result<Vec<Camera>, ConfigError> {
        self.cameras
            .iter()
            .map(|c| {
                c.model
                    .intrinsics
                    .validate()
                    .map_err(|source| ConfigError::Camera {
                        name: c.name.clone(),
                        source,
                    })?;
                Ok(Camera::new(c.name.clone(), c.model.clone()))
            })
            .collect()
    }

    /// Build a fusion engine with the default solver.
    pub fn build_engine(&self) -> Result<FusionEngine, ConfigError> {
        let bodies = self.build_bodies()?;
        let cameras = self.build_cameras()?;
        Ok(FusionEngine::new(bodies, cameras, self.fusion.clone())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const RIG: &str = r#"{
        "cameras": [
            { "name": "left", "intrinsics": { "fx": 900.0, "fy": 900.0, "cx": 640.0, "cy": 360.0 } },
            {
                "name": "right",
                "intrinsics": { "fx": 910.0, "fy": 905.0, "cx": 630.0, "cy": 355.0 },
                "distortion": { "k1": -0.1, "k2": 0.01 }
            }
        ],
        "bodies": [
            { "name": "world", "markers": [{ "id": 0, "size": 0.2 }] },
            {
                "name": "wand",
                "markers": [{ "id": 4, "size": 0.05, "translation": [0.0, 0.0, 0.1] }],
                "points": [{ "marker_id": 100, "corner": 0, "position": [0.0, 0.3, 0.0] }]
            }
        ],
        "strength": 2.0,
        "path_policy": "confidence",
        "solver": { "method": "epnp", "refine": false }
    }"#;

    #[test]
    fn test_parse_rig() -> Result<(), ConfigError> {
        let rig = RigConfig::from_json_str(RIG)?;
        assert_eq!(rig.cameras.len(), 2);
        assert!(rig.cameras[0].model.distortion.is_none());
        assert_eq!(
            rig.cameras[1].model.distortion.map(|d| d.k1),
            Some(-0.1)
        );
        assert_eq!(rig.fusion.reference_body, 0);
        assert_eq!(rig.fusion.strength, 2.0);
        assert_eq!(rig.fusion.path_policy, PathPolicy::Confidence);
        assert_eq!(rig.fusion.solver.method, SolverMethod::EPnP);
        assert!(!rig.fusion.solver.refine);
        assert_eq!(rig.fusion.solver.max_iterations, 20);
        assert_eq!(rig.runner, RunnerOptions::default());

        let bodies = rig.build_bodies()?;
        assert_eq!(bodies[0].len(), 4);
        assert_eq!(bodies[1].len(), 5);
        let corner = bodies[1].point(&Label::new(4, 2)).unwrap();
        assert_relative_eq!(*corner, Point3::new(0.025, -0.025, 0.1), epsilon = 1e-12);
        Ok(())
    }

    #[test]
    fn test_build_engine() -> Result<(), ConfigError> {
        let engine = RigConfig::from_json_str(RIG)?.build_engine()?;
        assert_eq!(engine.num_bodies(), 2);
        assert_eq!(engine.num_cameras(), 2);
        Ok(())
    }

    #[test]
    fn test_rejects_bad_marker_and_intrinsics() -> Result<(), ConfigError> {
        let mut rig = RigConfig::from_json_str(RIG)?;
        rig.bodies[1].markers[0].size = 0.0;
        assert!(matches!(rig.build_bodies(), Err(ConfigError::Body { .. })));

        let mut rig = RigConfig::from_json_str(RIG)?;
        rig.cameras[0].model.intrinsics.fx = -1.0;
        assert!(matches!(rig.build_cameras(), Err(ConfigError::Camera { .. })));

        let mut rig = RigConfig::from_json_str(RIG)?;
        rig.bodies[1].markers[0].id = 0;
        assert!(matches!(rig.build_engine(), Err(ConfigError::Fusion(_))));
        Ok(())
    }

    #[test]
    fn test_json_file_roundtrip() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("rig.json");
        let rig = RigConfig::from_json_str(RIG)?;
        rig.write_json(&path)?;
        let back = RigConfig::from_json_file(&path)?;
        assert_eq!(rig, back);

        let missing = RigConfig::from_json_file(dir.path().join("missing.json"));
        assert!(matches!(missing, Err(ConfigError::Io { .. })));
        Ok(())
    }
}
