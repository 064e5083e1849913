use retinas_pnp::{CameraIntrinsics, CameraModel, PolynomialDistortion};
use serde::{Deserialize, Serialize};

/// A calibrated sensing node of the rig.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Camera {
    /// Human readable name.
    pub name: String,
    /// Intrinsics and lens distortion.
    #[serde(flatten)]
    pub model: CameraModel,
}

impl Camera {
    /// Create a camera from a full model.
    pub fn new(name: impl Into<String>, model: CameraModel) -> Self {
        Self {
            name: name.into(),
            model,
        }
    }

    /// Create an undistorted pinhole camera.
    pub fn pinhole(name: impl Into<String>, fx: f64, fy: f64, cx: f64, cy: f64) -> Self {
        Self::new(name, CameraModel::pinhole(CameraIntrinsics::new(fx, fy, cx, cy)))
    }

    /// Attach Brown-Conrady distortion coefficients.
    pub fn with_distortion(mut self, distortion: PolynomialDistortion) -> Self {
        self.model.distortion = Some(distortion);
        self
    }
}
