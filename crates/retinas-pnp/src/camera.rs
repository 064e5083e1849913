//! Camera models and distortion handling for PnP solvers.
use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error types for camera operations.
#[derive(Debug, Error)]
pub enum CameraError {
    /// Invalid camera intrinsics matrix
    #[error("Invalid camera intrinsics matrix: {0}")]
    InvalidIntrinsics(String),

    /// Failed to undistort point
    #[error("Failed to undistort point: {0}")]
    UndistortFailed(String),
}

/// Result type for camera operations.
pub type CameraResult<T> = Result<T, CameraError>;

/// Represents the intrinsic parameters of a pinhole camera.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraIntrinsics {
    /// Focal length in x direction
    pub fx: f64,
    /// Focal length in y direction
    pub fy: f64,
    /// Principal point x coordinate
    pub cx: f64,
    /// Principal point y coordinate
    pub cy: f64,
}

impl CameraIntrinsics {
    /// Create camera intrinsics from focal lengths and principal point.
    pub fn new(fx: f64, fy: f64, cx: f64, cy: f64) -> Self {
        Self { fx, fy, cx, cy }
    }

    /// Convert to 3x3 intrinsics matrix.
    pub fn to_matrix(&self) -> Matrix3<f64> {
        Matrix3::new(self.fx, 0.0, self.cx, 0.0, self.fy, self.cy, 0.0, 0.0, 1.0)
    }

    /// Validate that focal lengths are positive and finite.
    pub fn validate(&self) -> CameraResult<()> {
        let finite = [self.fx, self.fy, self.cx, self.cy]
            .iter()
            .all(|v| v.is_finite());
        if !finite || self.fx <= 0.0 || self.fy <= 0.0 {
            return Err(CameraError::InvalidIntrinsics(format!(
                "focal lengths must be positive and finite, got fx={} fy={}",
                self.fx, self.fy
            )));
        }
        Ok(())
    }
}

/// Represents polynomial distortion parameters using the Brown-Conrady model.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
#[allow(missing_docs)]
pub struct PolynomialDistortion {
    /// Radial distortion coefficients
    pub k1: f64,
    pub k2: f64,
    pub k3: f64,
    pub k4: f64,
    pub k5: f64,
    pub k6: f64,
    /// Tangential distortion coefficients
    pub p1: f64,
    pub p2: f64,
}

impl PolynomialDistortion {
    /// Create distortion parameters with only first two radial coefficients.
    pub fn radial(k1: f64, k2: f64) -> Self {
        Self {
            k1,
            k2,
            ..Self::default()
        }
    }

    /// Check if there is any distortion.
    pub fn has_distortion(&self) -> bool {
        [
            self.k1, self.k2, self.k3, self.k4, self.k5, self.k6, self.p1, self.p2,
        ]
        .iter()
        .any(|&c| c != 0.0)
    }

    /// Apply the distortion model to normalized image coordinates.
    fn apply(&self, x: f64, y: f64) -> (f64, f64) {
        let r2 = x * x + y * y;
        let r4 = r2 * r2;
        let r6 = r4 * r2;

        let kr = (1.0 + self.k1 * r2 + self.k2 * r4 + self.k3 * r6)
            / (1.0 + self.k4 * r2 + self.k5 * r4 + self.k6 * r6);

        let xy_2 = 2.0 * x * y;
        let xd = x * kr + xy_2 * self.p1 + self.p2 * (r2 + 2.0 * x * x);
        let yd = y * kr + self.p1 * (r2 + 2.0 * y * y) + xy_2 * self.p2;
        (xd, yd)
    }
}

/// A complete camera model with intrinsics and optional distortion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraModel {
    /// Camera intrinsics
    pub intrinsics: CameraIntrinsics,
    /// Distortion parameters (None for no distortion)
    #[serde(default)]
    pub distortion: Option<PolynomialDistortion>,
}

impl CameraModel {
    /// Create a camera model without distortion.
    pub fn pinhole(intrinsics: CameraIntrinsics) -> Self {
        Self {
            intrinsics,
            distortion: None,
        }
    }

    /// Create a camera model with distortion.
    pub fn with_distortion(intrinsics: CameraIntrinsics, distortion: PolynomialDistortion) -> Self {
        Self {
            intrinsics,
            distortion: Some(distortion),
        }
    }

    /// Check if the camera has distortion.
    pub fn has_distortion(&self) -> bool {
        self.distortion.as_ref().is_some_and(|d| d.has_distortion())
    }

    /// Get the intrinsics matrix for use with the linear solvers.
    pub fn intrinsics_matrix(&self) -> Matrix3<f64> {
        self.intrinsics.to_matrix()
    }

    /// Project a point expressed in the camera frame to (distorted) pixel coordinates.
    ///
    /// Returns `None` when the point lies on or behind the image plane.
    pub fn project(&self, pc: &Vector3<f64>) -> Option<[f64; 2]> {
        if pc.z <= 0.0 {
            return None;
        }
        let x = pc.x / pc.z;
        let y = pc.y / pc.z;
        let (xd, yd) = match &self.distortion {
            Some(d) => d.apply(x, y),
            None => (x, y),
        };
        let CameraIntrinsics { fx, fy, cx, cy } = self.intrinsics;
        Some([fx * xd + cx, fy * yd + cy])
    }

    /// Undistort a point using iterative method.
    pub fn undistort_point(&self, x: f64, y: f64) -> CameraResult<(f64, f64)> {
        match &self.distortion {
            Some(distortion) if distortion.has_distortion() => {
                self.undistort_point_iterative(x, y, distortion)
            }
            _ => Ok((x, y)),
        }
    }

    /// Undistort multiple points.
    pub fn undistort_points(&self, points: &[[f64; 2]]) -> CameraResult<Vec<[f64; 2]>> {
        points
            .iter()
            .map(|&[x, y]| self.undistort_point(x, y).map(|(ux, uy)| [ux, uy]))
            .collect()
    }

    /// Iterative undistortion using the Brown-Conrady model.
    fn undistort_point_iterative(
        &self,
        x_distorted: f64,
        y_distorted: f64,
        distortion: &PolynomialDistortion,
    ) -> CameraResult<(f64, f64)> {
        const MAX_ITERATIONS: usize = 20;
        const EPSILON: f64 = 1e-12;

        let CameraIntrinsics { fx, fy, cx, cy } = self.intrinsics;

        // normalize coordinates
        let x = (x_distorted - cx) / fx;
        let y = (y_distorted - cy) / fy;

        let mut xu = x;
        let mut yu = y;

        for _ in 0..MAX_ITERATIONS {
            let (xd, yd) = distortion.apply(xu, yu);
            let dx = x - xd;
            let dy = y - yd;
            xu += dx;
            yu += dy;
            if dx.abs() < EPSILON && dy.abs() < EPSILON {
                break;
            }
        }

        if !xu.is_finite() || !yu.is_finite() {
            return Err(CameraError::UndistortFailed(format!(
                "iteration diverged for ({x_distorted}, {y_distorted})"
            )));
        }

        Ok((fx * xu + cx, fy * yu + cy))
    }
}

impl Default for CameraModel {
    fn default() -> Self {
        Self::pinhole(CameraIntrinsics::new(1000.0, 1000.0, 640.0, 480.0))
    }
}
