//! Common data types shared across Perspective-n-Point (PnP) solvers.

use crate::camera::CameraModel;
use crate::ops::{all_in_front, rmse_px, rotation_to_rvec, rvec_to_rotation};
use crate::refine::{refine_pose_lm, LMRefineParams};
use nalgebra::{Matrix3, Vector3};
use thiserror::Error;

/// Error types for PnP solvers.
#[derive(Debug, Error)]
pub enum PnPError {
    /// Invalid input data - insufficient correspondences for the specific solver
    #[error("PnP solver requires at least {required} 2D-3D correspondences, got {actual}")]
    InsufficientCorrespondences {
        /// Minimum number of correspondences required by the solver
        required: usize,
        /// Actual number of correspondences provided
        actual: usize,
    },

    /// Invalid input data - mismatched array lengths with descriptive labels.
    #[error("Mismatched array lengths: {left_name} ({left_len}) != {right_name} ({right_len})")]
    MismatchedArrayLengths {
        /// Label for the left-hand slice
        left_name: &'static str,
        /// Length of the left-hand slice
        left_len: usize,
        /// Label for the right-hand slice
        right_name: &'static str,
        /// Length of the right-hand slice
        right_len: usize,
    },

    /// A coordinate is NaN or infinite.
    #[error("Non-finite {name} at index {index}")]
    NonFiniteInput {
        /// Which slice holds the value
        name: &'static str,
        /// Position of the offending point
        index: usize,
    },

    /// The object points do not span enough dimensions for the solver.
    #[error("Degenerate point configuration: {0}")]
    DegenerateConfiguration(&'static str),

    /// Singular value or eigen decomposition failed
    #[error("Decomposition failed: {0}")]
    DecompositionFailed(String),

    /// The recovered pose places points behind the camera or is not finite.
    #[error("Invalid pose: {0}")]
    InvalidPose(&'static str),

    /// Camera model error
    #[error("Camera model error: {0}")]
    CameraError(#[from] crate::camera::CameraError),
}

/// Numeric tolerances used by linear algebra routines throughout the PnP pipeline.
#[derive(Debug, Clone)]
pub struct NumericTol {
    /// Tolerance for singular-value decomposition.
    pub svd: f64,
    /// Epsilon threshold for determinant / singular-value checks when deciding whether to fall back to a pseudo-inverse.
    pub eps: f64,
}

impl Default for NumericTol {
    fn default() -> Self {
        Self {
            svd: 1e-12,
            eps: 1e-12,
        }
    }
}

/// Result returned by any PnP solver.
///
/// The rotation matrix maps coordinates from the **object** frame to the
/// **camera** frame: `p_cam = rotation * p_obj + translation`.
#[derive(Debug, Clone)]
pub struct PnPResult {
    /// Estimated rotation matrix.
    pub rotation: Matrix3<f64>,
    /// Estimated translation vector.
    pub translation: Vector3<f64>,
    /// Rodrigues axis-angle representation of the rotation.
    pub rvec: Vector3<f64>,
    /// Root-mean-square reprojection error in pixels (if computed).
    pub reproj_rmse: Option<f64>,
    /// Number of iterations taken (if applicable).
    pub num_iterations: Option<usize>,
    /// Whether the solver converged (if applicable).
    pub converged: Option<bool>,
}

/// Trait for PnP solvers.
pub trait PnPSolver {
    /// Solver-specific parameters.
    type Param;

    /// Solve for camera pose given 2D-3D correspondences.
    ///
    /// # Arguments
    /// * `world` – 3-D coordinates in the object frame.
    /// * `image` – Corresponding pixel coordinates (may be distorted).
    /// * `camera` – Camera model with intrinsics and optional distortion.
    /// * `params` – Solver-specific parameters.
    fn solve(
        world: &[[f64; 3]],
        image: &[[f64; 2]],
        camera: &CameraModel,
        params: &Self::Param,
    ) -> Result<PnPResult, PnPError>;
}

pub(crate) fn check_inputs(
    world: &[[f64; 3]],
    image: &[[f64; 2]],
    required: usize,
) -> Result<(), PnPError> {
    if world.len() != image.len() {
        return Err(PnPError::MismatchedArrayLengths {
            left_name: "world points",
            left_len: world.len(),
            right_name: "image points",
            right_len: image.len(),
        });
    }
    if world.len() < required {
        return Err(PnPError::InsufficientCorrespondences {
            required,
            actual: world.len(),
        });
    }
    check_finite(world, image)
}

/// Reject NaN and infinite coordinates, which the decompositions cannot digest.
pub(crate) fn check_finite(world: &[[f64; 3]], image: &[[f64; 2]]) -> Result<(), PnPError> {
    if let Some(index) = world.iter().position(|p| !p.iter().all(|v| v.is_finite())) {
        return Err(PnPError::NonFiniteInput {
            name: "world point",
            index,
        });
    }
    if let Some(index) = image.iter().position(|p| !p.iter().all(|v| v.is_finite())) {
        return Err(PnPError::NonFiniteInput {
            name: "image point",
            index,
        });
    }
    Ok(())
}

/// Optionally polish a linear estimate with LM and validate the final pose.
pub(crate) fn finalize(
    world: &[[f64; 3]],
    image: &[[f64; 2]],
    k: &Matrix3<f64>,
    rotation: Matrix3<f64>,
    translation: Vector3<f64>,
    refine: Option<&LMRefineParams>,
) -> Result<PnPResult, PnPError> {
    let mut rotation = rotation;
    let mut translation = translation;
    let mut rmse = rmse_px(world, image, &rotation, &translation, k);
    let mut num_iterations = None;
    let mut converged = None;

    if let Some(lm) = refine {
        let res = refine_pose_lm(world, image, k, rotation_to_rvec(&rotation), translation, lm)?;
        // keep the linear estimate if LM made things worse
        if res.rmse.is_finite() && res.rmse <= rmse {
            rotation = rvec_to_rotation(&res.rvec);
            translation = res.translation;
            rmse = res.rmse;
            num_iterations = Some(res.num_iterations);
            converged = Some(res.converged);
        }
    }

    let finite = rotation.iter().chain(translation.iter()).all(|v| v.is_finite());
    if !finite || !rmse.is_finite() {
        return Err(PnPError::InvalidPose("non-finite pose estimate"));
    }
    if !all_in_front(world, &rotation, &translation) {
        log::debug!("rejecting pose with object points behind the camera");
        return Err(PnPError::InvalidPose("object points behind the camera"));
    }

    Ok(PnPResult {
        rotation,
        translation,
        rvec: rotation_to_rvec(&rotation),
        reproj_rmse: Some(rmse),
        num_iterations,
        converged,
    })
}
