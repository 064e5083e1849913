#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]
//!
//! # Retinas PnP (Perspective-n-Point)
//!
//! Camera pose estimation from 2D-3D point correspondences for calibrated cameras.
//!
//! ## Key Features
//!
//! - **EPnP Algorithm**: Efficient Perspective-n-Point solver for general point sets
//! - **Planar Targets**: Homography based solver for coplanar points such as square tags
//! - **Distortion Handling**: Brown-Conrady undistortion before solving
//! - **LM Refinement**: Optional Levenberg–Marquardt polishing of the linear estimate
//!
//! ## Example
//!
//! ```rust
//! use retinas_pnp::{solve_pnp, CameraIntrinsics, CameraModel, PnPMethod};
//!
//! // corners of a 10cm square tag
//! let world_points = vec![
//!     [-0.05, 0.05, 0.0],
//!     [0.05, 0.05, 0.0],
//!     [0.05, -0.05, 0.0],
//!     [-0.05, -0.05, 0.0],
//! ];
//!
//! // the same tag seen head-on one meter away
//! let image_points = vec![
//!     [280.0, 280.0],
//!     [360.0, 280.0],
//!     [360.0, 200.0],
//!     [280.0, 200.0],
//! ];
//!
//! let camera = CameraModel::pinhole(CameraIntrinsics::new(800.0, 800.0, 320.0, 240.0));
//!
//! let result = solve_pnp(&world_points, &image_points, &camera, PnPMethod::default())?;
//!
//! println!("Rotation: {:?}", result.rotation);
//! println!("Translation: {:?}", result.translation);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

/// Camera intrinsics, lens distortion and projection.
pub mod camera;

/// Efficient Perspective-n-Point (EPnP) solver implementation.
///
/// A fast and accurate method for computing camera pose from 2D-3D correspondences.
pub mod epnp;

/// Homography based solver for coplanar object points.
pub mod planar;

/// Common data types and traits for PnP solvers.
///
/// Defines the interface and result types shared across different PnP algorithms.
pub mod pnp;

/// Levenberg–Marquardt refinement of an initial pose.
pub mod refine;

mod ops;

pub use camera::{CameraError, CameraIntrinsics, CameraModel, PolynomialDistortion};
pub use epnp::{EPnP, EPnPParams};
pub use planar::{PlanarPnP, PlanarParams};
pub use pnp::{NumericTol, PnPError, PnPResult, PnPSolver};
pub use refine::{refine_pose_lm, LMRefineParams, LMRefineResult};

use nalgebra::{Matrix3, Vector3};

/// Ratio between the out-of-plane and the main spread under which points count as planar.
pub const PLANARITY_TOL: f64 = 1e-3;

/// Enumeration of the Perspective-n-Point algorithms available in this crate.
#[derive(Debug, Clone)]
pub enum PnPMethod {
    /// Efficient PnP solver with a user-supplied parameter object.
    EPnP(EPnPParams),
    /// Planar homography solver.
    Planar(PlanarParams),
    /// Planar solver for coplanar points, EPnP otherwise.
    Auto {
        /// Parameters used when the points span three dimensions.
        epnp: EPnPParams,
        /// Parameters used when the points are coplanar.
        planar: PlanarParams,
    },
}

impl Default for PnPMethod {
    fn default() -> Self {
        Self::Auto {
            epnp: EPnPParams::default(),
            planar: PlanarParams::default(),
        }
    }
}

/// Dispatch function that routes to the chosen PnP solver.
pub fn solve_pnp(
    world: &[[f64; 3]],
    image: &[[f64; 2]],
    camera: &CameraModel,
    method: PnPMethod,
) -> Result<PnPResult, PnPError> {
    // the planarity test decomposes the points too
    pnp::check_finite(world, image)?;
    match method {
        PnPMethod::EPnP(params) => EPnP::solve(world, image, camera, &params),
        PnPMethod::Planar(params) => PlanarPnP::solve(world, image, camera, &params),
        PnPMethod::Auto { epnp, planar } => {
            if is_planar(world, planar.planarity_tol) {
                PlanarPnP::solve(world, image, camera, &planar)
            } else {
                EPnP::solve(world, image, camera, &epnp)
            }
        }
    }
}

/// Whether the points lie (close to) a single plane.
///
/// Fewer than three points, or any non-finite coordinate, are never considered planar.
pub fn is_planar(world: &[[f64; 3]], tol: f64) -> bool {
    if world.len() < 3 || !world.iter().flatten().all(|v| v.is_finite()) {
        return false;
    }
    let (_, axes) = ops::principal_axes(world);
    axes[0].0 > f64::EPSILON && axes[2].0 <= tol * axes[0].0
}

/// Project object points into the (distorted) image of a camera with pose `(r, t)`.
///
/// Points behind the camera yield `None`.
pub fn project_points(
    world: &[[f64; 3]],
    rotation: &Matrix3<f64>,
    translation: &Vector3<f64>,
    camera: &CameraModel,
) -> Vec<Option<[f64; 2]>> {
    world
        .iter()
        .map(|p| camera.project(&(rotation * Vector3::from(*p) + translation)))
        .collect()
}
