//! Homography-based pose estimation for planar targets.
//!
//! A square fiducial only gives four coplanar corners, which is the worst case for
//! EPnP. For those inputs the object points are expressed in their own plane frame,
//! a plane-to-image homography is estimated with the normalized DLT and the pose is
//! recovered from its first two columns.

use crate::camera::CameraModel;
use crate::ops::{principal_axes, project_to_so3};
use crate::pnp::{check_inputs, finalize, NumericTol, PnPError, PnPResult, PnPSolver};
use crate::refine::LMRefineParams;
use nalgebra::{DMatrix, Matrix3, Vector3};

/// Marker type for the planar homography solver.
pub struct PlanarPnP;

impl PnPSolver for PlanarPnP {
    type Param = PlanarParams;

    fn solve(
        world: &[[f64; 3]],
        image: &[[f64; 2]],
        camera: &CameraModel,
        params: &Self::Param,
    ) -> Result<PnPResult, PnPError> {
        check_inputs(world, image, 4)?;
        let undistorted = camera.undistort_points(image)?;
        let k = camera.intrinsics_matrix();
        let (r, t) = solve_planar(world, &undistorted, &k, params)?;
        finalize(world, &undistorted, &k, r, t, params.refine_lm.as_ref())
    }
}

/// Parameters controlling the planar solver.
#[derive(Debug, Clone)]
pub struct PlanarParams {
    /// Shared numeric tolerances.
    pub tol: NumericTol,
    /// Largest accepted ratio between the out-of-plane and the main spread of the points.
    pub planarity_tol: f64,
    /// Optional Levenberg–Marquardt refinement of the homography estimate.
    pub refine_lm: Option<LMRefineParams>,
}

impl Default for PlanarParams {
    fn default() -> Self {
        Self {
            tol: NumericTol::default(),
            planarity_tol: crate::PLANARITY_TOL,
            refine_lm: Some(LMRefineParams::default()),
        }
    }
}

/// Solve the pose of a planar object on undistorted pixel coordinates.
///
/// Returns the rotation **object → camera** and the translation.
pub fn solve_planar(
    points_world: &[[f64; 3]],
    points_image: &[[f64; 2]],
    k: &Matrix3<f64>,
    params: &PlanarParams,
) -> Result<(Matrix3<f64>, Vector3<f64>), PnPError> {
    check_inputs(points_world, points_image, 4)?;

    let (c, axes) = principal_axes(points_world);
    if axes[0].0 <= f64::EPSILON || axes[1].0 <= 1e-6 * axes[0].0 {
        return Err(PnPError::DegenerateConfiguration(
            "object points are coincident or collinear",
        ));
    }
    if axes[2].0 > params.planarity_tol * axes[0].0 {
        return Err(PnPError::DegenerateConfiguration("object points are not planar"));
    }

    // rows of rp are the plane frame axes, so q = rp * (p - c) has q.z ~ 0
    let e1 = axes[0].1;
    let e2 = axes[1].1;
    let e3 = e1.cross(&e2);
    let rp = Matrix3::from_rows(&[e1.transpose(), e2.transpose(), e3.transpose()]);

    let plane: Vec<[f64; 2]> = points_world
        .iter()
        .map(|p| {
            let q = rp * (Vector3::from(*p) - c);
            [q.x, q.y]
        })
        .collect();

    let k_inv = k
        .try_inverse()
        .ok_or_else(|| PnPError::DecompositionFailed("singular intrinsics".to_string()))?;
    let normalized: Vec<[f64; 2]> = points_image
        .iter()
        .map(|uv| {
            let x = k_inv * Vector3::new(uv[0], uv[1], 1.0);
            [x.x / x.z, x.y / x.z]
        })
        .collect();

    let h = homography_dlt(&plane, &normalized, params.tol.svd)?;
    let (r_plane, t_plane) = decompose_homography(&h)?;

    let r = r_plane * rp;
    let t = t_plane - r * c;
    Ok((r, t))
}

/// Hartley normalization: centroid at origin, mean distance sqrt(2).
fn normalization_transform(pts: &[[f64; 2]]) -> Matrix3<f64> {
    let n = pts.len() as f64;
    let (mx, my) = pts
        .iter()
        .fold((0.0, 0.0), |(sx, sy), p| (sx + p[0], sy + p[1]));
    let (mx, my) = (mx / n, my / n);
    let mean_dist = pts
        .iter()
        .map(|p| ((p[0] - mx).powi(2) + (p[1] - my).powi(2)).sqrt())
        .sum::<f64>()
        / n;
    let s = if mean_dist > f64::EPSILON {
        std::f64::consts::SQRT_2 / mean_dist
    } else {
        1.0
    };
    Matrix3::new(s, 0.0, -s * mx, 0.0, s, -s * my, 0.0, 0.0, 1.0)
}

fn apply_h(h: &Matrix3<f64>, p: &[f64; 2]) -> [f64; 2] {
    let v = h * Vector3::new(p[0], p[1], 1.0);
    [v.x / v.z, v.y / v.z]
}

/// Direct linear transform estimate of `dst ~ H * src`.
fn homography_dlt(src: &[[f64; 2]], dst: &[[f64; 2]], tol: f64) -> Result<Matrix3<f64>, PnPError> {
    let ts = normalization_transform(src);
    let td = normalization_transform(dst);

    let n = src.len();
    // thin SVD only yields the null vector when A has at least 9 rows
    let rows = (2 * n).max(9);
    let mut a = DMatrix::<f64>::zeros(rows, 9);
    for (i, (s, d)) in src.iter().zip(dst).enumerate() {
        let [x, y] = apply_h(&ts, s);
        let [u, v] = apply_h(&td, d);
        let r0 = 2 * i;
        let r1 = r0 + 1;
        a[(r0, 0)] = -x;
        a[(r0, 1)] = -y;
        a[(r0, 2)] = -1.0;
        a[(r0, 6)] = u * x;
        a[(r0, 7)] = u * y;
        a[(r0, 8)] = u;
        a[(r1, 3)] = -x;
        a[(r1, 4)] = -y;
        a[(r1, 5)] = -1.0;
        a[(r1, 6)] = v * x;
        a[(r1, 7)] = v * y;
        a[(r1, 8)] = v;
    }

    let svd = a.svd(false, true);
    let v_t = svd
        .v_t
        .ok_or_else(|| PnPError::DecompositionFailed("homography SVD".to_string()))?;
    let mut order: Vec<usize> = (0..svd.singular_values.len()).collect();
    order.sort_by(|&a, &b| svd.singular_values[a].total_cmp(&svd.singular_values[b]));
    let (min_idx, next_idx) = match order.as_slice() {
        [first, second, ..] => (*first, *second),
        _ => {
            return Err(PnPError::DecompositionFailed(
                "empty homography system".to_string(),
            ))
        }
    };
    if svd.singular_values[next_idx] <= tol {
        return Err(PnPError::DegenerateConfiguration(
            "homography is not uniquely determined",
        ));
    }

    let row = v_t.row(min_idx);
    let hn = Matrix3::new(
        row[0], row[1], row[2], row[3], row[4], row[5], row[6], row[7], row[8],
    );

    let td_inv = td
        .try_inverse()
        .ok_or_else(|| PnPError::DecompositionFailed("normalization transform".to_string()))?;
    Ok(td_inv * hn * ts)
}

/// Pose of the plane frame from a homography on normalized image coordinates.
fn decompose_homography(h: &Matrix3<f64>) -> Result<(Matrix3<f64>, Vector3<f64>), PnPError> {
    let h1 = h.column(0).into_owned();
    let h2 = h.column(1).into_owned();
    let h3 = h.column(2).into_owned();

    let norm = (h1.norm() * h2.norm()).sqrt();
    if norm <= f64::EPSILON {
        return Err(PnPError::DecompositionFailed(
            "degenerate homography columns".to_string(),
        ));
    }
    let mut s = 1.0 / norm;
    // the plane origin must lie in front of the camera
    if h3.z * s < 0.0 {
        s = -s;
    }

    let r1 = h1 * s;
    let r2 = h2 * s;
    let r3 = r1.cross(&r2);
    let r = project_to_so3(&Matrix3::from_columns(&[r1, r2, r3]));
    Ok((r, h3 * s))
}
