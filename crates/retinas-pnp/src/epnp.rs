//! Efficient Perspective-n-Point (EPnP) solver
//! Paper: https://www.tugraz.at/fileadmin/user_upload/Institute/ICG/Images/team_lepetit/publications/lepetit_ijcv08.pdf
//! Reference: https://github.com/opencv/opencv/blob/4.x/modules/calib3d/src/epnp.cpp

use crate::camera::CameraModel;
use crate::ops::{principal_axes, project_to_so3, rmse_px};
use crate::pnp::{check_inputs, finalize, NumericTol, PnPError, PnPResult, PnPSolver};
use crate::refine::LMRefineParams;
use nalgebra::{DMatrix, DVector, Matrix3, Matrix4, Matrix6x4, SymmetricEigen, Vector3, Vector4, Vector6};

/// Marker type representing the Efficient PnP algorithm.
pub struct EPnP;

impl PnPSolver for EPnP {
    type Param = EPnPParams;

    fn solve(
        world: &[[f64; 3]],
        image: &[[f64; 2]],
        camera: &CameraModel,
        params: &Self::Param,
    ) -> Result<PnPResult, PnPError> {
        check_inputs(world, image, 4)?;
        let undistorted = camera.undistort_points(image)?;
        let k = camera.intrinsics_matrix();
        let (r, t) = solve_epnp(world, &undistorted, &k, params)?;
        finalize(world, &undistorted, &k, r, t, params.refine_lm.as_ref())
    }
}

/// Parameters controlling the EPnP solver.
#[derive(Debug, Clone)]
pub struct EPnPParams {
    /// Shared numeric tolerances.
    pub tol: NumericTol,
    /// Optional Levenberg–Marquardt refinement of the linear estimate.
    pub refine_lm: Option<LMRefineParams>,
}

impl Default for EPnPParams {
    fn default() -> Self {
        Self {
            tol: NumericTol::default(),
            refine_lm: Some(LMRefineParams::default()),
        }
    }
}

const CP_PAIRS: [(usize, usize); 6] = [(0, 1), (0, 2), (0, 3), (1, 2), (1, 3), (2, 3)];
const GAUSS_NEWTON_ITERS: usize = 5;

/// Solve Perspective-n-Point (EPnP) on undistorted pixel coordinates.
///
/// # Arguments
/// * `points_world` – 3-D coordinates in the object frame, shape *(N,3)* with `N≥4`.
/// * `points_image` – Corresponding undistorted pixel coordinates, shape *(N,2)*.
/// * `k` – Camera intrinsics matrix.
///
/// # Returns
/// The rotation **object → camera** and the translation.
pub fn solve_epnp(
    points_world: &[[f64; 3]],
    points_image: &[[f64; 2]],
    k: &Matrix3<f64>,
    params: &EPnPParams,
) -> Result<(Matrix3<f64>, Vector3<f64>), PnPError> {
    check_inputs(points_world, points_image, 4)?;

    let cw = select_control_points(points_world)?;
    let alphas = compute_barycentric(points_world, &cw, params.tol.eps)?;

    // null space of M from the four smallest eigenvectors of M^T M
    let m = build_m(&alphas, points_image, k);
    let mtm = m.transpose() * &m;
    let eig = SymmetricEigen::new(mtm);
    let mut order: Vec<usize> = (0..12).collect();
    order.sort_by(|&a, &b| eig.eigenvalues[a].total_cmp(&eig.eigenvalues[b]));

    // v[i][j]: control point j of the i-th null vector, i = 0 is the smallest
    let mut v = [[Vector3::<f64>::zeros(); 4]; 4];
    for (i, &col) in order.iter().take(4).enumerate() {
        let ev = eig.eigenvectors.column(col);
        for (j, cp) in v[i].iter_mut().enumerate() {
            *cp = Vector3::new(ev[3 * j], ev[3 * j + 1], ev[3 * j + 2]);
        }
    }

    let l = build_l6x10(&v);
    let rho = rho_ctrlpts(&cw);
    let rho_vec = DVector::from_column_slice(&rho);

    let candidates = [
        estimate_beta_n4(&l, &rho_vec, params.tol.svd),
        estimate_beta_n2(&l, &rho_vec, params.tol.svd),
        estimate_beta_n3(&l, &rho_vec, params.tol.svd),
    ];

    let mut best: Option<(f64, Matrix3<f64>, Vector3<f64>)> = None;
    for beta in candidates.into_iter().flatten() {
        let beta = gauss_newton(beta, &l, &rho);
        let Some((r, t)) = pose_from_betas(&beta, &v, &alphas, points_world) else {
            continue;
        };
        let err = rmse_px(points_world, points_image, &r, &t, k);
        if !err.is_finite() {
            continue;
        }
        if best.as_ref().map_or(true, |(best_err, _, _)| err < *best_err) {
            best = Some((err, r, t));
        }
    }

    best.map(|(_, r, t)| (r, t))
        .ok_or_else(|| PnPError::DecompositionFailed("no finite EPnP beta solution".to_string()))
}

/// Centroid plus principal-axis displacements scaled by the spread along each axis.
fn select_control_points(points_world: &[[f64; 3]]) -> Result<[Vector3<f64>; 4], PnPError> {
    let (c, axes) = principal_axes(points_world);
    if axes[0].0 <= f64::EPSILON || axes[1].0 <= 1e-6 * axes[0].0 {
        return Err(PnPError::DegenerateConfiguration(
            "object points are coincident or collinear",
        ));
    }

    let mut cw = [c; 4];
    for (i, (sigma, axis)) in axes.iter().enumerate() {
        cw[i + 1] = c + axis * *sigma;
    }
    Ok(cw)
}

/// Compute barycentric coordinates of object points with respect to the
/// 4 control points returned by `select_control_points`.
///
/// If the determinant of the 3-by-3 matrix built from `cw` is smaller than
/// `eps` (planar objects), a Moore–Penrose pseudo-inverse is used instead.
///
/// Each element is `[α0, α1, α2, α3]` with `Σ αj = 1` and `pw_i = Σ αj Cw_j`.
fn compute_barycentric(
    points_world: &[[f64; 3]],
    cw: &[Vector3<f64>; 4],
    eps: f64,
) -> Result<Vec<[f64; 4]>, PnPError> {
    let b = Matrix3::from_columns(&[cw[1] - cw[0], cw[2] - cw[0], cw[3] - cw[0]]);

    let b_inv = if b.determinant().abs() > eps {
        b.try_inverse()
    } else {
        None
    };
    let b_inv = match b_inv {
        Some(inv) => inv,
        None => b
            .pseudo_inverse(eps)
            .map_err(|e| PnPError::DecompositionFailed(e.to_string()))?,
    };

    Ok(points_world
        .iter()
        .map(|p| {
            let lamb = b_inv * (Vector3::from(*p) - cw[0]);
            [1.0 - (lamb.x + lamb.y + lamb.z), lamb.x, lamb.y, lamb.z]
        })
        .collect())
}

/// Construct the 2N×12 design matrix **M** used by EPnP.
fn build_m(alphas: &[[f64; 4]], points_image: &[[f64; 2]], k: &Matrix3<f64>) -> DMatrix<f64> {
    let n = alphas.len();
    let fu = k[(0, 0)];
    let fv = k[(1, 1)];
    let uc = k[(0, 2)];
    let vc = k[(1, 2)];

    let mut m = DMatrix::<f64>::zeros(2 * n, 12);
    for (i, (a, uv)) in alphas.iter().zip(points_image).enumerate() {
        let row_x = 2 * i;
        let row_y = row_x + 1;
        for (j, &alpha) in a.iter().enumerate() {
            let base = 3 * j;
            m[(row_x, base)] = alpha * fu;
            m[(row_x, base + 2)] = alpha * (uc - uv[0]);
            m[(row_y, base + 1)] = alpha * fv;
            m[(row_y, base + 2)] = alpha * (vc - uv[1]);
        }
    }
    m
}

/// Build the 6×10 matrix **L** relating products of betas to control point distances.
fn build_l6x10(v: &[[Vector3<f64>; 4]; 4]) -> [[f64; 10]; 6] {
    let v_owned: [[Vector3<f64>; 4]; 4] = *v;
    let dv = v_owned.map(|vi| CP_PAIRS.map(|(a, b)| vi[a] - vi[b]));

    let mut l = [[0.0; 10]; 6];
    for (j, row) in l.iter_mut().enumerate() {
        row[0] = dv[0][j].dot(&dv[0][j]);
        row[1] = 2.0 * dv[0][j].dot(&dv[1][j]);
        row[2] = dv[1][j].dot(&dv[1][j]);
        row[3] = 2.0 * dv[0][j].dot(&dv[2][j]);
        row[4] = 2.0 * dv[1][j].dot(&dv[2][j]);
        row[5] = dv[2][j].dot(&dv[2][j]);
        row[6] = 2.0 * dv[0][j].dot(&dv[3][j]);
        row[7] = 2.0 * dv[1][j].dot(&dv[3][j]);
        row[8] = 2.0 * dv[2][j].dot(&dv[3][j]);
        row[9] = dv[3][j].dot(&dv[3][j]);
    }
    l
}

/// Compute the six squared distances (ρ vector) between the 4 control points.
fn rho_ctrlpts(cw: &[Vector3<f64>; 4]) -> [f64; 6] {
    CP_PAIRS.map(|(i, j)| (cw[i] - cw[j]).norm_squared())
}

/// Least-squares solve of a column subset of `L` against `rho`.
fn solve_l_subset(
    l: &[[f64; 10]; 6],
    cols: &[usize],
    rho: &DVector<f64>,
    tol_svd: f64,
) -> Option<DVector<f64>> {
    let l_sub = DMatrix::from_fn(6, cols.len(), |r, c| l[r][cols[c]]);
    l_sub.svd(true, true).solve(rho, tol_svd).ok()
}

/// betas approximated as [B11 B12 B13 B14].
fn estimate_beta_n4(l: &[[f64; 10]; 6], rho: &DVector<f64>, tol: f64) -> Option<[f64; 4]> {
    let x = solve_l_subset(l, &[0, 1, 3, 6], rho, tol)?;
    let b0 = x[0].abs().sqrt();
    if b0 <= 0.0 {
        return None;
    }
    let beta = if x[0] < 0.0 {
        [b0, -x[1] / b0, -x[2] / b0, -x[3] / b0]
    } else {
        [b0, x[1] / b0, x[2] / b0, x[3] / b0]
    };
    Some(beta)
}

/// betas approximated as [B11 B12 B22].
fn estimate_beta_n2(l: &[[f64; 10]; 6], rho: &DVector<f64>, tol: f64) -> Option<[f64; 4]> {
    let x = solve_l_subset(l, &[0, 1, 2], rho, tol)?;
    let mut beta = [0.0; 4];
    if x[0] < 0.0 {
        beta[0] = (-x[0]).sqrt();
        beta[1] = if x[2] < 0.0 { (-x[2]).sqrt() } else { 0.0 };
    } else {
        beta[0] = x[0].sqrt();
        beta[1] = if x[2] > 0.0 { x[2].sqrt() } else { 0.0 };
    }
    if x[1] < 0.0 {
        beta[0] = -beta[0];
    }
    Some(beta)
}

/// betas approximated as [B11 B12 B22 B13 B23].
fn estimate_beta_n3(l: &[[f64; 10]; 6], rho: &DVector<f64>, tol: f64) -> Option<[f64; 4]> {
    let x = solve_l_subset(l, &[0, 1, 2, 3, 4], rho, tol)?;
    let mut beta = [0.0; 4];
    if x[0] < 0.0 {
        beta[0] = (-x[0]).sqrt();
        beta[1] = if x[2] < 0.0 { (-x[2]).sqrt() } else { 0.0 };
    } else {
        beta[0] = x[0].sqrt();
        beta[1] = if x[2] > 0.0 { x[2].sqrt() } else { 0.0 };
    }
    if x[1] < 0.0 {
        beta[0] = -beta[0];
    }
    if beta[0] == 0.0 {
        return None;
    }
    beta[2] = x[3] / beta[0];
    Some(beta)
}

/// Refine betas so the reconstructed control points match the world distances.
fn gauss_newton(beta_init: [f64; 4], l: &[[f64; 10]; 6], rho: &[f64; 6]) -> [f64; 4] {
    const DAMPING: f64 = 1e-12;
    const STOP_EPS: f64 = 1e-12;

    let mut bet = Vector4::from(beta_init);
    for _ in 0..GAUSS_NEWTON_ITERS {
        let mut a = Matrix6x4::<f64>::zeros();
        let mut b = Vector6::<f64>::zeros();
        let [b0, b1, b2, b3] = [bet[0], bet[1], bet[2], bet[3]];

        for (r, lr) in l.iter().enumerate() {
            a[(r, 0)] = 2.0 * lr[0] * b0 + lr[1] * b1 + lr[3] * b2 + lr[6] * b3;
            a[(r, 1)] = lr[1] * b0 + 2.0 * lr[2] * b1 + lr[4] * b2 + lr[7] * b3;
            a[(r, 2)] = lr[3] * b0 + lr[4] * b1 + 2.0 * lr[5] * b2 + lr[8] * b3;
            a[(r, 3)] = lr[6] * b0 + lr[7] * b1 + lr[8] * b2 + 2.0 * lr[9] * b3;

            let predicted = lr[0] * b0 * b0
                + lr[1] * b0 * b1
                + lr[2] * b1 * b1
                + lr[3] * b0 * b2
                + lr[4] * b1 * b2
                + lr[5] * b2 * b2
                + lr[6] * b0 * b3
                + lr[7] * b1 * b3
                + lr[8] * b2 * b3
                + lr[9] * b3 * b3;
            b[r] = rho[r] - predicted;
        }

        let mut ata: Matrix4<f64> = a.transpose() * a;
        let atb: Vector4<f64> = a.transpose() * b;
        for d in 0..4 {
            ata[(d, d)] += DAMPING;
        }

        let Some(chol) = ata.cholesky() else {
            break;
        };
        let delta = chol.solve(&atb);
        bet += delta;
        if delta.norm() < STOP_EPS {
            break;
        }
    }

    [bet[0], bet[1], bet[2], bet[3]]
}

/// Compute pose (R, t) from a set of betas using the null-space vectors.
fn pose_from_betas(
    betas: &[f64; 4],
    v: &[[Vector3<f64>; 4]; 4],
    alphas: &[[f64; 4]],
    points_world: &[[f64; 3]],
) -> Option<(Matrix3<f64>, Vector3<f64>)> {
    // control points in the camera frame
    let mut cc = [Vector3::<f64>::zeros(); 4];
    for (j, ccj) in cc.iter_mut().enumerate() {
        for (i, vi) in v.iter().enumerate() {
            *ccj += vi[j] * betas[i];
        }
    }

    let mut pcs: Vec<Vector3<f64>> = alphas
        .iter()
        .map(|a| cc[0] * a[0] + cc[1] * a[1] + cc[2] * a[2] + cc[3] * a[3])
        .collect();

    if pcs.iter().map(|p| p.z).sum::<f64>() < 0.0 {
        for p in &mut pcs {
            *p = -*p;
        }
    }

    let n = pcs.len() as f64;
    let pc0 = pcs.iter().fold(Vector3::zeros(), |acc, p| acc + p) / n;
    let pw0 = points_world
        .iter()
        .fold(Vector3::zeros(), |acc, p| acc + Vector3::from(*p))
        / n;

    let mut h = Matrix3::<f64>::zeros();
    for (pc, pw) in pcs.iter().zip(points_world) {
        h += (pc - pc0) * (Vector3::from(*pw) - pw0).transpose();
    }

    let r = project_to_so3(&h);
    let t = pc0 - r * pw0;
    if r.iter().chain(t.iter()).all(|v| v.is_finite()) {
        Some((r, t))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::{CameraIntrinsics, PolynomialDistortion};
    use crate::ops::rvec_to_rotation;
    use approx::assert_relative_eq;

    fn synthetic_scene(
        camera: &CameraModel,
        r: &Matrix3<f64>,
        t: &Vector3<f64>,
    ) -> (Vec<[f64; 3]>, Vec<[f64; 2]>) {
        let world = vec![
            [-0.05, -0.05, 0.0],
            [0.05, -0.05, 0.0],
            [0.05, 0.05, 0.0],
            [-0.05, 0.05, 0.0],
            [-0.05, 0.07, 0.06],
            [0.05, 0.07, 0.06],
            [0.07, -0.05, 0.04],
            [0.07, 0.05, 0.02],
        ];
        let image = world
            .iter()
            .map(|p| {
                camera
                    .project(&(r * Vector3::from(*p) + t))
                    .expect("point in front of camera")
            })
            .collect();
        (world, image)
    }

    #[test]
    fn test_build_m_rows() {
        let k = Matrix3::new(800.0, 0.0, 640.0, 0.0, 800.0, 480.0, 0.0, 0.0, 1.0);
        let alphas = [[0.1, 0.2, 0.3, 0.4]];
        let m = build_m(&alphas, &[[700.0, 500.0]], &k);
        assert_eq!(m.shape(), (2, 12));
        assert_relative_eq!(m[(0, 0)], 80.0);
        assert_relative_eq!(m[(0, 2)], 0.1 * (640.0 - 700.0));
        assert_relative_eq!(m[(1, 4)], 0.2 * 800.0);
        assert_relative_eq!(m[(1, 5)], 0.2 * (480.0 - 500.0));
    }

    #[test]
    fn test_barycentric_reconstructs_points() -> Result<(), PnPError> {
        let world = [
            [0.0315, 0.03333, -0.10409],
            [-0.0315, 0.03333, -0.10409],
            [0.0, -0.00102, -0.12977],
            [0.02646, -0.03167, -0.1053],
            [-0.02646, -0.031667, -0.1053],
            [0.0, 0.04515, -0.11033],
        ];
        let cw = select_control_points(&world)?;
        let alphas = compute_barycentric(&world, &cw, NumericTol::default().eps)?;
        for (p, a) in world.iter().zip(&alphas) {
            let recon = cw[0] * a[0] + cw[1] * a[1] + cw[2] * a[2] + cw[3] * a[3];
            assert_relative_eq!(recon, Vector3::from(*p), epsilon = 1e-9);
            assert_relative_eq!(a.iter().sum::<f64>(), 1.0, epsilon = 1e-9);
        }
        Ok(())
    }

    #[test]
    fn test_solve_epnp_recovers_pose() -> Result<(), PnPError> {
        let camera = CameraModel::pinhole(CameraIntrinsics::new(800.0, 800.0, 640.0, 480.0));
        let r_gt = rvec_to_rotation(&Vector3::new(0.3, -0.2, 0.1));
        let t_gt = Vector3::new(0.02, -0.03, 0.6);
        let (world, image) = synthetic_scene(&camera, &r_gt, &t_gt);

        let params = EPnPParams {
            refine_lm: None,
            ..Default::default()
        };
        let res = EPnP::solve(&world, &image, &camera, &params)?;
        assert_relative_eq!(res.rotation, r_gt, epsilon = 1e-6);
        assert_relative_eq!(res.translation, t_gt, epsilon = 1e-6);
        assert!(res.reproj_rmse.unwrap_or(f64::INFINITY) < 1e-4);
        Ok(())
    }

    #[test]
    fn test_solve_epnp_with_distortion() -> Result<(), PnPError> {
        let camera = CameraModel::with_distortion(
            CameraIntrinsics::new(900.0, 900.0, 640.0, 360.0),
            PolynomialDistortion::radial(-0.05, 0.01),
        );
        let r_gt = rvec_to_rotation(&Vector3::new(-0.1, 0.4, -0.2));
        let t_gt = Vector3::new(-0.05, 0.01, 0.8);
        let (world, image) = synthetic_scene(&camera, &r_gt, &t_gt);

        let res = EPnP::solve(&world, &image, &camera, &EPnPParams::default())?;
        assert_relative_eq!(res.rotation, r_gt, epsilon = 1e-6);
        assert_relative_eq!(res.translation, t_gt, epsilon = 1e-6);
        Ok(())
    }

    #[test]
    fn test_solve_epnp_insufficient() {
        let camera = CameraModel::default();
        let res = EPnP::solve(
            &[[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
            &[[0.0, 0.0], [1.0, 0.0], [0.0, 1.0]],
            &camera,
            &EPnPParams::default(),
        );
        assert!(matches!(
            res,
            Err(PnPError::InsufficientCorrespondences { required: 4, actual: 3 })
        ));
    }

    #[test]
    fn test_solve_epnp_collinear() {
        let camera = CameraModel::default();
        let world: Vec<[f64; 3]> = (0..5).map(|i| [i as f64 * 0.1, 0.0, 0.0]).collect();
        let image: Vec<[f64; 2]> = (0..5).map(|i| [600.0 + i as f64 * 10.0, 480.0]).collect();
        let res = EPnP::solve(&world, &image, &camera, &EPnPParams::default());
        assert!(matches!(res, Err(PnPError::DegenerateConfiguration(_))));
    }
}
