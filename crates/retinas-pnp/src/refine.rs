//! Levenberg–Marquardt pose refinement for PnP solutions.

use crate::ops::{intrinsics_as_vectors, rvec_to_rotation};
use crate::pnp::{check_inputs, PnPError};
use nalgebra::{Matrix3, Matrix6, Vector3, Vector6};
use serde::{Deserialize, Serialize};

/// Parameters controlling the LM pose refinement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LMRefineParams {
    /// Maximum number of LM iterations.
    pub max_iters: usize,
    /// Convergence threshold on squared reprojection error decrease.
    pub eps: f64,
    /// Initial damping factor (lambda).
    pub lambda_init: f64,
    /// Multiplicative factor to increase/decrease lambda.
    pub lambda_mul: f64,
}

impl Default for LMRefineParams {
    fn default() -> Self {
        Self {
            max_iters: 20,
            eps: 1e-12,
            lambda_init: 1e-3,
            lambda_mul: 10.0,
        }
    }
}

/// Outcome of a refinement run.
#[derive(Debug, Clone)]
pub struct LMRefineResult {
    /// Refined Rodrigues rotation vector.
    pub rvec: Vector3<f64>,
    /// Refined translation.
    pub translation: Vector3<f64>,
    /// Final root-mean-square reprojection error in pixels.
    pub rmse: f64,
    /// Number of iterations performed.
    pub num_iterations: usize,
    /// Whether the error decrease fell below `eps`.
    pub converged: bool,
}

/// Refine a pose (rvec, t) with Levenberg–Marquardt to minimize pixel reprojection error.
///
/// - `points_world`: object points (N,3)
/// - `points_image`: undistorted pixel points (N,2)
/// - `k`: intrinsics 3x3
/// - `rvec`, `t`: initial pose
pub fn refine_pose_lm(
    points_world: &[[f64; 3]],
    points_image: &[[f64; 2]],
    k: &Matrix3<f64>,
    rvec: Vector3<f64>,
    t: Vector3<f64>,
    params: &LMRefineParams,
) -> Result<LMRefineResult, PnPError> {
    check_inputs(points_world, points_image, 3)?;

    let n = points_world.len();
    let (intr_x, intr_y) = intrinsics_as_vectors(k);

    let project_all_in_place = |x: &Vector6<f64>, out: &mut [f64]| -> f64 {
        let r_mat = rvec_to_rotation(&Vector3::new(x[0], x[1], x[2]));
        let t_vec = Vector3::new(x[3], x[4], x[5]);

        let mut sum_sq = 0.0;
        for (i, (pw, uv)) in points_world.iter().zip(points_image).enumerate() {
            let pc = r_mat * Vector3::from(*pw) + t_vec;
            let inv_z = 1.0 / pc.z;
            let du = intr_x.dot(&pc) * inv_z - uv[0];
            let dv = intr_y.dot(&pc) * inv_z - uv[1];
            out[2 * i] = du;
            out[2 * i + 1] = dv;
            sum_sq += du.mul_add(du, dv * dv);
        }
        sum_sq
    };

    let mut x = Vector6::new(rvec.x, rvec.y, rvec.z, t.x, t.y, t.z);
    let mut residuals = vec![0.0; 2 * n];
    let mut residuals_p = vec![0.0; 2 * n];
    let mut residuals_m = vec![0.0; 2 * n];
    let mut jac = vec![0.0; 2 * n * 6];

    let mut lambda = params.lambda_init;
    let mut err_sq_base = project_all_in_place(&x, &mut residuals);
    let mut iters = 0usize;
    let mut converged = false;

    while iters < params.max_iters {
        iters += 1;

        const H_ROT: f64 = 1e-6;
        let t_scale = x[3].abs().max(x[4].abs()).max(x[5].abs()).max(1.0);
        let h_trans = 1e-6 * t_scale;

        // central differences
        for k_idx in 0..6 {
            let h = if k_idx < 3 { H_ROT } else { h_trans };
            let mut x_plus = x;
            let mut x_minus = x;
            x_plus[k_idx] += h;
            x_minus[k_idx] -= h;
            project_all_in_place(&x_plus, &mut residuals_p);
            project_all_in_place(&x_minus, &mut residuals_m);
            for i in 0..(2 * n) {
                jac[i * 6 + k_idx] = (residuals_p[i] - residuals_m[i]) / (2.0 * h);
            }
        }

        // normal equations: (J^T J + lambda I) delta = -J^T r
        let mut a = Matrix6::<f64>::zeros();
        let mut b = Vector6::<f64>::zeros();
        for r_i in 0..(2 * n) {
            let row = Vector6::from_column_slice(&jac[r_i * 6..r_i * 6 + 6]);
            b += row * residuals[r_i];
            a += row * row.transpose();
        }
        for d in 0..6 {
            a[(d, d)] += lambda;
        }

        let Some(delta) = a.lu().solve(&(-b)) else {
            lambda *= params.lambda_mul;
            continue;
        };

        let x_new = x + delta;
        let err_sq_new = project_all_in_place(&x_new, &mut residuals_p);
        if err_sq_new.is_finite() && err_sq_new < err_sq_base {
            x = x_new;
            residuals.copy_from_slice(&residuals_p);
            let decrease = err_sq_base - err_sq_new;
            err_sq_base = err_sq_new;
            if decrease < params.eps {
                converged = true;
                break;
            }
            lambda = (lambda / params.lambda_mul).max(1e-12);
        } else {
            lambda *= params.lambda_mul;
            if err_sq_base < params.eps {
                converged = true;
                break;
            }
        }
    }

    Ok(LMRefineResult {
        rvec: Vector3::new(x[0], x[1], x[2]),
        translation: Vector3::new(x[3], x[4], x[5]),
        rmse: (err_sq_base / n as f64).sqrt(),
        num_iterations: iters,
        converged,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::rmse_px;
    use approx::assert_relative_eq;

    #[test]
    fn test_refine_lm_recovers_perturbed_pose() -> Result<(), PnPError> {
        let k = Matrix3::new(800.0, 0.0, 640.0, 0.0, 800.0, 480.0, 0.0, 0.0, 1.0);
        let rvec_gt = Vector3::new(0.1, -0.2, 0.05);
        let t_gt = Vector3::new(0.1, -0.05, 2.0);
        let r_gt = rvec_to_rotation(&rvec_gt);

        let world = [
            [-0.2, -0.2, 0.0],
            [0.2, -0.2, 0.0],
            [0.2, 0.2, 0.0],
            [-0.2, 0.2, 0.0],
            [0.0, 0.0, 0.2],
            [0.1, -0.1, 0.15],
        ];
        let image: Vec<[f64; 2]> = world
            .iter()
            .map(|p| {
                let pc = r_gt * Vector3::from(*p) + t_gt;
                [
                    k[(0, 0)] * pc.x / pc.z + k[(0, 2)],
                    k[(1, 1)] * pc.y / pc.z + k[(1, 2)],
                ]
            })
            .collect();

        let rvec0 = rvec_gt + Vector3::new(0.02, 0.01, -0.015);
        let t0 = t_gt + Vector3::new(0.01, -0.02, 0.05);
        let rmse0 = rmse_px(&world, &image, &rvec_to_rotation(&rvec0), &t0, &k);

        let res = refine_pose_lm(&world, &image, &k, rvec0, t0, &LMRefineParams::default())?;

        assert!(res.rmse < rmse0);
        assert!(res.rmse < 1e-6, "rmse too large: {}", res.rmse);
        assert_relative_eq!(res.rvec, rvec_gt, epsilon = 1e-6);
        assert_relative_eq!(res.translation, t_gt, epsilon = 1e-6);
        Ok(())
    }

    #[test]
    fn test_refine_lm_rejects_too_few_points() {
        let k = Matrix3::identity();
        let res = refine_pose_lm(
            &[[0.0, 0.0, 1.0], [1.0, 0.0, 1.0]],
            &[[0.0, 0.0], [1.0, 0.0]],
            &k,
            Vector3::zeros(),
            Vector3::zeros(),
            &LMRefineParams::default(),
        );
        assert!(matches!(
            res,
            Err(PnPError::InsufficientCorrespondences { required: 3, actual: 2 })
        ));
    }
}
