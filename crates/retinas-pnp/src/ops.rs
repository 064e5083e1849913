use nalgebra::{Matrix3, Rotation3, SymmetricEigen, Vector3};

/// Compute the centroid of a set of points.
pub(crate) fn compute_centroid(pts: &[[f64; 3]]) -> Vector3<f64> {
    let n = pts.len() as f64;
    let sum = pts
        .iter()
        .fold(Vector3::zeros(), |acc, p| acc + Vector3::from(*p));
    sum / n
}

/// Principal axes of a point set, sorted by decreasing spread.
///
/// Returns the centroid and `(sigma, axis)` pairs where `sigma` is the standard
/// deviation of the points along the unit `axis`.
pub(crate) fn principal_axes(pts: &[[f64; 3]]) -> (Vector3<f64>, [(f64, Vector3<f64>); 3]) {
    let c = compute_centroid(pts);
    let mut cov = Matrix3::zeros();
    for p in pts {
        let d = Vector3::from(*p) - c;
        cov += d * d.transpose();
    }
    cov /= pts.len() as f64;

    let eig = SymmetricEigen::new(cov);
    let mut axes = [0usize, 1, 2].map(|i| {
        (
            eig.eigenvalues[i].max(0.0).sqrt(),
            eig.eigenvectors.column(i).into_owned(),
        )
    });
    axes.sort_by(|a, b| b.0.total_cmp(&a.0));
    (c, axes)
}

/// Project an arbitrary 3x3 matrix onto the closest rotation (Frobenius norm).
pub(crate) fn project_to_so3(m: &Matrix3<f64>) -> Matrix3<f64> {
    let svd = m.svd(true, true);
    match (svd.u, svd.v_t) {
        (Some(u), Some(v_t)) => {
            let mut r = u * v_t;
            if r.determinant() < 0.0 {
                let mut d = Matrix3::identity();
                d[(2, 2)] = -1.0;
                // the smallest singular value is last after sorting
                let (u, v_t) = sorted_uv(&svd.singular_values, &u, &v_t);
                r = u * d * v_t;
            }
            r
        }
        _ => Matrix3::identity(),
    }
}

fn sorted_uv(
    s: &Vector3<f64>,
    u: &Matrix3<f64>,
    v_t: &Matrix3<f64>,
) -> (Matrix3<f64>, Matrix3<f64>) {
    let mut order = [0usize, 1, 2];
    order.sort_by(|&a, &b| s[b].total_cmp(&s[a]));
    let mut u_s = Matrix3::zeros();
    let mut v_s = Matrix3::zeros();
    for (dst, &src) in order.iter().enumerate() {
        u_s.set_column(dst, &u.column(src));
        v_s.set_row(dst, &v_t.row(src));
    }
    (u_s, v_s)
}

/// Rodrigues axis-angle vector (log map) of a rotation matrix.
pub(crate) fn rotation_to_rvec(r: &Matrix3<f64>) -> Vector3<f64> {
    Rotation3::from_matrix_unchecked(*r).scaled_axis()
}

/// Rotation matrix (exp map) from a Rodrigues axis-angle vector.
pub(crate) fn rvec_to_rotation(rvec: &Vector3<f64>) -> Matrix3<f64> {
    Rotation3::new(*rvec).into_inner()
}

/// Construct compact intrinsics vectors used for fast projection.
pub(crate) fn intrinsics_as_vectors(k: &Matrix3<f64>) -> (Vector3<f64>, Vector3<f64>) {
    (
        Vector3::new(k[(0, 0)], 0.0, k[(0, 2)]),
        Vector3::new(0.0, k[(1, 1)], k[(1, 2)]),
    )
}

/// Compute squared reprojection error for a single correspondence.
/// If `skip_if_behind` is true, returns `None` for points with non-positive depth.
pub(crate) fn project_sq_error(
    world_point: &[f64; 3],
    image_point: &[f64; 2],
    r_mat: &Matrix3<f64>,
    t_vec: &Vector3<f64>,
    intr_x: &Vector3<f64>,
    intr_y: &Vector3<f64>,
    skip_if_behind: bool,
) -> Option<f64> {
    let pc = r_mat * Vector3::from(*world_point) + t_vec;
    if skip_if_behind && pc.z <= 0.0 {
        return None;
    }
    let inv_z = 1.0 / pc.z;
    let du = intr_x.dot(&pc) * inv_z - image_point[0];
    let dv = intr_y.dot(&pc) * inv_z - image_point[1];
    Some(du.mul_add(du, dv * dv))
}

/// Root-mean-square reprojection error in pixels for undistorted image points.
pub(crate) fn rmse_px(
    points_world: &[[f64; 3]],
    points_image: &[[f64; 2]],
    r: &Matrix3<f64>,
    t: &Vector3<f64>,
    k: &Matrix3<f64>,
) -> f64 {
    let (intr_x, intr_y) = intrinsics_as_vectors(k);
    let sum_sq: f64 = points_world
        .iter()
        .zip(points_image)
        .filter_map(|(pw, uv)| project_sq_error(pw, uv, r, t, &intr_x, &intr_y, false))
        .sum();
    (sum_sq / points_world.len() as f64).sqrt()
}

/// True when every point lies in front of the camera.
pub(crate) fn all_in_front(points_world: &[[f64; 3]], r: &Matrix3<f64>, t: &Vector3<f64>) -> bool {
    points_world
        .iter()
        .all(|p| (r * Vector3::from(*p) + t).z > 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_compute_centroid() {
        let pts = [[1.0, 2.0, 3.0], [4.0, 5.0, 6.0], [7.0, 8.0, 9.0]];
        let c = compute_centroid(&pts);
        assert_eq!(c, Vector3::new(4.0, 5.0, 6.0));
    }

    #[test]
    fn test_principal_axes_planar() {
        let pts = [
            [-1.0, -0.5, 0.0],
            [1.0, -0.5, 0.0],
            [1.0, 0.5, 0.0],
            [-1.0, 0.5, 0.0],
        ];
        let (c, axes) = principal_axes(&pts);
        assert_relative_eq!(c, Vector3::zeros(), epsilon = 1e-12);
        assert_relative_eq!(axes[0].0, 1.0, epsilon = 1e-9);
        assert_relative_eq!(axes[1].0, 0.5, epsilon = 1e-9);
        assert_relative_eq!(axes[2].0, 0.0, epsilon = 1e-9);
        assert_relative_eq!(axes[0].1.x.abs(), 1.0, epsilon = 1e-9);
        assert_relative_eq!(axes[2].1.z.abs(), 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_project_to_so3_fixes_reflection() {
        let m = Matrix3::new(1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, -1.0);
        let r = project_to_so3(&m);
        assert_relative_eq!(r.determinant(), 1.0, epsilon = 1e-9);
        assert_relative_eq!(r * r.transpose(), Matrix3::identity(), epsilon = 1e-9);
    }

    #[test]
    fn test_rvec_roundtrip() {
        let rvec = Vector3::new(0.1, -0.4, 0.25);
        let r = rvec_to_rotation(&rvec);
        assert_relative_eq!(rotation_to_rvec(&r), rvec, epsilon = 1e-12);
    }
}
