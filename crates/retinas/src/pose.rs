use std::ops::Mul;

use nalgebra::{Isometry3, Matrix3, Matrix4, Point3, Rotation3, Translation3, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

/// A rigid transform between two coordinate frames.
///
/// A pose `T` maps points expressed in its *source* frame into its *target* frame:
/// `p_target = T * p_source`. Composition `a * b` applies `b` first, then `a`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Pose(Isometry3<f64>);

impl Pose {
    /// The identity transform.
    pub fn identity() -> Self {
        Self(Isometry3::identity())
    }

    /// Wrap an existing isometry.
    pub fn from_isometry(iso: Isometry3<f64>) -> Self {
        Self(iso)
    }

    /// Build a pose from a rotation matrix and a translation.
    ///
    /// The matrix is re-orthonormalized, so small numerical drift is tolerated.
    pub fn from_rotation_translation(rotation: &Matrix3<f64>, translation: &Vector3<f64>) -> Self {
        let rotation = Rotation3::from_matrix(rotation);
        Self(Isometry3::from_parts(
            Translation3::from(*translation),
            UnitQuaternion::from_rotation_matrix(&rotation),
        ))
    }

    /// Build a pose from a Rodrigues rotation vector and a translation.
    pub fn from_rodrigues(rvec: &Vector3<f64>, tvec: &Vector3<f64>) -> Self {
        Self(Isometry3::new(*tvec, *rvec))
    }

    /// Pose of a camera at `eye` looking at `target`.
    ///
    /// Uses the optical convention: z forward, x right and y down in the image,
    /// with `up` the world direction that appears upwards. Returns `None` when the
    /// viewing direction is parallel to `up` or `eye == target`.
    pub fn look_at(eye: &Point3<f64>, target: &Point3<f64>, up: &Vector3<f64>) -> Option<Self> {
        let z = (target - eye).try_normalize(f64::EPSILON)?;
        let x = z.cross(up).try_normalize(f64::EPSILON)?;
        let y = z.cross(&x);
        let rotation = Matrix3::from_columns(&[x, y, z]);
        Some(Self::from_rotation_translation(&rotation, &eye.coords))
    }

    /// The reverse transform.
    pub fn inverse(&self) -> Self {
        Self(self.0.inverse())
    }

    /// Rotation part as a matrix.
    pub fn rotation(&self) -> Matrix3<f64> {
        self.0.rotation.to_rotation_matrix().into_inner()
    }

    /// Translation part.
    pub fn translation(&self) -> Vector3<f64> {
        self.0.translation.vector
    }

    /// Rotation part as a Rodrigues vector.
    pub fn rvec(&self) -> Vector3<f64> {
        self.0.rotation.scaled_axis()
    }

    /// The underlying isometry.
    #[inline]
    pub fn isometry(&self) -> &Isometry3<f64> {
        &self.0
    }

    /// 4x4 homogeneous matrix.
    pub fn to_homogeneous(&self) -> Matrix4<f64> {
        self.0.to_homogeneous()
    }

    /// Map a point from the source into the target frame.
    pub fn transform_point(&self, p: &Point3<f64>) -> Point3<f64> {
        self.0.transform_point(p)
    }

    /// Whether both poses agree entry-wise in homogeneous form within `tol`.
    pub fn approx_eq(&self, other: &Pose, tol: f64) -> bool {
        (self.to_homogeneous() - other.to_homogeneous()).amax() <= tol
    }
}

impl Default for Pose {
    fn default() -> Self {
        Self::identity()
    }
}

impl From<Isometry3<f64>> for Pose {
    fn from(iso: Isometry3<f64>) -> Self {
        Self(iso)
    }
}

impl Mul for Pose {
    type Output = Pose;

    fn mul(self, rhs: Pose) -> Pose {
        Pose(self.0 * rhs.0)
    }
}

impl Mul<&Pose> for &Pose {
    type Output = Pose;

    fn mul(self, rhs: &Pose) -> Pose {
        Pose(self.0 * rhs.0)
    }
}
