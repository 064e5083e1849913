//! Numeric collaborators of the fusion engine.

use nalgebra::{Point2, Point3};
use retinas_pnp::{
    project_points, solve_pnp, CameraModel, EPnPParams, LMRefineParams, PlanarParams, PnPMethod,
};

use crate::config::{SolverConfig, SolverMethod};
use crate::error::SolveError;
use crate::pose::Pose;

/// Estimates the pose of a body in the frame of a camera.
pub trait PoseSolver {
    /// Smallest number of correspondences the solver accepts.
    fn min_correspondences(&self) -> usize;

    /// Solve for `T` such that `image[i] ~ project(T * object[i])`.
    fn solve(
        &self,
        object: &[Point3<f64>],
        image: &[Point2<f64>],
        camera: &CameraModel,
    ) -> Result<Pose, SolveError>;
}

/// Projects body points into a camera image.
pub trait Reprojector {
    /// Pixel coordinates of `object` seen through `pose` (body to camera).
    fn project(&self, object: &[Point3<f64>], pose: &Pose, camera: &CameraModel) -> Vec<Point2<f64>>;
}

/// Default solver backed by `retinas-pnp`.
///
/// Coplanar point sets such as a single tag go through the homography solver,
/// everything else through EPnP.
#[derive(Debug, Clone)]
pub struct PnPPoseSolver {
    method: PnPMethod,
}

impl PnPPoseSolver {
    /// Build the solver from configuration.
    pub fn new(config: &SolverConfig) -> Self {
        let refine_lm = config.refine.then(|| LMRefineParams {
            max_iters: config.max_iterations,
            ..Default::default()
        });
        let epnp = EPnPParams {
            refine_lm: refine_lm.clone(),
            ..Default::default()
        };
        let planar = PlanarParams {
            refine_lm,
            ..Default::default()
        };
        let method = match config.method {
            SolverMethod::Auto => PnPMethod::Auto { epnp, planar },
            SolverMethod::EPnP => PnPMethod::EPnP(epnp),
            SolverMethod::Planar => PnPMethod::Planar(planar),
        };
        Self { method }
    }
}

impl Default for PnPPoseSolver {
    fn default() -> Self {
        Self::new(&SolverConfig::default())
    }
}

impl PoseSolver for PnPPoseSolver {
    fn min_correspondences(&self) -> usize {
        4
    }

    fn solve(
        &self,
        object: &[Point3<f64>],
        image: &[Point2<f64>],
        camera: &CameraModel,
    ) -> Result<Pose, SolveError> {
        if object.len() < self.min_correspondences() {
            return Err(SolveError::TooFewCorrespondences {
                required: self.min_correspondences(),
                actual: object.len(),
            });
        }
        let world: Vec<[f64; 3]> = object.iter().map(|p| [p.x, p.y, p.z]).collect();
        let pixels: Vec<[f64; 2]> = image.iter().map(|p| [p.x, p.y]).collect();
        let res = solve_pnp(&world, &pixels, camera, self.method.clone())?;
        Ok(Pose::from_rotation_translation(&res.rotation, &res.translation))
    }
}

/// Default reprojector: the camera model's distorted pinhole projection.
///
/// Points on or behind the image plane project to infinity.
#[derive(Debug, Clone, Copy, Default)]
pub struct PinholeReprojector;

impl Reprojector for PinholeReprojector {
    fn project(&self, object: &[Point3<f64>], pose: &Pose, camera: &CameraModel) -> Vec<Point2<f64>> {
        let world: Vec<[f64; 3]> = object.iter().map(|p| [p.x, p.y, p.z]).collect();
        project_points(&world, &pose.rotation(), &pose.translation(), camera)
            .into_iter()
            .map(|uv| match uv {
                Some([u, v]) => Point2::new(u, v),
                None => Point2::new(f64::INFINITY, f64::INFINITY),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::marker_corners;
    use nalgebra::Vector3;
    use retinas_pnp::CameraIntrinsics;

    fn camera() -> CameraModel {
        CameraModel::pinhole(CameraIntrinsics::new(900.0, 900.0, 640.0, 360.0))
    }

    #[test]
    fn test_solve_single_tag() -> Result<(), SolveError> {
        let object: Vec<Point3<f64>> = marker_corners(0.12).to_vec();
        let truth = Pose::from_rodrigues(&Vector3::new(0.2, -0.3, 0.1), &Vector3::new(0.1, 0.05, 1.1));
        let image = PinholeReprojector.project(&object, &truth, &camera());

        let pose = PnPPoseSolver::default().solve(&object, &image, &camera())?;
        assert!(pose.approx_eq(&truth, 1e-6));
        Ok(())
    }

    #[test]
    fn test_solve_two_tags_with_epnp() -> Result<(), SolveError> {
        let side = Pose::from_rodrigues(
            &Vector3::new(0.0, std::f64::consts::FRAC_PI_2, 0.0),
            &Vector3::new(0.1, 0.0, -0.1),
        );
        let mut object: Vec<Point3<f64>> = marker_corners(0.1).to_vec();
        object.extend(marker_corners(0.1).iter().map(|p| side.transform_point(p)));
        let truth = Pose::from_rodrigues(&Vector3::new(-0.2, 0.5, 0.05), &Vector3::new(0.0, 0.1, 1.5));
        let image = PinholeReprojector.project(&object, &truth, &camera());

        let solver = PnPPoseSolver::new(&SolverConfig {
            method: SolverMethod::EPnP,
            ..Default::default()
        });
        let pose = solver.solve(&object, &image, &camera())?;
        assert!(pose.approx_eq(&truth, 1e-6));
        Ok(())
    }

    #[test]
    fn test_solve_rejects_three_points() {
        let object: Vec<Point3<f64>> = marker_corners(0.1)[..3].to_vec();
        let image = vec![Point2::new(0.0, 0.0); 3];
        let res = PnPPoseSolver::default().solve(&object, &image, &camera());
        assert!(matches!(
            res,
            Err(SolveError::TooFewCorrespondences { required: 4, actual: 3 })
        ));
    }

    #[test]
    fn test_reproject_behind_camera() {
        let pose = Pose::from_rodrigues(&Vector3::zeros(), &Vector3::new(0.0, 0.0, -1.0));
        let uv = PinholeReprojector.project(&[Point3::origin()], &pose, &camera());
        assert!(uv[0].x.is_infinite());
    }
}
