use nalgebra::{Point2, Point3};

use crate::aggregate::{Correspondences, PairKey};
use crate::body::Body;
use crate::camera::Camera;
use crate::graph::ObservationEdge;
use crate::hull::hull_area;
use crate::solver::{PoseSolver, Reprojector};

/// Default strength constant `k` of [`confidence`].
pub const DEFAULT_STRENGTH: f64 = 1.0;

/// Confidence of a (camera, body) observation: `-ln(1 + e^-k * sqrt(n) * area * error)`.
///
/// Always non-positive. For a fixed count and a positive area it strictly decreases as
/// the reprojection error grows. A non-finite error scores `-inf`, whatever the area.
pub fn confidence(n: usize, area: f64, error: f64, strength: f64) -> f64 {
    if !error.is_finite() {
        return f64::NEG_INFINITY;
    }
    let x = (-strength).exp() * (n as f64).sqrt() * area * error;
    -x.ln_1p()
}

/// Root of the summed squared pixel residuals.
pub fn total_reprojection_error(projected: &[Point2<f64>], observed: &[Point2<f64>]) -> f64 {
    projected
        .iter()
        .zip(observed)
        .map(|(p, o)| (p - o).norm_squared())
        .sum::<f64>()
        .sqrt()
}

/// Turns aggregated correspondences into weighted observation edges.
#[derive(Debug, Clone)]
pub struct PairScorer<S, R> {
    solver: S,
    reprojector: R,
    strength: f64,
}

impl<S: PoseSolver, R: Reprojector> PairScorer<S, R> {
    /// Create a scorer.
    pub fn new(solver: S, reprojector: R, strength: f64) -> Self {
        Self {
            solver,
            reprojector,
            strength,
        }
    }

    /// The pose solver.
    pub fn solver(&self) -> &S {
        &self.solver
    }

    /// Solve, reproject and score one pair.
    ///
    /// Returns `None` when the pair has fewer correspondences than the solver needs
    /// or the solver fails.
    pub fn score(
        &self,
        key: PairKey,
        correspondences: &Correspondences,
        body: &Body,
        camera: &Camera,
    ) -> Option<ObservationEdge> {
        // every label was routed to this body through the label table
        let (object, image): (Vec<Point3<f64>>, Vec<Point2<f64>>) = correspondences
            .labels
            .iter()
            .zip(&correspondences.image)
            .filter_map(|(label, uv)| body.point(label).map(|p| (*p, *uv)))
            .unzip();

        let n = object.len();
        let required = self.solver.min_correspondences();
        if n < required {
            log::debug!(
                "dropping camera {} / body {}: {n} correspondences, need {required}",
                key.camera,
                key.body
            );
            return None;
        }

        let area = hull_area(&image);
        let transform = match self.solver.solve(&object, &image, &camera.model) {
            Ok(pose) => pose,
            Err(err) => {
                log::debug!(
                    "dropping camera {} / body {}: {err}",
                    key.camera,
                    key.body
                );
                return None;
            }
        };

        let projected = self.reprojector.project(&object, &transform, &camera.model);
        let error = total_reprojection_error(&projected, &image);
        let score = confidence(n, area, error, self.strength);

        Some(ObservationEdge {
            camera: key.camera,
            body: key.body,
            transform,
            correspondences: n,
            area,
            error,
            score,
        })
    }
}
