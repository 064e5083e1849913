use std::collections::BTreeMap;

use nalgebra::Point2;

use crate::body::{Label, LabelTable};
use crate::source::Observation;

/// Identifies a (camera, body) pair.
///
/// Pairs order by camera first, then body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PairKey {
    /// Camera index.
    pub camera: usize,
    /// Body index.
    pub body: usize,
}

impl PairKey {
    /// Create a new key.
    pub const fn new(camera: usize, body: usize) -> Self {
        Self { camera, body }
    }
}

/// Labelled image points of one body seen by one camera.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Correspondences {
    /// Labels, in detection order.
    pub labels: Vec<Label>,
    /// Pixel coordinates matching `labels`.
    pub image: Vec<Point2<f64>>,
}

impl Correspondences {
    /// Number of correspondences.
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    /// Whether there are no correspondences.
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// Group the detections of every camera by owning body.
///
/// `observations[j]` holds the detections of camera `j`. Labels unknown to
/// `table` and points with a NaN or infinite coordinate are skipped. Only pairs
/// with at least one correspondence are returned.
pub fn aggregate(
    observations: &[Observation],
    table: &LabelTable,
) -> BTreeMap<PairKey, Correspondences> {
    let mut pairs: BTreeMap<PairKey, Correspondences> = BTreeMap::new();
    for (camera, observation) in observations.iter().enumerate() {
        if observation.labels.len() != observation.points.len() {
            log::warn!(
                "camera {camera} reported {} labels for {} points, truncating",
                observation.labels.len(),
                observation.points.len()
            );
        }
        for (label, point) in observation.iter() {
            if !(point.x.is_finite() && point.y.is_finite()) {
                log::warn!("camera {camera}: dropping non-finite point {point} for label {label}");
                continue;
            }
            let Some(body) = table.owner(label) else {
                log::debug!("camera {camera}: label {label} belongs to no body");
                continue;
            };
            let entry = pairs.entry(PairKey::new(camera, body)).or_default();
            entry.labels.push(*label);
            entry.image.push(*point);
        }
    }
    pairs
}
