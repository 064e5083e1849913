use std::collections::{BTreeMap, HashMap};
use std::fmt;

use nalgebra::Point3;
use serde::{Deserialize, Serialize};

use crate::error::FusionError;
use crate::pose::Pose;

/// Identifies one observable point: a corner of a fiducial marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Label {
    /// Marker identifier as decoded by the detector.
    pub marker_id: u32,
    /// Corner index within the marker, `0..4`.
    pub corner: u8,
}

impl Label {
    /// Create a new label.
    pub const fn new(marker_id: u32, corner: u8) -> Self {
        Self { marker_id, corner }
    }

    /// The four corner labels of a marker.
    pub fn corners(marker_id: u32) -> [Label; 4] {
        [0, 1, 2, 3].map(|corner| Label::new(marker_id, corner))
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.marker_id, self.corner)
    }
}

/// Corners of a square marker of side `side` in its own frame, centred at the origin
/// on the plane z = 0.
///
/// The order follows the detector's corner indices:
///  - p0 = [-s/2,  s/2, 0]
///  - p1 = [ s/2,  s/2, 0]
///  - p2 = [ s/2, -s/2, 0]
///  - p3 = [-s/2, -s/2, 0]
pub fn marker_corners(side: f64) -> [Point3<f64>; 4] {
    let h = side / 2.0;
    [
        Point3::new(-h, h, 0.0),
        Point3::new(h, h, 0.0),
        Point3::new(h, -h, 0.0),
        Point3::new(-h, -h, 0.0),
    ]
}

/// A rigid object carrying a fixed set of labelled points in its own frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Body {
    /// Human readable name.
    pub name: String,
    points: BTreeMap<Label, Point3<f64>>,
}

impl Body {
    /// Create a body without any points.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            points: BTreeMap::new(),
        }
    }

    /// Add a single labelled point, replacing any previous point with that label.
    pub fn with_point(mut self, label: Label, point: Point3<f64>) -> Self {
        self.points.insert(label, point);
        self
    }

    /// Add the four corners of a square marker placed on the body by `placement`
    /// (marker frame to body frame).
    pub fn with_marker(mut self, marker_id: u32, side: f64, placement: &Pose) -> Self {
        self.insert_marker(marker_id, side, placement);
        self
    }

    /// In-place version of [`Body::with_marker`].
    pub fn insert_marker(&mut self, marker_id: u32, side: f64, placement: &Pose) {
        for (label, corner) in Label::corners(marker_id).into_iter().zip(marker_corners(side)) {
            self.points.insert(label, placement.transform_point(&corner));
        }
    }

    /// Body-frame coordinate of a label, if the body carries it.
    pub fn point(&self, label: &Label) -> Option<&Point3<f64>> {
        self.points.get(label)
    }

    /// All labelled points in label order.
    pub fn points(&self) -> impl Iterator<Item = (&Label, &Point3<f64>)> {
        self.points.iter()
    }

    /// Number of labelled points.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Whether the body has no points.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Immutable lookup from label to the index of the body that owns it.
#[derive(Debug, Clone, Default)]
pub struct LabelTable {
    owners: HashMap<Label, usize>,
}

impl LabelTable {
    /// Build the table, rejecting labels that appear on more than one body.
    pub fn build(bodies: &[Body]) -> Result<Self, FusionError> {
        let mut owners = HashMap::new();
        for (index, body) in bodies.iter().enumerate() {
            for label in body.points.keys() {
                if let Some(first) = owners.insert(*label, index) {
                    return Err(FusionError::DuplicateLabel {
                        label: *label,
                        first,
                        second: index,
                    });
                }
            }
        }
        Ok(Self { owners })
    }

    /// Index of the body owning `label`.
    #[inline]
    pub fn owner(&self, label: &Label) -> Option<usize> {
        self.owners.get(label).copied()
    }

    /// Number of registered labels.
    pub fn len(&self) -> usize {
        self.owners.len()
    }

    /// Whether no labels are registered.
    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::Vector3;

    #[test]
    fn test_marker_corners_on_body() {
        let placement = Pose::from_rodrigues(&Vector3::zeros(), &Vector3::new(0.0, 0.0, 0.5));
        let body = Body::new("cube").with_marker(7, 0.1, &placement);
        assert_eq!(body.len(), 4);
        let p1 = body.point(&Label::new(7, 1)).unwrap();
        assert_relative_eq!(*p1, Point3::new(0.05, 0.05, 0.5), epsilon = 1e-12);
        assert!(body.point(&Label::new(7, 4)).is_none());
        assert!(body.point(&Label::new(8, 0)).is_none());
    }

    #[test]
    fn test_label_table_lookup() -> Result<(), FusionError> {
        let bodies = vec![
            Body::new("world").with_marker(0, 0.1, &Pose::identity()),
            Body::new("cube")
                .with_marker(1, 0.05, &Pose::identity())
                .with_point(Label::new(9, 0), Point3::new(1.0, 2.0, 3.0)),
        ];
        let table = LabelTable::build(&bodies)?;
        assert_eq!(table.len(), 9);
        assert_eq!(table.owner(&Label::new(0, 3)), Some(0));
        assert_eq!(table.owner(&Label::new(1, 0)), Some(1));
        assert_eq!(table.owner(&Label::new(9, 0)), Some(1));
        assert_eq!(table.owner(&Label::new(2, 0)), None);
        Ok(())
    }

    #[test]
    fn test_label_table_rejects_duplicates() {
        let bodies = vec![
            Body::new("a").with_marker(3, 0.1, &Pose::identity()),
            Body::new("b").with_point(Label::new(3, 2), Point3::origin()),
        ];
        match LabelTable::build(&bodies) {
            Err(FusionError::DuplicateLabel { label, first, second }) => {
                assert_eq!(label, Label::new(3, 2));
                assert_eq!((first, second), (0, 1));
            }
            other => panic!("expected duplicate label error, got {other:?}"),
        }
    }

    #[test]
    fn test_label_display() {
        assert_eq!(Label::new(12, 3).to_string(), "(12, 3)");
    }
}
