use crate::error::FusionError;
use crate::graph::{Node, ObservationGraph};
use crate::pose::Pose;

/// Chain the edge transforms along `path` into the pose of its last node in the
/// frame of `reference`.
///
/// Stepping from a camera to a body applies the edge transform, stepping from a
/// body to a camera applies its inverse. The path must start at `reference` and
/// alternate between bodies and cameras over existing edges.
pub fn compose_path(
    path: &[Node],
    reference: Node,
    graph: &ObservationGraph,
) -> Result<Pose, FusionError> {
    match path.first() {
        Some(first) if *first == reference => {}
        Some(first) => {
            return Err(FusionError::MalformedPath(format!(
                "path starts at {first}, expected {reference}"
            )))
        }
        None => return Err(FusionError::MalformedPath("empty path".to_string())),
    }

    let mut pose = Pose::identity();
    for step in path.windows(2) {
        let (from, to) = (step[0], step[1]);
        let (camera, body, inverted) = match (from, to) {
            (Node::Camera(c), Node::Body(b)) => (c, b, false),
            (Node::Body(b), Node::Camera(c)) => (c, b, true),
            _ => {
                return Err(FusionError::MalformedPath(format!(
                    "step {from} -> {to} does not alternate between bodies and cameras"
                )))
            }
        };
        let edge = graph.edge(camera, body).ok_or_else(|| {
            FusionError::MalformedPath(format!("no edge for step {from} -> {to}"))
        })?;
        pose = if inverted {
            pose * edge.transform.inverse()
        } else {
            pose * edge.transform
        };
    }
    Ok(pose)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::ObservationEdge;
    use nalgebra::Vector3;

    fn edge(camera: usize, body: usize, transform: Pose) -> ObservationEdge {
        ObservationEdge {
            camera,
            body,
            transform,
            correspondences: 4,
            area: 1.0,
            error: 0.0,
            score: 0.0,
        }
    }

    #[test]
    fn test_chain_through_camera() -> Result<(), FusionError> {
        // ground truth: world = b0, camera 0 and body 1 somewhere in it
        let cam = Pose::from_rodrigues(&Vector3::new(0.1, 0.2, 0.3), &Vector3::new(1.0, 0.0, 2.0));
        let b1 = Pose::from_rodrigues(&Vector3::new(-0.4, 0.0, 0.2), &Vector3::new(0.5, 0.5, 0.0));
        // edges hold body-in-camera transforms
        let graph = ObservationGraph::new(
            2,
            1,
            vec![edge(0, 0, cam.inverse()), edge(0, 1, cam.inverse() * b1)],
        );

        let reference = Node::Body(0);
        let camera_pose = compose_path(&[Node::Body(0), Node::Camera(0)], reference, &graph)?;
        assert!(camera_pose.approx_eq(&cam, 1e-9));

        let body_pose = compose_path(
            &[Node::Body(0), Node::Camera(0), Node::Body(1)],
            reference,
            &graph,
        )?;
        assert!(body_pose.approx_eq(&b1, 1e-9));

        let own = compose_path(&[Node::Body(0)], reference, &graph)?;
        assert_eq!(own, Pose::identity());
        Ok(())
    }

    #[test]
    fn test_malformed_paths() {
        let graph = ObservationGraph::new(2, 2, vec![edge(0, 0, Pose::identity())]);
        let reference = Node::Body(0);
        let bad = [
            vec![],
            vec![Node::Body(1)],
            vec![Node::Body(0), Node::Body(1)],
            vec![Node::Body(0), Node::Camera(1)],
        ];
        for path in bad {
            assert!(matches!(
                compose_path(&path, reference, &graph),
                Err(FusionError::MalformedPath(_))
            ));
        }
    }
}
