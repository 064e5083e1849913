//! Per-frame observation graph and path selection.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BinaryHeap, VecDeque};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::aggregate::PairKey;
use crate::pose::Pose;

/// A node of the observation graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Node {
    /// Body by index.
    Body(usize),
    /// Camera by index.
    Camera(usize),
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Node::Body(i) => write!(f, "b{i}"),
            Node::Camera(j) => write!(f, "c{j}"),
        }
    }
}

/// Evidence that a camera saw a body this frame.
#[derive(Debug, Clone, PartialEq)]
pub struct ObservationEdge {
    /// Camera index.
    pub camera: usize,
    /// Body index.
    pub body: usize,
    /// Pose of the body in the camera frame.
    pub transform: Pose,
    /// Number of correspondences used.
    pub correspondences: usize,
    /// Convex-hull area of the image points, in squared pixels.
    pub area: f64,
    /// Root of the summed squared reprojection residuals, in pixels.
    pub error: f64,
    /// Confidence score, higher is better.
    pub score: f64,
}

impl ObservationEdge {
    /// Key of the (camera, body) pair.
    pub fn key(&self) -> PairKey {
        PairKey::new(self.camera, self.body)
    }

    /// Traversal cost under [`PathPolicy::Confidence`].
    fn cost(&self) -> f64 {
        let cost = -self.score;
        if cost.is_nan() {
            f64::INFINITY
        } else {
            cost.max(0.0)
        }
    }
}

/// How paths from the reference body are selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PathPolicy {
    /// Fewest edges, ties broken by discovery order.
    #[default]
    HopCount,
    /// Highest summed confidence, i.e. lowest summed `-score`.
    Confidence,
}

/// Undirected bipartite graph between bodies and cameras for one frame.
#[derive(Debug, Clone)]
pub struct ObservationGraph {
    num_bodies: usize,
    num_cameras: usize,
    edges: BTreeMap<PairKey, ObservationEdge>,
    adjacency: Vec<Vec<Node>>,
}

impl ObservationGraph {
    /// Build the graph over all bodies and cameras.
    ///
    /// Edges naming an unknown body or camera are ignored; a repeated pair keeps
    /// the last edge.
    pub fn new(
        num_bodies: usize,
        num_cameras: usize,
        edges: impl IntoIterator<Item = ObservationEdge>,
    ) -> Self {
        let edges: BTreeMap<PairKey, ObservationEdge> = edges
            .into_iter()
            .filter(|e| e.body < num_bodies && e.camera < num_cameras)
            .map(|e| (e.key(), e))
            .collect();

        // neighbours are listed in ascending (camera, body) order
        let mut adjacency = vec![Vec::new(); num_bodies + num_cameras];
        for key in edges.keys() {
            adjacency[key.body].push(Node::Camera(key.camera));
            adjacency[num_bodies + key.camera].push(Node::Body(key.body));
        }

        Self {
            num_bodies,
            num_cameras,
            edges,
            adjacency,
        }
    }

    /// Number of body nodes.
    pub fn num_bodies(&self) -> usize {
        self.num_bodies
    }

    /// Number of camera nodes.
    pub fn num_cameras(&self) -> usize {
        self.num_cameras
    }

    /// Whether the node exists in this graph.
    pub fn contains(&self, node: Node) -> bool {
        self.index(node).is_some()
    }

    /// The edge between a camera and a body.
    pub fn edge(&self, camera: usize, body: usize) -> Option<&ObservationEdge> {
        self.edges.get(&PairKey::new(camera, body))
    }

    /// All edges in ascending (camera, body) order.
    pub fn edges(&self) -> impl Iterator<Item = &ObservationEdge> {
        self.edges.values()
    }

    /// Number of edges.
    pub fn num_edges(&self) -> usize {
        self.edges.len()
    }

    /// Neighbours of a node in discovery order.
    pub fn neighbors(&self, node: Node) -> &[Node] {
        match self.index(node) {
            Some(i) => &self.adjacency[i],
            None => &[],
        }
    }

    fn index(&self, node: Node) -> Option<usize> {
        match node {
            Node::Body(i) if i < self.num_bodies => Some(i),
            Node::Camera(j) if j < self.num_cameras => Some(self.num_bodies + j),
            _ => None,
        }
    }

    fn node(&self, index: usize) -> Node {
        if index < self.num_bodies {
            Node::Body(index)
        } else {
            Node::Camera(index - self.num_bodies)
        }
    }

    fn edge_between(&self, from: Node, to: Node) -> Option<&ObservationEdge> {
        match (from, to) {
            (Node::Camera(c), Node::Body(b)) | (Node::Body(b), Node::Camera(c)) => self.edge(c, b),
            _ => None,
        }
    }

    /// Paths from `source` to every node reachable from it, including `source` itself.
    ///
    /// Every path starts at `source` and ends at its key. Unreachable nodes are absent.
    pub fn shortest_paths(&self, source: Node, policy: PathPolicy) -> BTreeMap<Node, Vec<Node>> {
        let Some(start) = self.index(source) else {
            return BTreeMap::new();
        };
        let parents = match policy {
            PathPolicy::HopCount => self.bfs_parents(start),
            PathPolicy::Confidence => self.dijkstra_parents(start),
        };

        let mut paths = BTreeMap::new();
        for (target, parent) in parents.iter().enumerate() {
            if parent.is_none() {
                continue;
            }
            let mut path = vec![self.node(target)];
            let mut current = target;
            while current != start {
                match parents[current] {
                    Some(p) => current = p,
                    None => break,
                }
                path.push(self.node(current));
            }
            path.reverse();
            paths.insert(self.node(target), path);
        }
        paths
    }

    /// Breadth-first parents; the start node is its own parent.
    fn bfs_parents(&self, start: usize) -> Vec<Option<usize>> {
        let mut parents = vec![None; self.adjacency.len()];
        parents[start] = Some(start);
        let mut queue = VecDeque::from([start]);
        while let Some(current) = queue.pop_front() {
            for &neighbor in &self.adjacency[current] {
                let Some(next) = self.index(neighbor) else {
                    continue;
                };
                if parents[next].is_none() {
                    parents[next] = Some(current);
                    queue.push_back(next);
                }
            }
        }
        parents
    }

    /// Dijkstra parents over `-score` costs; the start node is its own parent.
    fn dijkstra_parents(&self, start: usize) -> Vec<Option<usize>> {
        let n = self.adjacency.len();
        let mut parents = vec![None; n];
        let mut dist = vec![f64::INFINITY; n];
        let mut done = vec![false; n];
        let mut heap = BinaryHeap::new();
        let mut pushed = 0usize;

        parents[start] = Some(start);
        dist[start] = 0.0;
        heap.push(Candidate {
            cost: 0.0,
            order: pushed,
            index: start,
        });

        while let Some(Candidate { cost, index, .. }) = heap.pop() {
            if done[index] {
                continue;
            }
            done[index] = true;
            let current = self.node(index);
            for &neighbor in &self.adjacency[index] {
                let (Some(next), Some(edge)) =
                    (self.index(neighbor), self.edge_between(current, neighbor))
                else {
                    continue;
                };
                let next_cost = cost + edge.cost();
                if !next_cost.is_finite() || done[next] || next_cost >= dist[next] {
                    continue;
                }
                dist[next] = next_cost;
                parents[next] = Some(index);
                pushed += 1;
                heap.push(Candidate {
                    cost: next_cost,
                    order: pushed,
                    index: next,
                });
            }
        }
        parents
    }
}

/// Min-heap entry: lowest cost first, then earliest discovery.
#[derive(Debug, Clone, Copy)]
struct Candidate {
    cost: f64,
    order: usize,
    index: usize,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .cost
            .total_cmp(&self.cost)
            .then_with(|| other.order.cmp(&self.order))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edge(camera: usize, body: usize, score: f64) -> ObservationEdge {
        ObservationEdge {
            camera,
            body,
            transform: Pose::identity(),
            correspondences: 4,
            area: 1.0,
            error: 0.0,
            score,
        }
    }

    #[test]
    fn test_adjacency_in_key_order() {
        let graph = ObservationGraph::new(
            2,
            3,
            vec![edge(2, 0, 0.0), edge(0, 1, 0.0), edge(0, 0, 0.0), edge(7, 0, 0.0)],
        );
        assert_eq!(graph.num_edges(), 3);
        assert_eq!(
            graph.neighbors(Node::Body(0)),
            &[Node::Camera(0), Node::Camera(2)]
        );
        assert_eq!(
            graph.neighbors(Node::Camera(0)),
            &[Node::Body(0), Node::Body(1)]
        );
        assert!(graph.neighbors(Node::Camera(1)).is_empty());
        assert!(graph.neighbors(Node::Camera(9)).is_empty());
        assert!(graph.edge(0, 1).is_some());
        assert!(graph.edge(1, 0).is_none());
    }

    #[test]
    fn test_bfs_paths() {
        // c0 sees b0 and b1, c1 sees b0
        let graph = ObservationGraph::new(2, 2, vec![edge(0, 0, 0.0), edge(0, 1, 0.0), edge(1, 0, 0.0)]);
        let paths = graph.shortest_paths(Node::Body(0), PathPolicy::HopCount);
        assert_eq!(paths[&Node::Body(0)], vec![Node::Body(0)]);
        assert_eq!(
            paths[&Node::Body(1)],
            vec![Node::Body(0), Node::Camera(0), Node::Body(1)]
        );
        assert_eq!(paths[&Node::Camera(1)], vec![Node::Body(0), Node::Camera(1)]);
        assert_eq!(paths.len(), 4);
    }

    #[test]
    fn test_bfs_tie_broken_by_discovery_order() {
        // b1 is two hops away through either c0 or c1
        let graph = ObservationGraph::new(
            2,
            2,
            vec![edge(1, 0, 0.0), edge(1, 1, 0.0), edge(0, 0, 0.0), edge(0, 1, 0.0)],
        );
        let paths = graph.shortest_paths(Node::Body(0), PathPolicy::HopCount);
        assert_eq!(
            paths[&Node::Body(1)],
            vec![Node::Body(0), Node::Camera(0), Node::Body(1)]
        );
    }

    #[test]
    fn test_unreachable_nodes_absent() {
        let graph = ObservationGraph::new(3, 2, vec![edge(0, 1, 0.0), edge(0, 2, 0.0), edge(1, 2, 0.0)]);
        let paths = graph.shortest_paths(Node::Body(0), PathPolicy::HopCount);
        assert_eq!(paths.len(), 1);
        assert!(paths.contains_key(&Node::Body(0)));
        assert!(graph.shortest_paths(Node::Body(5), PathPolicy::HopCount).is_empty());
    }

    #[test]
    fn test_confidence_policy_prefers_strong_edges() {
        // direct route b0-c0-b1 is weak, detour through c1 and b2 is strong
        let graph = ObservationGraph::new(
            3,
            3,
            vec![
                edge(0, 0, -5.0),
                edge(0, 1, -5.0),
                edge(1, 0, -0.1),
                edge(1, 2, -0.1),
                edge(2, 2, -0.1),
                edge(2, 1, -0.1),
            ],
        );
        let hops = graph.shortest_paths(Node::Body(0), PathPolicy::HopCount);
        assert_eq!(hops[&Node::Body(1)].len(), 3);

        let weighted = graph.shortest_paths(Node::Body(0), PathPolicy::Confidence);
        assert_eq!(
            weighted[&Node::Body(1)],
            vec![
                Node::Body(0),
                Node::Camera(1),
                Node::Body(2),
                Node::Camera(2),
                Node::Body(1)
            ]
        );
        assert_eq!(weighted.len(), hops.len());
    }

    #[test]
    fn test_confidence_policy_skips_infinite_cost() {
        let graph = ObservationGraph::new(2, 1, vec![edge(0, 0, 0.0), edge(0, 1, f64::NEG_INFINITY)]);
        let weighted = graph.shortest_paths(Node::Body(0), PathPolicy::Confidence);
        assert!(weighted.contains_key(&Node::Camera(0)));
        assert!(!weighted.contains_key(&Node::Body(1)));
    }

    #[test]
    fn test_node_display() {
        assert_eq!(Node::Body(3).to_string(), "b3");
        assert_eq!(Node::Camera(0).to_string(), "c0");
    }
}
