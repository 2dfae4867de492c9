use log::{info, warn};
use ordered_float::OrderedFloat;
use petgraph::graph::NodeIndex;
use petgraph::visit::EdgeRef;
use serde::Serialize;
use std::{
    cmp::Ordering,
    collections::{BinaryHeap, HashMap, HashSet, VecDeque},
};

use crate::coordinates::Coordinate;
use crate::distance;
use crate::road_graph::{NodeId, RoadGraph};

/// Which stage of the fallback chain produced a route
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteStrategy {
    /// Shortest path by edge length
    Weighted,
    /// Fewest edges, length summed afterwards
    Unweighted,
    /// Synthetic two-node route measured as a straight line
    StraightLine,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RouteResult {
    pub nodes: Vec<NodeId>,
    pub distance_m: f64,
    pub strategy: RouteStrategy,
}

#[derive(Debug, PartialEq)]
enum PathError {
    NoPath,
    UnknownNode(NodeId),
}

// Search state for Dijkstra with priority queue
#[derive(Copy, Clone, Eq, PartialEq)]
struct State {
    cost: OrderedFloat<f64>,
    node: NodeIndex,
}

impl Ord for State {
    fn cmp(&self, other: &Self) -> Ordering {
        // Min-heap by cost, ties broken by node index so results are stable
        other
            .cost
            .cmp(&self.cost)
            .then_with(|| other.node.cmp(&self.node))
    }
}

impl PartialOrd for State {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Route between two resolved nodes.
///
/// Tries a length-weighted shortest path, then a fewest-edges path, and ends
/// with a straight line between the two coordinates. A stage is only skipped
/// to the next one on "no path"; any other failure goes straight to the
/// straight line. Never fails.
pub fn route(
    graph: &RoadGraph,
    pickup_node: NodeId,
    dropoff_node: NodeId,
    pickup: Coordinate,
    dropoff: Coordinate,
) -> RouteResult {
    for strategy in [RouteStrategy::Weighted, RouteStrategy::Unweighted] {
        let attempt = match strategy {
            RouteStrategy::Weighted => weighted_path(graph, pickup_node, dropoff_node),
            _ => unweighted_path(graph, pickup_node, dropoff_node),
        };

        match attempt {
            Ok((nodes, distance_m)) => {
                info!(
                    "Route found ({:?}) with {} nodes, distance: {:.2}m",
                    strategy,
                    nodes.len(),
                    distance_m
                );
                return RouteResult {
                    nodes,
                    distance_m,
                    strategy,
                };
            }
            Err(PathError::NoPath) => {
                warn!(
                    "No {:?} path between {} and {}",
                    strategy, pickup_node, dropoff_node
                );
            }
            Err(PathError::UnknownNode(node)) => {
                warn!("Error calculating route: node {} not in graph", node);
                break;
            }
        }
    }

    warn!("Using straight-line distance");
    straight_line(pickup_node, dropoff_node, pickup, dropoff)
}

/// Synthetic `[pickup, dropoff]` route measured as a straight line
pub fn straight_line(
    pickup_node: NodeId,
    dropoff_node: NodeId,
    pickup: Coordinate,
    dropoff: Coordinate,
) -> RouteResult {
    RouteResult {
        nodes: vec![pickup_node, dropoff_node],
        distance_m: distance::estimate_between_km(pickup, dropoff) * 1000.0,
        strategy: RouteStrategy::StraightLine,
    }
}

fn endpoints(
    graph: &RoadGraph,
    from: NodeId,
    to: NodeId,
) -> Result<(NodeIndex, NodeIndex), PathError> {
    let start = graph
        .node_index(from)
        .ok_or(PathError::UnknownNode(from))?;
    let target = graph.node_index(to).ok_or(PathError::UnknownNode(to))?;
    Ok((start, target))
}

/// Edge weight used by the weighted stage when a segment has no length
const UNMEASURED_EDGE_WEIGHT_M: f64 = 1.0;

/// Dijkstra by edge length. Unmeasured edges weigh
/// [`UNMEASURED_EDGE_WEIGHT_M`] and count towards the returned distance.
fn weighted_path(
    graph: &RoadGraph,
    from: NodeId,
    to: NodeId,
) -> Result<(Vec<NodeId>, f64), PathError> {
    let (start, target) = endpoints(graph, from, to)?;
    let inner = graph.inner();

    let mut distances: HashMap<NodeIndex, f64> = HashMap::new();
    let mut predecessors: HashMap<NodeIndex, NodeIndex> = HashMap::new();
    let mut heap = BinaryHeap::new();

    distances.insert(start, 0.0);
    heap.push(State {
        cost: OrderedFloat(0.0),
        node: start,
    });

    while let Some(State { cost, node }) = heap.pop() {
        if node == target {
            let path = reconstruct(graph, &predecessors, start, target);
            return Ok((path, cost.into_inner()));
        }

        // Skip if we've found a better path
        if distances.get(&node).is_some_and(|&best| cost.into_inner() > best) {
            continue;
        }

        for edge in inner.edges(node) {
            let length = edge.weight().length.unwrap_or(UNMEASURED_EDGE_WEIGHT_M);
            let next = edge.target();
            let next_cost = cost.into_inner() + length;

            let improved = distances.get(&next).is_none_or(|&best| next_cost < best);
            if improved {
                distances.insert(next, next_cost);
                predecessors.insert(next, node);
                heap.push(State {
                    cost: OrderedFloat(next_cost),
                    node: next,
                });
            }
        }
    }

    Err(PathError::NoPath)
}

/// Breadth-first fewest-edges path. Length is the sum of the shortest
/// parallel edge per hop, a missing length counting as 0.
fn unweighted_path(
    graph: &RoadGraph,
    from: NodeId,
    to: NodeId,
) -> Result<(Vec<NodeId>, f64), PathError> {
    let (start, target) = endpoints(graph, from, to)?;
    let inner = graph.inner();

    let mut predecessors: HashMap<NodeIndex, NodeIndex> = HashMap::new();
    let mut visited = HashSet::from([start]);
    let mut queue = VecDeque::from([start]);

    while let Some(node) = queue.pop_front() {
        if node == target {
            let path = reconstruct(graph, &predecessors, start, target);
            let distance_m: f64 = path
                .windows(2)
                .map(|hop| graph.min_edge_length(hop[0], hop[1]).unwrap_or(0.0))
                .sum();
            return Ok((path, distance_m));
        }

        for next in inner.neighbors(node) {
            if visited.insert(next) {
                predecessors.insert(next, node);
                queue.push_back(next);
            }
        }
    }

    Err(PathError::NoPath)
}

fn reconstruct(
    graph: &RoadGraph,
    predecessors: &HashMap<NodeIndex, NodeIndex>,
    start: NodeIndex,
    target: NodeIndex,
) -> Vec<NodeId> {
    let mut path = vec![graph.node_id(target)];
    let mut current = target;
    while current != start {
        match predecessors.get(&current) {
            Some(&prev) => {
                path.push(graph.node_id(prev));
                current = prev;
            }
            None => break,
        }
    }
    path.reverse();
    path
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::road_graph::tests::sample_graph;
    use crate::road_graph::{RoadEdge, RoadNode};

    fn coord(graph: &RoadGraph, id: NodeId) -> Coordinate {
        graph.node(id).unwrap().coordinate()
    }

    #[test]
    fn weighted_route_prefers_shorter_length() {
        let graph = sample_graph();
        let result = route(&graph, 1, 3, coord(&graph, 1), coord(&graph, 3));
        assert_eq!(result.strategy, RouteStrategy::Weighted);
        assert_eq!(result.nodes, vec![1, 2, 3]);
        // shortest of the two parallel 2 -> 3 edges
        assert_eq!(result.distance_m, 850.0 + 840.0);
    }

    #[test]
    fn respects_edge_direction() {
        let graph = sample_graph();
        // 3 has no outgoing edges
        let result = route(&graph, 3, 1, coord(&graph, 3), coord(&graph, 1));
        assert_eq!(result.strategy, RouteStrategy::StraightLine);
        assert_eq!(result.nodes, vec![3, 1]);
    }

    #[test]
    fn disconnected_nodes_fall_back_to_straight_line() {
        let graph = sample_graph();
        let pickup = coord(&graph, 1);
        let dropoff = coord(&graph, 6);
        let result = route(&graph, 1, 6, pickup, dropoff);
        assert_eq!(result.strategy, RouteStrategy::StraightLine);
        assert_eq!(result.nodes, vec![1, 6]);
        let expected = distance::estimate_between_km(pickup, dropoff) * 1000.0;
        assert!((result.distance_m - expected).abs() < 1e-9);
        assert!(result.distance_m > 0.0);
    }

    #[test]
    fn unmeasured_edges_weigh_one_meter() {
        let nodes = vec![
            RoadNode { id: 10, x: -73.99, y: 40.75 },
            RoadNode { id: 11, x: -73.98, y: 40.75 },
            RoadNode { id: 12, x: -73.97, y: 40.75 },
            RoadNode { id: 13, x: -73.98, y: 40.76 },
        ];
        let edges = vec![
            (10, 11, RoadEdge { length: None }),
            (11, 12, RoadEdge::measured(100.0)),
            (10, 13, RoadEdge::measured(5000.0)),
            (13, 12, RoadEdge::measured(5000.0)),
        ];
        let graph = RoadGraph::new(nodes, edges).unwrap();
        let result = route(&graph, 10, 12, coord(&graph, 10), coord(&graph, 12));
        assert_eq!(result.strategy, RouteStrategy::Weighted);
        assert_eq!(result.nodes, vec![10, 11, 12]);
        assert_eq!(result.distance_m, 101.0);
    }

    #[test]
    fn unweighted_stage_counts_missing_length_as_zero() {
        let nodes = vec![
            RoadNode { id: 10, x: -73.99, y: 40.75 },
            RoadNode { id: 11, x: -73.98, y: 40.75 },
            RoadNode { id: 12, x: -73.97, y: 40.75 },
        ];
        let edges = vec![
            (10, 11, RoadEdge::measured(800.0)),
            (10, 11, RoadEdge::measured(700.0)),
            (11, 12, RoadEdge { length: None }),
        ];
        let graph = RoadGraph::new(nodes, edges).unwrap();
        assert_eq!(
            unweighted_path(&graph, 10, 12),
            Ok((vec![10, 11, 12], 700.0))
        );
        assert_eq!(unweighted_path(&graph, 12, 10), Err(PathError::NoPath));
    }

    #[test]
    fn unknown_node_goes_straight_to_fallback() {
        let graph = sample_graph();
        let pickup = Coordinate::new(40.75, -73.99);
        let dropoff = Coordinate::new(40.76, -73.97);
        let result = route(&graph, 999, 5, pickup, dropoff);
        assert_eq!(result.strategy, RouteStrategy::StraightLine);
        assert_eq!(result.nodes, vec![999, 5]);
    }

    #[test]
    fn same_node_is_a_zero_length_route() {
        let graph = sample_graph();
        let result = route(&graph, 2, 2, coord(&graph, 2), coord(&graph, 2));
        assert_eq!(result.strategy, RouteStrategy::Weighted);
        assert_eq!(result.nodes, vec![2]);
        assert_eq!(result.distance_m, 0.0);
    }

    #[test]
    fn routing_is_deterministic() {
        let graph = sample_graph();
        let a = route(&graph, 1, 5, coord(&graph, 1), coord(&graph, 5));
        let b = route(&graph, 1, 5, coord(&graph, 1), coord(&graph, 5));
        assert_eq!(a, b);
        assert_eq!(a.nodes, vec![1, 4, 5]);
    }
}
