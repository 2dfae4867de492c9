use anyhow::{Context, Result, anyhow, bail};
use log::{debug, info};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use rstar::RTree;
use rstar::primitives::GeomWithData;
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    fs::File,
    io::{BufReader, BufWriter},
    path::Path,
    time::Instant,
};

use crate::coordinates::Coordinate;

/// External (OSM) identifier of a road graph node
pub type NodeId = u64;

/// Road intersection or endpoint
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct RoadNode {
    pub id: NodeId,
    /// Longitude
    pub x: f64,
    /// Latitude
    pub y: f64,
}

impl RoadNode {
    pub fn coordinate(&self) -> Coordinate {
        Coordinate::new(self.y, self.x)
    }
}

/// Directed street segment. `length` is in meters; `None` means the
/// segment was never measured.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct RoadEdge {
    pub length: Option<f64>,
}

impl RoadEdge {
    pub fn measured(length: f64) -> Self {
        Self {
            length: Some(length),
        }
    }
}

/// Serializable form of a [`RoadGraph`], used for the on-disk cache
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RoadGraphData {
    pub nodes: Vec<RoadNode>,
    pub edges: Vec<(NodeId, NodeId, RoadEdge)>,
}

type IndexedNode = GeomWithData<[f64; 2], NodeIndex>;

/// Read-only drivable road network.
///
/// Parallel edges between the same node pair are kept. Built once at startup
/// and shared between requests; nothing mutates it afterwards.
pub struct RoadGraph {
    graph: DiGraph<RoadNode, RoadEdge>,
    index: HashMap<NodeId, NodeIndex>,
    spatial: RTree<IndexedNode>,
}

impl RoadGraph {
    pub fn new(nodes: Vec<RoadNode>, edges: Vec<(NodeId, NodeId, RoadEdge)>) -> Result<Self> {
        let mut graph = DiGraph::with_capacity(nodes.len(), edges.len());
        let mut index = HashMap::with_capacity(nodes.len());

        for node in nodes {
            if !crate::coordinates::validate(node.y, node.x) {
                bail!(
                    "Node {} has invalid coordinates ({}, {})",
                    node.id,
                    node.y,
                    node.x
                );
            }
            if index.contains_key(&node.id) {
                bail!("Duplicate node id {}", node.id);
            }
            let idx = graph.add_node(node);
            index.insert(node.id, idx);
        }

        for (from, to, edge) in edges {
            if let Some(length) = edge.length {
                if !length.is_finite() || length < 0.0 {
                    bail!("Edge {} -> {} has invalid length {}", from, to, length);
                }
            }
            let a = *index
                .get(&from)
                .ok_or_else(|| anyhow!("Edge references unknown node {}", from))?;
            let b = *index
                .get(&to)
                .ok_or_else(|| anyhow!("Edge references unknown node {}", to))?;
            graph.add_edge(a, b, edge);
        }

        let spatial = RTree::bulk_load(
            graph
                .node_indices()
                .map(|idx| {
                    let node = &graph[idx];
                    GeomWithData::new([node.x, node.y], idx)
                })
                .collect(),
        );

        Ok(Self {
            graph,
            index,
            spatial,
        })
    }

    pub fn from_data(data: RoadGraphData) -> Result<Self> {
        Self::new(data.nodes, data.edges)
    }

    pub fn to_data(&self) -> RoadGraphData {
        RoadGraphData {
            nodes: self.graph.node_weights().copied().collect(),
            edges: self
                .graph
                .edge_references()
                .map(|e| (self.graph[e.source()].id, self.graph[e.target()].id, *e.weight()))
                .collect(),
        }
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.index.contains_key(&id)
    }

    pub fn node(&self, id: NodeId) -> Option<&RoadNode> {
        self.index.get(&id).map(|idx| &self.graph[*idx])
    }

    pub(crate) fn node_index(&self, id: NodeId) -> Option<NodeIndex> {
        self.index.get(&id).copied()
    }

    pub(crate) fn node_id(&self, idx: NodeIndex) -> NodeId {
        self.graph[idx].id
    }

    pub(crate) fn inner(&self) -> &DiGraph<RoadNode, RoadEdge> {
        &self.graph
    }

    /// Closest node in planar degree space
    pub fn nearest(&self, lon: f64, lat: f64) -> Option<NodeId> {
        self.spatial
            .nearest_neighbor(&[lon, lat])
            .map(|entry| self.graph[entry.data].id)
    }

    /// Shortest of the parallel edges `from -> to`, a missing length counting
    /// as 0. `None` when the nodes are not directly connected.
    pub fn min_edge_length(&self, from: NodeId, to: NodeId) -> Option<f64> {
        let a = self.node_index(from)?;
        let b = self.node_index(to)?;
        self.graph
            .edges_connecting(a, b)
            .map(|e| e.weight().length.unwrap_or(0.0))
            .reduce(f64::min)
    }

    /// Load a cached graph snapshot
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let start = Instant::now();
        let file = File::open(path)
            .with_context(|| format!("Failed to open graph cache {}", path.display()))?;
        let mut reader = BufReader::new(file);

        let config = bincode::config::standard();
        let data: RoadGraphData = bincode::serde::decode_from_std_read(&mut reader, config)
            .map_err(|e| anyhow!("Invalid graph cache {}: {}", path.display(), e))?;
        debug!(
            "Decoded {} nodes and {} edges from {}",
            data.nodes.len(),
            data.edges.len(),
            path.display()
        );

        let graph = Self::from_data(data)?;
        info!(
            "Road graph loaded from {} in {:?}",
            path.display(),
            start.elapsed()
        );
        Ok(graph)
    }

    /// Write a snapshot that [`RoadGraph::load_from_file`] can read back
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = File::create(path)
            .with_context(|| format!("Failed to create graph cache {}", path.display()))?;
        let mut writer = BufWriter::new(file);

        let config = bincode::config::standard();
        bincode::serde::encode_into_std_write(&self.to_data(), &mut writer, config)
            .map_err(|e| anyhow!("Failed to write graph cache {}: {}", path.display(), e))?;
        info!(
            "Road graph with {} nodes saved to {}",
            self.node_count(),
            path.display()
        );
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Small grid around midtown Manhattan:
    ///
    /// ```text
    /// 1 -> 2 -> 3
    /// |         ^
    /// v         |
    /// 4 ------> 5      6 (isolated)
    /// ```
    pub(crate) fn sample_graph() -> RoadGraph {
        let nodes = vec![
            RoadNode { id: 1, x: -73.990, y: 40.750 },
            RoadNode { id: 2, x: -73.980, y: 40.750 },
            RoadNode { id: 3, x: -73.970, y: 40.750 },
            RoadNode { id: 4, x: -73.990, y: 40.760 },
            RoadNode { id: 5, x: -73.970, y: 40.760 },
            RoadNode { id: 6, x: -73.900, y: 40.800 },
        ];
        let edges = vec![
            (1, 2, RoadEdge::measured(850.0)),
            (2, 3, RoadEdge::measured(840.0)),
            // parallel service road
            (2, 3, RoadEdge::measured(900.0)),
            (1, 4, RoadEdge::measured(1100.0)),
            (4, 5, RoadEdge::measured(1700.0)),
            (5, 3, RoadEdge::measured(1100.0)),
        ];
        RoadGraph::new(nodes, edges).unwrap()
    }

    #[test]
    fn builds_indexes() {
        let graph = sample_graph();
        assert_eq!(graph.node_count(), 6);
        assert_eq!(graph.edge_count(), 6);
        assert!(graph.contains(5));
        assert!(!graph.contains(42));
        assert_eq!(graph.node(3).map(|n| n.coordinate().lat), Some(40.750));
    }

    #[test]
    fn nearest_node_by_position() {
        let graph = sample_graph();
        assert_eq!(graph.nearest(-73.9801, 40.7502), Some(2));
        assert_eq!(graph.nearest(-73.91, 40.79), Some(6));
    }

    #[test]
    fn parallel_edges_use_minimum_length() {
        let graph = sample_graph();
        assert_eq!(graph.min_edge_length(2, 3), Some(840.0));
        assert_eq!(graph.min_edge_length(3, 2), None);
    }

    #[test]
    fn rejects_bad_input() {
        let node = RoadNode { id: 1, x: 0.0, y: 0.0 };
        assert!(RoadGraph::new(vec![node, node], vec![]).is_err());
        assert!(RoadGraph::new(vec![node], vec![(1, 2, RoadEdge::measured(1.0))]).is_err());
        assert!(RoadGraph::new(vec![node], vec![(1, 1, RoadEdge::measured(-1.0))]).is_err());
        let off_map = RoadNode { id: 2, x: 200.0, y: 0.0 };
        assert!(RoadGraph::new(vec![off_map], vec![]).is_err());
    }

    #[test]
    fn cache_file_round_trip() {
        let graph = sample_graph();
        let path = std::env::temp_dir().join(format!(
            "farecast_graph_{}.bin",
            std::process::id()
        ));
        graph.save_to_file(&path).unwrap();
        let loaded = RoadGraph::load_from_file(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(loaded.node_count(), graph.node_count());
        assert_eq!(loaded.edge_count(), graph.edge_count());
        assert_eq!(loaded.min_edge_length(2, 3), Some(840.0));
        assert_eq!(loaded.nearest(-73.9801, 40.7502), Some(2));
    }
}
