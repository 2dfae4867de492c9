use log::{error, info};

use crate::coordinates::{self, Coordinate};
use crate::error::PipelineError;
use crate::road_graph::{NodeId, RoadGraph};

/// Nearest graph node to a coordinate.
///
/// The result is always a member of the graph; anything else is reported as
/// a resolution failure.
pub fn nearest_node(graph: &RoadGraph, lon: f64, lat: f64) -> Result<NodeId, PipelineError> {
    if !coordinates::validate(lat, lon) {
        return Err(PipelineError::InvalidCoordinate { lat, lon });
    }
    if graph.is_empty() {
        return Err(PipelineError::GraphUnavailable);
    }

    let node = graph.nearest(lon, lat).ok_or_else(|| {
        PipelineError::NodeResolution(format!("no node found near ({}, {})", lat, lon))
    })?;

    if !graph.contains(node) {
        error!("Nearest node {} is not in the graph", node);
        return Err(PipelineError::NodeResolution(format!(
            "node {} not found in graph",
            node
        )));
    }
    Ok(node)
}

/// Resolve pickup and dropoff nodes in one go
pub fn nearest_nodes(
    graph: &RoadGraph,
    pickup: Coordinate,
    dropoff: Coordinate,
) -> Result<(NodeId, NodeId), PipelineError> {
    let pickup_node = nearest_node(graph, pickup.lon, pickup.lat)?;
    let dropoff_node = nearest_node(graph, dropoff.lon, dropoff.lat)?;
    info!(
        "Found nodes: pickup={}, dropoff={}",
        pickup_node, dropoff_node
    );
    Ok((pickup_node, dropoff_node))
}
