use anyhow::{Result, bail};
use geo::{Distance, Haversine};
use geo_types::{Point, Rect};
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn};
use osmpbf::{Element, ElementReader};
use rayon::prelude::*;
use std::{
    collections::{HashMap, HashSet},
    path::Path,
    time::Instant,
};

use crate::config::ServiceConfig;
use crate::road_graph::{NodeId, RoadEdge, RoadGraph, RoadNode};

/// Highway classes a car can drive on
const DRIVABLE_HIGHWAY_TYPES: &[&str] = &[
    "motorway",
    "trunk",
    "primary",
    "secondary",
    "tertiary",
    "motorway_link",
    "trunk_link",
    "primary_link",
    "secondary_link",
    "tertiary_link",
    "residential",
    "living_street",
    "unclassified",
    "service",
];

/// Travel direction allowed on a way
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Direction {
    Both,
    Forward,
    Backward,
}

// Intermediate way storage
#[derive(Debug)]
struct WayEntry {
    nodes: Vec<NodeId>,
    direction: Direction,
}

/// Returns the road graph for the configured area.
///
/// The cache file is used when present; otherwise the graph is built from the
/// OSM extract and the cache is written for the next start.
pub fn load_or_build(config: &ServiceConfig) -> Result<RoadGraph> {
    if config.graph_cache_path.exists() {
        info!(
            "Graph cache found, loading {}",
            config.graph_cache_path.display()
        );
        return RoadGraph::load_from_file(&config.graph_cache_path);
    }

    let Some(pbf_path) = &config.osm_pbf_path else {
        bail!(
            "Graph cache {} not found and no OSM extract configured",
            config.graph_cache_path.display()
        );
    };

    info!("Graph cache not found, building from {}", pbf_path.display());
    let graph = build_from_pbf(pbf_path, config.service_area.to_rect())?;
    if graph.is_empty() {
        bail!("OSM extract contains no drivable roads inside the service area");
    }

    if let Err(e) = graph.save_to_file(&config.graph_cache_path) {
        warn!("Failed to write graph cache: {}", e);
    }
    Ok(graph)
}

/// Build a drivable graph from an OSM PBF file, clipped to `bbox`
pub fn build_from_pbf(pbf_path: &Path, bbox: Rect<f64>) -> Result<RoadGraph> {
    let start_time = Instant::now();
    if !pbf_path.exists() {
        bail!("OSM PBF file not found: {}", pbf_path.display());
    }

    let file_size = std::fs::metadata(pbf_path)?.len();
    let pb = ProgressBar::new(file_size);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos} elements - Reading OSM")?
            .progress_chars("##-"),
    );

    let mut coordinates: HashMap<NodeId, (f64, f64)> = HashMap::new();
    let mut ways: Vec<WayEntry> = Vec::new();

    let reader = ElementReader::from_path(pbf_path)?;
    reader.for_each(|element| {
        pb.inc(1);
        match element {
            Element::Node(node) => {
                if contains(&bbox, node.lon(), node.lat()) {
                    coordinates.insert(node.id() as NodeId, (node.lon(), node.lat()));
                }
            }
            Element::DenseNode(node) => {
                if contains(&bbox, node.lon(), node.lat()) {
                    coordinates.insert(node.id() as NodeId, (node.lon(), node.lat()));
                }
            }
            Element::Way(way) => {
                let tags: Vec<(&str, &str)> = way.tags().collect();
                if let Some(direction) = drivable_direction(&tags) {
                    let nodes: Vec<NodeId> = way.refs().map(|id| id as NodeId).collect();
                    if nodes.len() > 1 {
                        ways.push(WayEntry { nodes, direction });
                    }
                }
            }
            _ => {}
        }
    })?;
    pb.finish_and_clear();

    info!(
        "Read {} nodes inside the service area and {} drivable ways",
        coordinates.len(),
        ways.len()
    );

    let edges: Vec<(NodeId, NodeId, RoadEdge)> = ways
        .par_iter()
        .flat_map_iter(|way| way_edges(way, &coordinates))
        .collect();

    let used: HashSet<NodeId> = edges.iter().flat_map(|(a, b, _)| [*a, *b]).collect();
    let mut nodes: Vec<RoadNode> = used
        .into_iter()
        .filter_map(|id| {
            coordinates
                .get(&id)
                .map(|&(x, y)| RoadNode { id, x, y })
        })
        .collect();
    // deterministic node order keeps the cache reproducible
    nodes.sort_by_key(|n| n.id);

    let graph = RoadGraph::new(nodes, edges)?;
    info!(
        "Built road graph with {} nodes and {} edges in {:?}",
        graph.node_count(),
        graph.edge_count(),
        start_time.elapsed()
    );
    Ok(graph)
}

fn contains(bbox: &Rect<f64>, lon: f64, lat: f64) -> bool {
    (bbox.min().x..=bbox.max().x).contains(&lon) && (bbox.min().y..=bbox.max().y).contains(&lat)
}

/// `None` when the way is not a drivable road
fn drivable_direction(tags: &[(&str, &str)]) -> Option<Direction> {
    let highway = tags.iter().find(|(k, _)| *k == "highway").map(|(_, v)| *v)?;
    if !DRIVABLE_HIGHWAY_TYPES.contains(&highway) {
        return None;
    }

    let tag = |key: &str| tags.iter().find(|(k, _)| *k == key).map(|(_, v)| *v);

    if matches!(tag("area"), Some("yes")) {
        return None;
    }
    if matches!(tag("access"), Some("private") | Some("no")) {
        return None;
    }
    if matches!(
        tag("service"),
        Some("parking_aisle") | Some("driveway") | Some("emergency_access")
    ) {
        return None;
    }

    let direction = match tag("oneway") {
        Some("yes") | Some("1") | Some("true") => Direction::Forward,
        Some("-1") | Some("reverse") => Direction::Backward,
        Some("no") | Some("0") | Some("false") => Direction::Both,
        _ if highway == "motorway" || matches!(tag("junction"), Some("roundabout")) => {
            Direction::Forward
        }
        _ => Direction::Both,
    };
    Some(direction)
}

/// Directed, measured edges for consecutive node pairs inside the area
fn way_edges(
    way: &WayEntry,
    coordinates: &HashMap<NodeId, (f64, f64)>,
) -> Vec<(NodeId, NodeId, RoadEdge)> {
    let mut edges = Vec::with_capacity(way.nodes.len() * 2);
    for pair in way.nodes.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        if a == b {
            continue;
        }
        let (Some(&(ax, ay)), Some(&(bx, by))) = (coordinates.get(&a), coordinates.get(&b)) else {
            continue;
        };
        let length = Haversine.distance(Point::new(ax, ay), Point::new(bx, by));
        let edge = RoadEdge::measured(length);

        match way.direction {
            Direction::Forward => edges.push((a, b, edge)),
            Direction::Backward => edges.push((b, a, edge)),
            Direction::Both => {
                edges.push((a, b, edge));
                edges.push((b, a, edge));
            }
        }
    }
    edges
}
