use geo_types::{Coord, LineString};
use log::warn;
use serde::Serialize;
use serde_json::json;

use crate::coordinates::Coordinate;
use crate::road_graph::{NodeId, RoadGraph};

/// Route for display as ordered `(latitude, longitude)` pairs, always at
/// least two of them
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(transparent)]
pub struct RoutePolyline(Vec<(f64, f64)>);

impl RoutePolyline {
    /// Two-point straight line
    pub fn straight(pickup: Coordinate, dropoff: Coordinate) -> Self {
        Self(vec![(pickup.lat, pickup.lon), (dropoff.lat, dropoff.lon)])
    }

    /// Positions of the route nodes, or the straight line between pickup and
    /// dropoff when the route is empty, collapses to a single point, or
    /// contains a node without a position
    pub fn from_route(
        graph: &RoadGraph,
        nodes: &[NodeId],
        pickup: Coordinate,
        dropoff: Coordinate,
    ) -> Self {
        if nodes.is_empty() {
            return Self::straight(pickup, dropoff);
        }

        let points: Option<Vec<(f64, f64)>> = nodes
            .iter()
            .map(|id| graph.node(*id).map(|node| node.coordinate()).map(|c| (c.lat, c.lon)))
            .collect();

        match points {
            Some(points) if points.len() >= 2 => Self(points),
            Some(_) => Self::straight(pickup, dropoff),
            None => {
                warn!("Route contains nodes without coordinates, using straight line");
                Self::straight(pickup, dropoff)
            }
        }
    }

    pub fn points(&self) -> &[(f64, f64)] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn to_line_string(&self) -> LineString<f64> {
        LineString::from(
            self.points()
                .iter()
                .map(|&(lat, lon)| Coord { x: lon, y: lat })
                .collect::<Vec<_>>(),
        )
    }

    /// GeoJSON feature collection with a single LineString (lon, lat order)
    pub fn to_geojson(&self) -> serde_json::Value {
        let coordinates: Vec<[f64; 2]> = self
            .to_line_string()
            .coords()
            .map(|c| [c.x, c.y])
            .collect();

        json!({
            "type": "FeatureCollection",
            "features": [{
                "type": "Feature",
                "properties": {},
                "geometry": {
                    "type": "LineString",
                    "coordinates": coordinates
                }
            }]
        })
    }
}
