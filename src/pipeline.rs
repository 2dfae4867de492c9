use chrono::NaiveDateTime;
use log::{debug, info, warn};
use serde::Serialize;

use crate::coordinates::Coordinate;
use crate::distance::{self, MIN_TRIP_DISTANCE_KM};
use crate::error::PipelineError;
use crate::features::{self, FeatureVector};
use crate::locator;
use crate::polyline::RoutePolyline;
use crate::road_graph::RoadGraph;
use crate::router::{self, RouteStrategy};
use crate::timestamp::parse_timestamp;

/// Pickup and dropoff closer than this on both axes (degrees) count as the
/// same point
pub const SAME_POINT_TOLERANCE_DEG: f64 = 0.0001;

/// One fare request after its timestamp has been parsed
#[derive(Clone, Debug, PartialEq)]
pub struct TripRequest {
    pub pickup: Coordinate,
    pub dropoff: Coordinate,
    pub timestamp: NaiveDateTime,
    /// Always within 1..=6
    pub passenger_count: u8,
}

impl TripRequest {
    pub fn new(
        pickup: Coordinate,
        dropoff: Coordinate,
        timestamp: NaiveDateTime,
        passenger_count: i64,
    ) -> Self {
        Self {
            pickup,
            dropoff,
            timestamp,
            passenger_count: features::clamp_passengers(passenger_count),
        }
    }

    pub fn is_same_point(&self) -> bool {
        self.pickup.is_near(&self.dropoff, SAME_POINT_TOLERANCE_DEG)
    }
}

/// How the trip distance was obtained
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TripResolution {
    /// Pickup and dropoff are the same spot; no routing was done
    SamePoint,
    Routed(RouteStrategy),
}

/// Model input plus the route to draw
#[derive(Clone, Debug, PartialEq)]
pub struct PreparedInput {
    pub features: FeatureVector,
    pub route: RoutePolyline,
    pub resolution: TripResolution,
}

/// Turn raw form values into a model row and a route polyline.
///
/// Stages run in order: parse the timestamp, check the graph, validate both
/// coordinates, then either take the same-point shortcut or resolve nodes and
/// route. Validation failures abort before any graph work; routing itself
/// never fails.
#[allow(clippy::too_many_arguments)]
pub fn prepare_input(
    pickup_lat: f64,
    pickup_lon: f64,
    dropoff_lat: f64,
    dropoff_lon: f64,
    datetime: &str,
    graph: Option<&RoadGraph>,
    passenger_count: i64,
) -> Result<PreparedInput, PipelineError> {
    let timestamp = parse_timestamp(datetime)?;

    let graph = match graph {
        Some(graph) if !graph.is_empty() => graph,
        _ => return Err(PipelineError::GraphUnavailable),
    };

    let pickup = Coordinate::new(pickup_lat, pickup_lon);
    let dropoff = Coordinate::new(dropoff_lat, dropoff_lon);
    for point in [pickup, dropoff] {
        if !point.is_valid() {
            return Err(PipelineError::InvalidCoordinate {
                lat: point.lat,
                lon: point.lon,
            });
        }
    }

    let request = TripRequest::new(pickup, dropoff, timestamp, passenger_count);
    prepare_trip(&request, graph)
}

/// Pipeline for an already validated request
pub fn prepare_trip(
    request: &TripRequest,
    graph: &RoadGraph,
) -> Result<PreparedInput, PipelineError> {
    let passengers = i64::from(request.passenger_count);

    if request.is_same_point() {
        warn!("Pickup and dropoff locations are very close");
        let features =
            FeatureVector::build(MIN_TRIP_DISTANCE_KM, request.timestamp, passengers);
        features.validate()?;
        return Ok(PreparedInput {
            features,
            route: RoutePolyline::straight(request.pickup, request.dropoff),
            resolution: TripResolution::SamePoint,
        });
    }

    let (pickup_node, dropoff_node) =
        locator::nearest_nodes(graph, request.pickup, request.dropoff)?;

    let route = router::route(
        graph,
        pickup_node,
        dropoff_node,
        request.pickup,
        request.dropoff,
    );

    let distance_km =
        distance::floored_trip_km(route.distance_m / 1000.0, request.pickup, request.dropoff);
    let polyline = RoutePolyline::from_route(graph, &route.nodes, request.pickup, request.dropoff);

    let features = FeatureVector::build(distance_km, request.timestamp, passengers);
    features.validate()?;

    info!(
        "Prepared trip: {:.2} km via {:?}, {} route points",
        features.distance_km,
        route.strategy,
        polyline.len()
    );
    debug!("Features: {:?}", features);

    Ok(PreparedInput {
        features,
        route: polyline,
        resolution: TripResolution::Routed(route.strategy),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::FEATURE_COUNT;
    use crate::road_graph::tests::sample_graph;

    #[test]
    fn documented_example() {
        let graph = sample_graph();
        let prepared = prepare_input(
            40.75,
            -73.98,
            40.76,
            -73.97,
            "2024-03-15 14:00:00",
            Some(&graph),
            2,
        )
        .unwrap();

        let f = &prepared.features;
        assert_eq!(f.values().len(), FEATURE_COUNT);
        assert_eq!(f.hour, 14);
        assert_eq!(f.is_weekend, 0);
        assert_eq!(f.month[2], 1);
        assert_eq!(f.dow[4], 1);
        assert_eq!(f.passenger_count, 2);
        assert!(f.distance_km > 0.1);
        assert!(prepared.route.len() >= 2);
    }

    #[test]
    fn routed_trip_uses_graph_distance() {
        let graph = sample_graph();
        // snaps to nodes 1 and 3: 1 -> 2 -> 3 over 1690 m
        let prepared = prepare_input(
            40.7501,
            -73.9899,
            40.7502,
            -73.9701,
            "2024-03-16 08:00:00",
            Some(&graph),
            1,
        )
        .unwrap();
        assert_eq!(
            prepared.resolution,
            TripResolution::Routed(RouteStrategy::Weighted)
        );
        assert!((prepared.features.distance_km - 1.69).abs() < 1e-9);
        assert_eq!(
            prepared.route.points(),
            &[(40.750, -73.990), (40.750, -73.980), (40.750, -73.970)]
        );
        assert_eq!(prepared.features.is_weekend, 1);
    }

    #[test]
    fn same_point_shortcut() {
        let graph = sample_graph();
        let prepared = prepare_input(
            40.75,
            -73.98,
            40.75005,
            -73.97995,
            "2024-03-15 14:00:00",
            Some(&graph),
            3,
        )
        .unwrap();
        assert_eq!(prepared.resolution, TripResolution::SamePoint);
        assert_eq!(prepared.features.distance_km, MIN_TRIP_DISTANCE_KM);
        assert_eq!(
            prepared.route.points(),
            &[(40.75, -73.98), (40.75005, -73.97995)]
        );
    }

    #[test]
    fn same_point_threshold_is_strict() {
        let graph = sample_graph();
        // beyond the tolerance in latitude: not the same point
        let prepared = prepare_input(
            40.75,
            -73.98,
            40.75 + SAME_POINT_TOLERANCE_DEG * 1.5,
            -73.98,
            "2024-03-15 14:00:00",
            Some(&graph),
            1,
        )
        .unwrap();
        assert_ne!(prepared.resolution, TripResolution::SamePoint);
        assert!(prepared.features.distance_km >= MIN_TRIP_DISTANCE_KM);
    }

    #[test]
    fn difference_of_exactly_the_tolerance_is_not_the_same_point() {
        let graph = sample_graph();
        for (dropoff_lat, dropoff_lon) in [(SAME_POINT_TOLERANCE_DEG, 0.0), (0.0, SAME_POINT_TOLERANCE_DEG)] {
            let prepared = prepare_input(
                0.0,
                0.0,
                dropoff_lat,
                dropoff_lon,
                "2024-03-15 14:00:00",
                Some(&graph),
                1,
            )
            .unwrap();
            assert_eq!(
                prepared.resolution,
                TripResolution::Routed(RouteStrategy::Weighted),
                "dropoff ({dropoff_lat}, {dropoff_lon})"
            );
        }
    }

    #[test]
    fn same_point_still_requires_a_graph() {
        let empty = RoadGraph::new(vec![], vec![]).unwrap();
        for graph in [None, Some(&empty)] {
            assert_eq!(
                prepare_input(40.75, -73.98, 40.75, -73.98, "2024-03-15 14:00:00", graph, 1),
                Err(PipelineError::GraphUnavailable)
            );
        }
    }

    #[test]
    fn timestamp_is_checked_first() {
        assert_eq!(
            prepare_input(999.0, -73.98, 40.75, -73.98, "not a date", None, 1),
            Err(PipelineError::InvalidTimestamp("not a date".to_string()))
        );
    }

    #[test]
    fn invalid_coordinates_are_rejected() {
        let graph = sample_graph();
        assert_eq!(
            prepare_input(40.75, -73.98, 40.76, -190.0, "2024-03-15 14:00:00", Some(&graph), 1),
            Err(PipelineError::InvalidCoordinate {
                lat: 40.76,
                lon: -190.0
            })
        );
    }

    #[test]
    fn unreachable_dropoff_still_prepares() {
        let graph = sample_graph();
        // dropoff snaps to the isolated node 6
        let prepared = prepare_input(
            40.75,
            -73.99,
            40.80,
            -73.90,
            "2024-03-15 14:00:00",
            Some(&graph),
            2,
        )
        .unwrap();
        assert_eq!(
            prepared.resolution,
            TripResolution::Routed(RouteStrategy::StraightLine)
        );
        assert_eq!(prepared.route.len(), 2);
        let straight = distance::estimate_km(40.75, -73.99, 40.80, -73.90);
        assert!((prepared.features.distance_km - straight).abs() < 1e-9);
    }

    #[test]
    fn same_node_trip_gets_floor_and_straight_line() {
        let graph = sample_graph();
        // both ends snap to node 2 but are more than the tolerance apart
        let pickup = (40.7503, -73.9803);
        let dropoff = (40.7498, -73.9797);
        let prepared = prepare_input(
            pickup.0,
            pickup.1,
            dropoff.0,
            dropoff.1,
            "2024-03-15 14:00:00",
            Some(&graph),
            9,
        )
        .unwrap();
        assert_eq!(prepared.features.distance_km, MIN_TRIP_DISTANCE_KM);
        assert_eq!(prepared.features.passenger_count, 6);
        assert_eq!(prepared.route.points(), &[pickup, dropoff]);
    }

    #[test]
    fn repeated_calls_are_identical() {
        let graph = sample_graph();
        let run = || {
            prepare_input(40.75, -73.99, 40.76, -73.97, "2024-05-05 22:00", Some(&graph), 4)
                .unwrap()
        };
        assert_eq!(run(), run());
    }
}
