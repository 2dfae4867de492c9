use geo::{Distance, Haversine};
use log::error;

use crate::coordinates::Coordinate;

/// Floor applied before a straight-line estimate is used as a trip distance (km)
pub const MIN_TRIP_DISTANCE_KM: f64 = 0.1;

/// Straight-line (great-circle) distance in kilometers.
///
/// Returns 0.0 when the inputs cannot produce a distance. Callers treat 0.0 as
/// "unknown", never as a real zero-length trip.
pub fn estimate_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let inputs = [lat1, lon1, lat2, lon2];
    if inputs.iter().any(|v| !v.is_finite()) {
        error!(
            "Error calculating straight-line distance: non-finite input {:?}",
            inputs
        );
        return 0.0;
    }

    let meters = Haversine.distance(
        Coordinate::new(lat1, lon1).to_point(),
        Coordinate::new(lat2, lon2).to_point(),
    );
    if !meters.is_finite() || meters < 0.0 {
        error!("Error calculating straight-line distance: got {}", meters);
        return 0.0;
    }

    meters / 1000.0
}

pub fn estimate_between_km(a: Coordinate, b: Coordinate) -> f64 {
    estimate_km(a.lat, a.lon, b.lat, b.lon)
}

/// Trip distance with the minimum-distance guard.
///
/// Anything under [`MIN_TRIP_DISTANCE_KM`] is re-estimated as a straight line
/// and floored.
pub fn floored_trip_km(distance_km: f64, pickup: Coordinate, dropoff: Coordinate) -> f64 {
    let distance_km = if distance_km.is_finite() {
        distance_km.max(0.0)
    } else {
        0.0
    };

    if distance_km < MIN_TRIP_DISTANCE_KM {
        estimate_between_km(pickup, dropoff).max(MIN_TRIP_DISTANCE_KM)
    } else {
        distance_km
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_degree_of_latitude_is_about_111_km() {
        let d = estimate_km(40.0, -74.0, 41.0, -74.0);
        assert!((d - 111.2).abs() < 0.5, "got {d}");
    }

    #[test]
    fn identical_points_are_zero() {
        assert_eq!(estimate_km(40.75, -73.98, 40.75, -73.98), 0.0);
    }

    #[test]
    fn non_finite_input_falls_back_to_zero() {
        assert_eq!(estimate_km(f64::NAN, -73.98, 40.75, -73.98), 0.0);
        assert_eq!(estimate_km(40.75, f64::INFINITY, 40.75, -73.98), 0.0);
    }

    #[test]
    fn short_distances_are_floored() {
        let p = Coordinate::new(40.75, -73.98);
        let q = Coordinate::new(40.7501, -73.98);
        assert_eq!(floored_trip_km(0.0, p, q), MIN_TRIP_DISTANCE_KM);
        assert_eq!(floored_trip_km(-3.0, p, q), MIN_TRIP_DISTANCE_KM);
    }

    #[test]
    fn short_routes_use_straight_line_when_longer() {
        let p = Coordinate::new(40.75, -73.98);
        let q = Coordinate::new(40.76, -73.97);
        let straight = estimate_between_km(p, q);
        assert!(straight > MIN_TRIP_DISTANCE_KM);
        assert_eq!(floored_trip_km(0.05, p, q), straight);
        assert_eq!(floored_trip_km(2.5, p, q), 2.5);
    }
}
