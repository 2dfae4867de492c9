use geo_types::Point;
use serde::{Deserialize, Serialize};

/// A latitude/longitude pair in degrees
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lon: f64,
}

impl Coordinate {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// Geographic point with x = longitude, y = latitude
    pub fn to_point(self) -> Point<f64> {
        Point::new(self.lon, self.lat)
    }

    pub fn is_valid(&self) -> bool {
        validate(self.lat, self.lon)
    }

    /// Both axes differ by strictly less than `tolerance` degrees
    pub fn is_near(&self, other: &Coordinate, tolerance: f64) -> bool {
        (self.lat - other.lat).abs() < tolerance && (self.lon - other.lon).abs() < tolerance
    }
}

/// Global validity: latitude in [-90, 90], longitude in [-180, 180].
/// NaN never validates.
pub fn validate(lat: f64, lon: f64) -> bool {
    (-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lon)
}

/// Fixed bounding box of the area trips are accepted in
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ServiceArea {
    pub north: f64,
    pub south: f64,
    pub east: f64,
    pub west: f64,
}

impl Default for ServiceArea {
    /// New York City
    fn default() -> Self {
        Self {
            north: 40.9176,
            south: 40.4774,
            east: -73.7004,
            west: -74.2591,
        }
    }
}

impl ServiceArea {
    pub fn contains(&self, lat: f64, lon: f64) -> bool {
        (self.south..=self.north).contains(&lat) && (self.west..=self.east).contains(&lon)
    }

    /// Bounds must be globally valid and non-degenerate
    pub fn is_well_formed(&self) -> bool {
        validate(self.north, self.east)
            && validate(self.south, self.west)
            && self.north > self.south
            && self.east > self.west
    }

    pub fn to_rect(&self) -> geo_types::Rect<f64> {
        geo_types::Rect::new(
            geo_types::Coord {
                x: self.west,
                y: self.south,
            },
            geo_types::Coord {
                x: self.east,
                y: self.north,
            },
        )
    }
}

/// Service-area membership against the given box
pub fn validate_in_area(area: &ServiceArea, lat: f64, lon: f64) -> bool {
    area.contains(lat, lon)
}
