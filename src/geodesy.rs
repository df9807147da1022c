//! Great-circle distance and simple geometry over position fixes.

use geo::{Coord, LineString};

use crate::types::{Location, PositionFix};

/// Sphere radius used for all distances, in meters.
pub const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// Haversine distance between two locations in meters.
///
/// Zero when `a == b`. Distinct locations measure as positive unless they are
/// less than roughly 1e-160 degrees apart, where the squared half-angle
/// underflows and the result is zero.
///
/// # Example
/// ```
/// use road_monitor::geodesy::distance;
/// use road_monitor::Location;
///
/// let a = Location::new(40.0, -74.0);
/// let b = Location::new(40.001, -74.0);
/// assert!((distance(&a, &b) - 111.19).abs() < 1.0);
/// ```
pub fn distance(a: &Location, b: &Location) -> f64 {
    if a == b {
        return 0.0;
    }

    let phi1 = a.latitude.to_radians();
    let phi2 = b.latitude.to_radians();
    let d_phi = (b.latitude - a.latitude).to_radians();
    let d_lambda = (b.longitude - a.longitude).to_radians();

    let h = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());

    EARTH_RADIUS_METERS * c
}

/// Haversine distance between two fixes in meters.
pub fn fix_distance(a: &PositionFix, b: &PositionFix) -> f64 {
    distance(&a.location(), &b.location())
}

/// Total length of a path in meters, recomputed from scratch.
pub fn path_length(points: &[PositionFix]) -> f64 {
    points.windows(2).map(|w| fix_distance(&w[0], &w[1])).sum()
}

/// Convert fixes into a line string with (longitude, latitude) coordinates.
pub fn to_line_string(points: &[PositionFix]) -> LineString<f64> {
    points
        .iter()
        .map(|p| Coord {
            x: p.longitude,
            y: p.latitude,
        })
        .collect()
}

/// Bounding box of a set of fixes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lng: f64,
    pub max_lng: f64,
}

impl Bounds {
    /// Create bounds from fixes. Returns `None` for an empty slice.
    pub fn from_points(points: &[PositionFix]) -> Option<Self> {
        if points.is_empty() {
            return None;
        }
        let mut min_lat = f64::MAX;
        let mut max_lat = f64::MIN;
        let mut min_lng = f64::MAX;
        let mut max_lng = f64::MIN;

        for p in points {
            min_lat = min_lat.min(p.latitude);
            max_lat = max_lat.max(p.latitude);
            min_lng = min_lng.min(p.longitude);
            max_lng = max_lng.max(p.longitude);
        }

        Some(Self {
            min_lat,
            max_lat,
            min_lng,
            max_lng,
        })
    }

    pub fn center(&self) -> Location {
        Location::new(
            (self.min_lat + self.max_lat) / 2.0,
            (self.min_lng + self.max_lng) / 2.0,
        )
    }

    /// GeoJSON bbox order: [west, south, east, north].
    pub fn to_bbox(&self) -> [f64; 4] {
        [self.min_lng, self.min_lat, self.max_lng, self.max_lat]
    }
}
