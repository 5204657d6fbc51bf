//! # Geographic Utilities
//!
//! Geometry primitives used by the chainer, splitter and stitchers.
//!
//! | Function | Description |
//! |----------|-------------|
//! | [`planar_distance`] | Euclidean distance in degree-space (the heuristic metric) |
//! | [`unit_vector`] | Normalised direction between two coordinates in degree-space |
//! | [`dot`] | Dot product of two direction vectors |
//! | [`planar_length`] | Sum of planar distances along a polyline |
//! | [`haversine_distance`] | Great-circle distance in meters, for reporting only |
//! | [`route_length_meters`] | Great-circle length of a polyline in meters |
//! | [`compute_bounds`] | Bounding box of a polyline |
//!
//! ## Coordinate System
//!
//! All heuristics treat (longitude, latitude) as a flat 2-vector. No projection is
//! applied, so one unit is one degree; 0.005 is roughly 500 m at mid latitudes.
//! Thresholds in [`crate::RepairConfig`] are calibrated in these units. Switching the
//! heuristics to a metric distance means re-deriving every threshold.

use geo::{Distance, Haversine, Point};
use crate::{Bounds, Coordinate};

// =============================================================================
// Planar (degree-space) Functions
// =============================================================================

/// Planar Euclidean distance between two coordinates in degree units.
///
/// `sqrt((a.lon - b.lon)^2 + (a.lat - b.lat)^2)`. Not geodesically accurate.
/// NaN inputs propagate; callers validate coordinates at ingress.
///
/// ```rust
/// use trail_rebuild::{Coordinate, geo_utils};
///
/// let a = Coordinate::new(0.0, 0.0);
/// let b = Coordinate::new(3.0, 4.0);
/// assert_eq!(geo_utils::planar_distance(&a, &b), 5.0);
/// ```
#[inline]
pub fn planar_distance(a: &Coordinate, b: &Coordinate) -> f64 {
    let dlon = a.longitude - b.longitude;
    let dlat = a.latitude - b.latitude;
    (dlon * dlon + dlat * dlat).sqrt()
}

/// Unit vector `[dlon, dlat]` pointing from `from` to `to`.
///
/// Returns the zero vector when the points coincide (or the distance is not finite),
/// so a degenerate direction contributes nothing to a dot-product score.
#[inline]
pub fn unit_vector(from: &Coordinate, to: &Coordinate) -> [f64; 2] {
    let len = planar_distance(from, to);
    if len == 0.0 || !len.is_finite() {
        return [0.0, 0.0];
    }
    [
        (to.longitude - from.longitude) / len,
        (to.latitude - from.latitude) / len,
    ]
}

#[inline]
pub fn dot(a: [f64; 2], b: [f64; 2]) -> f64 {
    a[0] * b[0] + a[1] * b[1]
}

/// Total planar length of a polyline in degree units.
pub fn planar_length(points: &[Coordinate]) -> f64 {
    points
        .windows(2)
        .map(|w| planar_distance(&w[0], &w[1]))
        .sum()
}

// =============================================================================
// Metric Functions (reporting)
// =============================================================================

/// Great-circle distance between two coordinates in meters.
///
/// ```rust
/// use trail_rebuild::{Coordinate, geo_utils};
///
/// let london = Coordinate::new(-0.1278, 51.5074);
/// let paris = Coordinate::new(2.3522, 48.8566);
///
/// let distance = geo_utils::haversine_distance(&london, &paris);
/// assert!((distance - 343_560.0).abs() < 5000.0);
/// ```
#[inline]
pub fn haversine_distance(a: &Coordinate, b: &Coordinate) -> f64 {
    let point1 = Point::new(a.longitude, a.latitude);
    let point2 = Point::new(b.longitude, b.latitude);
    Haversine::distance(point1, point2)
}

/// Great-circle length of a polyline in meters. Empty or single-point input is 0.
pub fn route_length_meters(points: &[Coordinate]) -> f64 {
    if points.len() < 2 {
        return 0.0;
    }

    points
        .windows(2)
        .map(|w| haversine_distance(&w[0], &w[1]))
        .sum()
}

// =============================================================================
// Bounding Box
// =============================================================================

/// Bounding box of a polyline, or `None` for empty input.
pub fn compute_bounds(points: &[Coordinate]) -> Option<Bounds> {
    if points.is_empty() {
        return None;
    }
    let (lats, lngs): (Vec<f64>, Vec<f64>) = points.iter().map(|p| (p.latitude, p.longitude)).unzip();
    let min = |v: &[f64]| v.iter().copied().fold(f64::INFINITY, f64::min);
    let max = |v: &[f64]| v.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let (min_lat, max_lat, min_lng, max_lng) = (min(&lats), max(&lats), min(&lngs), max(&lngs));

    Some(Bounds { min_lat, max_lat, min_lng, max_lng })
}

// =============================================================================
// Unit Tests
// =============================================================================
