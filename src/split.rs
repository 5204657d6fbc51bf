//! Segment splitting at jump points.

use crate::geo_utils::planar_distance;
use crate::Coordinate;

/// Cut a polyline into contiguous segments wherever consecutive points are more
/// than `threshold` apart. Segments with fewer than 2 points are dropped.
///
/// Kept segments partition the retained points: no point appears twice, and their
/// concatenation preserves the input order.
///
/// # Example
/// ```
/// use trail_rebuild::{split_at_jumps, Coordinate};
///
/// let route: Vec<Coordinate> = [0.0, 0.001, 0.002, 0.5, 0.501]
///     .iter()
///     .map(|&lat| Coordinate::new(0.0, lat))
///     .collect();
///
/// let segments = split_at_jumps(&route, 0.005);
/// assert_eq!(segments.len(), 2);
/// assert_eq!(segments[0].len(), 3);
/// ```
pub fn split_at_jumps(points: &[Coordinate], threshold: f64) -> Vec<Vec<Coordinate>> {
    let mut segments = Vec::new();
    let Some(first) = points.first() else {
        return segments;
    };

    let mut current = vec![*first];
    for w in points.windows(2) {
        if planar_distance(&w[0], &w[1]) > threshold {
            if current.len() >= 2 {
                segments.push(std::mem::take(&mut current));
            } else {
                current.clear();
            }
        }
        current.push(w[1]);
    }
    if current.len() >= 2 {
        segments.push(current);
    }
    segments
}
