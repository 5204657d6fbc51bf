//! Uniform index-sampling simplifier.

use crate::Coordinate;

/// Downsample a polyline to at most `max_points` points.
///
/// Inputs at or under the budget are returned unchanged. Otherwise index
/// `round(i * step)` is sampled for `i` in `0..max_points - 1`, with
/// `step = (len - 1) / (max_points - 1)`, and the true last point is appended, so
/// both endpoints survive exactly. A budget below 2 is treated as 2.
///
/// # Example
/// ```
/// use trail_rebuild::{simplify_uniform, Coordinate};
///
/// let dense: Vec<Coordinate> = (0..1000)
///     .map(|i| Coordinate::new(8.0, 46.0 + i as f64 * 0.0001))
///     .collect();
///
/// let simplified = simplify_uniform(&dense, 300);
/// assert_eq!(simplified.len(), 300);
/// assert_eq!(simplified[0], dense[0]);
/// assert_eq!(simplified[299], dense[999]);
/// ```
pub fn simplify_uniform(points: &[Coordinate], max_points: usize) -> Vec<Coordinate> {
    let max_points = max_points.max(2);
    if points.len() <= max_points {
        return points.to_vec();
    }

    let step = (points.len() - 1) as f64 / (max_points - 1) as f64;
    let mut simplified: Vec<Coordinate> = (0..max_points - 1)
        .map(|i| points[(i as f64 * step).round() as usize])
        .collect();
    simplified.push(points[points.len() - 1]);
    simplified
}
