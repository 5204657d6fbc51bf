//! # Jump Detection
//!
//! A jump is a gap between consecutive points larger than a threshold. Jumps mark
//! teleporting segments left behind by wrong way ordering or reversed segments.
//! Counts serve both as an acceptance gate and as the quality score when comparing
//! a repaired route with the original.

use crate::geo_utils::{planar_distance, planar_length};
use crate::Coordinate;

/// One detected jump: `points[index - 1] -> points[index]` spans `gap` degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Jump {
    pub index: usize,
    pub gap: f64,
}

/// Count indices `i` where `distance(points[i], points[i - 1]) > threshold`.
///
/// # Example
/// ```
/// use trail_rebuild::{count_jumps, Coordinate};
///
/// let route = vec![
///     Coordinate::new(0.0, 0.0),
///     Coordinate::new(0.0, 0.001),
///     Coordinate::new(0.0, 0.1),
/// ];
/// assert_eq!(count_jumps(&route, 0.005), 1);
/// ```
pub fn count_jumps(points: &[Coordinate], threshold: f64) -> usize {
    points
        .windows(2)
        .filter(|w| planar_distance(&w[0], &w[1]) > threshold)
        .count()
}

/// Locate every jump above `threshold`, in order.
pub fn find_jumps(points: &[Coordinate], threshold: f64) -> Vec<Jump> {
    points
        .windows(2)
        .enumerate()
        .filter_map(|(i, w)| {
            let gap = planar_distance(&w[0], &w[1]);
            (gap > threshold).then_some(Jump { index: i + 1, gap })
        })
        .collect()
}

/// Summary of a route's jumps at one threshold.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JumpStats {
    pub point_count: usize,
    pub jump_count: usize,
    /// Largest consecutive gap in degrees (0 for fewer than 2 points)
    pub max_gap: f64,
    /// Planar length in degrees
    pub planar_length: f64,
}

impl JumpStats {
    pub fn from_points(points: &[Coordinate], threshold: f64) -> Self {
        let max_gap = points
            .windows(2)
            .map(|w| planar_distance(&w[0], &w[1]))
            .fold(0.0, f64::max);
        Self {
            point_count: points.len(),
            jump_count: count_jumps(points, threshold),
            max_gap,
            planar_length: planar_length(points),
        }
    }

    pub fn is_clean(&self, max_acceptable_jumps: usize) -> bool {
        self.jump_count <= max_acceptable_jumps
    }
}

/// Read-only quality survey result for one trail.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteSurvey {
    pub trail_id: String,
    pub stats: JumpStats,
}

/// Score many routes at one threshold, worst first (ties by trail id).
pub fn survey_routes(routes: &[(String, Vec<Coordinate>)], threshold: f64) -> Vec<RouteSurvey> {
    let mut surveys: Vec<RouteSurvey> = routes
        .iter()
        .map(|(id, points)| RouteSurvey {
            trail_id: id.clone(),
            stats: JumpStats::from_points(points, threshold),
        })
        .collect();
    sort_worst_first(&mut surveys);
    surveys
}

/// Parallel version of [`survey_routes`] using rayon. Same ordering.
#[cfg(feature = "parallel")]
pub fn survey_routes_parallel(routes: &[(String, Vec<Coordinate>)], threshold: f64) -> Vec<RouteSurvey> {
    use rayon::prelude::*;

    let mut surveys: Vec<RouteSurvey> = routes
        .par_iter()
        .map(|(id, points)| RouteSurvey {
            trail_id: id.clone(),
            stats: JumpStats::from_points(points, threshold),
        })
        .collect();
    sort_worst_first(&mut surveys);
    surveys
}

fn sort_worst_first(surveys: &mut [RouteSurvey]) {
    surveys.sort_by(|a, b| {
        b.stats
            .jump_count
            .cmp(&a.stats.jump_count)
            .then_with(|| a.trail_id.cmp(&b.trail_id))
    });
}
