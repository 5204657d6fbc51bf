//! # Segment Stitching
//!
//! Re-chains disordered, independently oriented segments into one polyline.
//!
//! Two variants:
//! - [`stitch_directional`] (primary): grows the chain from the segment nearest the
//!   start anchor, scoring reachable continuations by distance with a small bonus
//!   for keeping the local direction of travel and for heading toward the end
//!   anchor. Candidates beyond the reachability cutoff are never joined.
//! - [`stitch_basic`] (fallback when anchors are unknown): grows from the longest
//!   segment at both ends, always attaching the nearest remaining endpoint. It has
//!   no cutoff and will join unrelated, distant segments.
//!
//! Pure nearest-endpoint stitching tends to take shortcuts that jump backward
//! across the trail when two unrelated segments happen to end close together; the
//! direction terms suppress that.

use std::collections::VecDeque;

use log::{debug, warn};
use rstar::{PointDistance, RTree, RTreeObject, AABB};

use crate::geo_utils::{dot, planar_distance, unit_vector};
use crate::{Coordinate, StitchConfig};

/// A segment the stitcher could not attach.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DroppedSegment {
    /// Index into the input segment list
    pub index: usize,
    pub point_count: usize,
}

/// Output of a stitcher.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StitchResult {
    pub points: Vec<Coordinate>,
    /// Number of input segments that made it into `points`
    pub used_segments: usize,
    /// Segments left out because nothing reachable connected them
    pub dropped: Vec<DroppedSegment>,
}

impl StitchResult {
    /// Total points in dropped segments.
    pub fn dropped_points(&self) -> usize {
        self.dropped.iter().map(|d| d.point_count).sum()
    }
}

// =============================================================================
// R-tree Indexed Segment Endpoints
// =============================================================================

/// One end of a segment. `is_tail` endpoints start the reversed orientation.
#[derive(Debug, Clone, Copy)]
struct SegmentEnd {
    segment: usize,
    is_tail: bool,
    lng: f64,
    lat: f64,
}

impl RTreeObject for SegmentEnd {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_point([self.lng, self.lat])
    }
}

impl PointDistance for SegmentEnd {
    fn distance_2(&self, point: &[f64; 2]) -> f64 {
        let dlng = self.lng - point[0];
        let dlat = self.lat - point[1];
        dlng * dlng + dlat * dlat
    }
}

fn build_endpoint_tree(segments: &[Vec<Coordinate>]) -> RTree<SegmentEnd> {
    let ends: Vec<SegmentEnd> = segments
        .iter()
        .enumerate()
        .filter(|(_, seg)| !seg.is_empty())
        .flat_map(|(i, seg)| {
            let head = seg[0];
            let tail = seg[seg.len() - 1];
            [
                SegmentEnd { segment: i, is_tail: false, lng: head.longitude, lat: head.latitude },
                SegmentEnd { segment: i, is_tail: true, lng: tail.longitude, lat: tail.latitude },
            ]
        })
        .collect();
    RTree::bulk_load(ends)
}

/// Append `segment` (reversed if asked) to `chain`, skipping a leading point that
/// duplicates the current tail.
fn append_oriented(chain: &mut Vec<Coordinate>, segment: &[Coordinate], reversed: bool, epsilon: f64) {
    let oriented: Box<dyn Iterator<Item = &Coordinate>> = if reversed {
        Box::new(segment.iter().rev())
    } else {
        Box::new(segment.iter())
    };
    for (i, p) in oriented.enumerate() {
        if i == 0 {
            if let Some(tail) = chain.last() {
                if planar_distance(tail, p) <= epsilon {
                    continue;
                }
            }
        }
        chain.push(*p);
    }
}

/// Unit vector of a segment's first non-degenerate step when entered from its head,
/// or from its tail if `reversed`.
fn leading_direction(segment: &[Coordinate], reversed: bool) -> [f64; 2] {
    let (Some(first), Some(last)) = (segment.first(), segment.last()) else {
        return [0.0, 0.0];
    };
    let next = if reversed {
        segment.iter().rev().find(|p| planar_distance(last, p) > 0.0)
    } else {
        segment.iter().find(|p| planar_distance(first, p) > 0.0)
    };
    match (next, reversed) {
        (Some(p), true) => unit_vector(last, p),
        (Some(p), false) => unit_vector(first, p),
        (None, _) => [0.0, 0.0],
    }
}

fn collect_dropped(segments: &[Vec<Coordinate>], used: &[bool]) -> Vec<DroppedSegment> {
    segments
        .iter()
        .enumerate()
        .filter(|(i, seg)| !used[*i] && !seg.is_empty())
        .map(|(index, seg)| DroppedSegment { index, point_count: seg.len() })
        .collect()
}

// =============================================================================
// Directional Stitcher
// =============================================================================

/// Stitch segments from `start_anchor` toward `end_anchor`.
///
/// 1. Seed with the segment whose endpoint is nearest the start anchor, oriented to
///    begin at that endpoint.
/// 2. Repeatedly score every unused segment in both orientations whose starting
///    endpoint lies within `reachability_cutoff` of the chain tail:
///    `distance * distance_weight - local_direction_weight * dot(dir, local)
///    - overall_direction_weight * dot(dir, overall)`, lowest wins. `local` points from
///    `momentum_lookback` points back to the tail, `overall` from start to end anchor.
/// 3. Stop when nothing is reachable. Leftover segments are reported in
///    [`StitchResult::dropped`].
///
/// A candidate starting on the tail itself (a shared node) is scored with the
/// direction of its own first step.
///
/// # Example
/// ```
/// use trail_rebuild::{stitch_directional, Coordinate, StitchConfig};
///
/// let c = Coordinate::new;
/// let segments = vec![
///     vec![c(0.0, 0.0), c(0.0, 0.001)],
///     vec![c(0.0, 0.003), c(0.0, 0.002)],
/// ];
/// let result = stitch_directional(&segments, c(0.0, 0.0), c(0.0, 0.003), &StitchConfig::default());
/// assert_eq!(result.points.len(), 4);
/// assert_eq!(result.points[3], c(0.0, 0.003));
/// ```
pub fn stitch_directional(
    segments: &[Vec<Coordinate>],
    start_anchor: Coordinate,
    end_anchor: Coordinate,
    config: &StitchConfig,
) -> StitchResult {
    let mut used = vec![false; segments.len()];

    // Seed: nearest endpoint to the start anchor, first segment wins ties
    let mut seed: Option<(usize, bool, f64)> = None;
    for (i, seg) in segments.iter().enumerate() {
        if seg.is_empty() {
            continue;
        }
        for (is_tail, end) in [(false, seg[0]), (true, seg[seg.len() - 1])] {
            let d = planar_distance(&start_anchor, &end);
            if seed.map_or(true, |(_, _, best)| d < best) {
                seed = Some((i, is_tail, d));
            }
        }
    }
    let Some((seed_idx, seed_reversed, _)) = seed else {
        return StitchResult::default();
    };

    let mut chain: Vec<Coordinate> = Vec::new();
    append_oriented(&mut chain, &segments[seed_idx], seed_reversed, config.junction_epsilon);
    used[seed_idx] = true;
    let mut used_segments = 1;

    let tree = build_endpoint_tree(segments);
    let overall = unit_vector(&start_anchor, &end_anchor);
    let max_squared_radius = config.reachability_cutoff * config.reachability_cutoff;

    loop {
        let tail = chain[chain.len() - 1];
        let back = chain[chain.len() - 1 - config.momentum_lookback.min(chain.len() - 1)];
        let local = unit_vector(&back, &tail);

        let mut best: Option<(f64, usize, bool)> = None;
        for end in tree.locate_within_distance([tail.longitude, tail.latitude], max_squared_radius) {
            if used[end.segment] {
                continue;
            }
            let start = Coordinate::new(end.lng, end.lat);
            let distance = planar_distance(&tail, &start);
            if distance > config.reachability_cutoff {
                continue;
            }
            // A start on the tail itself has no tail-to-start direction; use the
            // direction the segment leaves in.
            let direction = if distance <= config.junction_epsilon {
                leading_direction(&segments[end.segment], end.is_tail)
            } else {
                unit_vector(&tail, &start)
            };
            let score = distance * config.distance_weight
                - config.local_direction_weight * dot(direction, local)
                - config.overall_direction_weight * dot(direction, overall);

            let candidate = (score, end.segment, end.is_tail);
            let better = match best {
                None => true,
                Some(b) => {
                    candidate.0 < b.0
                        || (candidate.0 == b.0 && (candidate.1, candidate.2) < (b.1, b.2))
                }
            };
            if better {
                best = Some(candidate);
            }
        }

        let Some((score, idx, reversed)) = best else {
            break;
        };
        debug!(
            "[Stitch] attach segment {} ({}){} score={:.6}",
            idx,
            segments[idx].len(),
            if reversed { " reversed" } else { "" },
            score
        );
        append_oriented(&mut chain, &segments[idx], reversed, config.junction_epsilon);
        used[idx] = true;
        used_segments += 1;
    }

    let dropped = collect_dropped(segments, &used);
    if !dropped.is_empty() {
        warn!(
            "[Stitch] dropped {} unreachable segments ({} points) beyond {:.4} deg",
            dropped.len(),
            dropped.iter().map(|d| d.point_count).sum::<usize>(),
            config.reachability_cutoff
        );
    }

    StitchResult { points: chain, used_segments, dropped }
}

// =============================================================================
// Basic Stitcher
// =============================================================================

/// Stitch segments by nearest endpoint, growing from the longest segment at both ends.
///
/// Every non-empty segment is attached; there is no distance cutoff.
pub fn stitch_basic(segments: &[Vec<Coordinate>], junction_epsilon: f64) -> StitchResult {
    let mut used = vec![false; segments.len()];

    // Longest segment seeds the chain, first one wins ties
    let seed = segments
        .iter()
        .enumerate()
        .filter(|(_, seg)| !seg.is_empty())
        .fold(None::<(usize, usize)>, |best, (i, seg)| match best {
            Some((_, len)) if len >= seg.len() => best,
            _ => Some((i, seg.len())),
        });
    let Some((seed_idx, _)) = seed else {
        return StitchResult::default();
    };

    let mut chain: VecDeque<Coordinate> = segments[seed_idx].iter().copied().collect();
    used[seed_idx] = true;
    let mut used_segments = 1;

    loop {
        let (Some(&head), Some(&tail)) = (chain.front(), chain.back()) else {
            break;
        };

        // (distance, segment, attach_at_tail, reversed)
        let mut best: Option<(f64, usize, bool, bool)> = None;
        for (i, seg) in segments.iter().enumerate() {
            if used[i] || seg.is_empty() {
                continue;
            }
            let (seg_head, seg_tail) = (seg[0], seg[seg.len() - 1]);
            let options = [
                (planar_distance(&tail, &seg_head), true, false),
                (planar_distance(&tail, &seg_tail), true, true),
                (planar_distance(&head, &seg_tail), false, false),
                (planar_distance(&head, &seg_head), false, true),
            ];
            for (d, at_tail, reversed) in options {
                if best.map_or(true, |b| d < b.0) {
                    best = Some((d, i, at_tail, reversed));
                }
            }
        }

        let Some((_, idx, at_tail, reversed)) = best else {
            break;
        };
        let mut oriented: Vec<Coordinate> = segments[idx].clone();
        if reversed {
            oriented.reverse();
        }

        if at_tail {
            let skip = usize::from(planar_distance(&tail, &oriented[0]) <= junction_epsilon);
            chain.extend(oriented.into_iter().skip(skip));
        } else {
            let keep = if planar_distance(&head, &oriented[oriented.len() - 1]) <= junction_epsilon {
                oriented.len() - 1
            } else {
                oriented.len()
            };
            for p in oriented[..keep].iter().rev() {
                chain.push_front(*p);
            }
        }
        used[idx] = true;
        used_segments += 1;
    }

    StitchResult {
        points: chain.into_iter().collect(),
        used_segments,
        dropped: collect_dropped(segments, &used),
    }
}
