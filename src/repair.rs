//! # Route Repair
//!
//! The split, stitch and simplify pipeline, and the batch driver that runs it over
//! stored trails.
//!
//! ## Acceptance Rule
//! A repaired route is committed only if its jump count is strictly lower than the
//! stored route's. Anything else leaves the record untouched and is reported as
//! [`RepairOutcome::NoImprovement`]. Each commit replaces points, start and end
//! together, so an interrupted batch leaves a clean prefix of repaired trails.
//!
//! ## Batch Modes
//! - [`BatchRepairer::repair_batch`] repairs routes already in the store, using the
//!   stored start/end points as stitching anchors.
//! - [`BatchRepairer::rebuild_batch`] fetches raw topology per trail, chains it,
//!   repairs it if still tangled and simplifies it before the same acceptance rule.
//!
//! Trails are processed one at a time, ordered by id.

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::error::{Result, RouteError};
use crate::jumps::count_jumps;
use crate::progress::ProgressStore;
use crate::provider::{fetch_topology, FetchStrategy, GeodataProvider};
use crate::simplify::simplify_uniform;
use crate::split::split_at_jumps;
use crate::stitch::{stitch_basic, stitch_directional};
use crate::store::{TrailStore, TrailSummary};
use crate::topology::chain_relation;
use crate::{Coordinate, RepairConfig, TrailRoute};

// ============================================================================
// Reports
// ============================================================================

/// What happened to one trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum RepairOutcome {
    /// A better route was written.
    Updated,
    /// The stored route was already within the acceptable jump count.
    AlreadyClean,
    /// The best candidate did not reduce the jump count; nothing was written.
    NoImprovement,
    /// No stored route, or no resolvable topology upstream.
    NotFound,
    /// Upstream fetch failed for this run (retry ceiling, transport error).
    Unresolved(String),
    /// Reading or writing the store failed; the record is in its prior state.
    Error(String),
}

impl RepairOutcome {
    /// Whether a later run would reach the same result, so the trail can be
    /// checkpointed as done.
    pub fn is_final(&self) -> bool {
        !matches!(self, RepairOutcome::Unresolved(_) | RepairOutcome::Error(_))
    }
}

/// Per-trail summary line of a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrailReport {
    pub trail_id: String,
    pub name: String,
    pub outcome: RepairOutcome,
    /// Jumps in the stored route before the run, if there was one
    pub jumps_before: Option<usize>,
    /// Jumps in the best candidate, if one was produced
    pub jumps_after: Option<usize>,
    /// Points in segments the stitcher could not reach
    pub dropped_points: usize,
}

impl TrailReport {
    fn new(trail_id: &str, name: &str, outcome: RepairOutcome) -> Self {
        Self {
            trail_id: trail_id.to_string(),
            name: name.to_string(),
            outcome,
            jumps_before: None,
            jumps_after: None,
            dropped_points: 0,
        }
    }
}

/// Result of a whole batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchReport {
    pub reports: Vec<TrailReport>,
    /// Trails skipped because an earlier run already finished them
    pub skipped: usize,
}

impl BatchReport {
    pub fn count(&self, pred: impl Fn(&RepairOutcome) -> bool) -> usize {
        self.reports.iter().filter(|r| pred(&r.outcome)).count()
    }

    pub fn updated(&self) -> usize {
        self.count(|o| *o == RepairOutcome::Updated)
    }

    pub fn failed(&self) -> usize {
        self.count(|o| !o.is_final())
    }

    fn log_summary(&self, mode: &str) {
        info!(
            "[Repair] {} done: {} trails, {} updated, {} clean, {} no improvement, {} not found, {} failed, {} skipped",
            mode,
            self.reports.len(),
            self.updated(),
            self.count(|o| *o == RepairOutcome::AlreadyClean),
            self.count(|o| *o == RepairOutcome::NoImprovement),
            self.count(|o| *o == RepairOutcome::NotFound),
            self.failed(),
            self.skipped
        );
    }
}

// ============================================================================
// Repair Pipeline
// ============================================================================

/// Best repair found for one polyline.
#[derive(Debug, Clone, PartialEq)]
pub struct RepairCandidate {
    /// Stitched and simplified polyline
    pub points: Vec<Coordinate>,
    /// Jumps at the quality threshold
    pub jumps: usize,
    /// Split threshold that produced this candidate
    pub split_threshold: f64,
    pub segments: usize,
    pub dropped_points: usize,
}

/// Split, stitch and simplify `points` at every configured threshold and return the
/// candidate with the fewest jumps (fewer dropped points, then earlier threshold,
/// break ties).
///
/// With `anchors` (start, end) the directional stitcher is used, otherwise the basic
/// one. Returns `None` when no threshold yields a usable polyline. The caller decides
/// whether the candidate is an improvement.
pub fn repair_route(
    points: &[Coordinate],
    anchors: Option<(Coordinate, Coordinate)>,
    config: &RepairConfig,
) -> Option<RepairCandidate> {
    let mut best: Option<RepairCandidate> = None;

    for &threshold in &config.repair_thresholds {
        let segments = split_at_jumps(points, threshold);
        if segments.is_empty() {
            debug!("[Repair] threshold {}: no usable segments", threshold);
            continue;
        }

        let stitched = match anchors {
            Some((start, end)) => stitch_directional(&segments, start, end, &config.stitch),
            None => stitch_basic(&segments, config.stitch.junction_epsilon),
        };
        if stitched.points.len() < 2 {
            continue;
        }

        let simplified = simplify_uniform(&stitched.points, config.max_route_points);
        let candidate = RepairCandidate {
            jumps: count_jumps(&simplified, config.quality_jump_threshold),
            points: simplified,
            split_threshold: threshold,
            segments: segments.len(),
            dropped_points: stitched.dropped_points(),
        };
        debug!(
            "[Repair] threshold {}: {} segments -> {} points, {} jumps, {} dropped",
            threshold,
            candidate.segments,
            candidate.points.len(),
            candidate.jumps,
            candidate.dropped_points
        );

        let better = match &best {
            None => true,
            Some(b) => (candidate.jumps, candidate.dropped_points) < (b.jumps, b.dropped_points),
        };
        if better {
            best = Some(candidate);
        }
    }

    best
}

// ============================================================================
// Batch Driver
// ============================================================================

/// A trail to rebuild from upstream topology.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrailSource {
    pub trail_id: String,
    pub name: String,
    pub strategy: FetchStrategy,
}

/// Drives repairs over a trail store.
pub struct BatchRepairer<'a, S: TrailStore + ?Sized> {
    store: &'a S,
    config: RepairConfig,
}

impl<'a, S: TrailStore + ?Sized> BatchRepairer<'a, S> {
    pub fn new(store: &'a S, config: RepairConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { store, config })
    }

    pub fn config(&self) -> &RepairConfig {
        &self.config
    }

    /// Repair every stored trail whose route has too many jumps.
    ///
    /// Fails only if the trail list cannot be read; per-trail failures end up in the
    /// report.
    pub async fn repair_batch(&self, progress: &mut dyn ProgressStore) -> Result<BatchReport> {
        let mut trails = self.store.list_trails().await?;
        trails.sort_by(|a, b| a.trail_id.cmp(&b.trail_id));
        info!("[Repair] repair batch over {} trails", trails.len());

        let mut batch = BatchReport::default();
        for trail in &trails {
            if progress.is_done(&trail.trail_id) {
                batch.skipped += 1;
                continue;
            }
            let report = self.repair_trail(trail).await;
            self.finish(report, progress, &mut batch);
        }

        batch.log_summary("repair");
        Ok(batch)
    }

    /// Repair one stored trail in place.
    pub async fn repair_trail(&self, trail: &TrailSummary) -> TrailReport {
        let (id, name) = (trail.trail_id.as_str(), trail.name.as_str());
        let original = match self.store.read_route(id).await {
            Ok(Some(route)) => route,
            Ok(None) => return TrailReport::new(id, name, RepairOutcome::NotFound),
            Err(e) => return TrailReport::new(id, name, RepairOutcome::Error(e.to_string())),
        };

        let before = count_jumps(&original.points, self.config.quality_jump_threshold);
        let mut report = TrailReport::new(id, name, RepairOutcome::NoImprovement);
        report.jumps_before = Some(before);

        if before <= self.config.max_acceptable_jumps {
            report.outcome = RepairOutcome::AlreadyClean;
            report.jumps_after = Some(before);
            return report;
        }

        let anchors = Some((original.start_point, original.end_point));
        let Some(candidate) = repair_route(&original.points, anchors, &self.config) else {
            return report;
        };
        report.jumps_after = Some(candidate.jumps);
        report.dropped_points = candidate.dropped_points;

        if candidate.jumps < before {
            report.outcome = self.commit(id, &candidate.points).await;
        }
        report
    }

    /// Rebuild trails from upstream topology.
    ///
    /// Sources are processed in trail id order. Trails whose stored route is already
    /// clean are skipped before any upstream request.
    pub async fn rebuild_batch<P>(
        &self,
        provider: &P,
        sources: &[TrailSource],
        progress: &mut dyn ProgressStore,
    ) -> Result<BatchReport>
    where
        P: GeodataProvider + ?Sized,
    {
        let mut ordered: Vec<&TrailSource> = sources.iter().collect();
        ordered.sort_by(|a, b| a.trail_id.cmp(&b.trail_id));
        info!("[Repair] rebuild batch over {} trails", ordered.len());

        let mut batch = BatchReport::default();
        for source in ordered {
            if progress.is_done(&source.trail_id) {
                batch.skipped += 1;
                continue;
            }
            let report = self.rebuild_trail(provider, source).await;
            self.finish(report, progress, &mut batch);
        }

        batch.log_summary("rebuild");
        Ok(batch)
    }

    /// Rebuild one trail from upstream topology.
    pub async fn rebuild_trail<P>(&self, provider: &P, source: &TrailSource) -> TrailReport
    where
        P: GeodataProvider + ?Sized,
    {
        let (id, name) = (source.trail_id.as_str(), source.name.as_str());
        let existing = match self.store.read_route(id).await {
            Ok(route) => route,
            Err(e) => return TrailReport::new(id, name, RepairOutcome::Error(e.to_string())),
        };
        let threshold = self.config.quality_jump_threshold;
        let existing_jumps = existing.as_ref().map(|r| count_jumps(&r.points, threshold));

        let mut report = TrailReport::new(id, name, RepairOutcome::NoImprovement);
        report.jumps_before = existing_jumps;
        if let Some(jumps) = existing_jumps.filter(|&j| j <= self.config.max_acceptable_jumps) {
            report.outcome = RepairOutcome::AlreadyClean;
            report.jumps_after = Some(jumps);
            return report;
        }

        let chained = match fetch_topology(provider, &source.strategy, &self.config.retry).await {
            Ok(topology) => chain_relation(&topology, self.config.stitch.junction_epsilon),
            Err(e) => Err(e),
        };
        let chained = match chained {
            Ok(points) => points,
            Err(RouteError::NotFound { .. }) | Err(RouteError::EmptyTopology { .. }) => {
                report.outcome = RepairOutcome::NotFound;
                return report;
            }
            Err(e) => {
                warn!("[Repair] {} ({}): upstream unavailable: {}", id, name, e);
                report.outcome = RepairOutcome::Unresolved(e.to_string());
                return report;
            }
        };

        let mut points = simplify_uniform(&chained, self.config.max_route_points);
        let mut jumps = count_jumps(&points, threshold);
        if jumps > self.config.max_acceptable_jumps {
            let anchors = existing.as_ref().map(|r| (r.start_point, r.end_point));
            if let Some(candidate) = repair_route(&chained, anchors, &self.config) {
                if candidate.jumps < jumps {
                    report.dropped_points = candidate.dropped_points;
                    jumps = candidate.jumps;
                    points = candidate.points;
                }
            }
        }
        report.jumps_after = Some(jumps);

        let improves = existing_jumps.map_or(true, |before| jumps < before);
        if improves {
            report.outcome = self.commit(id, &points).await;
        }
        report
    }

    async fn commit(&self, trail_id: &str, points: &[Coordinate]) -> RepairOutcome {
        let Some(route) = TrailRoute::from_points(points) else {
            warn!(
                "[Repair] {}: candidate has fewer than 2 valid points, not written",
                trail_id
            );
            return RepairOutcome::NoImprovement;
        };
        match self.store.write_route(trail_id, &route).await {
            Ok(()) => RepairOutcome::Updated,
            Err(e) => {
                warn!("[Repair] {}: write failed, record left unchanged: {}", trail_id, e);
                RepairOutcome::Error(e.to_string())
            }
        }
    }

    fn finish(&self, report: TrailReport, progress: &mut dyn ProgressStore, batch: &mut BatchReport) {
        info!(
            "[Repair] {} ({}): jumps {:?} -> {:?}, {:?}",
            report.trail_id, report.name, report.jumps_before, report.jumps_after, report.outcome
        );
        if report.dropped_points > 0 {
            warn!(
                "[Repair] {}: stitcher dropped {} points",
                report.trail_id, report.dropped_points
            );
        }
        if report.outcome.is_final() {
            if let Err(e) = progress.mark_done(&report.trail_id, &report) {
                warn!("[Repair] {}: progress checkpoint failed: {}", report.trail_id, e);
            }
        }
        batch.reports.push(report);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // 2^-8 degrees: exact in f64, between the 0.003 and 0.004 split thresholds
    const STEP: f64 = 0.00390625;

    fn line(units: &[f64], spacing: f64) -> Vec<Coordinate> {
        units.iter().map(|&u| Coordinate::new(8.0, 46.0 + u * spacing)).collect()
    }

    #[test]
    fn test_repair_route_fixes_reversed_middle() {
        let tangled = line(&[0.0, 1.0, 4.0, 3.0, 2.0, 5.0, 6.0], STEP);
        let config = RepairConfig::default();
        assert_eq!(count_jumps(&tangled, config.quality_jump_threshold), 2);

        let candidate = repair_route(&tangled, Some((tangled[0], tangled[6])), &config).unwrap();
        assert_eq!(candidate.jumps, 0);
        assert_eq!(candidate.points, line(&[0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0], STEP));
        assert_eq!(candidate.dropped_points, 0);
        assert_eq!(candidate.split_threshold, 0.004);
    }

    #[test]
    fn test_repair_route_without_anchors_uses_basic_stitcher() {
        let tangled = line(&[0.0, 1.0, 4.0, 3.0, 2.0, 5.0, 6.0], STEP);
        let candidate = repair_route(&tangled, None, &RepairConfig::default()).unwrap();
        assert_eq!(candidate.jumps, 0);
        assert_eq!(candidate.points.len(), 7);
    }

    #[test]
    fn test_repair_route_keeps_shared_node_segment_forward() {
        // 2^-11 degree steps; a short way starting on the previous way's last node
        // was stored after the way that follows it
        let u = 0.00048828125;
        let units: Vec<f64> = (0..=20).chain(23..=40).chain(20..=22).map(f64::from).collect();
        let stored = line(&units, u);
        let config = RepairConfig::default();
        assert_eq!(count_jumps(&stored, config.quality_jump_threshold), 1);

        let anchors = Some((stored[0], line(&[40.0], u)[0]));
        let candidate = repair_route(&stored, anchors, &config).unwrap();
        let expected: Vec<f64> = (0..=40).map(f64::from).collect();
        assert_eq!(candidate.points, line(&expected, u));
        assert!(candidate.points.windows(2).all(|w| w[1].latitude > w[0].latitude));
        assert_eq!(candidate.jumps, 0);
    }

    #[test]
    fn test_repair_route_none_when_every_point_isolated() {
        let scattered = line(&[0.0, 1.0, 2.0, 3.0], 0.01);
        assert!(repair_route(&scattered, None, &RepairConfig::default()).is_none());
    }

    #[test]
    fn test_repair_route_respects_point_budget() {
        let mut units: Vec<f64> = (0..400).map(|i| i as f64).collect();
        units[100..200].reverse();
        let tangled = line(&units, 0.0005);
        let config = RepairConfig::default();
        let candidate = repair_route(&tangled, Some((tangled[0], tangled[399])), &config).unwrap();
        assert!(candidate.points.len() <= config.max_route_points);
        assert_eq!(candidate.points[0], tangled[0]);
        assert_eq!(candidate.points[candidate.points.len() - 1], tangled[399]);
        assert_eq!(candidate.jumps, 0);
    }

    #[test]
    fn test_outcome_finality() {
        assert!(RepairOutcome::Updated.is_final());
        assert!(RepairOutcome::NoImprovement.is_final());
        assert!(RepairOutcome::NotFound.is_final());
        assert!(!RepairOutcome::Unresolved("429".to_string()).is_final());
        assert!(!RepairOutcome::Error("db down".to_string()).is_final());
    }

    #[test]
    fn test_report_json_shape() {
        let mut report = TrailReport::new("t1", "Alpweg", RepairOutcome::Unresolved("rate limited".to_string()));
        report.jumps_before = Some(3);
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["outcome"]["status"], "unresolved");
        assert_eq!(json["jumps_before"], 3);
    }
}
