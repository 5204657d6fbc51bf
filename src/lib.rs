//! # Trail Rebuild
//!
//! Route geometry reconstruction and repair for hiking trails.
//!
//! This library provides:
//! - Chaining of unordered OpenStreetMap ways into one oriented polyline
//! - Jump detection on existing polylines
//! - Splitting of tangled polylines and re-chaining of the pieces (stitching)
//! - Uniform simplification to a bounded point budget
//! - A batch driver that only commits a repair when it strictly reduces jumps
//!
//! ## Features
//!
//! - **`parallel`** - Enable parallel route surveys with rayon
//! - **`http`** - Enable the Overpass API geodata provider
//! - **`full`** - Enable all features
//!
//! ## Quick Start
//!
//! ```rust
//! use trail_rebuild::{Coordinate, RepairConfig, count_jumps, repair_route};
//!
//! // A trail whose middle section was stored backwards
//! let tangled: Vec<Coordinate> = [0.0, 1.0, 4.0, 3.0, 2.0, 5.0, 6.0]
//!     .iter()
//!     .map(|&i| Coordinate::new(8.0, 46.0 + i * 0.00390625))
//!     .collect();
//!
//! let config = RepairConfig::default();
//! assert_eq!(count_jumps(&tangled, config.quality_jump_threshold), 2);
//!
//! let anchors = Some((tangled[0], tangled[tangled.len() - 1]));
//! let candidate = repair_route(&tangled, anchors, &config).unwrap();
//! assert_eq!(candidate.jumps, 0);
//! ```

use geo::{Coord, LineString};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub mod error;
pub use error::{Result, RouteError};

pub mod geo_utils;

// Raw OSM topology and the way chainer
pub mod topology;
pub use topology::{chain_relation, chain_ways, NodeId, RelationId, RelationTopology, Way, WayId};

// Jump detection and route surveys
pub mod jumps;
pub use jumps::{count_jumps, find_jumps, survey_routes, Jump, JumpStats, RouteSurvey};
#[cfg(feature = "parallel")]
pub use jumps::survey_routes_parallel;

pub mod split;
pub use split::split_at_jumps;

// Segment re-chaining
pub mod stitch;
pub use stitch::{stitch_basic, stitch_directional, DroppedSegment, StitchResult};

pub mod simplify;
pub use simplify::simplify_uniform;

// External collaborators
pub mod provider;
pub use provider::{fetch_topology, FetchStrategy, GeodataProvider, OsmRef};

pub mod store;
pub use store::{InMemoryTrailStore, TrailRecord, TrailStore, TrailSummary};

pub mod progress;
pub use progress::{InMemoryProgress, JsonFileProgress, ProgressStore};

// Repair pipeline and batch driver
pub mod repair;
pub use repair::{
    repair_route, BatchRepairer, BatchReport, RepairCandidate, RepairOutcome, TrailReport,
    TrailSource,
};

// HTTP provider for the Overpass API
#[cfg(feature = "http")]
pub mod http;

#[cfg(feature = "http")]
pub use http::OverpassClient;

// ============================================================================
// Core Types
// ============================================================================

/// A WGS84 coordinate in decimal degrees, longitude first.
///
/// # Example
/// ```
/// use trail_rebuild::Coordinate;
/// let summit = Coordinate::new(7.6586, 45.9763); // lon, lat
/// assert!(summit.is_valid());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub longitude: f64,
    pub latitude: f64,
}

impl Coordinate {
    /// Create a new coordinate from longitude and latitude.
    pub fn new(longitude: f64, latitude: f64) -> Self {
        Self { longitude, latitude }
    }

    /// Check if the coordinate is finite and within WGS84 range.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && self.latitude >= -90.0
            && self.latitude <= 90.0
            && self.longitude >= -180.0
            && self.longitude <= 180.0
    }
}

impl From<Coordinate> for Coord<f64> {
    fn from(c: Coordinate) -> Self {
        Coord { x: c.longitude, y: c.latitude }
    }
}

impl From<Coord<f64>> for Coordinate {
    fn from(c: Coord<f64>) -> Self {
        Coordinate::new(c.x, c.y)
    }
}

/// Bounding box in degrees. Used as the search region for name lookups.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lng: f64,
    pub max_lng: f64,
}

impl Bounds {
    /// Create bounds from coordinates.
    pub fn from_points(points: &[Coordinate]) -> Option<Self> {
        geo_utils::compute_bounds(points)
    }

    /// Get the center point of the bounds.
    pub fn center(&self) -> Coordinate {
        Coordinate::new(
            (self.min_lng + self.max_lng) / 2.0,
            (self.min_lat + self.max_lat) / 2.0,
        )
    }

    /// Grow the box by `margin` degrees on every side.
    pub fn expand(&self, margin: f64) -> Self {
        Self {
            min_lat: self.min_lat - margin,
            max_lat: self.max_lat + margin,
            min_lng: self.min_lng - margin,
            max_lng: self.max_lng + margin,
        }
    }
}

/// A trail's persisted route: the polyline plus its start and end points.
///
/// Routes built with [`TrailRoute::from_points`] always have `start_point` equal to
/// the first point and `end_point` equal to the last. Records read back from a store
/// may predate that rule; see [`TrailRoute::endpoints_consistent`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrailRoute {
    pub points: Vec<Coordinate>,
    pub start_point: Coordinate,
    pub end_point: Coordinate,
}

impl TrailRoute {
    /// Build a route from a polyline, dropping invalid coordinates.
    ///
    /// Returns `None` if fewer than 2 valid points remain.
    pub fn from_points(points: &[Coordinate]) -> Option<Self> {
        let points: Vec<Coordinate> = points.iter().copied().filter(|p| p.is_valid()).collect();
        if points.len() < 2 {
            return None;
        }
        Some(Self {
            start_point: points[0],
            end_point: points[points.len() - 1],
            points,
        })
    }

    /// Build a route from a `geo` linestring (x = longitude, y = latitude).
    pub fn from_line_string(line: &LineString<f64>) -> Option<Self> {
        let points: Vec<Coordinate> = line.coords().map(|c| Coordinate::from(*c)).collect();
        Self::from_points(&points)
    }

    /// The polyline as a `geo` linestring, the persisted representation.
    pub fn to_line_string(&self) -> LineString<f64> {
        LineString::new(self.points.iter().map(|&p| Coord::from(p)).collect())
    }

    /// Whether start/end match the polyline's actual endpoints.
    pub fn endpoints_consistent(&self) -> bool {
        self.points.first() == Some(&self.start_point) && self.points.last() == Some(&self.end_point)
    }

    /// Great-circle length in meters.
    pub fn length_meters(&self) -> f64 {
        geo_utils::route_length_meters(&self.points)
    }
}

// ============================================================================
// Configuration
// ============================================================================

/// Tuning for the segment stitchers.
///
/// The weights mix degree distances with unitless dot products and were calibrated
/// empirically on alpine trail data. Recalibrate per dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StitchConfig {
    /// Weight of the tail-to-candidate distance in the score.
    /// Default: 3.0
    pub distance_weight: f64,

    /// Reward for continuing in the chain's local direction of travel.
    /// Default: 0.003
    pub local_direction_weight: f64,

    /// Reward for moving toward the end anchor.
    /// Default: 0.001
    pub overall_direction_weight: f64,

    /// Candidates farther than this from the chain tail are unreachable (degrees).
    /// Default: 0.05 (~5 km)
    pub reachability_cutoff: f64,

    /// How many points back from the tail the local direction is measured.
    /// Default: 5
    pub momentum_lookback: usize,

    /// Leading points within this distance of the tail are treated as the same junction.
    /// Default: 0.00001 (~1 m)
    pub junction_epsilon: f64,
}

impl Default for StitchConfig {
    fn default() -> Self {
        Self {
            distance_weight: 3.0,
            local_direction_weight: 0.003,
            overall_direction_weight: 0.001,
            reachability_cutoff: 0.05,
            momentum_lookback: 5,
            junction_epsilon: 0.00001,
        }
    }
}

/// Back-off schedule for upstream fetches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts per fetch, including the first. Default: 4
    pub max_attempts: u32,
    /// Delay before the first retry in milliseconds, doubled per attempt. Default: 500
    pub base_delay_ms: u64,
    /// Upper bound for a single delay in milliseconds. Default: 8000
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay_ms: 500,
            max_delay_ms: 8_000,
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after the given failed attempt (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(16);
        Duration::from_millis(self.base_delay_ms.saturating_mul(factor).min(self.max_delay_ms))
    }
}

/// Configuration for rebuilding and repairing trail routes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepairConfig {
    /// Maximum points in a persisted route.
    /// Default: 300
    pub max_route_points: usize,

    /// Jump thresholds tried when splitting a tangled route (degrees).
    /// The candidate with the fewest jumps wins. Default: [0.001, 0.002, 0.003, 0.004]
    pub repair_thresholds: Vec<f64>,

    /// Gap that counts as a jump when scoring routes (degrees).
    /// Default: 0.005 (~500 m)
    pub quality_jump_threshold: f64,

    /// Routes with at most this many jumps are left alone.
    /// Default: 0
    pub max_acceptable_jumps: usize,

    pub stitch: StitchConfig,

    pub retry: RetryPolicy,
}

impl Default for RepairConfig {
    fn default() -> Self {
        Self {
            max_route_points: 300,
            repair_thresholds: vec![0.001, 0.002, 0.003, 0.004],
            quality_jump_threshold: 0.005,
            max_acceptable_jumps: 0,
            stitch: StitchConfig::default(),
            retry: RetryPolicy::default(),
        }
    }
}

impl RepairConfig {
    /// Parse a (possibly partial) JSON config; missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: RepairConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the pipeline cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.max_route_points < 2 {
            return Err(RouteError::InvalidConfig(format!(
                "max_route_points must be at least 2, got {}",
                self.max_route_points
            )));
        }
        if self.repair_thresholds.is_empty() {
            return Err(RouteError::InvalidConfig("repair_thresholds is empty".to_string()));
        }
        let thresholds = self
            .repair_thresholds
            .iter()
            .chain([&self.quality_jump_threshold, &self.stitch.reachability_cutoff]);
        for &t in thresholds {
            if !(t.is_finite() && t > 0.0) {
                return Err(RouteError::InvalidConfig(format!(
                    "thresholds must be positive, got {}",
                    t
                )));
            }
        }
        if self.retry.max_attempts == 0 {
            return Err(RouteError::InvalidConfig("retry.max_attempts must be at least 1".to_string()));
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
