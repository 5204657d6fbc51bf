//! Tests for the batch repair and rebuild drivers

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use trail_rebuild::{
    count_jumps, BatchRepairer, Bounds, Coordinate, FetchStrategy, GeodataProvider,
    InMemoryProgress, InMemoryTrailStore, OsmRef, ProgressStore, RelationId, RelationTopology,
    RepairConfig, RepairOutcome, Result, RetryPolicy, RouteError, TrailRecord, TrailRoute,
    TrailSource, TrailStore, TrailSummary, Way, WayId,
};

// 2^-8 degrees, exact in f64
const STEP: f64 = 0.00390625;

fn route(units: &[f64], spacing: f64) -> TrailRoute {
    let points: Vec<Coordinate> =
        units.iter().map(|&u| Coordinate::new(8.0, 46.0 + u * spacing)).collect();
    TrailRoute::from_points(&points).unwrap()
}

fn tangled() -> TrailRoute {
    route(&[0.0, 1.0, 4.0, 3.0, 2.0, 5.0, 6.0], STEP)
}

fn record(trail_id: &str, route: Option<TrailRoute>) -> TrailRecord {
    TrailRecord { trail_id: trail_id.to_string(), name: format!("Trail {}", trail_id), route }
}

fn config() -> RepairConfig {
    RepairConfig {
        retry: RetryPolicy { max_attempts: 2, base_delay_ms: 0, max_delay_ms: 0 },
        ..RepairConfig::default()
    }
}

fn outcomes(reports: &[trail_rebuild::TrailReport]) -> Vec<(&str, &RepairOutcome)> {
    reports.iter().map(|r| (r.trail_id.as_str(), &r.outcome)).collect()
}

/// Store that refuses writes for some trails.
struct FlakyStore {
    inner: InMemoryTrailStore,
    failing_writes: HashSet<String>,
    fail_listing: bool,
}

#[async_trait]
impl TrailStore for FlakyStore {
    async fn list_trails(&self) -> Result<Vec<TrailSummary>> {
        if self.fail_listing {
            return Err(RouteError::Upstream("database unreachable".to_string()));
        }
        self.inner.list_trails().await
    }

    async fn read_route(&self, trail_id: &str) -> Result<Option<TrailRoute>> {
        self.inner.read_route(trail_id).await
    }

    async fn write_route(&self, trail_id: &str, route: &TrailRoute) -> Result<()> {
        if self.failing_writes.contains(trail_id) {
            return Err(RouteError::Persistence {
                trail_id: trail_id.to_string(),
                message: "connection reset".to_string(),
            });
        }
        self.inner.write_route(trail_id, route).await
    }
}

// ============================================================================
// Repair batch
// ============================================================================

#[tokio::test]
async fn test_repair_batch_outcomes() {
    let clean = route(&[0.0, 1.0, 2.0], STEP);
    let store = InMemoryTrailStore::new(vec![
        record("c", None),
        record("a", Some(tangled())),
        record("b", Some(clean.clone())),
    ]);
    let repairer = BatchRepairer::new(&store, config()).unwrap();
    let mut progress = InMemoryProgress::new();

    let batch = repairer.repair_batch(&mut progress).await.unwrap();
    assert_eq!(
        outcomes(&batch.reports),
        vec![
            ("a", &RepairOutcome::Updated),
            ("b", &RepairOutcome::AlreadyClean),
            ("c", &RepairOutcome::NotFound),
        ]
    );
    assert_eq!(batch.reports[0].jumps_before, Some(2));
    assert_eq!(batch.reports[0].jumps_after, Some(0));

    let repaired = store.record("a").await.unwrap().route.unwrap();
    assert_eq!(repaired, route(&[0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0], STEP));
    assert!(repaired.endpoints_consistent());
    assert_eq!(store.record("b").await.unwrap().route, Some(clean));
    assert_eq!(progress.len(), 3);
}

#[tokio::test]
async fn test_no_improvement_leaves_route_untouched() {
    // A real gap the stitchers cannot close: every candidate keeps one jump
    let gapped = route(&[0.0, 0.5, 1.0, 9.5, 10.0], 0.001);
    // Every point isolated: no candidate at all
    let scattered = route(&[0.0, 1.0, 2.0, 3.0], 0.01);
    let store = InMemoryTrailStore::new(vec![
        record("gapped", Some(gapped.clone())),
        record("scattered", Some(scattered.clone())),
    ]);
    let repairer = BatchRepairer::new(&store, config()).unwrap();

    let batch = repairer.repair_batch(&mut InMemoryProgress::new()).await.unwrap();
    assert_eq!(
        outcomes(&batch.reports),
        vec![("gapped", &RepairOutcome::NoImprovement), ("scattered", &RepairOutcome::NoImprovement)]
    );
    assert_eq!(batch.reports[0].jumps_before, Some(1));
    assert_eq!(batch.reports[0].jumps_after, Some(1));
    assert_eq!(batch.reports[1].jumps_after, None);

    assert_eq!(store.record("gapped").await.unwrap().route, Some(gapped));
    assert_eq!(store.record("scattered").await.unwrap().route, Some(scattered));
}

#[tokio::test]
async fn test_write_failure_does_not_stop_batch() {
    let store = FlakyStore {
        inner: InMemoryTrailStore::new(vec![record("a", Some(tangled())), record("b", Some(tangled()))]),
        failing_writes: ["a".to_string()].into_iter().collect(),
        fail_listing: false,
    };
    let repairer = BatchRepairer::new(&store, config()).unwrap();
    let mut progress = InMemoryProgress::new();

    let batch = repairer.repair_batch(&mut progress).await.unwrap();
    assert!(matches!(batch.reports[0].outcome, RepairOutcome::Error(_)));
    assert_eq!(batch.reports[1].outcome, RepairOutcome::Updated);
    assert_eq!(batch.failed(), 1);

    assert_eq!(store.inner.record("a").await.unwrap().route, Some(tangled()));
    assert!(!progress.is_done("a"));
    assert!(progress.is_done("b"));
}

#[tokio::test]
async fn test_missing_trail_list_is_fatal() {
    let store = FlakyStore {
        inner: InMemoryTrailStore::default(),
        failing_writes: HashSet::new(),
        fail_listing: true,
    };
    let repairer = BatchRepairer::new(&store, config()).unwrap();
    assert!(repairer.repair_batch(&mut InMemoryProgress::new()).await.is_err());
}

#[tokio::test]
async fn test_resumed_batch_skips_finished_trails() {
    let store = InMemoryTrailStore::new(vec![record("a", Some(tangled())), record("b", None)]);
    let repairer = BatchRepairer::new(&store, config()).unwrap();
    let mut progress = InMemoryProgress::new();

    repairer.repair_batch(&mut progress).await.unwrap();
    let second = repairer.repair_batch(&mut progress).await.unwrap();
    assert!(second.reports.is_empty());
    assert_eq!(second.skipped, 2);
}

#[test]
fn test_invalid_config_rejected() {
    let store = InMemoryTrailStore::default();
    let config = RepairConfig { max_route_points: 1, ..RepairConfig::default() };
    assert!(BatchRepairer::new(&store, config).is_err());
}

// ============================================================================
// Rebuild batch
// ============================================================================

/// Provider serving a fixed set of relations. Relation 666 is always throttled.
struct FakeProvider {
    relations: HashMap<RelationId, RelationTopology>,
    calls: AtomicU32,
}

const THROTTLED: RelationId = 666;

impl FakeProvider {
    fn new() -> Self {
        // Ways stored out of orientation: 10 forward, 20 backward, 30 forward
        let nodes: HashMap<u64, Coordinate> =
            (1..=7).map(|id| (id, Coordinate::new(8.0, 46.0 + (id - 1) as f64 * 0.001))).collect();
        let trail = RelationTopology {
            relation_id: 1,
            nodes,
            ways: vec![
                Way { id: 30, node_ids: vec![5, 6, 7] },
                Way { id: 20, node_ids: vec![5, 4, 3] },
                Way { id: 10, node_ids: vec![1, 2, 3] },
            ],
            relation_way_order: vec![10, 20, 30],
        };
        let empty = RelationTopology { relation_id: 2, ..RelationTopology::default() };

        // Three 7-node ways listed A, C, B: chaining leaves two jumps
        let tangled = topology(
            3,
            &(1..=19u64).map(|id| (id, id as f64 - 1.0)).collect::<Vec<_>>(),
            &[(100, (1..=7).collect()), (200, (7..=13).collect()), (300, (13..=19).collect())],
            &[100, 300, 200],
        );

        // A real gap no stitching can close
        let mut gap_nodes: Vec<(u64, f64)> = (1..=7).map(|id| (id, id as f64 - 1.0)).collect();
        gap_nodes.extend([(101, 512.0), (102, 513.0)]);
        let gapped = topology(4, &gap_nodes, &[(100, (1..=7).collect()), (400, vec![101, 102])], &[100, 400]);

        // One resolvable node only
        let single = topology(5, &[(1, 0.0)], &[(500, vec![1])], &[500]);

        Self {
            relations: [(1, trail), (2, empty), (3, tangled), (4, gapped), (5, single)].into_iter().collect(),
            calls: AtomicU32::new(0),
        }
    }
}

/// 2^-10 degrees, just under the finest split threshold
const NODE_STEP: f64 = 0.0009765625;

/// Topology with nodes placed `units * NODE_STEP` north of 46.0.
fn topology(
    relation_id: RelationId,
    nodes: &[(u64, f64)],
    ways: &[(WayId, Vec<u64>)],
    order: &[WayId],
) -> RelationTopology {
    RelationTopology {
        relation_id,
        nodes: nodes.iter().map(|&(id, units)| (id, node(units))).collect(),
        ways: ways.iter().map(|(id, node_ids)| Way { id: *id, node_ids: node_ids.clone() }).collect(),
        relation_way_order: order.to_vec(),
    }
}

fn node(units: f64) -> Coordinate {
    Coordinate::new(8.0, 46.0 + units * NODE_STEP)
}

#[async_trait]
impl GeodataProvider for FakeProvider {
    async fn fetch_relation_topology(&self, relation_id: RelationId) -> Result<RelationTopology> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if relation_id == THROTTLED {
            return Err(RouteError::RateLimited { attempts: 1 });
        }
        self.relations
            .get(&relation_id)
            .cloned()
            .ok_or(RouteError::NotFound { reference: format!("relation/{}", relation_id) })
    }

    async fn fetch_way_topology(&self, way_id: WayId) -> Result<RelationTopology> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(RouteError::NotFound { reference: format!("way/{}", way_id) })
    }

    async fn search_by_name(&self, _name: &str, _bounds: &Bounds) -> Result<Option<OsmRef>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Some(OsmRef::Relation(1)))
    }
}

fn source(trail_id: &str, strategy: FetchStrategy) -> TrailSource {
    TrailSource { trail_id: trail_id.to_string(), name: format!("Trail {}", trail_id), strategy }
}

#[tokio::test]
async fn test_rebuild_batch_outcomes() {
    let store = InMemoryTrailStore::new(vec![
        record("new", None),
        record("missing", None),
        record("empty", None),
        record("throttled", None),
    ]);
    let provider = FakeProvider::new();
    let repairer = BatchRepairer::new(&store, config()).unwrap();
    let mut progress = InMemoryProgress::new();

    let sources = vec![
        source("throttled", FetchStrategy::Relation { relation_id: THROTTLED }),
        source("new", FetchStrategy::Relation { relation_id: 1 }),
        source("missing", FetchStrategy::Relation { relation_id: 404 }),
        source("empty", FetchStrategy::Relation { relation_id: 2 }),
    ];
    let batch = repairer.rebuild_batch(&provider, &sources, &mut progress).await.unwrap();

    let found = outcomes(&batch.reports);
    assert_eq!(found[0], ("empty", &RepairOutcome::NotFound));
    assert_eq!(found[1], ("missing", &RepairOutcome::NotFound));
    assert_eq!(found[2], ("new", &RepairOutcome::Updated));
    assert_eq!(found[3].0, "throttled");
    assert!(matches!(found[3].1, RepairOutcome::Unresolved(_)));

    let rebuilt = store.record("new").await.unwrap().route.unwrap();
    assert_eq!(rebuilt.points.len(), 7);
    assert_eq!(rebuilt.start_point, Coordinate::new(8.0, 46.0));
    assert_eq!(rebuilt.end_point, Coordinate::new(8.0, 46.0 + 6.0 * 0.001));
    assert_eq!(count_jumps(&rebuilt.points, 0.005), 0);

    assert!(progress.is_done("missing"));
    assert!(!progress.is_done("throttled"));
}

#[tokio::test]
async fn test_rebuild_skips_clean_routes_before_fetching() {
    let store = InMemoryTrailStore::new(vec![record("clean", Some(route(&[0.0, 1.0, 2.0], STEP)))]);
    let provider = FakeProvider::new();
    let repairer = BatchRepairer::new(&store, config()).unwrap();

    let sources = vec![source("clean", FetchStrategy::Relation { relation_id: 1 })];
    let batch = repairer.rebuild_batch(&provider, &sources, &mut InMemoryProgress::new()).await.unwrap();
    assert_eq!(batch.reports[0].outcome, RepairOutcome::AlreadyClean);
    assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_rebuild_replaces_worse_stored_route() {
    let store = InMemoryTrailStore::new(vec![record("t", Some(route(&[0.0, 8.0, 1.0], 0.001)))]);
    let provider = FakeProvider::new();
    let repairer = BatchRepairer::new(&store, config()).unwrap();

    let bounds = Bounds { min_lat: 45.9, max_lat: 46.1, min_lng: 7.9, max_lng: 8.1 };
    let sources = vec![source("t", FetchStrategy::NameSearch { name: "Trail t".to_string(), bounds })];
    let batch = repairer.rebuild_batch(&provider, &sources, &mut InMemoryProgress::new()).await.unwrap();

    let report = &batch.reports[0];
    assert_eq!(report.outcome, RepairOutcome::Updated);
    assert_eq!(report.jumps_before, Some(2));
    assert_eq!(report.jumps_after, Some(0));
    assert_eq!(store.record("t").await.unwrap().route.unwrap().points.len(), 7);
}

#[tokio::test]
async fn test_throttled_trail_retried_on_next_run() {
    let store = InMemoryTrailStore::new(vec![record("throttled", None)]);
    let provider = FakeProvider::new();
    let repairer = BatchRepairer::new(&store, config()).unwrap();
    let mut progress = InMemoryProgress::new();
    let sources = vec![source("throttled", FetchStrategy::Relation { relation_id: THROTTLED })];

    repairer.rebuild_batch(&provider, &sources, &mut progress).await.unwrap();
    assert_eq!(provider.calls.load(Ordering::SeqCst), 2);

    let second = repairer.rebuild_batch(&provider, &sources, &mut progress).await.unwrap();
    assert_eq!(second.skipped, 0);
    assert_eq!(provider.calls.load(Ordering::SeqCst), 4);
    assert_eq!(store.record("throttled").await.unwrap().route, None);
}

#[tokio::test]
async fn test_rebuild_repairs_tangled_relation_without_stored_route() {
    let store = InMemoryTrailStore::new(vec![record("t", None)]);
    let provider = FakeProvider::new();
    let repairer = BatchRepairer::new(&store, config()).unwrap();

    let sources = vec![source("t", FetchStrategy::Relation { relation_id: 3 })];
    let batch = repairer.rebuild_batch(&provider, &sources, &mut InMemoryProgress::new()).await.unwrap();

    let report = &batch.reports[0];
    assert_eq!(report.outcome, RepairOutcome::Updated);
    assert_eq!(report.jumps_before, None);
    assert_eq!(report.jumps_after, Some(0));

    let expected: Vec<Coordinate> = (0..19).map(|u| node(u as f64)).collect();
    assert_eq!(store.record("t").await.unwrap().route.unwrap().points, expected);
}

#[tokio::test]
async fn test_rebuild_repairs_tangled_relation_from_stored_anchors() {
    let stored = TrailRoute::from_points(&[node(0.0), node(18.0), node(0.0), node(18.0)]).unwrap();
    let store = InMemoryTrailStore::new(vec![record("t", Some(stored))]);
    let provider = FakeProvider::new();
    let repairer = BatchRepairer::new(&store, config()).unwrap();

    let sources = vec![source("t", FetchStrategy::Relation { relation_id: 3 })];
    let batch = repairer.rebuild_batch(&provider, &sources, &mut InMemoryProgress::new()).await.unwrap();

    let report = &batch.reports[0];
    assert_eq!(report.outcome, RepairOutcome::Updated);
    assert_eq!(report.jumps_before, Some(3));
    assert_eq!(report.jumps_after, Some(0));
    assert_eq!(report.dropped_points, 0);

    let rebuilt = store.record("t").await.unwrap().route.unwrap();
    let expected: Vec<Coordinate> = (0..19).map(|u| node(u as f64)).collect();
    assert_eq!(rebuilt.points, expected);
    assert!(rebuilt.endpoints_consistent());
}

#[tokio::test]
async fn test_rebuild_keeps_chained_route_when_repair_does_not_help() {
    let store = InMemoryTrailStore::new(vec![record("t", None)]);
    let provider = FakeProvider::new();
    let repairer = BatchRepairer::new(&store, config()).unwrap();

    let sources = vec![source("t", FetchStrategy::Relation { relation_id: 4 })];
    let batch = repairer.rebuild_batch(&provider, &sources, &mut InMemoryProgress::new()).await.unwrap();

    let report = &batch.reports[0];
    assert_eq!(report.outcome, RepairOutcome::Updated);
    assert_eq!(report.jumps_after, Some(1));
    assert_eq!(report.dropped_points, 0);

    let mut expected: Vec<Coordinate> = (0..7).map(|u| node(u as f64)).collect();
    expected.extend([node(512.0), node(513.0)]);
    assert_eq!(store.record("t").await.unwrap().route.unwrap().points, expected);
}

#[tokio::test]
async fn test_rebuild_does_not_write_degenerate_route() {
    let store = InMemoryTrailStore::new(vec![record("t", None)]);
    let provider = FakeProvider::new();
    let repairer = BatchRepairer::new(&store, config()).unwrap();

    let sources = vec![source("t", FetchStrategy::Relation { relation_id: 5 })];
    let batch = repairer.rebuild_batch(&provider, &sources, &mut InMemoryProgress::new()).await.unwrap();

    assert_eq!(batch.reports[0].outcome, RepairOutcome::NoImprovement);
    assert_eq!(store.record("t").await.unwrap().route, None);
}
