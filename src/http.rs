//! Overpass API geodata provider.
//!
//! Queries are POSTed to an Overpass interpreter endpoint and decoded from its JSON
//! output. Request starts are spaced by a dispatch limiter, since public Overpass
//! instances throttle aggressively. Throttling responses (429, 504) surface as
//! [`RouteError::RateLimited`] so the caller's retry policy can back off.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use log::{debug, info, warn};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tokio::sync::Mutex;

use crate::error::{Result, RouteError};
use crate::provider::{GeodataProvider, OsmRef};
use crate::topology::{NodeId, RelationId, RelationTopology, Way, WayId};
use crate::{Bounds, Coordinate};

pub const DEFAULT_ENDPOINT: &str = "https://overpass-api.de/api/interpreter";

// Public instances allow roughly one request per second per client
const DISPATCH_INTERVAL_MS: u64 = 1000;
const REQUEST_TIMEOUT_SECS: u64 = 90;
const QUERY_TIMEOUT_SECS: u64 = 60;

/// Spaces out request starts. Each caller reserves the next slot under the lock and
/// sleeps outside it.
struct DispatchLimiter {
    next_dispatch: Mutex<Instant>,
    interval: Duration,
    dispatched: AtomicU32,
    consecutive_throttles: AtomicU32,
}

impl DispatchLimiter {
    fn new(interval: Duration) -> Self {
        Self {
            next_dispatch: Mutex::new(Instant::now()),
            interval,
            dispatched: AtomicU32::new(0),
            consecutive_throttles: AtomicU32::new(0),
        }
    }

    async fn wait_for_slot(&self) -> u32 {
        let (wait, num) = {
            let mut next = self.next_dispatch.lock().await;
            let now = Instant::now();
            let dispatch_at = if *next > now { *next } else { now };
            *next = dispatch_at + self.interval;
            let num = self.dispatched.fetch_add(1, Ordering::Relaxed) + 1;
            (dispatch_at.saturating_duration_since(now), num)
        };

        if wait > Duration::from_millis(5) {
            debug!("[Overpass #{}] waiting {:?} for dispatch slot", num, wait);
            tokio::time::sleep(wait).await;
        }
        num
    }

    fn record_success(&self) {
        self.consecutive_throttles.store(0, Ordering::Relaxed);
    }

    /// Push the next slot back after a throttling response: one extra interval per
    /// consecutive throttle, up to eight.
    async fn record_throttled(&self) {
        let count = self.consecutive_throttles.fetch_add(1, Ordering::Relaxed) + 1;
        let penalty = self.interval * count.min(8);
        let mut next = self.next_dispatch.lock().await;
        *next = (*next).max(Instant::now()) + penalty;
        warn!("[Overpass] throttled ({} in a row), next dispatch delayed {:?}", count, penalty);
    }
}

// ============================================================================
// Response Decoding
// ============================================================================

#[derive(Debug, Deserialize)]
struct OverpassResponse {
    #[serde(default)]
    elements: Vec<Element>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum Element {
    Node {
        id: NodeId,
        lat: f64,
        lon: f64,
    },
    Way {
        id: WayId,
        #[serde(default)]
        nodes: Vec<NodeId>,
    },
    Relation {
        id: RelationId,
        #[serde(default)]
        members: Vec<Member>,
        #[serde(default)]
        tags: HashMap<String, String>,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct Member {
    #[serde(rename = "type")]
    kind: String,
    #[serde(rename = "ref")]
    reference: u64,
}

struct Decoded {
    nodes: HashMap<NodeId, Coordinate>,
    ways: Vec<Way>,
    relations: Vec<(RelationId, Vec<WayId>, HashMap<String, String>)>,
}

fn decode(body: &[u8]) -> Result<Decoded> {
    let response: OverpassResponse = serde_json::from_slice(body)?;
    let mut decoded = Decoded { nodes: HashMap::new(), ways: Vec::new(), relations: Vec::new() };

    for element in response.elements {
        match element {
            Element::Node { id, lat, lon } => {
                decoded.nodes.insert(id, Coordinate::new(lon, lat));
            }
            Element::Way { id, nodes } => decoded.ways.push(Way { id, node_ids: nodes }),
            Element::Relation { id, members, tags } => {
                let way_order = members
                    .into_iter()
                    .filter(|m| m.kind == "way")
                    .map(|m| m.reference)
                    .collect();
                decoded.relations.push((id, way_order, tags));
            }
            Element::Other => {}
        }
    }
    Ok(decoded)
}

fn decode_relation(relation_id: RelationId, body: &[u8]) -> Result<RelationTopology> {
    let decoded = decode(body)?;
    let way_order = decoded
        .relations
        .into_iter()
        .find(|(id, _, _)| *id == relation_id)
        .map(|(_, order, _)| order)
        .ok_or_else(|| RouteError::NotFound { reference: format!("relation/{}", relation_id) })?;

    debug!(
        "[Overpass] relation {}: {} nodes, {} ways, {} members",
        relation_id,
        decoded.nodes.len(),
        decoded.ways.len(),
        way_order.len()
    );
    Ok(RelationTopology {
        relation_id,
        nodes: decoded.nodes,
        ways: decoded.ways,
        relation_way_order: way_order,
    })
}

fn decode_way(way_id: WayId, body: &[u8]) -> Result<RelationTopology> {
    let decoded = decode(body)?;
    let way = decoded
        .ways
        .into_iter()
        .find(|w| w.id == way_id)
        .ok_or_else(|| RouteError::NotFound { reference: format!("way/{}", way_id) })?;
    Ok(RelationTopology::from_way(way, decoded.nodes))
}

/// Hiking route relations first, then any relation, then any way.
fn decode_search(body: &[u8]) -> Result<Option<OsmRef>> {
    let decoded = decode(body)?;
    let hiking = decoded
        .relations
        .iter()
        .find(|(_, _, tags)| tags.get("route").map(String::as_str) == Some("hiking"));
    let found = hiking
        .or_else(|| decoded.relations.first())
        .map(|(id, _, _)| OsmRef::Relation(*id))
        .or_else(|| decoded.ways.first().map(|w| OsmRef::Way(w.id)));
    Ok(found)
}

// ============================================================================
// Queries
// ============================================================================

fn relation_query(relation_id: RelationId) -> String {
    format!("[out:json][timeout:{}];relation({});(._;>;);out body;", QUERY_TIMEOUT_SECS, relation_id)
}

fn way_query(way_id: WayId) -> String {
    format!("[out:json][timeout:{}];way({});(._;>;);out body;", QUERY_TIMEOUT_SECS, way_id)
}

fn escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

fn search_query(name: &str, bounds: &Bounds) -> String {
    let bbox = format!("{},{},{},{}", bounds.min_lat, bounds.min_lng, bounds.max_lat, bounds.max_lng);
    let name = escape(name);
    format!(
        "[out:json][timeout:{t}];(relation[\"name\"=\"{n}\"][\"route\"]({b});way[\"name\"=\"{n}\"][\"highway\"]({b}););out tags;",
        t = QUERY_TIMEOUT_SECS,
        n = name,
        b = bbox
    )
}

// ============================================================================
// Client
// ============================================================================

/// [`GeodataProvider`] backed by an Overpass API endpoint.
pub struct OverpassClient {
    client: Client,
    endpoint: String,
    limiter: DispatchLimiter,
}

impl OverpassClient {
    /// Client for the public overpass-api.de instance.
    pub fn new() -> Result<Self> {
        Self::with_endpoint(DEFAULT_ENDPOINT, Duration::from_millis(DISPATCH_INTERVAL_MS))
    }

    pub fn with_endpoint(endpoint: &str, dispatch_interval: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("trail-rebuild/", env!("CARGO_PKG_VERSION")))
            .pool_idle_timeout(Duration::from_secs(60))
            .tcp_keepalive(Duration::from_secs(30))
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| RouteError::Upstream(format!("failed to create HTTP client: {}", e)))?;

        info!("[Overpass] endpoint {} (dispatch interval {:?})", endpoint, dispatch_interval);
        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
            limiter: DispatchLimiter::new(dispatch_interval),
        })
    }

    async fn run_query(&self, label: &str, query: String) -> Result<Vec<u8>> {
        let dispatch_num = self.limiter.wait_for_slot().await;
        let start = Instant::now();

        let response = self
            .client
            .post(&self.endpoint)
            .form(&[("data", query)])
            .send()
            .await
            .map_err(|e| RouteError::Upstream(format!("{}: request failed: {}", label, e)))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS || status == StatusCode::GATEWAY_TIMEOUT {
            self.limiter.record_throttled().await;
            return Err(RouteError::RateLimited { attempts: 1 });
        }
        self.limiter.record_success();
        if !status.is_success() {
            return Err(RouteError::Upstream(format!("{}: HTTP {}", label, status)));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| RouteError::Upstream(format!("{}: body download failed: {}", label, e)))?;
        debug!(
            "[Overpass #{}] {} -> {:.1}KB in {:?}",
            dispatch_num,
            label,
            bytes.len() as f64 / 1024.0,
            start.elapsed()
        );
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl GeodataProvider for OverpassClient {
    async fn fetch_relation_topology(&self, relation_id: RelationId) -> Result<RelationTopology> {
        let label = format!("relation/{}", relation_id);
        let body = self.run_query(&label, relation_query(relation_id)).await?;
        decode_relation(relation_id, &body)
    }

    async fn fetch_way_topology(&self, way_id: WayId) -> Result<RelationTopology> {
        let label = format!("way/{}", way_id);
        let body = self.run_query(&label, way_query(way_id)).await?;
        decode_way(way_id, &body)
    }

    async fn search_by_name(&self, name: &str, bounds: &Bounds) -> Result<Option<OsmRef>> {
        let label = format!("search {:?}", name);
        let body = self.run_query(&label, search_query(name, bounds)).await?;
        decode_search(&body)
    }
}
