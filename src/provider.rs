//! # Geodata Provider
//!
//! The upstream collaborator that returns raw OSM topology, and the fetch strategy
//! each trail uses to locate its geometry.
//!
//! Calls are awaited one at a time; throttled or failed requests are retried with a
//! growing delay up to [`RetryPolicy::max_attempts`], after which the trail is left
//! unresolved for this run.

use std::future::Future;

use async_trait::async_trait;
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::error::{Result, RouteError};
use crate::topology::{RelationId, RelationTopology, WayId};
use crate::{Bounds, RetryPolicy};

/// Reference to an OSM element that carries a trail's geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum OsmRef {
    Relation(RelationId),
    Way(WayId),
}

/// How a trail's topology is located upstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum FetchStrategy {
    /// A single route relation.
    Relation { relation_id: RelationId },
    /// Several relations traversed in the given order.
    MultiRelation { relation_ids: Vec<RelationId> },
    /// A trail mapped as one way without a relation.
    Way { way_id: WayId },
    /// Look the trail up by name inside a bounding box.
    NameSearch { name: String, bounds: Bounds },
}

/// Source of raw OSM topology.
#[async_trait]
pub trait GeodataProvider: Send + Sync {
    /// Nodes, ways and way order of one relation.
    ///
    /// Fails with [`RouteError::RateLimited`] when throttled (retryable) or
    /// [`RouteError::NotFound`] when the relation does not exist.
    async fn fetch_relation_topology(&self, relation_id: RelationId) -> Result<RelationTopology>;

    /// A single way wrapped as a one-way topology.
    async fn fetch_way_topology(&self, way_id: WayId) -> Result<RelationTopology>;

    /// Best-effort name lookup within `bounds`. `Ok(None)` when nothing matches.
    async fn search_by_name(&self, name: &str, bounds: &Bounds) -> Result<Option<OsmRef>>;
}

async fn with_retry<T, F, Fut>(label: &str, policy: &RetryPolicy, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < policy.max_attempts => {
                let wait = policy.delay_for(attempt);
                warn!(
                    "[Provider {}] {} (attempt {}/{}), retrying in {:?}",
                    label, e, attempt, policy.max_attempts, wait
                );
                tokio::time::sleep(wait).await;
            }
            Err(RouteError::RateLimited { .. }) => {
                return Err(RouteError::RateLimited { attempts: attempt });
            }
            Err(e) => return Err(e),
        }
    }
}

async fn fetch_relation<P>(provider: &P, relation_id: RelationId, policy: &RetryPolicy) -> Result<RelationTopology>
where
    P: GeodataProvider + ?Sized,
{
    let label = format!("relation/{}", relation_id);
    with_retry(&label, policy, || provider.fetch_relation_topology(relation_id)).await
}

async fn fetch_way<P>(provider: &P, way_id: WayId, policy: &RetryPolicy) -> Result<RelationTopology>
where
    P: GeodataProvider + ?Sized,
{
    let label = format!("way/{}", way_id);
    with_retry(&label, policy, || provider.fetch_way_topology(way_id)).await
}

/// Fetch a trail's topology according to its strategy, retrying per `policy`.
///
/// `MultiRelation` skips members that are missing or empty and merges the rest in
/// order; it fails with `NotFound` only if none remain.
pub async fn fetch_topology<P>(
    provider: &P,
    strategy: &FetchStrategy,
    policy: &RetryPolicy,
) -> Result<RelationTopology>
where
    P: GeodataProvider + ?Sized,
{
    match strategy {
        FetchStrategy::Relation { relation_id } => fetch_relation(provider, *relation_id, policy).await,
        FetchStrategy::MultiRelation { relation_ids } => {
            let mut parts = Vec::with_capacity(relation_ids.len());
            for relation_id in relation_ids {
                match fetch_relation(provider, *relation_id, policy).await {
                    Ok(part) if !part.ways.is_empty() => parts.push(part),
                    Ok(_) | Err(RouteError::NotFound { .. }) | Err(RouteError::EmptyTopology { .. }) => {
                        warn!("[Provider] relation {} missing or empty, skipping", relation_id);
                    }
                    Err(e) => return Err(e),
                }
            }
            if parts.is_empty() {
                return Err(RouteError::NotFound {
                    reference: format!("relations {:?}", relation_ids),
                });
            }
            debug!("[Provider] merged {} of {} relations", parts.len(), relation_ids.len());
            Ok(RelationTopology::merge(parts))
        }
        FetchStrategy::Way { way_id } => fetch_way(provider, *way_id, policy).await,
        FetchStrategy::NameSearch { name, bounds } => {
            let label = format!("search {:?}", name);
            let found = with_retry(&label, policy, || provider.search_by_name(name, bounds)).await?;
            match found {
                Some(OsmRef::Relation(relation_id)) => {
                    debug!("[Provider] {:?} resolved to relation {}", name, relation_id);
                    fetch_relation(provider, relation_id, policy).await
                }
                Some(OsmRef::Way(way_id)) => {
                    debug!("[Provider] {:?} resolved to way {}", name, way_id);
                    fetch_way(provider, way_id, policy).await
                }
                None => Err(RouteError::NotFound {
                    reference: format!("name {:?}", name),
                }),
            }
        }
    }
}
