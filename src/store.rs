//! # Trail Record Store
//!
//! The persistence collaborator holding each trail's route. Writes replace the
//! polyline, start point and end point together; a store must never apply one
//! without the others.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::{Result, RouteError};
use crate::TrailRoute;

/// Identifier and display name of a stored trail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrailSummary {
    pub trail_id: String,
    pub name: String,
}

/// A full trail record as held by [`InMemoryTrailStore`].
#[derive(Debug, Clone, PartialEq)]
pub struct TrailRecord {
    pub trail_id: String,
    pub name: String,
    pub route: Option<TrailRoute>,
}

/// Key-value access to trail routes.
#[async_trait]
pub trait TrailStore: Send + Sync {
    /// All trails, in any order. The batch driver sorts them by id.
    async fn list_trails(&self) -> Result<Vec<TrailSummary>>;

    /// The stored route, or `None` if the trail has none (or does not exist).
    async fn read_route(&self, trail_id: &str) -> Result<Option<TrailRoute>>;

    /// Atomically replace points, start point and end point.
    ///
    /// Fails with [`RouteError::Persistence`].
    async fn write_route(&self, trail_id: &str, route: &TrailRoute) -> Result<()>;
}

/// In-process store keyed by trail id.
#[derive(Debug, Default)]
pub struct InMemoryTrailStore {
    records: Mutex<BTreeMap<String, TrailRecord>>,
}

impl InMemoryTrailStore {
    pub fn new(records: Vec<TrailRecord>) -> Self {
        Self {
            records: Mutex::new(records.into_iter().map(|r| (r.trail_id.clone(), r)).collect()),
        }
    }

    /// Snapshot of one record.
    pub async fn record(&self, trail_id: &str) -> Option<TrailRecord> {
        self.records.lock().await.get(trail_id).cloned()
    }
}

#[async_trait]
impl TrailStore for InMemoryTrailStore {
    async fn list_trails(&self) -> Result<Vec<TrailSummary>> {
        let records = self.records.lock().await;
        Ok(records
            .values()
            .map(|r| TrailSummary { trail_id: r.trail_id.clone(), name: r.name.clone() })
            .collect())
    }

    async fn read_route(&self, trail_id: &str) -> Result<Option<TrailRoute>> {
        let records = self.records.lock().await;
        Ok(records.get(trail_id).and_then(|r| r.route.clone()))
    }

    async fn write_route(&self, trail_id: &str, route: &TrailRoute) -> Result<()> {
        if !route.endpoints_consistent() {
            return Err(RouteError::Persistence {
                trail_id: trail_id.to_string(),
                message: "start/end points do not match the polyline".to_string(),
            });
        }
        let mut records = self.records.lock().await;
        match records.get_mut(trail_id) {
            Some(record) => {
                record.route = Some(route.clone());
                Ok(())
            }
            None => Err(RouteError::Persistence {
                trail_id: trail_id.to_string(),
                message: "no such trail".to_string(),
            }),
        }
    }
}
