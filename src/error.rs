//! Error types for route reconstruction and repair.
//!
//! Per-trail failures are caught by the batch driver and turned into report
//! entries; only a missing trail list aborts a whole run.

use thiserror::Error;

/// Errors produced while fetching, rebuilding or persisting trail routes.
#[derive(Debug, Error)]
pub enum RouteError {
    /// No way of the relation had a single resolvable node.
    #[error("relation {relation_id} has no resolvable ways or nodes")]
    EmptyTopology { relation_id: u64 },

    /// Upstream provider throttled us and the retry ceiling was reached.
    #[error("rate limited by geodata provider after {attempts} attempts")]
    RateLimited { attempts: u32 },

    /// The provider has no data for the requested reference.
    #[error("not found upstream: {reference}")]
    NotFound { reference: String },

    /// Writing to the trail record store failed.
    #[error("failed to persist route for trail {trail_id}: {message}")]
    Persistence { trail_id: String, message: String },

    /// Transport, HTTP status or decoding failure talking to the provider.
    #[error("geodata provider error: {0}")]
    Upstream(String),

    #[error("progress checkpoint I/O failed: {0}")]
    Progress(#[from] std::io::Error),

    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl RouteError {
    /// Whether retrying the same request later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RouteError::RateLimited { .. } | RouteError::Upstream(_))
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, RouteError>;
