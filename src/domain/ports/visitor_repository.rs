//! Visitor Repository Port
//!
//! Defines the interface for the visitor store that holds logged events
//! and the current geolocation resolution of each visitor.

use crate::domain::entities::{GeoResolution, VisitRecord, Visitor};
use async_trait::async_trait;

/// Storage failures.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("storage task failed: {0}")]
    Task(String),
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Repository for visitor records.
///
/// This is an outbound port. Every write of a resolution replaces the
/// visitor's `geo_location` as a whole; concurrent writers resolve as
/// last-write-wins.
#[async_trait]
pub trait VisitorRepository: Send + Sync {
    /// Upsert visitor metadata and append the visit event.
    async fn record_visit(&self, record: VisitRecord) -> Result<(), RepositoryError>;

    /// Get a visitor by key.
    async fn get(&self, key: &str) -> Result<Option<Visitor>, RepositoryError>;

    /// Get every visitor.
    async fn list(&self) -> Result<Vec<Visitor>, RepositoryError>;

    /// Store a resolution for a visitor, creating a bare record if needed.
    async fn set_geo_location(
        &self,
        key: &str,
        ip: &str,
        resolution: &GeoResolution,
    ) -> Result<(), RepositoryError>;

    /// Remove one visitor. Returns whether it existed.
    async fn delete(&self, key: &str) -> Result<bool, RepositoryError>;

    /// Remove every visitor. Returns how many were removed.
    async fn delete_all(&self) -> Result<usize, RepositoryError>;
}
