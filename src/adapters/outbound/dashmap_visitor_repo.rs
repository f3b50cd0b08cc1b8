//! DashMap Visitor Repository
//!
//! Implements VisitorRepository using DashMap for lock-free concurrent access.
//! Used when no database path is configured; contents vanish with the process.

use crate::domain::entities::{GeoResolution, VisitRecord, Visitor};
use crate::domain::ports::{RepositoryError, VisitorRepository};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;

/// In-memory visitor store.
///
/// Each mutation touches a single entry, so a resolution write replaces
/// `geo_location` atomically with respect to other writers.
pub struct DashMapVisitorRepository {
    visitors: Arc<DashMap<String, Visitor>>,
}

impl DashMapVisitorRepository {
    pub fn new() -> Self {
        Self {
            visitors: Arc::new(DashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.visitors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.visitors.is_empty()
    }
}

impl Default for DashMapVisitorRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VisitorRepository for DashMapVisitorRepository {
    async fn record_visit(&self, record: VisitRecord) -> Result<(), RepositoryError> {
        // Entry holds the shard lock across the check and the insert.
        match self.visitors.entry(record.key.clone()) {
            Entry::Occupied(mut entry) => entry.get_mut().apply(record),
            Entry::Vacant(entry) => {
                entry.insert(Visitor::from_record(record));
            }
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Visitor>, RepositoryError> {
        Ok(self.visitors.get(key).map(|e| e.value().clone()))
    }

    async fn list(&self) -> Result<Vec<Visitor>, RepositoryError> {
        Ok(self.visitors.iter().map(|e| e.value().clone()).collect())
    }

    async fn set_geo_location(
        &self,
        key: &str,
        ip: &str,
        resolution: &GeoResolution,
    ) -> Result<(), RepositoryError> {
        let mut entry = self
            .visitors
            .entry(key.to_string())
            .or_insert_with(|| Visitor::bare(key, ip));
        entry.geo_location = Some(resolution.clone());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, RepositoryError> {
        Ok(self.visitors.remove(key).is_some())
    }

    async fn delete_all(&self) -> Result<usize, RepositoryError> {
        let count = self.visitors.len();
        self.visitors.clear();
        Ok(count)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::domain::entities::{EventKind, HeaderLocation, VisitEvent};
    use chrono::Utc;

    fn record(key: &str, ip: &str, message: &str) -> VisitRecord {
        VisitRecord {
            key: key.to_string(),
            ip: ip.to_string(),
            user_agent: Some("Mozilla/5.0 (X11; Linux x86_64)".to_string()),
            header_location: HeaderLocation::default(),
            event: VisitEvent {
                kind: EventKind::Chat,
                endpoint: None,
                method: None,
                message: Some(message.to_string()),
                data: None,
                time: Utc::now(),
            },
        }
    }

    fn resolution(ip: &str) -> GeoResolution {
        GeoResolution {
            ip: ip.to_string(),
            isp: Some("Comcast".to_string()),
            organization: None,
            clusters: Vec::new(),
            provider_outcomes: Vec::new(),
            resolved_at: Utc::now(),
        }
    }

    // ===== Record Visit Tests =====

    #[tokio::test]
    async fn test_record_visit_creates_visitor() {
        let repo = DashMapVisitorRepository::new();
        repo.record_visit(record("v1", "8.8.8.8", "hello")).await.unwrap();

        let visitor = repo.get("v1").await.unwrap().unwrap();
        assert_eq!(visitor.ip, "8.8.8.8");
        assert_eq!(visitor.events.len(), 1);
        assert!(visitor.geo_location.is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_concurrent_first_visits_keep_every_event() {
        let repo = Arc::new(DashMapVisitorRepository::new());

        let handles: Vec<_> = (0..32)
            .map(|i| {
                let repo = repo.clone();
                tokio::spawn(async move {
                    repo.record_visit(record("shared", "8.8.8.8", &format!("m{}", i)))
                        .await
                        .unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        let visitor = repo.get("shared").await.unwrap().unwrap();
        assert_eq!(visitor.events.len(), 32);
        assert_eq!(repo.len(), 1);
    }

    #[tokio::test]
    async fn test_record_visit_appends_and_keeps_geo() {
        let repo = DashMapVisitorRepository::new();
        repo.record_visit(record("v1", "8.8.8.8", "first")).await.unwrap();
        repo.set_geo_location("v1", "8.8.8.8", &resolution("8.8.8.8"))
            .await
            .unwrap();
        repo.record_visit(record("v1", "1.1.1.1", "second")).await.unwrap();

        let visitor = repo.get("v1").await.unwrap().unwrap();
        assert_eq!(visitor.ip, "1.1.1.1");
        assert_eq!(visitor.events.len(), 2);
        assert_eq!(visitor.events[1].message.as_deref(), Some("second"));
        assert!(visitor.geo_location.is_some());
    }

    // ===== Geo Location Tests =====

    #[tokio::test]
    async fn test_set_geo_location_creates_bare_visitor() {
        let repo = DashMapVisitorRepository::new();
        repo.set_geo_location("ghost", "9.9.9.9", &resolution("9.9.9.9"))
            .await
            .unwrap();

        let visitor = repo.get("ghost").await.unwrap().unwrap();
        assert_eq!(visitor.ip, "9.9.9.9");
        assert!(visitor.events.is_empty());
        assert_eq!(visitor.geo_location.unwrap().ip, "9.9.9.9");
    }

    #[tokio::test]
    async fn test_set_geo_location_replaces_previous() {
        let repo = DashMapVisitorRepository::new();
        repo.set_geo_location("v1", "8.8.8.8", &resolution("8.8.8.8"))
            .await
            .unwrap();
        let mut newer = resolution("8.8.8.8");
        newer.isp = Some("Google".to_string());
        repo.set_geo_location("v1", "8.8.8.8", &newer).await.unwrap();

        let geo = repo.get("v1").await.unwrap().unwrap().geo_location.unwrap();
        assert_eq!(geo.isp.as_deref(), Some("Google"));
    }

    // ===== Delete Tests =====

    #[tokio::test]
    async fn test_delete() {
        let repo = DashMapVisitorRepository::new();
        repo.record_visit(record("v1", "8.8.8.8", "x")).await.unwrap();

        assert!(repo.delete("v1").await.unwrap());
        assert!(!repo.delete("v1").await.unwrap());
        assert!(repo.is_empty());
    }

    #[tokio::test]
    async fn test_delete_all() {
        let repo = DashMapVisitorRepository::new();
        for i in 0..3 {
            repo.record_visit(record(&format!("v{}", i), "8.8.8.8", "x"))
                .await
                .unwrap();
        }
        assert_eq!(repo.len(), 3);

        assert_eq!(repo.delete_all().await.unwrap(), 3);
        assert!(repo.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_get_nonexistent() {
        let repo = DashMapVisitorRepository::default();
        assert!(repo.get("missing").await.unwrap().is_none());
    }
}
