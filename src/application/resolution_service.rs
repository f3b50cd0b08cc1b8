//! Resolution Service - when to geolocate and where results go
//!
//! Decides whether a visitor needs a resolution, runs the aggregator and
//! writes the result to the visitor repository. Storage trouble is logged
//! and absorbed here; callers never see an error.

use crate::application::GeoAggregator;
use crate::domain::entities::{GeoResolution, VisitRecord};
use crate::domain::ports::VisitorRepository;
use crate::domain::value_objects::is_resolvable_ip;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Default pause between distinct external lookups in a bulk refresh.
pub const DEFAULT_REFRESH_DELAY: Duration = Duration::from_millis(1500);

/// Result of a bulk refresh.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RefreshSummary {
    pub updated: usize,
    pub failed: usize,
}

pub struct ResolutionService {
    repository: Arc<dyn VisitorRepository>,
    aggregator: Arc<GeoAggregator>,
    refresh_delay: Duration,
}

impl ResolutionService {
    pub fn new(repository: Arc<dyn VisitorRepository>, aggregator: Arc<GeoAggregator>) -> Self {
        Self {
            repository,
            aggregator,
            refresh_delay: DEFAULT_REFRESH_DELAY,
        }
    }

    /// Override the politeness delay used by `force_resolve_all`.
    pub fn with_refresh_delay(mut self, delay: Duration) -> Self {
        self.refresh_delay = delay;
        self
    }

    pub fn aggregator(&self) -> &GeoAggregator {
        &self.aggregator
    }

    pub fn repository(&self) -> &Arc<dyn VisitorRepository> {
        &self.repository
    }

    /// Persist a visit event.
    pub async fn record_visit(&self, record: VisitRecord) {
        let key = record.key.clone();
        if let Err(e) = self.repository.record_visit(record).await {
            tracing::warn!("failed to record visit for {}: {}", key, e);
        }
    }

    /// Resolve and store a location unless the visitor already has one.
    ///
    /// Once any resolution is stored, including one where every provider
    /// failed, no further provider calls are made for this visitor.
    pub async fn resolve_if_absent(&self, ip: &str, visitor_key: &str) {
        match self.repository.get(visitor_key).await {
            Ok(Some(visitor)) if visitor.geo_location.is_some() => {
                tracing::debug!("visitor {} already geolocated, skipping", visitor_key);
                return;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!("skipping geolocation for {}: storage read failed: {}", visitor_key, e);
                return;
            }
        }

        let Some(resolution) = self.aggregator.resolve(ip).await else {
            return;
        };
        self.persist(visitor_key, ip, &resolution).await;
    }

    /// Resolve and overwrite regardless of what is stored.
    ///
    /// The fresh resolution is returned even if it could not be persisted.
    pub async fn force_resolve(&self, ip: &str, visitor_key: &str) -> Option<GeoResolution> {
        let resolution = self.aggregator.resolve(ip).await?;
        self.persist(visitor_key, ip, &resolution).await;
        Some(resolution)
    }

    /// Re-resolve every stored visitor.
    ///
    /// Visitors with a non-resolvable IP, a resolution that came back empty
    /// or a failed write count as failed. Each distinct IP is looked up once
    /// per run, with `refresh_delay` between lookups.
    pub async fn force_resolve_all(&self) -> RefreshSummary {
        let visitors = match self.repository.list().await {
            Ok(visitors) => visitors,
            Err(e) => {
                tracing::error!("bulk geo refresh aborted: cannot list visitors: {}", e);
                return RefreshSummary::default();
            }
        };

        let mut summary = RefreshSummary::default();
        let mut looked_up: HashMap<String, Option<GeoResolution>> = HashMap::new();

        for visitor in &visitors {
            let ip = visitor.ip.trim();
            if !is_resolvable_ip(ip) {
                summary.failed += 1;
                continue;
            }

            if !looked_up.contains_key(ip) {
                if !looked_up.is_empty() && !self.refresh_delay.is_zero() {
                    tokio::time::sleep(self.refresh_delay).await;
                }
                let resolution = self.aggregator.resolve(ip).await;
                looked_up.insert(ip.to_string(), resolution);
            }

            match looked_up.get(ip) {
                Some(Some(resolution)) => {
                    match self.repository.set_geo_location(&visitor.key, ip, resolution).await {
                        Ok(()) => summary.updated += 1,
                        Err(e) => {
                            tracing::warn!("failed to store geolocation for {}: {}", visitor.key, e);
                            summary.failed += 1;
                        }
                    }
                }
                _ => summary.failed += 1,
            }
        }

        tracing::info!(
            "bulk geo refresh: {} visitors, {} distinct ips, {} updated, {} failed",
            visitors.len(),
            looked_up.len(),
            summary.updated,
            summary.failed
        );

        summary
    }

    async fn persist(&self, visitor_key: &str, ip: &str, resolution: &GeoResolution) {
        if let Err(e) = self
            .repository
            .set_geo_location(visitor_key, ip.trim(), resolution)
            .await
        {
            tracing::warn!("failed to store geolocation for {}: {}", visitor_key, e);
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::adapters::outbound::DashMapVisitorRepository;
    use crate::domain::entities::{
        EventKind, HeaderLocation, RawLocation, VisitEvent, Visitor,
    };
    use crate::domain::ports::{GeoProvider, ProviderError, RepositoryError};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tracing_test::traced_test;

    struct CountingProvider {
        name: &'static str,
        location: Option<(f64, f64)>,
        calls: AtomicUsize,
    }

    impl CountingProvider {
        fn hit(name: &'static str, lat: f64, lon: f64) -> Arc<Self> {
            Arc::new(Self {
                name,
                location: Some((lat, lon)),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl GeoProvider for CountingProvider {
        fn name(&self) -> &str {
            self.name
        }

        async fn locate(&self, _ip: &str) -> Result<Option<RawLocation>, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.location.map(|(lat, lon)| RawLocation::new(lat, lon)))
        }
    }

    /// Reads find nothing; every write fails.
    struct UnavailableRepository;

    #[async_trait]
    impl VisitorRepository for UnavailableRepository {
        async fn record_visit(&self, _record: VisitRecord) -> Result<(), RepositoryError> {
            Err(RepositoryError::Unavailable("db down".to_string()))
        }
        async fn get(&self, _key: &str) -> Result<Option<Visitor>, RepositoryError> {
            Ok(None)
        }
        async fn list(&self) -> Result<Vec<Visitor>, RepositoryError> {
            Err(RepositoryError::Unavailable("db down".to_string()))
        }
        async fn set_geo_location(
            &self,
            _key: &str,
            _ip: &str,
            _resolution: &GeoResolution,
        ) -> Result<(), RepositoryError> {
            Err(RepositoryError::Unavailable("db down".to_string()))
        }
        async fn delete(&self, _key: &str) -> Result<bool, RepositoryError> {
            Err(RepositoryError::Unavailable("db down".to_string()))
        }
        async fn delete_all(&self) -> Result<usize, RepositoryError> {
            Err(RepositoryError::Unavailable("db down".to_string()))
        }
    }

    fn record(key: &str, ip: &str) -> VisitRecord {
        VisitRecord {
            key: key.to_string(),
            ip: ip.to_string(),
            user_agent: None,
            header_location: HeaderLocation::default(),
            event: VisitEvent {
                kind: EventKind::Client,
                endpoint: Some("/".to_string()),
                method: Some("GET".to_string()),
                message: None,
                data: None,
                time: Utc::now(),
            },
        }
    }

    fn service_with(
        provider: Arc<CountingProvider>,
        repository: Arc<dyn VisitorRepository>,
    ) -> ResolutionService {
        let providers: Vec<Arc<dyn GeoProvider>> = vec![provider];
        let aggregator = GeoAggregator::new(providers, Duration::from_secs(1));
        ResolutionService::new(repository, Arc::new(aggregator))
            .with_refresh_delay(Duration::ZERO)
    }

    // ===== Resolve If Absent Tests =====

    #[tokio::test]
    async fn test_resolve_if_absent_is_idempotent() {
        let provider = CountingProvider::hit("A", 37.774, -122.419);
        let repo = Arc::new(DashMapVisitorRepository::new());
        let service = service_with(provider.clone(), repo.clone());

        service.resolve_if_absent("8.8.8.8", "v1").await;
        service.resolve_if_absent("8.8.8.8", "v1").await;

        assert_eq!(provider.calls(), 1);
        let stored = repo.get("v1").await.unwrap().unwrap();
        assert_eq!(stored.geo_location.unwrap().clusters.len(), 1);
    }

    #[tokio::test]
    async fn test_resolve_if_absent_keeps_all_failed_resolution() {
        let provider = Arc::new(CountingProvider {
            name: "A",
            location: None,
            calls: AtomicUsize::new(0),
        });
        let repo = Arc::new(DashMapVisitorRepository::new());
        let service = service_with(provider.clone(), repo.clone());

        service.resolve_if_absent("8.8.8.8", "v1").await;
        service.resolve_if_absent("8.8.8.8", "v1").await;

        assert_eq!(provider.calls(), 1);
        let geo = repo.get("v1").await.unwrap().unwrap().geo_location.unwrap();
        assert!(geo.clusters.is_empty());
        assert!(geo.all_providers_failed());
    }

    #[tokio::test]
    async fn test_resolve_if_absent_non_resolvable_stores_nothing() {
        let provider = CountingProvider::hit("A", 1.0, 2.0);
        let repo = Arc::new(DashMapVisitorRepository::new());
        let service = service_with(provider.clone(), repo.clone());

        service.resolve_if_absent("unknown", "v1").await;

        assert_eq!(provider.calls(), 0);
        assert!(repo.get("v1").await.unwrap().is_none());
    }

    // ===== Force Resolve Tests =====

    #[tokio::test]
    async fn test_force_resolve_overwrites() {
        let provider = CountingProvider::hit("A", 37.774, -122.419);
        let repo = Arc::new(DashMapVisitorRepository::new());
        let service = service_with(provider.clone(), repo.clone());

        service.resolve_if_absent("8.8.8.8", "v1").await;
        let first = repo.get("v1").await.unwrap().unwrap().geo_location.unwrap();

        let forced = service.force_resolve("8.8.8.8", "v1").await.unwrap();
        let stored = repo.get("v1").await.unwrap().unwrap().geo_location.unwrap();

        assert_eq!(provider.calls(), 2);
        assert_eq!(stored.resolved_at, forced.resolved_at);
        assert!(stored.resolved_at >= first.resolved_at);
    }

    #[tokio::test]
    async fn test_force_resolve_non_resolvable_is_none() {
        let provider = CountingProvider::hit("A", 1.0, 2.0);
        let service = service_with(provider.clone(), Arc::new(DashMapVisitorRepository::new()));

        assert!(service.force_resolve("::1", "v1").await.is_none());
        assert!(service.force_resolve("", "v1").await.is_none());
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_force_resolve_returns_result_when_storage_down() {
        let provider = CountingProvider::hit("A", 37.774, -122.419);
        let service = service_with(provider, Arc::new(UnavailableRepository));

        let resolution = service.force_resolve("8.8.8.8", "v1").await;

        assert!(resolution.is_some());
        assert!(logs_contain("failed to store geolocation for v1"));
    }

    // ===== Force Resolve All Tests =====

    #[tokio::test]
    async fn test_force_resolve_all_counts() {
        let provider = CountingProvider::hit("A", 37.774, -122.419);
        let repo = Arc::new(DashMapVisitorRepository::new());
        for (key, ip) in [
            ("v1", "8.8.8.8"),
            ("v2", "8.8.8.8"),
            ("v3", "1.1.1.1"),
            ("v4", "73.222.64.204"),
            ("v5", "unknown"),
        ] {
            repo.record_visit(record(key, ip)).await.unwrap();
        }
        let service = service_with(provider.clone(), repo.clone());

        let summary = service.force_resolve_all().await;

        assert_eq!(summary, RefreshSummary { updated: 4, failed: 1 });
        // v1 and v2 share one lookup
        assert_eq!(provider.calls(), 3);
        for key in ["v1", "v2", "v3", "v4"] {
            let geo = repo.get(key).await.unwrap().unwrap().geo_location;
            assert!(geo.is_some(), "{} not refreshed", key);
        }
        assert!(repo.get("v5").await.unwrap().unwrap().geo_location.is_none());
    }

    #[tokio::test]
    async fn test_force_resolve_all_looks_up_shared_ip_once() {
        let provider = CountingProvider::hit("A", 37.774, -122.419);
        let repo = Arc::new(DashMapVisitorRepository::new());
        repo.record_visit(record("v1", "8.8.8.8")).await.unwrap();
        repo.record_visit(record("v2", "8.8.8.8")).await.unwrap();
        let service = service_with(provider.clone(), repo.clone());

        let summary = service.force_resolve_all().await;

        assert_eq!(summary.updated, 2);
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn test_force_resolve_all_empty_store() {
        let provider = CountingProvider::hit("A", 1.0, 2.0);
        let service = service_with(provider, Arc::new(DashMapVisitorRepository::new()));

        assert_eq!(service.force_resolve_all().await, RefreshSummary::default());
    }

    #[tokio::test]
    async fn test_force_resolve_all_waits_between_lookups() {
        let provider = CountingProvider::hit("A", 1.0, 2.0);
        let repo = Arc::new(DashMapVisitorRepository::new());
        repo.record_visit(record("v1", "8.8.8.8")).await.unwrap();
        repo.record_visit(record("v2", "1.1.1.1")).await.unwrap();
        repo.record_visit(record("v3", "9.9.9.9")).await.unwrap();
        let delay = Duration::from_millis(40);
        let service = service_with(provider, repo).with_refresh_delay(delay);

        let started = std::time::Instant::now();
        service.force_resolve_all().await;

        // two pauses for three distinct ips
        assert!(started.elapsed() >= delay * 2);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_force_resolve_all_storage_down() {
        let provider = CountingProvider::hit("A", 1.0, 2.0);
        let service = service_with(provider.clone(), Arc::new(UnavailableRepository));

        assert_eq!(service.force_resolve_all().await, RefreshSummary::default());
        assert_eq!(provider.calls(), 0);
        assert!(logs_contain("cannot list visitors"));
    }

    // ===== Record Visit Tests =====

    #[tokio::test]
    #[traced_test]
    async fn test_record_visit_swallows_storage_error() {
        let provider = CountingProvider::hit("A", 1.0, 2.0);
        let service = service_with(provider, Arc::new(UnavailableRepository));

        service.record_visit(record("v1", "8.8.8.8")).await;

        assert!(logs_contain("failed to record visit for v1"));
    }
}
