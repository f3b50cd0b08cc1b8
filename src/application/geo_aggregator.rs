//! Geo Aggregator - Multi-provider resolution use case
//!
//! Fans one IP out to every registered provider concurrently, classifies
//! each call as success/failed/timeout, and merges the outcomes into a
//! single `GeoResolution`. No operation here returns an error.

use crate::domain::entities::{GeoResolution, OutcomeStatus, ProviderOutcome};
use crate::domain::ports::GeoProvider;
use crate::domain::services::ClusterBuilder;
use crate::domain::value_objects::is_resolvable_ip;
use chrono::Utc;
use futures::future::join_all;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Diagnostic used when a provider answers without a usable location.
pub const NO_GEO_DATA: &str = "no geo data in response";

/// Default per-provider time budget.
pub const DEFAULT_PROVIDER_TIMEOUT: Duration = Duration::from_secs(7);

/// Multi-provider geolocation aggregator.
///
/// Providers are consulted in parallel, but every ordered output
/// (outcome ledger, clustering, tie-breaks) follows registry order.
pub struct GeoAggregator {
    providers: Vec<Arc<dyn GeoProvider>>,
    timeout: Duration,
}

impl GeoAggregator {
    /// Create an aggregator over providers given in registry order.
    pub fn new(providers: Vec<Arc<dyn GeoProvider>>, timeout: Duration) -> Self {
        Self { providers, timeout }
    }

    pub fn provider_count(&self) -> usize {
        self.providers.len()
    }

    pub fn provider_names(&self) -> Vec<String> {
        self.providers.iter().map(|p| p.name().to_string()).collect()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Resolve an IP against every provider.
    ///
    /// Returns `None` only for non-resolvable input (empty, the unknown
    /// placeholder, loopback), in which case no provider is called. When
    /// every provider fails the resolution is still returned, with no
    /// clusters and a full outcome ledger.
    pub async fn resolve(&self, ip: &str) -> Option<GeoResolution> {
        if !is_resolvable_ip(ip) {
            tracing::debug!("skipping geolocation for non-resolvable ip {:?}", ip);
            return None;
        }
        let ip = ip.trim();
        let started = Utc::now();
        let clock = Instant::now();

        let tasks = self.providers.iter().map(|provider| {
            let provider = provider.clone();
            let name = provider.name().to_string();
            let ip = ip.to_string();
            let budget = self.timeout;
            let handle =
                tokio::spawn(async move { Self::call_provider(provider.as_ref(), &ip, budget).await });
            async move { (name, handle.await) }
        });

        let outcomes: Vec<ProviderOutcome> = join_all(tasks)
            .await
            .into_iter()
            .map(|(name, joined)| match joined {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::error!("geo provider {} task aborted: {}", name, e);
                    ProviderOutcome::failed(name, started, format!("provider task aborted: {}", e))
                }
            })
            .collect();

        let resolution = ClusterBuilder::assemble(ip, outcomes);

        tracing::info!(
            "geolocation for {}: {} success, {} failed, {} timeout, {} clusters in {}ms",
            ip,
            resolution.status_count(OutcomeStatus::Success),
            resolution.status_count(OutcomeStatus::Failed),
            resolution.status_count(OutcomeStatus::Timeout),
            resolution.clusters.len(),
            clock.elapsed().as_millis()
        );

        Some(resolution)
    }

    /// Call one provider under a time budget and classify the result.
    ///
    /// Total: every path yields a `ProviderOutcome`. `observed_at` is the
    /// moment the call started.
    pub async fn call_provider(provider: &dyn GeoProvider, ip: &str, budget: Duration) -> ProviderOutcome {
        let name = provider.name();
        let observed_at = Utc::now();
        let clock = Instant::now();

        let outcome = match tokio::time::timeout(budget, provider.locate(ip)).await {
            Ok(Ok(Some(location))) if location.has_coordinates() => {
                ProviderOutcome::success(name, observed_at, location.normalized())
            }
            Ok(Ok(_)) => ProviderOutcome::failed(name, observed_at, NO_GEO_DATA),
            Ok(Err(e)) if e.is_timeout() => ProviderOutcome::timeout(name, observed_at, e.to_string()),
            Ok(Err(e)) => ProviderOutcome::failed(name, observed_at, e.to_string()),
            Err(_) => ProviderOutcome::timeout(
                name,
                observed_at,
                format!("request timed out after {}ms", budget.as_millis()),
            ),
        };

        tracing::debug!(
            "geo provider {} -> {} in {}ms",
            name,
            outcome.status(),
            clock.elapsed().as_millis()
        );

        outcome
    }
}
