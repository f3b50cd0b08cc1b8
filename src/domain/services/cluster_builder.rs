//! Cluster Builder - Domain service for merging provider outcomes
//!
//! Turns the per-provider ledger of one aggregation run into a
//! `GeoResolution`: network owner, deduplicated location clusters and
//! their ordering. Pure and deterministic; all I/O happens elsewhere.

use crate::domain::entities::{GeoResolution, LocationCluster, ProviderOutcome, RawLocation};
use crate::domain::value_objects::CoordinateKey;
use chrono::Utc;
use std::collections::HashMap;

/// Stateless builder for resolutions.
pub struct ClusterBuilder;

impl ClusterBuilder {
    /// Assemble the resolution for `ip` from outcomes given in registry order.
    pub fn assemble(ip: &str, outcomes: Vec<ProviderOutcome>) -> GeoResolution {
        let (isp, organization) = Self::network_owner(&outcomes);
        let clusters = Self::cluster(&outcomes);

        GeoResolution {
            ip: ip.to_string(),
            isp,
            organization,
            clusters,
            provider_outcomes: outcomes,
            resolved_at: Utc::now(),
        }
    }

    /// First non-empty ISP and organization among successes.
    ///
    /// The two fields are picked independently and may come from
    /// different providers.
    pub fn network_owner(outcomes: &[ProviderOutcome]) -> (Option<String>, Option<String>) {
        let mut isp = None;
        let mut organization = None;

        for location in Self::successes(outcomes).map(|(_, loc)| loc) {
            if isp.is_none() {
                isp = non_empty(&location.isp);
            }
            if organization.is_none() {
                organization = non_empty(&location.organization);
            }
            if isp.is_some() && organization.is_some() {
                break;
            }
        }

        (isp, organization)
    }

    /// Group successes by rounded coordinates.
    ///
    /// Processing follows the slice order, so the result does not depend on
    /// which provider answered first. Clusters are then ordered by
    /// contributor count, descending; ties keep first-seen order.
    pub fn cluster(outcomes: &[ProviderOutcome]) -> Vec<LocationCluster> {
        let mut index: HashMap<CoordinateKey, usize> = HashMap::new();
        let mut clusters: Vec<LocationCluster> = Vec::new();

        for (provider, location) in Self::successes(outcomes) {
            let key = CoordinateKey::new(location.latitude, location.longitude);
            match index.get(&key) {
                Some(&i) => clusters[i].absorb(provider, location),
                None => {
                    index.insert(key, clusters.len());
                    clusters.push(LocationCluster::seed(provider, location));
                }
            }
        }

        // sort_by is stable
        clusters.sort_by(|a, b| b.contributor_count().cmp(&a.contributor_count()));
        clusters
    }

    fn successes(
        outcomes: &[ProviderOutcome],
    ) -> impl Iterator<Item = (&str, &RawLocation)> + '_ {
        outcomes
            .iter()
            .filter_map(|o| o.location().map(|loc| (o.provider.as_str(), loc)))
            .filter(|(_, loc)| loc.has_coordinates())
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .filter(|v| !v.trim().is_empty())
        .map(str::to_string)
}
