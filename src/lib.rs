//! visitor-geo Library
//!
//! Multi-provider IP geolocation for visitor logs. This module exposes the
//! components for use in integration tests and as a library.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;

// Re-export commonly used types
pub use application::{GeoAggregator, RefreshSummary, ResolutionQueue, ResolutionService};
pub use config::load_config;
pub use domain::entities::{
    GeoResolution, GeoStatus, LocationCluster, OutcomeStatus, ProviderOutcome, RawLocation,
    Visitor,
};
pub use domain::ports::{GeoProvider, VisitorRepository};
pub use domain::services::ClusterBuilder;
pub use domain::value_objects::{is_resolvable_ip, CoordinateKey};
