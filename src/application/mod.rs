//! Application Layer
//!
//! Use cases that orchestrate the domain: multi-provider aggregation,
//! the resolution trigger policy and its background queue.

pub mod geo_aggregator;
pub mod resolution_queue;
pub mod resolution_service;

pub use geo_aggregator::{GeoAggregator, DEFAULT_PROVIDER_TIMEOUT, NO_GEO_DATA};
pub use resolution_queue::{ResolutionQueue, DEFAULT_QUEUE_CAPACITY};
pub use resolution_service::{RefreshSummary, ResolutionService, DEFAULT_REFRESH_DELAY};
