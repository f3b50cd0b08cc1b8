mod geo_provider;
mod visitor_repository;

pub use geo_provider::{GeoProvider, ProviderError};
pub use visitor_repository::{RepositoryError, VisitorRepository};
