mod dashmap_visitor_repo;
pub mod providers;
mod sqlite_visitor_repo;

pub use dashmap_visitor_repo::DashMapVisitorRepository;
pub use providers::{ProviderKeys, ProviderRegistry, RegistryError};
pub use sqlite_visitor_repo::SqliteVisitorRepository;
