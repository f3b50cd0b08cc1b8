//! Geolocation Provider Adapters
//!
//! One adapter per external geolocation HTTP API, plus the ordered
//! registry the aggregator consults. Only this module knows any
//! provider's JSON shape.

mod abstractapi;
mod freeipapi;
mod ip_api;
mod ipgeolocation;
mod ipinfo;
mod ipstack;
mod ipwhois;

pub use abstractapi::AbstractApiProvider;
pub use freeipapi::FreeIpApiProvider;
pub use ip_api::IpApiProvider;
pub use ipgeolocation::IpGeolocationProvider;
pub use ipinfo::IpInfoProvider;
pub use ipstack::IpStackProvider;
pub use ipwhois::IpWhoIsProvider;

use crate::domain::ports::{GeoProvider, ProviderError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use std::sync::Arc;
use std::time::Duration;

/// Registry construction errors.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("provider {0} is already registered")]
    DuplicateProvider(String),
    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// API keys for the providers that require one.
///
/// A provider whose key is absent is left out of the registry.
#[derive(Debug, Clone, Default)]
pub struct ProviderKeys {
    pub ipgeolocation: Option<String>,
    pub abstractapi: Option<String>,
    pub ipstack: Option<String>,
}

/// Ordered set of geolocation providers.
///
/// Order is significant: it decides outcome ordering, cluster tie-breaks
/// and which provider's ISP/place names win. Keep it stable.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: Vec<Arc<dyn GeoProvider>>,
}

impl ProviderRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the standard registry against the public provider endpoints.
    pub fn with_defaults(keys: &ProviderKeys, timeout: Duration) -> Result<Self, RegistryError> {
        let client = build_client(timeout)?;
        let mut registry = Self::new();

        registry.register(Arc::new(IpApiProvider::new(client.clone())))?;
        registry.register(Arc::new(IpWhoIsProvider::new(client.clone())))?;
        registry.register(Arc::new(FreeIpApiProvider::new(client.clone())))?;
        registry.register(Arc::new(IpInfoProvider::new(client.clone())))?;
        if let Some(key) = &keys.ipgeolocation {
            registry.register(Arc::new(IpGeolocationProvider::new(client.clone(), key)))?;
        }
        if let Some(key) = &keys.abstractapi {
            registry.register(Arc::new(AbstractApiProvider::new(client.clone(), key)))?;
        }
        if let Some(key) = &keys.ipstack {
            registry.register(Arc::new(IpStackProvider::new(client, key)))?;
        }

        tracing::info!(
            "geo provider registry ready: {}",
            registry.names().join(", ")
        );
        Ok(registry)
    }

    /// Append a provider. Names must be unique.
    pub fn register(&mut self, provider: Arc<dyn GeoProvider>) -> Result<(), RegistryError> {
        if self.providers.iter().any(|p| p.name() == provider.name()) {
            return Err(RegistryError::DuplicateProvider(provider.name().to_string()));
        }
        self.providers.push(provider);
        Ok(())
    }

    pub fn names(&self) -> Vec<String> {
        self.providers.iter().map(|p| p.name().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Hand the providers over, in registry order.
    pub fn into_providers(self) -> Vec<Arc<dyn GeoProvider>> {
        self.providers
    }
}

/// Shared HTTP client for all adapters.
pub fn build_client(timeout: Duration) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .user_agent(concat!("visitor-geo/", env!("CARGO_PKG_VERSION")))
        .connect_timeout(timeout)
        .timeout(timeout)
        .build()
}

/// Send a request and decode a JSON body.
///
/// Non-2xx statuses and undecodable bodies are errors.
pub(crate) async fn fetch_json<T: DeserializeOwned>(
    request: reqwest::RequestBuilder,
) -> Result<T, ProviderError> {
    let response = request.send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(ProviderError::Status(status));
    }
    let body = response.text().await?;
    serde_json::from_str(&body).map_err(|e| ProviderError::Decode(e.to_string()))
}

/// Accept a coordinate sent either as a JSON number or a numeric string.
pub(crate) fn lenient_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumberOrText {
        Number(f64),
        Text(String),
    }

    Ok(match Option::<NumberOrText>::deserialize(deserializer)? {
        Some(NumberOrText::Number(n)) => Some(n),
        Some(NumberOrText::Text(s)) => s.trim().parse().ok(),
        None => None,
    })
}
