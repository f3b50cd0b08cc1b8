//! Geolocation Provider Port
//!
//! Defines the interface every external geolocation service adapter implements.

use crate::domain::entities::RawLocation;
use async_trait::async_trait;

/// Errors raised by a provider adapter.
///
/// Adapters surface transport and decoding failures as errors; an explicit
/// "no location for this IP" answer from the service is `Ok(None)` instead.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("unexpected HTTP status {0}")]
    Status(reqwest::StatusCode),
    #[error("malformed response: {0}")]
    Decode(String),
}

impl ProviderError {
    /// Whether the underlying transport gave up waiting.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Request(e) if e.is_timeout())
    }
}

/// One external IP geolocation service.
///
/// This is an outbound port. Implementations perform exactly one HTTP call
/// per `locate` and never retry; classification of failures and timeouts
/// happens in the caller.
#[async_trait]
pub trait GeoProvider: Send + Sync {
    /// Stable, human-readable name (unique within a registry).
    fn name(&self) -> &str;

    /// Look up the location of an IP address.
    ///
    /// Returns `Ok(None)` when the service reports no usable location.
    async fn locate(&self, ip: &str) -> Result<Option<RawLocation>, ProviderError>;
}
