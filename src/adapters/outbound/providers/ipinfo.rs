//! ipinfo.io adapter

use super::fetch_json;
use crate::domain::entities::RawLocation;
use crate::domain::ports::{GeoProvider, ProviderError};
use async_trait::async_trait;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct IpInfoResponse {
    /// "lat,lon"
    loc: Option<String>,
    city: Option<String>,
    region: Option<String>,
    country: Option<String>,
    timezone: Option<String>,
    org: Option<String>,
}

impl IpInfoResponse {
    fn into_location(self) -> Option<RawLocation> {
        let (latitude, longitude) = parse_loc(self.loc.as_deref()?)?;
        Some(RawLocation {
            latitude,
            longitude,
            city: self.city,
            region: self.region,
            country: self.country,
            timezone: self.timezone,
            isp: self.org.clone(),
            organization: self.org,
        })
    }
}

fn parse_loc(loc: &str) -> Option<(f64, f64)> {
    let (lat, lon) = loc.split_once(',')?;
    let lat: f64 = lat.trim().parse().ok()?;
    let lon: f64 = lon.trim().parse().ok()?;
    if lat.is_nan() || lon.is_nan() {
        return None;
    }
    Some((lat, lon))
}

/// ipinfo.io provider (anonymous tier).
pub struct IpInfoProvider {
    client: reqwest::Client,
    base_url: String,
}

impl IpInfoProvider {
    pub const NAME: &'static str = "ipinfo.io";
    pub const DEFAULT_BASE_URL: &'static str = "https://ipinfo.io";

    pub fn new(client: reqwest::Client) -> Self {
        Self::with_base_url(client, Self::DEFAULT_BASE_URL)
    }

    pub fn with_base_url(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl GeoProvider for IpInfoProvider {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn locate(&self, ip: &str) -> Result<Option<RawLocation>, ProviderError> {
        let url = format!("{}/{}/json", self.base_url, ip);
        let response: IpInfoResponse = fetch_json(self.client.get(&url)).await?;
        Ok(response.into_location())
    }
}
