//! ipgeolocation.io adapter

use super::{fetch_json, lenient_f64};
use crate::domain::entities::RawLocation;
use crate::domain::ports::{GeoProvider, ProviderError};
use async_trait::async_trait;
use serde::Deserialize;

/// Coordinates arrive as strings (`"37.40599"`).
#[derive(Debug, Deserialize)]
struct IpGeolocationResponse {
    #[serde(default, deserialize_with = "lenient_f64")]
    latitude: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    longitude: Option<f64>,
    city: Option<String>,
    state_prov: Option<String>,
    country_name: Option<String>,
    time_zone: Option<TimeZone>,
    isp: Option<String>,
    organization: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TimeZone {
    name: Option<String>,
}

impl IpGeolocationResponse {
    fn into_location(self) -> Option<RawLocation> {
        Some(RawLocation {
            latitude: self.latitude.filter(|lat| *lat != 0.0)?,
            longitude: self.longitude?,
            city: self.city,
            region: self.state_prov,
            country: self.country_name,
            timezone: self.time_zone.and_then(|tz| tz.name),
            isp: self.isp,
            organization: self.organization,
        })
    }
}

pub struct IpGeolocationProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl IpGeolocationProvider {
    pub const NAME: &'static str = "ipgeolocation.io";
    pub const DEFAULT_BASE_URL: &'static str = "https://api.ipgeolocation.io";

    pub fn new(client: reqwest::Client, api_key: &str) -> Self {
        Self::with_base_url(client, api_key, Self::DEFAULT_BASE_URL)
    }

    pub fn with_base_url(client: reqwest::Client, api_key: &str, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        }
    }
}

#[async_trait]
impl GeoProvider for IpGeolocationProvider {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn locate(&self, ip: &str) -> Result<Option<RawLocation>, ProviderError> {
        let url = format!("{}/ipgeo", self.base_url);
        let request = self
            .client
            .get(&url)
            .query(&[("apiKey", self.api_key.as_str()), ("ip", ip)]);
        let response: IpGeolocationResponse = fetch_json(request).await?;
        Ok(response.into_location())
    }
}
