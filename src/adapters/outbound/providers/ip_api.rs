//! ip-api.com adapter

use super::{fetch_json, lenient_f64};
use crate::domain::entities::RawLocation;
use crate::domain::ports::{GeoProvider, ProviderError};
use async_trait::async_trait;
use serde::Deserialize;

const FIELDS: &str = "status,lat,lon,city,regionName,country,timezone,isp,org";

/// Response from `GET /json/{ip}`.
///
/// Lookups that fail come back as HTTP 200 with `status: "fail"`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IpApiResponse {
    status: Option<String>,
    #[serde(default, deserialize_with = "lenient_f64")]
    lat: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    lon: Option<f64>,
    city: Option<String>,
    region_name: Option<String>,
    country: Option<String>,
    timezone: Option<String>,
    isp: Option<String>,
    org: Option<String>,
}

impl IpApiResponse {
    fn into_location(self) -> Option<RawLocation> {
        if self.status.as_deref() != Some("success") {
            return None;
        }
        Some(RawLocation {
            latitude: self.lat?,
            longitude: self.lon?,
            city: self.city,
            region: self.region_name,
            country: self.country,
            timezone: self.timezone,
            isp: self.isp,
            organization: self.org,
        })
    }
}

/// ip-api.com provider (free tier, no key).
pub struct IpApiProvider {
    client: reqwest::Client,
    base_url: String,
}

impl IpApiProvider {
    pub const NAME: &'static str = "ip-api.com";
    pub const DEFAULT_BASE_URL: &'static str = "http://ip-api.com";

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
impl GeoProvider for IpApiProvider {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn locate(&self, ip: &str) -> Result<Option<RawLocation>, ProviderError> {
        let url = format!("{}/json/{}", self.base_url, ip);
        let response: IpApiResponse =
            fetch_json(self.client.get(&url).query(&[("fields", FIELDS)])).await?;
        Ok(response.into_location())
    }
}
