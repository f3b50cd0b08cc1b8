//! ipstack.com adapter

use super::{fetch_json, lenient_f64};
use crate::domain::entities::RawLocation;
use crate::domain::ports::{GeoProvider, ProviderError};
use async_trait::async_trait;
use serde::Deserialize;

/// ipstack reports key and quota problems in-band with `success: false`.
#[derive(Debug, Deserialize)]
struct IpStackResponse {
    success: Option<bool>,
    #[serde(default, deserialize_with = "lenient_f64")]
    latitude: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    longitude: Option<f64>,
    city: Option<String>,
    region_name: Option<String>,
    country_name: Option<String>,
    time_zone: Option<TimeZone>,
    connection: Option<Connection>,
}

#[derive(Debug, Deserialize)]
struct TimeZone {
    id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Connection {
    isp: Option<String>,
}

impl IpStackResponse {
    fn into_location(self) -> Option<RawLocation> {
        if self.success == Some(false) {
            return None;
        }
        Some(RawLocation {
            latitude: self.latitude.filter(|lat| *lat != 0.0)?,
            longitude: self.longitude?,
            city: self.city,
            region: self.region_name,
            country: self.country_name,
            timezone: self.time_zone.and_then(|tz| tz.id),
            isp: self.connection.and_then(|c| c.isp),
            organization: None,
        })
    }
}

pub struct IpStackProvider {
    client: reqwest::Client,
    base_url: String,
    access_key: String,
}

impl IpStackProvider {
    pub const NAME: &'static str = "ipstack.com";
    pub const DEFAULT_BASE_URL: &'static str = "http://api.ipstack.com";

    pub fn new(client: reqwest::Client, access_key: &str) -> Self {
        Self::with_base_url(client, access_key, Self::DEFAULT_BASE_URL)
    }

    pub fn with_base_url(client: reqwest::Client, access_key: &str, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            access_key: access_key.to_string(),
        }
    }
}

#[async_trait]
impl GeoProvider for IpStackProvider {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn locate(&self, ip: &str) -> Result<Option<RawLocation>, ProviderError> {
        let url = format!("{}/{}", self.base_url, ip);
        let request = self
            .client
            .get(&url)
            .query(&[("access_key", self.access_key.as_str())]);
        let response: IpStackResponse = fetch_json(request).await?;
        Ok(response.into_location())
    }
}
