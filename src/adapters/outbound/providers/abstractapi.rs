//! abstractapi.com IP intelligence adapter

use super::{fetch_json, lenient_f64};
use crate::domain::entities::RawLocation;
use crate::domain::ports::{GeoProvider, ProviderError};
use async_trait::async_trait;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct AbstractApiResponse {
    location: Option<Location>,
    timezone: Option<Timezone>,
    company: Option<Company>,
}

#[derive(Debug, Deserialize)]
struct Location {
    #[serde(default, deserialize_with = "lenient_f64")]
    latitude: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    longitude: Option<f64>,
    city: Option<String>,
    region: Option<String>,
    country: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Timezone {
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Company {
    name: Option<String>,
}

impl AbstractApiResponse {
    fn into_location(self) -> Option<RawLocation> {
        let location = self.location?;
        let company = self.company.and_then(|c| c.name);
        Some(RawLocation {
            latitude: location.latitude.filter(|lat| *lat != 0.0)?,
            longitude: location.longitude?,
            city: location.city,
            region: location.region,
            country: location.country,
            timezone: self.timezone.and_then(|tz| tz.name),
            isp: company.clone(),
            organization: company,
        })
    }
}

pub struct AbstractApiProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl AbstractApiProvider {
    pub const NAME: &'static str = "abstractapi.com";
    pub const DEFAULT_BASE_URL: &'static str = "https://ip-intelligence.abstractapi.com";

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
impl GeoProvider for AbstractApiProvider {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn locate(&self, ip: &str) -> Result<Option<RawLocation>, ProviderError> {
        let url = format!("{}/v1/", self.base_url);
        let request = self
            .client
            .get(&url)
            .query(&[("api_key", self.api_key.as_str()), ("ip_address", ip)]);
        let response: AbstractApiResponse = fetch_json(request).await?;
        Ok(response.into_location())
    }
}
