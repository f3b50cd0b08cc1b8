//! freeipapi.com adapter

use super::{fetch_json, lenient_f64};
use crate::domain::entities::RawLocation;
use crate::domain::ports::{GeoProvider, ProviderError};
use async_trait::async_trait;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FreeIpApiResponse {
    #[serde(default, deserialize_with = "lenient_f64")]
    latitude: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    longitude: Option<f64>,
    city_name: Option<String>,
    region_name: Option<String>,
    country_name: Option<String>,
    #[serde(default)]
    time_zones: Vec<String>,
    time_zone: Option<String>,
}

impl FreeIpApiResponse {
    fn into_location(self) -> Option<RawLocation> {
        // Unknown addresses come back with zeroed coordinates.
        let latitude = self.latitude.filter(|lat| *lat != 0.0)?;
        let timezone = self.time_zones.into_iter().next().or(self.time_zone);
        Some(RawLocation {
            latitude,
            longitude: self.longitude?,
            city: self.city_name,
            region: self.region_name,
            country: self.country_name,
            timezone,
            isp: None,
            organization: None,
        })
    }
}

/// freeipapi.com provider (no key).
pub struct FreeIpApiProvider {
    client: reqwest::Client,
    base_url: String,
}

impl FreeIpApiProvider {
    pub const NAME: &'static str = "freeipapi.com";
    pub const DEFAULT_BASE_URL: &'static str = "https://freeipapi.com";

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
impl GeoProvider for FreeIpApiProvider {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn locate(&self, ip: &str) -> Result<Option<RawLocation>, ProviderError> {
        let url = format!("{}/api/json/{}", self.base_url, ip);
        let response: FreeIpApiResponse = fetch_json(self.client.get(&url)).await?;
        Ok(response.into_location())
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_locate_success_prefers_timezone_list() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/json/1.1.1.1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "ipAddress": "1.1.1.1",
                "latitude": -33.8688,
                "longitude": 151.209,
                "cityName": "Sydney",
                "regionName": "New South Wales",
                "countryName": "Australia",
                "timeZones": ["Australia/Sydney", "Australia/Melbourne"],
                "timeZone": "+10:00"
            })))
            .mount(&mock_server)
            .await;

        let provider = FreeIpApiProvider::with_base_url(reqwest::Client::new(), &mock_server.uri());
        let loc = provider.locate("1.1.1.1").await.unwrap().unwrap();

        assert_eq!(loc.city.as_deref(), Some("Sydney"));
        assert_eq!(loc.timezone.as_deref(), Some("Australia/Sydney"));
        assert!(loc.isp.is_none());
    }

    #[test]
    fn test_single_timezone_fallback() {
        let resp: FreeIpApiResponse = serde_json::from_str(
            r#"{"latitude": 48.85, "longitude": 2.35, "timeZone": "+01:00"}"#,
        )
        .unwrap();
        assert_eq!(resp.into_location().unwrap().timezone.as_deref(), Some("+01:00"));
    }

    #[test]
    fn test_zero_latitude_is_absent() {
        let resp: FreeIpApiResponse =
            serde_json::from_str(r#"{"latitude": 0, "longitude": 0}"#).unwrap();
        assert!(resp.into_location().is_none());
    }

    #[tokio::test]
    async fn test_locate_server_error() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&mock_server)
            .await;

        let provider = FreeIpApiProvider::with_base_url(reqwest::Client::new(), &mock_server.uri());
        assert!(matches!(
            provider.locate("1.1.1.1").await,
            Err(ProviderError::Status(_))
        ));
    }
}
