//! ipwho.is adapter

use super::{fetch_json, lenient_f64};
use crate::domain::entities::RawLocation;
use crate::domain::ports::{GeoProvider, ProviderError};
use async_trait::async_trait;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct IpWhoIsResponse {
    #[serde(default)]
    success: bool,
    #[serde(default, deserialize_with = "lenient_f64")]
    latitude: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    longitude: Option<f64>,
    city: Option<String>,
    region: Option<String>,
    country: Option<String>,
    timezone: Option<Timezone>,
    connection: Option<Connection>,
}

#[derive(Debug, Deserialize)]
struct Timezone {
    id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Connection {
    isp: Option<String>,
    org: Option<String>,
}

impl IpWhoIsResponse {
    fn into_location(self) -> Option<RawLocation> {
        if !self.success {
            return None;
        }
        let (isp, organization) = match self.connection {
            Some(c) => (c.isp, c.org),
            None => (None, None),
        };
        Some(RawLocation {
            latitude: self.latitude?,
            longitude: self.longitude?,
            city: self.city,
            region: self.region,
            country: self.country,
            timezone: self.timezone.and_then(|tz| tz.id),
            isp,
            organization,
        })
    }
}

/// ipwho.is provider (no key).
pub struct IpWhoIsProvider {
    client: reqwest::Client,
    base_url: String,
}

impl IpWhoIsProvider {
    pub const NAME: &'static str = "ipwho.is";
    pub const DEFAULT_BASE_URL: &'static str = "https://ipwho.is";

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
impl GeoProvider for IpWhoIsProvider {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn locate(&self, ip: &str) -> Result<Option<RawLocation>, ProviderError> {
        let url = format!("{}/{}", self.base_url, ip);
        let response: IpWhoIsResponse = fetch_json(self.client.get(&url)).await?;
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
    async fn test_locate_success() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/8.8.8.8"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "ip": "8.8.8.8",
                "success": true,
                "latitude": 37.3860517,
                "longitude": -122.0838511,
                "city": "Mountain View",
                "region": "California",
                "country": "United States",
                "timezone": { "id": "America/Los_Angeles", "utc": "-07:00" },
                "connection": { "asn": 15169, "org": "Google LLC", "isp": "Google LLC" }
            })))
            .mount(&mock_server)
            .await;

        let provider = IpWhoIsProvider::with_base_url(reqwest::Client::new(), &mock_server.uri());
        let loc = provider.locate("8.8.8.8").await.unwrap().unwrap();

        assert_eq!(loc.latitude, 37.3860517);
        assert_eq!(loc.timezone.as_deref(), Some("America/Los_Angeles"));
        assert_eq!(loc.isp.as_deref(), Some("Google LLC"));
    }

    #[tokio::test]
    async fn test_locate_unsuccessful_is_absent() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/999.1.1.1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "success": false,
                "message": "Invalid IP address"
            })))
            .mount(&mock_server)
            .await;

        let provider = IpWhoIsProvider::with_base_url(reqwest::Client::new(), &mock_server.uri());
        assert!(provider.locate("999.1.1.1").await.unwrap().is_none());
    }

    #[test]
    fn test_missing_connection_block() {
        let resp: IpWhoIsResponse = serde_json::from_str(
            r#"{"success": true, "latitude": 1.5, "longitude": 2.5}"#,
        )
        .unwrap();
        let loc = resp.into_location().unwrap();
        assert!(loc.isp.is_none());
        assert!(loc.timezone.is_none());
    }
}
