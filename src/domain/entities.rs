//! Domain Entities - Core business objects
//!
//! These entities represent the core concepts of the geolocation domain:
//! what a single provider reported, how providers agree on a location,
//! and the visitor record a resolution is attached to.

use crate::domain::value_objects::map_link;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Provider-neutral location payload.
///
/// Every provider adapter maps its proprietary JSON into this shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawLocation {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub isp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization: Option<String>,
}

impl RawLocation {
    /// Create a location with coordinates only.
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            city: None,
            region: None,
            country: None,
            timezone: None,
            isp: None,
            organization: None,
        }
    }

    /// Both coordinates are real numbers (not NaN, not infinite).
    pub fn has_coordinates(&self) -> bool {
        self.latitude.is_finite() && self.longitude.is_finite()
    }

    /// Drop empty and whitespace-only text fields.
    pub fn normalized(self) -> Self {
        fn clean(value: Option<String>) -> Option<String> {
            value
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        }

        Self {
            latitude: self.latitude,
            longitude: self.longitude,
            city: clean(self.city),
            region: clean(self.region),
            country: clean(self.country),
            timezone: clean(self.timezone),
            isp: clean(self.isp),
            organization: clean(self.organization),
        }
    }
}

/// Classification of a single provider call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    Success,
    Failed,
    Timeout,
}

impl OutcomeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Timeout => "timeout",
        }
    }
}

impl std::fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What a provider call produced.
///
/// Only `Success` carries coordinates, so a failed call can never
/// leak a partial location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Outcome {
    Success(RawLocation),
    Failed { error: String },
    Timeout { error: String },
}

/// The result of calling exactly one provider for one IP.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderOutcome {
    /// Registry name of the provider
    pub provider: String,
    /// When the call was started
    pub observed_at: DateTime<Utc>,
    #[serde(flatten)]
    pub outcome: Outcome,
}

impl ProviderOutcome {
    pub fn success(provider: impl Into<String>, observed_at: DateTime<Utc>, location: RawLocation) -> Self {
        Self {
            provider: provider.into(),
            observed_at,
            outcome: Outcome::Success(location),
        }
    }

    pub fn failed(provider: impl Into<String>, observed_at: DateTime<Utc>, error: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            observed_at,
            outcome: Outcome::Failed {
                error: error.into(),
            },
        }
    }

    pub fn timeout(provider: impl Into<String>, observed_at: DateTime<Utc>, error: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            observed_at,
            outcome: Outcome::Timeout {
                error: error.into(),
            },
        }
    }

    pub fn status(&self) -> OutcomeStatus {
        match self.outcome {
            Outcome::Success(_) => OutcomeStatus::Success,
            Outcome::Failed { .. } => OutcomeStatus::Failed,
            Outcome::Timeout { .. } => OutcomeStatus::Timeout,
        }
    }

    /// The reported location, for successful calls only.
    pub fn location(&self) -> Option<&RawLocation> {
        match &self.outcome {
            Outcome::Success(location) => Some(location),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match &self.outcome {
            Outcome::Success(_) => None,
            Outcome::Failed { error } | Outcome::Timeout { error } => Some(error),
        }
    }
}

/// A deduplicated point that one or more providers agree on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationCluster {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    /// Providers whose coordinates round to this cluster, in registry order
    pub providers: Vec<String>,
    pub map_link: String,
}

impl LocationCluster {
    /// Start a cluster from its first contributing provider.
    pub fn seed(provider: &str, location: &RawLocation) -> Self {
        Self {
            latitude: location.latitude,
            longitude: location.longitude,
            city: location.city.clone(),
            region: location.region.clone(),
            country: location.country.clone(),
            timezone: location.timezone.clone(),
            providers: vec![provider.to_string()],
            map_link: map_link(location.latitude, location.longitude),
        }
    }

    /// Add another provider and backfill place names still missing.
    pub fn absorb(&mut self, provider: &str, location: &RawLocation) {
        self.providers.push(provider.to_string());
        backfill(&mut self.city, &location.city);
        backfill(&mut self.region, &location.region);
        backfill(&mut self.country, &location.country);
        backfill(&mut self.timezone, &location.timezone);
    }

    pub fn contributor_count(&self) -> usize {
        self.providers.len()
    }
}

fn backfill(slot: &mut Option<String>, candidate: &Option<String>) {
    if slot.is_none() {
        if let Some(value) = candidate {
            *slot = Some(value.clone());
        }
    }
}

/// The full output of one aggregation run for one IP.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoResolution {
    pub ip: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub isp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization: Option<String>,
    /// Most-agreed location first
    pub clusters: Vec<LocationCluster>,
    /// Every provider's outcome, in registry order
    pub provider_outcomes: Vec<ProviderOutcome>,
    pub resolved_at: DateTime<Utc>,
}

impl GeoResolution {
    /// Number of provider outcomes with the given status.
    pub fn status_count(&self, status: OutcomeStatus) -> usize {
        self.provider_outcomes
            .iter()
            .filter(|o| o.status() == status)
            .count()
    }

    /// Providers were asked but none produced a location.
    pub fn all_providers_failed(&self) -> bool {
        self.clusters.is_empty()
    }

    pub fn primary_cluster(&self) -> Option<&LocationCluster> {
        self.clusters.first()
    }
}

/// How a visitor's geolocation should be presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeoStatus {
    /// No resolution stored yet
    NotAttempted,
    /// A resolution exists but every provider failed or timed out
    AllProvidersFailed,
    Resolved,
}

impl GeoStatus {
    pub fn of(resolution: Option<&GeoResolution>) -> Self {
        match resolution {
            None => Self::NotAttempted,
            Some(r) if r.all_providers_failed() => Self::AllProvidersFailed,
            Some(_) => Self::Resolved,
        }
    }
}

/// Where a visitor event originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Api,
    Chat,
    Client,
}

/// Coarse device classification from the user agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    Mobile,
    Tablet,
    Desktop,
    Unknown,
}

impl DeviceType {
    /// Classify a user agent string.
    ///
    /// Tablet markers win over mobile markers ("Android" appears in both).
    pub fn from_user_agent(user_agent: Option<&str>) -> Self {
        let ua = match user_agent {
            Some(ua) if !ua.trim().is_empty() => ua.to_lowercase(),
            _ => return Self::Unknown,
        };

        const TABLET: [&str; 4] = ["tablet", "ipad", "playbook", "silk"];
        const MOBILE: [&str; 5] = ["mobi", "iphone", "android", "blackberry", "phone"];

        if TABLET.iter().any(|m| ua.contains(m)) {
            Self::Tablet
        } else if MOBILE.iter().any(|m| ua.contains(m)) {
            Self::Mobile
        } else {
            Self::Desktop
        }
    }
}

/// Location hints supplied by the edge network in request headers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HeaderLocation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
}

/// One logged interaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisitEvent {
    pub kind: EventKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    pub time: DateTime<Utc>,
}

/// Everything needed to log a visit: identity, request metadata and the event.
#[derive(Debug, Clone, PartialEq)]
pub struct VisitRecord {
    pub key: String,
    pub ip: String,
    pub user_agent: Option<String>,
    pub header_location: HeaderLocation,
    pub event: VisitEvent,
}

impl VisitRecord {
    pub fn device_type(&self) -> DeviceType {
        DeviceType::from_user_agent(self.user_agent.as_deref())
    }
}

/// A visitor identified by visitor id (or IP when no id was issued).
///
/// Owns at most one current geolocation resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Visitor {
    pub key: String,
    pub ip: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    pub device_type: DeviceType,
    #[serde(default)]
    pub header_location: HeaderLocation,
    pub last_seen: DateTime<Utc>,
    #[serde(default)]
    pub events: Vec<VisitEvent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geo_location: Option<GeoResolution>,
}

impl Visitor {
    /// A visitor known only by key and IP (e.g. created by a forced resolution).
    pub fn bare(key: impl Into<String>, ip: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ip: ip.into(),
            user_agent: None,
            device_type: DeviceType::Unknown,
            header_location: HeaderLocation::default(),
            last_seen: Utc::now(),
            events: Vec::new(),
            geo_location: None,
        }
    }

    /// Build a visitor from its first recorded visit.
    pub fn from_record(record: VisitRecord) -> Self {
        let device_type = record.device_type();
        Self {
            key: record.key,
            ip: record.ip,
            user_agent: record.user_agent,
            device_type,
            header_location: record.header_location,
            last_seen: record.event.time,
            events: vec![record.event],
            geo_location: None,
        }
    }

    /// Merge a new visit: refresh request metadata and append the event.
    ///
    /// The stored resolution is left untouched.
    pub fn apply(&mut self, record: VisitRecord) {
        self.device_type = record.device_type();
        self.ip = record.ip;
        self.user_agent = record.user_agent;
        self.header_location = record.header_location;
        self.last_seen = record.event.time;
        self.events.push(record.event);
    }

    pub fn geo_status(&self) -> GeoStatus {
        GeoStatus::of(self.geo_location.as_ref())
    }
}
