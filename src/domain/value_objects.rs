//! Value Objects - Immutable domain primitives
//!
//! Value objects are identified by their value rather than identity.
//! They are immutable and can be freely shared.

use std::net::IpAddr;

/// Placeholder used when the client IP could not be determined.
pub const UNKNOWN_IP: &str = "unknown";

/// Decimal places used when deciding whether two providers agree.
pub const CLUSTER_PRECISION: i32 = 2;

/// Check whether an IP is worth sending to external providers.
///
/// Anything that does not parse as an IP address, and the loopback
/// addresses, are rejected before any network call is made. The value is
/// interpolated into provider URLs, so only a bare address may pass.
///
/// # Examples
/// ```
/// use visitor_geo::domain::value_objects::is_resolvable_ip;
///
/// assert!(is_resolvable_ip("73.222.64.204"));
/// assert!(!is_resolvable_ip("127.0.0.1"));
/// assert!(!is_resolvable_ip("unknown"));
/// assert!(!is_resolvable_ip("8.8.8.8/../admin?x="));
/// ```
pub fn is_resolvable_ip(ip: &str) -> bool {
    let ip = ip.trim();
    if matches!(ip, "" | UNKNOWN_IP | "127.0.0.1" | "::1") {
        return false;
    }
    ip.parse::<IpAddr>().is_ok()
}

/// Grouping key for coordinates rounded to [`CLUSTER_PRECISION`] decimals.
///
/// Stored as scaled integers so that equality never compares floats.
/// Halves round toward positive infinity, so `-0.125` keys as `-0.12`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CoordinateKey {
    lat: i64,
    lon: i64,
}

impl CoordinateKey {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        let scale = 10f64.powi(CLUSTER_PRECISION);
        Self {
            lat: round_half_up(latitude * scale),
            lon: round_half_up(longitude * scale),
        }
    }

    /// The rounded coordinates this key stands for.
    pub fn rounded(&self) -> (f64, f64) {
        let scale = 10f64.powi(CLUSTER_PRECISION);
        (self.lat as f64 / scale, self.lon as f64 / scale)
    }
}

fn round_half_up(value: f64) -> i64 {
    (value + 0.5).floor() as i64
}

/// Deterministic map link for a coordinate pair.
pub fn map_link(latitude: f64, longitude: f64) -> String {
    format!(
        "https://www.google.com/maps/search/?api=1&query={},{}",
        latitude, longitude
    )
}
