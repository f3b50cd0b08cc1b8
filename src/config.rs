use crate::adapters::outbound::ProviderKeys;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    // HTTP API
    pub listen_addr: String,
    pub debug: bool,

    // Storage: None keeps visitors in memory
    pub db_path: Option<String>,

    // Resolution
    pub provider_timeout_ms: u64,
    pub refresh_delay_ms: u64,
    pub resolve_in_background: bool,
    pub queue_capacity: usize,

    // Keyed providers
    pub ipgeolocation_key: Option<String>,
    pub abstractapi_key: Option<String>,
    pub ipstack_key: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".to_string(),
            debug: false,
            db_path: None,
            provider_timeout_ms: 7000,
            refresh_delay_ms: 1500,
            resolve_in_background: false,
            queue_capacity: 256,
            ipgeolocation_key: None,
            abstractapi_key: None,
            ipstack_key: None,
        }
    }
}

impl Config {
    pub fn provider_timeout(&self) -> Duration {
        Duration::from_millis(self.provider_timeout_ms)
    }

    pub fn refresh_delay(&self) -> Duration {
        Duration::from_millis(self.refresh_delay_ms)
    }

    pub fn provider_keys(&self) -> ProviderKeys {
        ProviderKeys {
            ipgeolocation: self.ipgeolocation_key.clone(),
            abstractapi: self.abstractapi_key.clone(),
            ipstack: self.ipstack_key.clone(),
        }
    }
}

/// Blank values count as unset.
fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

pub fn load_config() -> anyhow::Result<Config> {
    let listen_addr = std::env::var("VISITOR_GEO_LISTEN_ADDR")
        .unwrap_or_else(|_| "0.0.0.0:8080".to_string());

    let debug = std::env::var("DEBUG").is_ok();

    let db_path = non_empty_var("VISITOR_GEO_DB_PATH");

    let provider_timeout_ms = std::env::var("VISITOR_GEO_PROVIDER_TIMEOUT_MS")
        .unwrap_or_else(|_| "7000".to_string())
        .parse()
        .unwrap_or(7000);

    let refresh_delay_ms = std::env::var("VISITOR_GEO_REFRESH_DELAY_MS")
        .unwrap_or_else(|_| "1500".to_string())
        .parse()
        .unwrap_or(1500);

    let resolve_in_background = std::env::var("VISITOR_GEO_RESOLVE_IN_BACKGROUND")
        .map(|v| v == "1" || v.to_lowercase() == "true")
        .unwrap_or(false);

    let queue_capacity = std::env::var("VISITOR_GEO_QUEUE_CAPACITY")
        .unwrap_or_else(|_| "256".to_string())
        .parse::<usize>()
        .ok()
        .filter(|c| *c > 0)
        .unwrap_or(256);

    let ipgeolocation_key = non_empty_var("IPGEOLOCATION_KEY");
    let abstractapi_key = non_empty_var("ABSTRACTAPI_KEY");
    let ipstack_key = non_empty_var("IPSTACK_KEY");

    Ok(Config {
        listen_addr,
        debug,
        db_path,
        provider_timeout_ms,
        refresh_delay_ms,
        resolve_in_background,
        queue_capacity,
        ipgeolocation_key,
        abstractapi_key,
        ipstack_key,
    })
}
