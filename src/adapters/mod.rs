//! Adapters Layer
//!
//! Inbound adapters drive the application (HTTP API); outbound adapters
//! implement the domain ports (geolocation providers, visitor storage).

pub mod inbound;
pub mod outbound;
