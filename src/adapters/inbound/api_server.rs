//! Visitor API Server
//!
//! HTTP API for logging visitor events and administering their
//! geolocation: list and delete visitors, force re-resolution for one
//! visitor or all of them, and run an ad-hoc lookup for diagnostics.

use crate::application::{ResolutionQueue, ResolutionService};
use crate::domain::entities::{
    EventKind, GeoResolution, GeoStatus, HeaderLocation, VisitEvent, VisitRecord, Visitor,
};
use crate::domain::value_objects::UNKNOWN_IP;
use crate::infrastructure::ShutdownController;
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{delete, get, patch, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

/// Event body posted to `/api/v1/log`.
#[derive(Debug, Clone, Deserialize)]
pub struct LogRequest {
    #[serde(rename = "type")]
    pub kind: EventKind,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
    #[serde(default)]
    pub time: Option<DateTime<Utc>>,
}

impl LogRequest {
    fn into_event(self) -> VisitEvent {
        VisitEvent {
            kind: self.kind,
            endpoint: self.endpoint,
            method: self.method,
            message: self.message,
            data: self.data,
            time: self.time.unwrap_or_else(Utc::now),
        }
    }
}

/// Optional body of the per-visitor force-resolve call.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ForceResolveRequest {
    #[serde(default)]
    pub ip: Option<String>,
}

/// Health response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub providers: Vec<String>,
}

/// A visitor as listed by the admin API.
#[derive(Debug, Serialize)]
pub struct VisitorView {
    #[serde(flatten)]
    pub visitor: Visitor,
    pub geo_status: GeoStatus,
}

impl From<Visitor> for VisitorView {
    fn from(visitor: Visitor) -> Self {
        let geo_status = visitor.geo_status();
        Self { visitor, geo_status }
    }
}

#[derive(Debug, Serialize)]
pub struct VisitorsListResponse {
    pub ok: bool,
    pub visitors: Vec<VisitorView>,
    pub count: usize,
}

#[derive(Debug, Serialize)]
pub struct GeoResponse {
    pub ok: bool,
    pub geo_status: GeoStatus,
    pub geo_location: GeoResolution,
}

/// API Server state.
#[derive(Clone)]
pub struct ApiState {
    pub service: Arc<ResolutionService>,
    /// When set, log requests hand resolution to the background queue
    pub queue: Option<Arc<ResolutionQueue>>,
}

impl ApiState {
    pub fn new(service: Arc<ResolutionService>) -> Self {
        Self {
            service,
            queue: None,
        }
    }

    pub fn with_queue(mut self, queue: Arc<ResolutionQueue>) -> Self {
        self.queue = Some(queue);
        self
    }
}

/// API Server for visitor logging and geolocation admin.
pub struct ApiServer {
    listen_addr: String,
    state: ApiState,
}

impl ApiServer {
    pub fn new(listen_addr: String, state: ApiState) -> Self {
        Self { listen_addr, state }
    }

    /// Build the router with every route and the trace layer.
    pub fn router(state: ApiState) -> Router {
        Router::new()
            // Health endpoint
            .route("/health", get(health_handler))
            // Event logging
            .route("/api/v1/log", post(log_handler))
            // Visitor admin
            .route(
                "/api/v1/visitors",
                get(list_visitors_handler).delete(delete_all_handler),
            )
            .route("/api/v1/visitors/:key", delete(delete_visitor_handler))
            .route("/api/v1/visitors/:key/geo", patch(force_resolve_handler))
            // Geolocation
            .route("/api/v1/geo", patch(force_resolve_all_handler))
            .route("/api/v1/geo/:ip", get(lookup_handler))
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }

    /// Run the API server until `shutdown` fires.
    #[cfg_attr(coverage_nightly, coverage(off))]
    pub async fn run(&self, shutdown: ShutdownController) -> anyhow::Result<()> {
        let app = Self::router(self.state.clone());

        let listener = TcpListener::bind(&self.listen_addr).await?;
        tracing::info!("visitor API listening on {}", self.listen_addr);

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown.wait())
            .await?;
        Ok(())
    }
}

// Request metadata extraction

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn first_header(headers: &HeaderMap, names: &[&str]) -> Option<String> {
    names.iter().find_map(|name| header_value(headers, name))
}

/// Client IP from proxy headers: first `x-forwarded-for` hop, then the
/// single-value headers, else the unknown placeholder.
pub fn client_ip(headers: &HeaderMap) -> String {
    if let Some(forwarded) = header_value(headers, "x-forwarded-for") {
        if let Some(first) = forwarded.split(',').map(str::trim).find(|s| !s.is_empty()) {
            return first.to_string();
        }
    }
    first_header(headers, &["x-real-ip", "cf-connecting-ip", "x-client-ip"])
        .unwrap_or_else(|| UNKNOWN_IP.to_string())
}

/// Visitor key: the issued visitor id, falling back to the client IP.
pub fn visitor_key(headers: &HeaderMap, ip: &str) -> String {
    header_value(headers, "x-visitor-id").unwrap_or_else(|| ip.to_string())
}

/// Location hints set by the edge network.
pub fn header_location(headers: &HeaderMap) -> HeaderLocation {
    HeaderLocation {
        country: first_header(headers, &["x-vercel-ip-country", "x-country", "cf-ipcountry"]),
        region: first_header(headers, &["x-vercel-ip-region", "x-region"]),
        city: first_header(headers, &["x-vercel-ip-city", "x-city"]),
    }
}

fn storage_error(e: impl std::fmt::Display) -> (StatusCode, Json<serde_json::Value>) {
    tracing::error!("visitor storage error: {}", e);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(serde_json::json!({
            "ok": false,
            "error": "storage unavailable"
        })),
    )
}

// Handler functions

async fn health_handler(State(state): State<ApiState>) -> impl IntoResponse {
    let response = HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        providers: state.service.aggregator().provider_names(),
    };
    Json(response)
}

async fn log_handler(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(req): Json<LogRequest>,
) -> impl IntoResponse {
    let ip = client_ip(&headers);
    let key = visitor_key(&headers, &ip);

    let record = VisitRecord {
        key: key.clone(),
        ip: ip.clone(),
        user_agent: header_value(&headers, "user-agent"),
        header_location: header_location(&headers),
        event: req.into_event(),
    };
    state.service.record_visit(record).await;

    match &state.queue {
        Some(queue) => queue.submit(&ip, &key).await,
        None => state.service.resolve_if_absent(&ip, &key).await,
    }

    Json(serde_json::json!({ "ok": true }))
}

async fn list_visitors_handler(State(state): State<ApiState>) -> impl IntoResponse {
    let mut visitors = match state.service.repository().list().await {
        Ok(visitors) => visitors,
        Err(e) => return storage_error(e).into_response(),
    };
    visitors.sort_by(|a, b| b.last_seen.cmp(&a.last_seen));

    let visitors: Vec<VisitorView> = visitors.into_iter().map(VisitorView::from).collect();
    let count = visitors.len();
    Json(VisitorsListResponse {
        ok: true,
        visitors,
        count,
    })
    .into_response()
}

async fn delete_all_handler(State(state): State<ApiState>) -> impl IntoResponse {
    match state.service.repository().delete_all().await {
        Ok(deleted) => {
            tracing::info!("deleted {} visitors", deleted);
            Json(serde_json::json!({ "ok": true, "deleted": deleted })).into_response()
        }
        Err(e) => storage_error(e).into_response(),
    }
}

async fn delete_visitor_handler(
    State(state): State<ApiState>,
    Path(key): Path<String>,
) -> impl IntoResponse {
    match state.service.repository().delete(&key).await {
        Ok(existed) => {
            tracing::info!("deleted visitor {} (existed={})", key, existed);
            Json(serde_json::json!({ "ok": true, "deleted": usize::from(existed) }))
                .into_response()
        }
        Err(e) => storage_error(e).into_response(),
    }
}

async fn force_resolve_handler(
    State(state): State<ApiState>,
    Path(key): Path<String>,
    body: Bytes,
) -> impl IntoResponse {
    let req: ForceResolveRequest = if body.iter().all(u8::is_ascii_whitespace) {
        ForceResolveRequest::default()
    } else {
        match serde_json::from_slice(&body) {
            Ok(req) => req,
            Err(e) => {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(serde_json::json!({ "ok": false, "error": e.to_string() })),
                )
                    .into_response()
            }
        }
    };

    let ip = match req.ip.filter(|ip| !ip.trim().is_empty()) {
        Some(ip) => Some(ip),
        None => match state.service.repository().get(&key).await {
            Ok(visitor) => visitor.map(|v| v.ip),
            Err(e) => return storage_error(e).into_response(),
        },
    };

    let Some(ip) = ip else {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "ok": false, "error": "no ip known for visitor" })),
        )
            .into_response();
    };

    match state.service.force_resolve(&ip, &key).await {
        Some(resolution) => Json(GeoResponse {
            ok: true,
            geo_status: GeoStatus::of(Some(&resolution)),
            geo_location: resolution,
        })
        .into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "ok": false, "error": "ip is not resolvable", "ip": ip })),
        )
            .into_response(),
    }
}

async fn force_resolve_all_handler(State(state): State<ApiState>) -> impl IntoResponse {
    let summary = state.service.force_resolve_all().await;
    Json(serde_json::json!({
        "ok": true,
        "updated": summary.updated,
        "failed": summary.failed
    }))
}

async fn lookup_handler(
    State(state): State<ApiState>,
    Path(ip): Path<String>,
) -> impl IntoResponse {
    match state.service.aggregator().resolve(&ip).await {
        Some(resolution) => Json(GeoResponse {
            ok: true,
            geo_status: GeoStatus::of(Some(&resolution)),
            geo_location: resolution,
        })
        .into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "ok": false, "error": "ip is not resolvable", "ip": ip })),
        )
            .into_response(),
    }
}
