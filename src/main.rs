//! visitor-geo - Visitor logging with multi-provider IP geolocation
//!
//! This is the composition root that wires together all the components.

use std::sync::Arc;
use tracing_subscriber::fmt::format::FmtSpan;
use visitor_geo::adapters::inbound::{ApiServer, ApiState};
use visitor_geo::adapters::outbound::{
    DashMapVisitorRepository, ProviderRegistry, SqliteVisitorRepository,
};
use visitor_geo::application::{GeoAggregator, ResolutionQueue, ResolutionService};
use visitor_geo::config::load_config;
use visitor_geo::domain::ports::VisitorRepository;
use visitor_geo::infrastructure::{shutdown_signal, ShutdownController};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration from environment
    let cfg = load_config()?;

    // Setup logging
    let log_level = if cfg.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_span_events(FmtSpan::CLOSE)
        .init();

    tracing::info!(
        "starting visitor-geo listen={} provider_timeout={}ms background={}",
        cfg.listen_addr,
        cfg.provider_timeout_ms,
        cfg.resolve_in_background
    );

    // ===== COMPOSITION ROOT =====

    // 1. Visitor storage
    let repository: Arc<dyn VisitorRepository> = match &cfg.db_path {
        Some(path) => {
            let repo = SqliteVisitorRepository::open(path)?;
            tracing::info!("visitor store: sqlite at {}", path);
            Arc::new(repo)
        }
        None => {
            tracing::info!("visitor store: in-memory");
            Arc::new(DashMapVisitorRepository::new())
        }
    };

    // 2. Providers and aggregator
    let registry = ProviderRegistry::with_defaults(&cfg.provider_keys(), cfg.provider_timeout())?;
    let aggregator = Arc::new(GeoAggregator::new(
        registry.into_providers(),
        cfg.provider_timeout(),
    ));

    // 3. Application service and optional background queue
    let service = Arc::new(
        ResolutionService::new(repository, aggregator).with_refresh_delay(cfg.refresh_delay()),
    );

    let mut state = ApiState::new(service.clone());
    let queue = if cfg.resolve_in_background {
        let queue = Arc::new(ResolutionQueue::start(service, cfg.queue_capacity));
        state = state.with_queue(queue.clone());
        Some(queue)
    } else {
        None
    };

    // 4. Inbound adapter with graceful shutdown
    let shutdown = ShutdownController::new();
    tokio::spawn(shutdown_signal(shutdown.clone()));

    let server = ApiServer::new(cfg.listen_addr.clone(), state);
    let result = server.run(shutdown).await;

    if let Some(queue) = queue {
        queue.shutdown().await;
    }

    tracing::info!("visitor-geo stopped");
    result
}
