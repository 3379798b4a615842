use axum::{routing::get, routing::post, Router};
use std::net::SocketAddr;
use std::sync::{Arc, RwLock};
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use panelstat::config::AppConfig;
use panelstat::config_db::ConfigDb;
use panelstat::handlers;
use panelstat::ingest::MockIngestSource;
use panelstat::jobs::JobCoordinator;
use panelstat::retention::spawn_retention_sweep;
use panelstat::store::LakeStore;
use panelstat::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("panelstat=debug,tower_http=debug")),
        )
        .init();

    let config_path = std::env::var("PANELSTAT_CONFIG").unwrap_or_else(|_| "./panelstat.toml".to_string());
    let config = AppConfig::load(&config_path)?;

    let heatmap_path =
        std::env::var("PANELSTAT_HEATMAP_CONFIG").unwrap_or_else(|_| "./config_heatmap.json".to_string());
    let heatmap_config = Arc::new(AppConfig::load_heatmap_grids(&heatmap_path)?);

    let store = Arc::new(LakeStore::new(config.storage.clone()));
    let operational_db_path = config.storage.operational_db_path();
    if let Some(parent) = operational_db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let config_db = Arc::new(ConfigDb::open(operational_db_path.to_str().unwrap_or("./data/app.db"))?);
    tracing::info!(path = %operational_db_path.display(), "operational store opened");

    let jobs = Arc::new(JobCoordinator::new(
        config_db.clone(),
        store.clone(),
        heatmap_config.clone(),
        config.analysis.worker_pool_size,
        config.analysis.cache_ttl_secs,
    ));

    spawn_retention_sweep(store.clone(), config_db.clone(), config.retention.clone());

    let state = AppState {
        store,
        config_db,
        heatmap_config,
        retention_config: config.retention,
        analysis_config: Arc::new(RwLock::new(config.analysis)),
        jobs,
        ingest_source: Arc::new(MockIngestSource::default()),
    };

    let app = Router::new()
        .route("/health", get(handlers::health::healthz))
        .route("/api/ingest", post(handlers::ingest::ingest))
        .route("/api/mart/refresh", post(handlers::mart::refresh))
        .route("/api/cleanup", post(handlers::cleanup::cleanup))
        .route("/api/inspection", get(handlers::inspection::list))
        .route("/api/history", get(handlers::history::list))
        .route("/api/equipment/rankings", get(handlers::rankings::list))
        .route("/api/hierarchy", get(handlers::hierarchy::list))
        .route("/api/analyze", post(handlers::analyze::submit))
        .route("/api/analyze/batch", post(handlers::analyze::batch))
        .route("/api/analyze/stream", post(handlers::analyze::stream))
        .route("/api/analyze/{id}/status", get(handlers::analyze::status))
        .route("/api/analyze/{id}/results", get(handlers::analyze::results))
        .route("/api/config", get(handlers::config::get).put(handlers::config::put))
        .layer(CorsLayer::permissive())
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr: SocketAddr = std::env::var("PANELSTAT_ADDR")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 8080)));
    tracing::info!("panelstat-api listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
