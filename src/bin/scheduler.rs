use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use panelstat::config::AppConfig;
use panelstat::config_db::ConfigDb;
use panelstat::ingest::{insert_batch, resolve_window, IngestSource, MockIngestSource};
use panelstat::mart;
use panelstat::store::LakeStore;

/// Standalone background process that periodically ingests new inspection
/// data and rebuilds each facility's mart, separate from the interactive
/// `panelstat-api` process — the same split the teacher draws between its
/// HTTP server and `bin/anomaly_engine.rs`.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("panelstat=debug")),
        )
        .init();

    let config_path = std::env::var("PANELSTAT_CONFIG").unwrap_or_else(|_| "./panelstat.toml".to_string());
    let config = AppConfig::load(&config_path)?;

    let store = Arc::new(LakeStore::new(config.storage.clone()));
    let operational_db_path = config.storage.operational_db_path();
    if let Some(parent) = operational_db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let config_db = Arc::new(ConfigDb::open(operational_db_path.to_str().unwrap_or("./data/app.db"))?);

    let ingest_source: Arc<dyn IngestSource> = Arc::new(MockIngestSource::default());
    let ingest_interval_secs: u64 = std::env::var("PANELSTAT_INGEST_INTERVAL_SECS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(300);

    tracing::info!(interval_secs = ingest_interval_secs, "panelstat-scheduler starting");

    let mut interval = tokio::time::interval(Duration::from_secs(ingest_interval_secs));
    loop {
        interval.tick().await;
        if let Err(e) = run_cycle(&store, &config_db, ingest_source.as_ref()).await {
            tracing::error!("scheduler cycle failed: {e}");
        }
    }
}

/// One ingest-then-refresh pass across every facility known to the lake
/// store (spec.md §4.2, §4.3). A facility with no prior ingest is skipped
/// silently — it only becomes "known" once `/api/ingest` has run for it at
/// least once.
async fn run_cycle(store: &Arc<LakeStore>, config_db: &Arc<ConfigDb>, ingest_source: &dyn IngestSource) -> anyhow::Result<()> {
    for facility in store.known_facilities()? {
        let conn = store.get(&facility)?;
        let (window_start, window_end) = resolve_window(&conn, None, None)?;

        let (inspection, history) = ingest_source.fetch(&facility, window_start, window_end).await?;
        let (inspection_count, history_count) = insert_batch(&conn, &inspection, &history)?;
        tracing::info!(facility, inspection = inspection_count, history = history_count, "scheduled ingest complete");

        let stats = {
            let store = store.clone();
            let config_db = config_db.clone();
            let facility = facility.clone();
            tokio::task::spawn_blocking(move || mart::refresh(&store, &config_db, &facility)).await??
        };
        tracing::info!(facility, rows_created = stats.rows_created, "scheduled mart refresh complete");
    }
    Ok(())
}
