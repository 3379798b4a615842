use std::sync::Arc;
use tokio::sync::{mpsc, Mutex as AsyncMutex};

use crate::analyzer::single;
use crate::config::HeatmapConfig;
use crate::config_db::ConfigDb;
use crate::models::analyze::AnalyzeRequest;
use crate::store::LakeStore;

/// One queued analysis, fully resolved so a worker never needs to re-read
/// the submitting request from the operational store.
pub struct WorkItem {
    pub job_id: String,
    pub cache_key: String,
    pub facility: String,
    pub request: AnalyzeRequest,
    pub cache_ttl_secs: u64,
}

/// Spawn one worker task pulling from the shared bounded queue. `W` such
/// tasks are spawned once at startup, the same fire-and-forget pattern
/// `main.rs` uses for its background engines (spec.md §4.7).
pub fn spawn(
    worker_id: usize,
    rx: Arc<AsyncMutex<mpsc::Receiver<WorkItem>>>,
    config_db: Arc<ConfigDb>,
    store: Arc<LakeStore>,
    heatmap_config: Arc<HeatmapConfig>,
    default_ttl_secs: u64,
) {
    tokio::spawn(async move {
        tracing::info!(worker_id, "analysis worker started");
        loop {
            let item = {
                let mut rx = rx.lock().await;
                rx.recv().await
            };
            let Some(item) = item else {
                tracing::info!(worker_id, "analysis worker shutting down: queue closed");
                break;
            };
            process(&config_db, &store, &heatmap_config, default_ttl_secs, item).await;
        }
    });
}

async fn process(
    config_db: &Arc<ConfigDb>,
    store: &Arc<LakeStore>,
    heatmap_config: &Arc<HeatmapConfig>,
    default_ttl_secs: u64,
    item: WorkItem,
) {
    let WorkItem {
        job_id,
        cache_key,
        facility,
        request,
        cache_ttl_secs,
    } = item;

    if let Err(e) = config_db.mark_job_running(&job_id) {
        tracing::error!(job_id, "marking job running: {e}");
        return;
    }
    let _ = config_db.update_job_progress(&job_id, 25);

    let conn = match store.get(&facility) {
        Ok(conn) => conn,
        Err(e) => {
            let _ = config_db.mark_job_failed(&job_id, &e.to_string());
            tracing::error!(job_id, facility, "opening facility lake: {e}");
            return;
        }
    };

    let _ = config_db.update_job_progress(&job_id, 50);
    let heatmap_config = heatmap_config.clone();
    let result = tokio::task::spawn_blocking(move || single::analyze(&conn, &request, &heatmap_config)).await;

    let ttl_secs = if cache_ttl_secs == 0 { default_ttl_secs } else { cache_ttl_secs };
    match result {
        Ok(Ok(analysis)) => {
            let _ = config_db.update_job_progress(&job_id, 75);
            match serde_json::to_string(&analysis) {
                Ok(json) => {
                    if let Err(e) = config_db.put_cache_entry(&cache_key, &facility, &json, ttl_secs) {
                        tracing::warn!(job_id, "caching analysis result: {e}");
                    }
                    if let Err(e) = config_db.mark_job_completed(&job_id, &json) {
                        tracing::error!(job_id, "completing job: {e}");
                    } else {
                        tracing::info!(job_id, facility, "analysis job completed");
                    }
                }
                Err(e) => {
                    let _ = config_db.mark_job_failed(&job_id, &format!("serializing result: {e}"));
                    tracing::error!(job_id, "serializing analysis result: {e}");
                }
            }
        }
        Ok(Err(e)) => {
            let _ = config_db.mark_job_failed(&job_id, &e.to_string());
            tracing::error!(job_id, "analysis failed: {e}");
        }
        Err(e) => {
            let _ = config_db.mark_job_failed(&job_id, &format!("analysis task panicked: {e}"));
            tracing::error!(job_id, "analysis task panicked: {e}");
        }
    }
}
