use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;

use crate::error::AppResult;
use crate::models::config::{AnalysisSettings, ConfigResponse, ConfigUpdateRequest, OperationalSettings};
use crate::AppState;

/// `GET /api/config` — current analysis settings plus the frozen
/// operational settings, for visibility (spec.md §6, §1 "only `analysis`
/// is mutable at runtime").
pub async fn get(State(state): State<AppState>) -> impl IntoResponse {
    let analysis = state.analysis_config.read().unwrap().clone();
    Json(ConfigResponse {
        analysis: AnalysisSettings {
            minimum_sample: analysis.minimum_sample,
            worker_pool_size: analysis.worker_pool_size,
            cache_ttl_secs: analysis.cache_ttl_secs,
        },
        settings: OperationalSettings {
            data_days: state.retention_config.data_days,
            analysis_days: state.retention_config.analysis_days,
            cleanup_interval_secs: state.retention_config.cleanup_interval_secs,
            heatmap_models: {
                let mut models: Vec<String> = state.heatmap_config.grids.keys().cloned().collect();
                models.sort();
                models
            },
        },
    })
}

/// `PUT /api/config` — patch the mutable analysis settings in place.
/// `worker_pool_size` is accepted and reported back but does not resize
/// the already-spawned worker pool (spec.md §4.7 fixes `W` at startup).
pub async fn put(
    State(state): State<AppState>,
    Json(req): Json<ConfigUpdateRequest>,
) -> AppResult<impl IntoResponse> {
    if let Some(patch) = req.analysis {
        let mut analysis = state.analysis_config.write().unwrap();
        if let Some(minimum_sample) = patch.minimum_sample {
            analysis.minimum_sample = minimum_sample;
        }
        if let Some(worker_pool_size) = patch.worker_pool_size {
            analysis.worker_pool_size = worker_pool_size;
        }
        if let Some(cache_ttl_secs) = patch.cache_ttl_secs {
            analysis.cache_ttl_secs = cache_ttl_secs;
        }
    }
    Ok(get(State(state)).await)
}
