use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use crate::error::{AppError, AppResult};
use crate::retention::sweep;
use crate::AppState;

/// `POST /api/cleanup` — run one retention sweep synchronously, the same
/// pass the scheduled background loop runs on a timer (spec.md §6).
pub async fn cleanup(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    let retention_config = state.retention_config.clone();
    tokio::task::spawn_blocking(move || sweep(&state.store, &state.config_db, &retention_config))
        .await
        .map_err(|e| AppError::Internal(format!("cleanup task panicked: {e}")))?
        .map_err(|e| AppError::Internal(e.to_string()))?;

    Ok(Json(json!({ "status": "ok" })))
}
