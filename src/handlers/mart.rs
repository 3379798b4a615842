use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::Json;
use std::time::Instant;

use crate::error::AppResult;
use crate::mart;
use crate::models::glass_stats::MartRefreshResponse;
use crate::{resolve_facility, AppState, FacilityQuery};

/// `POST /api/mart/refresh` — rebuild `glass_stats` for the resolved
/// facility (spec.md §4.3, §6).
pub async fn refresh(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(facility_query): Query<FacilityQuery>,
) -> AppResult<impl IntoResponse> {
    let facility = resolve_facility(&state, facility_query.facility_code.as_deref(), &headers)?;
    let started = Instant::now();

    let stats = tokio::task::spawn_blocking({
        let store = state.store.clone();
        let config_db = state.config_db.clone();
        let facility = facility.clone();
        move || mart::refresh(&store, &config_db, &facility)
    })
    .await
    .map_err(|e| crate::error::AppError::Internal(format!("mart refresh task panicked: {e}")))??;

    Ok(Json(MartRefreshResponse {
        status: "ok".to_string(),
        duration_ms: started.elapsed().as_millis() as u64,
        rows_created: stats.rows_created,
        stats,
    }))
}
