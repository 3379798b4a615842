use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::Json;

use crate::error::AppResult;
use crate::models::ranking::{RankingQuery, RankingResponse};
use crate::ranking::rank;
use crate::{resolve_facility, AppState};

/// `GET /api/equipment/rankings` — leave-one-out peer-average delta per
/// equipment line (spec.md §4.4, §6).
pub async fn list(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<RankingQuery>,
) -> AppResult<impl IntoResponse> {
    let facility = resolve_facility(&state, query.facility_code.as_deref(), &headers)?;
    let conn = state.store.get(&facility)?;
    let minimum_sample = state.analysis_config.read().unwrap().minimum_sample;

    let rankings = tokio::task::spawn_blocking(move || {
        rank(
            &conn,
            &query.start_date,
            &query.end_date,
            query.defect_name.as_deref(),
            query.process_code.as_deref(),
            minimum_sample,
            query.limit,
        )
    })
    .await
    .map_err(|e| crate::error::AppError::Internal(format!("ranking task panicked: {e}")))??;

    Ok(Json(RankingResponse {
        count: rankings.len(),
        rankings,
    }))
}
