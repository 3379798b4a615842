use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::Json;

use crate::error::AppResult;
use crate::hierarchy::rollup;
use crate::models::hierarchy::{HierarchyQuery, HierarchyResponse};
use crate::{resolve_facility, AppState};

/// `GET /api/hierarchy` — multi-depth DPU roll-up over the mart (spec.md
/// §4.8). Not in the original endpoint table but required to reach the
/// Hierarchy Rollup component at all from outside the process.
pub async fn list(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<HierarchyQuery>,
) -> AppResult<impl IntoResponse> {
    let facility = resolve_facility(&state, query.facility_code.as_deref(), &headers)?;
    let conn = state.store.get(&facility)?;

    let rows = tokio::task::spawn_blocking(move || rollup(&conn, &query))
        .await
        .map_err(|e| crate::error::AppError::Internal(format!("hierarchy task panicked: {e}")))??;

    Ok(Json(HierarchyResponse { rows }))
}
