use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::Json;

use crate::error::{AppError, AppResult};
use crate::ingest::{insert_batch, resolve_window};
use crate::models::inspection::{IngestRequest, IngestResponse};
use crate::{resolve_facility, AppState, FacilityQuery};

/// `POST /api/ingest` — full-range or incremental ingest for one facility
/// (spec.md §4.2, §6).
pub async fn ingest(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(facility_query): Query<FacilityQuery>,
    Json(req): Json<IngestRequest>,
) -> AppResult<impl IntoResponse> {
    let facility = resolve_facility(&state, facility_query.facility_code.as_deref(), &headers)?;
    let conn = state.store.get(&facility)?;

    let start = req
        .start_date
        .as_deref()
        .map(parse_date_start)
        .transpose()?;
    let end = req.end_date.as_deref().map(parse_date_end).transpose()?;
    let (window_start, window_end) = resolve_window(&conn, start, end)?;

    let (inspection, history) = state
        .ingest_source
        .fetch(&facility, window_start, window_end)
        .await
        .map_err(|e| AppError::Internal(format!("fetching ingest batch: {e}")))?;

    let (inspection_count, history_count) = insert_batch(&conn, &inspection, &history)?;
    tracing::info!(
        facility,
        inspection = inspection_count,
        history = history_count,
        "ingest complete"
    );

    Ok(Json(IngestResponse {
        inspection: inspection_count,
        history: history_count,
    }))
}

fn parse_date_start(s: &str) -> AppResult<chrono::DateTime<chrono::Utc>> {
    parse_flexible(s)
}

fn parse_date_end(s: &str) -> AppResult<chrono::DateTime<chrono::Utc>> {
    parse_flexible(s)
}

/// Accept either a bare `YYYY-MM-DD` date (treated as midnight UTC) or a
/// full RFC3339 timestamp — both appear in spec.md examples.
fn parse_flexible(s: &str) -> AppResult<chrono::DateTime<chrono::Utc>> {
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&chrono::Utc));
    }
    chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|_| AppError::validation(format!("invalid date: {s}")))
        .map(|d| d.and_hms_opt(0, 0, 0).unwrap().and_utc())
}
