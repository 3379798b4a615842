use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::Json;

use crate::analyzer::quote;
use crate::error::{AppError, AppResult};
use crate::models::inspection::{InspectionListResponse, InspectionQuery, Pagination};
use crate::query_builder::time_window_clause;
use crate::{resolve_facility, AppState};

/// `GET /api/inspection` — raw, unaggregated inspection rows with the usual
/// limit/offset pagination (spec.md §6).
pub async fn list(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<InspectionQuery>,
) -> AppResult<impl IntoResponse> {
    let facility = resolve_facility(&state, query.facility_code.as_deref(), &headers)?;
    let conn = state.store.get(&facility)?;

    let mut filters = vec![time_window_clause(
        "CAST(inspection_end_ts AS DATE)",
        &query.start_date,
        &query.end_date,
    )];
    if let Some(process_code) = &query.process_code {
        filters.push(format!("process_code = {}", quote(process_code)));
    }
    if let Some(defect_name) = &query.defect_name {
        filters.push(format!("defect_name = {}", quote(defect_name)));
    }
    let where_clause = filters.join(" AND ");

    let (data, total) = tokio::task::spawn_blocking(move || -> AppResult<_> {
        let conn = conn.lock().unwrap();

        let total: i64 = conn
            .query_row(
                &format!("SELECT count(*) FROM inspection_raw WHERE {where_clause}"),
                [],
                |row| row.get(0),
            )
            .map_err(|e| AppError::Internal(format!("counting inspection rows: {e}")))?;

        let sql = format!(
            "SELECT facility_code, product_id, panel_id, panel_addr, panel_x, panel_y, process_code, \
             equipment_line_id, model_code, defect_term, defect_name, defect_x, defect_y, defect_count, \
             inspection_end_ts \
             FROM inspection_raw WHERE {where_clause} \
             ORDER BY inspection_end_ts, product_id \
             LIMIT {} OFFSET {}",
            query.limit, query.offset,
        );
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| AppError::Internal(format!("preparing inspection query: {e}")))?;
        let rows = stmt
            .query_map([], |row| {
                Ok(crate::models::inspection::InspectionRow {
                    facility_code: row.get(0)?,
                    product_id: row.get(1)?,
                    panel_id: row.get(2)?,
                    panel_addr: row.get(3)?,
                    panel_x: row.get(4)?,
                    panel_y: row.get(5)?,
                    process_code: row.get(6)?,
                    equipment_line_id: row.get(7)?,
                    model_code: row.get(8)?,
                    defect_term: row.get(9)?,
                    defect_name: row.get(10)?,
                    defect_x: row.get(11)?,
                    defect_y: row.get(12)?,
                    defect_count: row.get(13)?,
                    inspection_end_ts: row.get(14)?,
                })
            })
            .map_err(|e| AppError::Internal(format!("executing inspection query: {e}")))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| AppError::Internal(e.to_string()))?;
        Ok((rows, total.max(0) as u64))
    })
    .await
    .map_err(|e| AppError::Internal(format!("inspection query task panicked: {e}")))??;

    Ok(Json(InspectionListResponse {
        data,
        pagination: Pagination {
            limit: query.limit,
            offset: query.offset,
            total,
        },
    }))
}
