use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::Json;

use crate::analyzer::quote;
use crate::error::{AppError, AppResult};
use crate::models::history::{HistoryListResponse, HistoryQuery};
use crate::{resolve_facility, AppState};

/// `GET /api/history` — every equipment-progression row for one unit,
/// optionally narrowed to a process or equipment line (spec.md §6).
pub async fn list(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<HistoryQuery>,
) -> AppResult<impl IntoResponse> {
    let facility = resolve_facility(&state, query.facility_code.as_deref(), &headers)?;
    let conn = state.store.get(&facility)?;

    let mut filters = vec![format!("product_id = {}", quote(&query.product_id))];
    if let Some(process_code) = &query.process_code {
        filters.push(format!("process_code = {}", quote(process_code)));
    }
    if let Some(equipment_line_id) = &query.equipment_line_id {
        filters.push(format!("equipment_line_id = {}", quote(equipment_line_id)));
    }
    let where_clause = filters.join(" AND ");
    let product_id = query.product_id.clone();

    let data = tokio::task::spawn_blocking(move || -> AppResult<_> {
        let conn = conn.lock().unwrap();
        let sql = format!(
            "SELECT facility_code, product_id, lot_id, process_code, equipment_line_id, \
             equipment_machine_id, equipment_path_id, move_in_ts, equipment_hierarchy_type_code \
             FROM history_raw WHERE {where_clause} ORDER BY move_in_ts"
        );
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| AppError::Internal(format!("preparing history query: {e}")))?;
        let rows = stmt
            .query_map([], |row| {
                Ok(crate::models::history::HistoryRow {
                    facility_code: row.get(0)?,
                    product_id: row.get(1)?,
                    lot_id: row.get(2)?,
                    process_code: row.get(3)?,
                    equipment_line_id: row.get(4)?,
                    equipment_machine_id: row.get(5)?,
                    equipment_path_id: row.get(6)?,
                    move_in_ts: row.get(7)?,
                    equipment_hierarchy_type_code: row.get(8)?,
                })
            })
            .map_err(|e| AppError::Internal(format!("executing history query: {e}")))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| AppError::Internal(e.to_string()))?;
        Ok(rows)
    })
    .await
    .map_err(|e| AppError::Internal(format!("history query task panicked: {e}")))??;

    Ok(Json(HistoryListResponse {
        count: data.len(),
        product_id,
        data,
    }))
}
