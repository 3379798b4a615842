use duckdb::Connection;
use std::sync::Mutex;

use crate::analyzer::{derive_metrics, group_type_case, model_code_clause, parse_group_type, quote, target_membership_subquery};
use crate::config::HeatmapConfig;
use crate::error::{AppError, AppResult};
use crate::models::analyze::{AnalysisResult, AnalyzeRequest, DailyResult, GlassResult, HeatmapCell, LotResult};
use crate::query_builder::time_window_clause;

/// The single-target analysis path: four sequential SQL queries against the
/// mart, mirroring the teacher's sequential query/count/group/timeseries
/// shape generalized to the Target/Others domain (spec.md §4.5).
pub fn analyze(
    conn: &Mutex<Connection>,
    req: &AnalyzeRequest,
    heatmap_config: &HeatmapConfig,
) -> AppResult<AnalysisResult> {
    let conn = conn.lock().unwrap();
    let target_subquery = target_membership_subquery(&req.equipment_line_ids, &req.process_codes);
    let model_clause = model_code_clause("g.model_code", &req.model_codes);
    let window = time_window_clause("g.work_date", &req.start_date, &req.end_date);

    let (glass, lot) = if req.equipment_line_ids.is_empty() {
        (Vec::new(), Vec::new())
    } else {
        let glass = fetch_glass(&conn, &target_subquery, &model_clause, &window, &req.defect_name)?;
        let lot = fetch_lot(&conn, &target_subquery, &model_clause, &window, &req.defect_name)?;
        (glass, lot)
    };

    let daily = fetch_daily(&conn, &target_subquery, &model_clause, &window, &req.defect_name)?;
    let heatmap = fetch_heatmap(
        &conn,
        &target_subquery,
        &req.model_codes,
        &req.start_date,
        &req.end_date,
        &req.defect_name,
        heatmap_config,
    )?;
    let metrics = derive_metrics(&glass);

    Ok(AnalysisResult {
        glass,
        lot,
        daily,
        heatmap,
        metrics,
    })
}

fn fetch_glass(
    conn: &Connection,
    target_subquery: &str,
    model_clause: &str,
    window: &str,
    defect_name: &str,
) -> AppResult<Vec<GlassResult>> {
    let sql = format!(
        "SELECT g.product_id, g.lot_id, g.work_date, g.total_defects, {grp}
         FROM glass_stats g
         WHERE {window} AND g.defect_name = {defect} AND {model_clause}
         ORDER BY g.work_date, g.product_id",
        grp = group_type_case(target_subquery, "g.product_id"),
        defect = quote(defect_name),
    );
    let mut stmt = conn
        .prepare(&sql)
        .map_err(|e| AppError::Internal(format!("preparing glass query: {e}")))?;
    let rows = stmt
        .query_map([], |row| {
            let grp: String = row.get(4)?;
            Ok(GlassResult {
                glass_id: row.get(0)?,
                lot_id: row.get(1)?,
                work_date: row.get(2)?,
                total_defects: row.get(3)?,
                group: parse_group_type(&grp),
            })
        })
        .map_err(|e| AppError::Internal(format!("executing glass query: {e}")))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| AppError::Internal(e.to_string()))?;
    Ok(rows)
}

fn fetch_lot(
    conn: &Connection,
    target_subquery: &str,
    model_clause: &str,
    window: &str,
    defect_name: &str,
) -> AppResult<Vec<LotResult>> {
    let sql = format!(
        "SELECT g.lot_id, {grp} AS grp, count(DISTINCT g.product_id), sum(g.total_defects), \
         avg(g.total_defects), max(g.total_defects)
         FROM glass_stats g
         WHERE {window} AND g.defect_name = {defect} AND {model_clause}
         GROUP BY g.lot_id, grp
         ORDER BY g.lot_id",
        grp = group_type_case(target_subquery, "g.product_id"),
        defect = quote(defect_name),
    );
    let mut stmt = conn
        .prepare(&sql)
        .map_err(|e| AppError::Internal(format!("preparing lot query: {e}")))?;
    let rows = stmt
        .query_map([], |row| {
            let grp: String = row.get(1)?;
            let glass_count: i64 = row.get(2)?;
            Ok(LotResult {
                lot_id: row.get(0)?,
                group: parse_group_type(&grp),
                glass_count: glass_count.max(0) as u64,
                total_defects: row.get(3)?,
                avg_defects: row.get(4)?,
                max_defects: row.get(5)?,
            })
        })
        .map_err(|e| AppError::Internal(format!("executing lot query: {e}")))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| AppError::Internal(e.to_string()))?;
    Ok(rows)
}

fn fetch_daily(
    conn: &Connection,
    target_subquery: &str,
    model_clause: &str,
    window: &str,
    defect_name: &str,
) -> AppResult<Vec<DailyResult>> {
    let sql = format!(
        "SELECT g.work_date, {grp} AS grp, count(DISTINCT g.product_id), sum(g.total_defects), avg(g.total_defects)
         FROM glass_stats g
         WHERE {window} AND g.defect_name = {defect} AND {model_clause}
         GROUP BY g.work_date, grp
         ORDER BY g.work_date",
        grp = group_type_case(target_subquery, "g.product_id"),
        defect = quote(defect_name),
    );
    let mut stmt = conn
        .prepare(&sql)
        .map_err(|e| AppError::Internal(format!("preparing daily query: {e}")))?;
    let rows = stmt
        .query_map([], |row| {
            let grp: String = row.get(1)?;
            let glass_count: i64 = row.get(2)?;
            Ok(DailyResult {
                work_date: row.get(0)?,
                group: parse_group_type(&grp),
                glass_count: glass_count.max(0) as u64,
                total_defects: row.get(3)?,
                avg_defects: row.get(4)?,
            })
        })
        .map_err(|e| AppError::Internal(format!("executing daily query: {e}")))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| AppError::Internal(e.to_string()))?;
    Ok(rows)
}

#[allow(clippy::too_many_arguments)]
fn fetch_heatmap(
    conn: &Connection,
    target_subquery: &str,
    model_codes: &[String],
    start_date: &str,
    end_date: &str,
    defect_name: &str,
    heatmap_config: &HeatmapConfig,
) -> AppResult<Vec<HeatmapCell>> {
    let window = time_window_clause("i.inspection_end_ts", start_date, end_date);
    let defect = quote(defect_name);
    let grp = group_type_case(target_subquery, "i.product_id");

    let fixed_grid = if model_codes.len() == 1 {
        heatmap_config.grids.get(&model_codes[0])
    } else {
        None
    };

    let sql = match fixed_grid {
        Some(grid) => {
            let x_list = grid
                .x_list
                .iter()
                .map(|x| quote(x))
                .collect::<Vec<_>>()
                .join(", ");
            let y_list = grid
                .y_list
                .iter()
                .map(|y| quote(y))
                .collect::<Vec<_>>()
                .join(", ");
            format!(
                "WITH expected_cells AS (
                    SELECT x AS panel_x, y AS panel_y, grp
                    FROM (SELECT unnest([{x_list}]) AS x) xs
                    CROSS JOIN (SELECT unnest([{y_list}]) AS y) ys
                    CROSS JOIN (SELECT unnest(['target','others']) AS grp) gs
                ),
                observed AS (
                    SELECT i.panel_x, i.panel_y, {grp} AS grp,
                           sum(i.defect_count) AS total_defects,
                           count(DISTINCT i.product_id) AS total_glasses
                    FROM inspection_raw i
                    WHERE {window} AND i.defect_name = {defect}
                    GROUP BY i.panel_x, i.panel_y, grp
                )
                SELECT e.panel_x, e.panel_y, e.grp,
                       COALESCE(o.total_defects, 0), COALESCE(o.total_glasses, 0)
                FROM expected_cells e
                LEFT JOIN observed o ON o.panel_x = e.panel_x AND o.panel_y = e.panel_y AND o.grp = e.grp
                ORDER BY e.panel_x, e.panel_y, e.grp"
            )
        }
        None => format!(
            "SELECT i.panel_x, i.panel_y, {grp} AS grp,
                    sum(i.defect_count), count(DISTINCT i.product_id)
             FROM inspection_raw i
             WHERE {window} AND i.defect_name = {defect}
             GROUP BY i.panel_x, i.panel_y, grp
             ORDER BY i.panel_x, i.panel_y, grp"
        ),
    };

    let mut stmt = conn
        .prepare(&sql)
        .map_err(|e| AppError::Internal(format!("preparing heatmap query: {e}")))?;
    let rows = stmt
        .query_map([], |row| {
            let grp: String = row.get(2)?;
            let total_glasses: i64 = row.get(4)?;
            let total_defects: i64 = row.get(3)?;
            let rate = if total_glasses == 0 {
                0.0
            } else {
                total_defects as f64 / total_glasses as f64
            };
            Ok(HeatmapCell {
                panel_x: row.get(0)?,
                panel_y: row.get(1)?,
                group: parse_group_type(&grp),
                total_defects,
                total_glasses: total_glasses.max(0) as u64,
                rate,
            })
        })
        .map_err(|e| AppError::Internal(format!("executing heatmap query: {e}")))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| AppError::Internal(e.to_string()))?;
    Ok(rows)
}
