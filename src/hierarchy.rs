use duckdb::Connection;
use std::sync::Mutex;

use crate::analyzer::quote;
use crate::error::{AppError, AppResult};
use crate::models::hierarchy::{AnalysisLevel, DailyDpuPoint, HierarchyQuery, HierarchyRow};
use crate::query_builder::time_window_clause;

/// Multi-CTE roll-up of `glass_stats` by hierarchy depth (spec.md §4.8): one
/// CTE explodes `(panel_addrs, panel_map)` via parallel `UNNEST`, one
/// aggregates per cell per hierarchy key, one computes the daily DPU trend,
/// and the outer query joins with null-safe equality so hierarchy levels
/// above the requested depth come back as `NULL` rather than excluding rows.
pub fn rollup(conn: &Mutex<Connection>, query: &HierarchyQuery) -> AppResult<Vec<HierarchyRow>> {
    let conn = conn.lock().unwrap();
    let window = time_window_clause("g.work_date", &query.start_date, &query.end_date);

    let mut filters = vec![window, format!("g.model_code = {}", quote(&query.model_code))];
    if let Some(process_code) = &query.process_code {
        filters.push(format!("g.process_code = {}", quote(process_code)));
    }
    if let Some(equipment_line_id) = &query.equipment_line_id {
        filters.push(format!("g.equipment_line_id = {}", quote(equipment_line_id)));
    }
    if let Some(equipment_machine_id) = &query.equipment_machine_id {
        filters.push(format!("g.equipment_machine_id = {}", quote(equipment_machine_id)));
    }
    let where_clause = filters.join(" AND ");

    let sql = build_rollup_sql(&where_clause, query.analysis_level);
    let mut stmt = conn
        .prepare(&sql)
        .map_err(|e| AppError::Internal(format!("preparing hierarchy rollup: {e}")))?;

    let mut rows = stmt
        .query_map([], |row| {
            let total_products: i64 = row.get(4)?;
            Ok(HierarchyRow {
                process_code: row.get(0)?,
                equipment_line_id: row.get(1)?,
                equipment_machine_id: row.get(2)?,
                equipment_path_id: row.get(3)?,
                total_products: total_products.max(0) as u64,
                total_defects: row.get(5)?,
                dpu: row.get(6)?,
                panel_addrs: row.get(7)?,
                panel_map: row.get(8)?,
                daily_dpu: Vec::new(),
            })
        })
        .map_err(|e| AppError::Internal(format!("executing hierarchy rollup: {e}")))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| AppError::Internal(e.to_string()))?;

    for row in &mut rows {
        row.daily_dpu = fetch_daily_dpu(&conn, &where_clause, query.analysis_level, row)?;
    }
    Ok(rows)
}

/// The `\u{1}`-joined columns actually in scope for this depth (spec.md
/// §4.8): a composite key built by concatenation, not a bare column list
/// aliased to a single name, so distinct `(process_code, equipment_line_id,
/// ...)` tuples never collapse onto their last column alone.
fn key_expr(level: AnalysisLevel) -> String {
    let cols: &[&str] = match level {
        AnalysisLevel::Process => &["h.process_code"],
        AnalysisLevel::Line => &["h.process_code", "h.equipment_line_id"],
        AnalysisLevel::Machine => &["h.process_code", "h.equipment_line_id", "h.equipment_machine_id"],
        AnalysisLevel::Path => &[
            "h.process_code",
            "h.equipment_line_id",
            "h.equipment_machine_id",
            "h.equipment_path_id",
        ],
    };
    cols.join(" || '\u{1}' || ")
}

/// Stable, queryable-from-outside-the-CTE column names for each hierarchy
/// level, with `NULL` standing in for levels above the requested depth.
fn select_keys(level: AnalysisLevel) -> &'static str {
    match level {
        AnalysisLevel::Process => {
            "h.process_code AS process_code, \
             CAST(NULL AS VARCHAR) AS equipment_line_id, \
             CAST(NULL AS VARCHAR) AS equipment_machine_id, \
             CAST(NULL AS VARCHAR) AS equipment_path_id"
        }
        AnalysisLevel::Line => {
            "h.process_code AS process_code, \
             h.equipment_line_id AS equipment_line_id, \
             CAST(NULL AS VARCHAR) AS equipment_machine_id, \
             CAST(NULL AS VARCHAR) AS equipment_path_id"
        }
        AnalysisLevel::Machine => {
            "h.process_code AS process_code, \
             h.equipment_line_id AS equipment_line_id, \
             h.equipment_machine_id AS equipment_machine_id, \
             CAST(NULL AS VARCHAR) AS equipment_path_id"
        }
        AnalysisLevel::Path => {
            "h.process_code AS process_code, \
             h.equipment_line_id AS equipment_line_id, \
             h.equipment_machine_id AS equipment_machine_id, \
             h.equipment_path_id AS equipment_path_id"
        }
    }
}

fn build_rollup_sql(where_clause: &str, level: AnalysisLevel) -> String {
    let key_expr = key_expr(level);
    let select_keys = select_keys(level);

    format!(
        "WITH units AS (
            SELECT DISTINCT {key_expr} AS key_tuple, {select_keys}, g.product_id, g.total_defects
            FROM glass_stats g
            JOIN history_raw h ON h.product_id = g.product_id
            WHERE {where_clause}
        ),
        cells AS (
            SELECT {key_expr} AS key_tuple, a.addr AS panel_addr, sum(m.cell_defects) AS cell_total
            FROM glass_stats g
            JOIN history_raw h ON h.product_id = g.product_id
            CROSS JOIN UNNEST(g.panel_addrs) WITH ORDINALITY AS a(addr, ord)
            CROSS JOIN UNNEST(g.panel_map) WITH ORDINALITY AS m(cell_defects, ord2)
            WHERE {where_clause} AND a.ord = m.ord2
            GROUP BY {key_expr}, a.addr
        )
        SELECT u.process_code, u.equipment_line_id, u.equipment_machine_id, u.equipment_path_id,
               count(DISTINCT u.product_id) AS total_products,
               sum(u.total_defects) AS total_defects,
               CASE WHEN count(DISTINCT u.product_id) = 0 THEN 0.0
                    ELSE sum(u.total_defects)::DOUBLE / count(DISTINCT u.product_id) END AS dpu,
               COALESCE(list(DISTINCT c.panel_addr ORDER BY c.panel_addr), []) AS panel_addrs,
               COALESCE((SELECT list(c2.cell_total ORDER BY c2.panel_addr)
                         FROM cells c2 WHERE c2.key_tuple = u.key_tuple), []) AS panel_map
        FROM units u
        LEFT JOIN cells c ON c.key_tuple = u.key_tuple
        GROUP BY u.key_tuple, u.process_code, u.equipment_line_id, u.equipment_machine_id, u.equipment_path_id
        ORDER BY u.process_code, u.equipment_line_id, u.equipment_machine_id, u.equipment_path_id",
    )
}

fn fetch_daily_dpu(
    conn: &Connection,
    where_clause: &str,
    level: AnalysisLevel,
    row: &HierarchyRow,
) -> AppResult<Vec<DailyDpuPoint>> {
    let mut key_filters = vec![format!("h.process_code = {}", quote(&row.process_code))];
    if let Some(line) = &row.equipment_line_id {
        if matches!(level, AnalysisLevel::Line | AnalysisLevel::Machine | AnalysisLevel::Path) {
            key_filters.push(format!("h.equipment_line_id = {}", quote(line)));
        }
    }
    if let Some(machine) = &row.equipment_machine_id {
        if matches!(level, AnalysisLevel::Machine | AnalysisLevel::Path) {
            key_filters.push(format!("h.equipment_machine_id = {}", quote(machine)));
        }
    }
    if let Some(path) = &row.equipment_path_id {
        if matches!(level, AnalysisLevel::Path) {
            key_filters.push(format!("h.equipment_path_id = {}", quote(path)));
        }
    }
    let key_clause = key_filters.join(" AND ");

    let sql = format!(
        "SELECT g.work_date,
                CASE WHEN count(DISTINCT g.product_id) = 0 THEN 0.0
                     ELSE sum(g.total_defects)::DOUBLE / count(DISTINCT g.product_id) END AS dpu
         FROM glass_stats g
         JOIN history_raw h ON h.product_id = g.product_id
         WHERE {where_clause} AND {key_clause}
         GROUP BY g.work_date
         ORDER BY g.work_date"
    );
    let mut stmt = conn
        .prepare(&sql)
        .map_err(|e| AppError::Internal(format!("preparing daily DPU query: {e}")))?;
    let points = stmt
        .query_map([], |r| {
            Ok(DailyDpuPoint {
                work_date: r.get(0)?,
                dpu: r.get(1)?,
            })
        })
        .map_err(|e| AppError::Internal(format!("executing daily DPU query: {e}")))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| AppError::Internal(e.to_string()))?;
    Ok(points)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Each depth's composite key concatenates a strictly longer column
    /// prefix, per spec.md §4.8.
    #[test]
    fn rollup_sql_group_keys_deepen_with_level() {
        let process_sql = build_rollup_sql("1=1", AnalysisLevel::Process);
        let line_sql = build_rollup_sql("1=1", AnalysisLevel::Line);
        let path_sql = build_rollup_sql("1=1", AnalysisLevel::Path);

        assert!(process_sql.contains("h.process_code AS key_tuple"));
        assert!(!process_sql.contains("h.equipment_line_id"));

        assert!(line_sql.contains("h.process_code || '\u{1}' || h.equipment_line_id AS key_tuple"));
        assert!(!line_sql.contains("h.equipment_machine_id"));

        assert!(path_sql.contains(
            "h.process_code || '\u{1}' || h.equipment_line_id || '\u{1}' || h.equipment_machine_id || '\u{1}' || h.equipment_path_id AS key_tuple"
        ));
    }

    /// The outer query only ever references the `units`/`cells` aliases, so
    /// it no longer depends on `h` being in scope outside the CTEs.
    #[test]
    fn rollup_sql_outer_query_does_not_reference_cte_local_alias() {
        let sql = build_rollup_sql("1=1", AnalysisLevel::Line);
        let outer = sql.split("FROM units u").nth(1).unwrap();
        assert!(!outer.contains("h."));
        assert!(outer.contains("u.process_code"));
        assert!(outer.contains("u.equipment_line_id"));
    }
}
