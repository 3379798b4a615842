use duckdb::Connection;
use std::sync::Mutex;

use crate::config_db::ConfigDb;
use crate::error::{AppError, AppResult};
use crate::models::glass_stats::MartStats;
use crate::store::LakeStore;

/// One SQL statement assembling `glass_stats` wholesale inside a transaction
/// (spec.md §4.3). `CREATE OR REPLACE TABLE` gives the "readers see old or
/// new, never torn" guarantee without an explicit advisory lock: DuckDB
/// serializes DDL against concurrent readers of the same table.
const REBUILD_SQL: &str = "
CREATE OR REPLACE TABLE glass_stats AS
WITH dedup_history AS (
    SELECT *, row_number() OVER (PARTITION BY product_id ORDER BY move_in_ts DESC) AS rn
    FROM history_raw
),
latest_history AS (
    SELECT product_id, lot_id, move_in_ts FROM dedup_history WHERE rn = 1
),
unit_model AS (
    SELECT product_id, any_value(model_code) AS model_code FROM inspection_raw GROUP BY product_id
),
per_unit_defect AS (
    SELECT product_id, defect_name, sum(defect_count) AS total_defects
    FROM inspection_raw
    GROUP BY product_id, defect_name
),
panel_totals AS (
    SELECT product_id, defect_name, panel_addr, sum(defect_count) AS panel_defects
    FROM inspection_raw
    WHERE panel_addr != ''
    GROUP BY product_id, defect_name, panel_addr
),
unit_panel_lists AS (
    SELECT product_id, defect_name,
           list(panel_addr ORDER BY panel_addr) AS panel_addrs,
           list(panel_defects ORDER BY panel_addr) AS panel_map
    FROM panel_totals
    GROUP BY product_id, defect_name
)
SELECT
    d.product_id,
    h.lot_id,
    m.model_code,
    date(h.move_in_ts) AS work_date,
    d.defect_name,
    d.total_defects,
    COALESCE(p.panel_addrs, []) AS panel_addrs,
    COALESCE(p.panel_map, []) AS panel_map
FROM per_unit_defect d
JOIN latest_history h ON h.product_id = d.product_id
LEFT JOIN unit_model m ON m.product_id = d.product_id
LEFT JOIN unit_panel_lists p ON p.product_id = d.product_id AND p.defect_name = d.defect_name
";

const STATS_SQL: &str = "
SELECT
    count(*),
    min(work_date),
    max(work_date),
    COALESCE(avg(total_defects), 0.0),
    COALESCE(sum(total_defects), 0),
    count(DISTINCT lot_id)
FROM glass_stats
";

fn rebuild(conn: &Mutex<Connection>, facility: &str) -> AppResult<MartStats> {
    let mut conn = conn.lock().unwrap();
    let tx = conn
        .transaction()
        .map_err(|e| AppError::Internal(format!("starting mart refresh transaction: {e}")))?;

    tx.execute_batch(REBUILD_SQL)
        .map_err(|e| AppError::Internal(format!("rebuilding glass_stats: {e}")))?;

    tx.execute_batch(
        "CREATE INDEX IF NOT EXISTS idx_glass_stats_lot ON glass_stats(lot_id);
         CREATE INDEX IF NOT EXISTS idx_glass_stats_date ON glass_stats(work_date);
         CREATE INDEX IF NOT EXISTS idx_glass_stats_product ON glass_stats(product_id);",
    )
    .map_err(|e| AppError::Internal(format!("rebuilding glass_stats indices: {e}")))?;

    let (rows_created, min_date, max_date, mean_total, sum_total, distinct_lots): (
        i64,
        Option<chrono::NaiveDate>,
        Option<chrono::NaiveDate>,
        f64,
        i64,
        i64,
    ) = tx
        .query_row(STATS_SQL, [], |row| {
            Ok((
                row.get(0)?,
                row.get(1)?,
                row.get(2)?,
                row.get(3)?,
                row.get(4)?,
                row.get(5)?,
            ))
        })
        .map_err(|e| AppError::Internal(format!("computing mart stats: {e}")))?;

    tx.commit()
        .map_err(|e| AppError::Internal(format!("committing mart refresh: {e}")))?;

    Ok(MartStats {
        facility: facility.to_string(),
        rows_created: rows_created.max(0) as u64,
        min_work_date: min_date,
        max_work_date: max_date,
        mean_total_defects: mean_total,
        sum_total_defects: sum_total,
        distinct_lots: distinct_lots.max(0) as u64,
    })
}

/// Rebuild `glass_stats` for one facility, recording the run in the mart
/// refresh audit log. A refresh failure is logged and the facility's
/// previous mart is left intact (spec.md §4.3, "Failure model").
pub fn refresh(store: &LakeStore, config_db: &ConfigDb, facility: &str) -> AppResult<MartStats> {
    let run_id = uuid::Uuid::new_v4().to_string();
    config_db
        .start_mart_refresh(&run_id, facility)
        .map_err(AppError::from)?;

    let conn = store.get(facility)?;
    match rebuild(&conn, facility) {
        Ok(stats) => {
            config_db
                .finish_mart_refresh(&run_id, stats.rows_created)
                .map_err(AppError::from)?;
            tracing::info!(facility, rows = stats.rows_created, "mart refresh complete");
            Ok(stats)
        }
        Err(err) => {
            config_db
                .fail_mart_refresh(&run_id, &err.to_string())
                .map_err(AppError::from)?;
            tracing::error!(facility, error = %err, "mart refresh failed");
            Err(err)
        }
    }
}
