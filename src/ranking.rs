use duckdb::Connection;
use std::sync::Mutex;

use crate::error::{AppError, AppResult};
use crate::models::ranking::{EquipmentAggregate, RankingRow};
use crate::query_builder::{format_string_literal, parse_process_code_filter, time_window_clause};

/// `rank(facility, window, defect_pattern?, limit?)` (spec.md §4.4). The
/// dedup/group/having pass runs in SQL; the leave-one-out delta is computed
/// in Rust afterward, the same division of labor the sibling error-budget
/// engine uses (count in SQL, arithmetic in Rust).
pub fn rank(
    conn: &Mutex<Connection>,
    start: &str,
    end: &str,
    defect_pattern: Option<&str>,
    process_code_filter: Option<&str>,
    minimum_sample: u64,
    limit: Option<u64>,
) -> AppResult<Vec<RankingRow>> {
    let aggregates = fetch_aggregates(
        conn,
        start,
        end,
        defect_pattern,
        process_code_filter,
        minimum_sample,
    )?;
    Ok(apply_leave_one_out(aggregates, limit))
}

fn fetch_aggregates(
    conn: &Mutex<Connection>,
    start: &str,
    end: &str,
    defect_pattern: Option<&str>,
    process_code_filter: Option<&str>,
    minimum_sample: u64,
) -> AppResult<Vec<EquipmentAggregate>> {
    let defect_clause = match defect_pattern {
        Some(pattern) => format!(
            "AND i.defect_name LIKE {}",
            format_string_literal(&format!("{pattern}%"))
        ),
        None => String::new(),
    };
    let process_clause = match process_code_filter {
        Some(filter) => parse_process_code_filter(filter, "d.process_code")?,
        None => "1=1".to_string(),
    };

    let sql = format!(
        "WITH windowed_history AS (
            SELECT *, row_number() OVER (
                PARTITION BY product_id, process_code, equipment_line_id
                ORDER BY move_in_ts DESC
            ) AS rn
            FROM history_raw
            WHERE {time_window}
        ),
        dedup AS (
            SELECT *, substr(equipment_line_id, 3, 4) AS equipment_group_id
            FROM windowed_history WHERE rn = 1
        )
        SELECT
            d.process_code,
            d.equipment_group_id,
            d.equipment_line_id,
            COALESCE(any_value(i.model_code), '') AS model_code,
            count(DISTINCT d.product_id) AS product_count,
            count(DISTINCT i.panel_id) AS total_defects
        FROM dedup d
        LEFT JOIN inspection_raw i
            ON i.product_id = d.product_id AND i.process_code = d.process_code {defect_clause}
        WHERE {process_clause}
        GROUP BY d.process_code, d.equipment_group_id, d.equipment_line_id
        HAVING count(DISTINCT d.product_id) >= {minimum_sample}",
        time_window = time_window_clause("move_in_ts", start, end),
    );

    let conn = conn.lock().unwrap();
    let mut stmt = conn
        .prepare(&sql)
        .map_err(|e| AppError::Internal(format!("preparing ranking query: {e}")))?;
    let rows = stmt
        .query_map([], |row| {
            let product_count: i64 = row.get(4)?;
            let total_defects: i64 = row.get(5)?;
            Ok(EquipmentAggregate {
                process_code: row.get(0)?,
                equipment_group_id: row.get(1)?,
                equipment_line_id: row.get(2)?,
                model_code: row.get(3)?,
                product_count: product_count.max(0) as u64,
                total_defects: total_defects.max(0) as u64,
            })
        })
        .map_err(|e| AppError::Internal(format!("executing ranking query: {e}")))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| AppError::Internal(format!("reading ranking rows: {e}")))?;
    Ok(rows)
}

/// Pure leave-one-out pass over the gated aggregates (spec.md §4.4 steps
/// 5–7, §8 invariant 7).
fn apply_leave_one_out(aggregates: Vec<EquipmentAggregate>, limit: Option<u64>) -> Vec<RankingRow> {
    let n = aggregates.len();
    if n == 0 {
        return Vec::new();
    }

    let rates: Vec<f64> = aggregates.iter().map(EquipmentAggregate::defect_rate).collect();
    let sum_rates: f64 = rates.iter().sum();
    let overall_avg = sum_rates / n as f64;

    let mut rows: Vec<RankingRow> = aggregates
        .into_iter()
        .zip(rates.iter())
        .map(|(agg, &own_rate)| {
            let delta = if n > 1 {
                (sum_rates - own_rate) / (n as f64 - 1.0) - overall_avg
            } else {
                0.0
            };
            RankingRow {
                rank: 0,
                process_code: agg.process_code,
                equipment_group_id: agg.equipment_group_id,
                equipment_line_id: agg.equipment_line_id,
                model_code: agg.model_code,
                product_count: agg.product_count,
                total_defects: agg.total_defects,
                defect_rate: own_rate,
                delta,
            }
        })
        .collect();

    rows.sort_by(|a, b| {
        a.delta
            .partial_cmp(&b.delta)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.equipment_line_id.cmp(&b.equipment_line_id))
    });

    if let Some(limit) = limit {
        rows.truncate(limit as usize);
    }

    for (idx, row) in rows.iter_mut().enumerate() {
        row.rank = idx as u64 + 1;
    }
    rows
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agg(line: &str, product_count: u64, total_defects: u64) -> EquipmentAggregate {
        EquipmentAggregate {
            process_code: "P100".to_string(),
            equipment_group_id: "0001".to_string(),
            equipment_line_id: line.to_string(),
            model_code: "M1".to_string(),
            product_count,
            total_defects,
        }
    }

    /// Mirrors spec.md §8 scenario S2: three lines with rates 0.5, 1.0, 1.5.
    #[test]
    fn leave_one_out_matches_scenario_s2() {
        let aggregates = vec![agg("L1", 20, 10), agg("L2", 20, 20), agg("L3", 20, 30)];
        let rows = apply_leave_one_out(aggregates, None);

        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].equipment_line_id, "L3");
        assert_eq!(rows[1].equipment_line_id, "L2");
        assert_eq!(rows[2].equipment_line_id, "L1");

        assert!((rows[0].delta - (-0.25)).abs() < 1e-9);
        assert!((rows[1].delta - 0.0).abs() < 1e-9);
        assert!((rows[2].delta - 0.25).abs() < 1e-9);

        assert_eq!(rows[0].rank, 1);
        assert_eq!(rows[2].rank, 3);
    }

    #[test]
    fn single_equipment_has_zero_delta() {
        let rows = apply_leave_one_out(vec![agg("L1", 15, 10)], None);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].delta, 0.0);
    }

    #[test]
    fn limit_truncates_after_sort() {
        let aggregates = vec![agg("L1", 20, 10), agg("L2", 20, 20), agg("L3", 20, 30)];
        let rows = apply_leave_one_out(aggregates, Some(2));
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].equipment_line_id, "L3");
        assert_eq!(rows[1].equipment_line_id, "L2");
    }
}
