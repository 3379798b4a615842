use duckdb::Connection;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use crate::analyzer::sampling::{others_stride, should_emit, target_stride, LOT_OTHERS_STRIDE};
use crate::analyzer::quote;
use crate::error::{AppError, AppResult};
use crate::models::analyze::{
    AnalysisMetrics, AnalysisResult, BatchAnalyzeRequest, BatchTarget, DailyResult, GlassResult, GroupType,
    HeatmapCell, LotResult,
};
use crate::query_builder::time_window_clause;

#[derive(Debug, Clone)]
struct BaselineUnit {
    product_id: String,
    lot_id: String,
    work_date: chrono::NaiveDate,
    total_defects: i64,
}

type HeatmapKey = (String, String);
type HeatmapAgg = (i64, u64);

/// `analyze_batch({defect_name, start_date, end_date, targets[]}) →
/// {equipment_line_id → Result}` (spec.md §4.6). The baseline and membership
/// pulls run once; per-target classification runs as one Tokio task each,
/// mirroring the sibling per-series evaluation loop generalized to run
/// concurrently rather than sequentially.
pub async fn analyze_batch(
    conn: Arc<Mutex<Connection>>,
    req: BatchAnalyzeRequest,
) -> AppResult<HashMap<String, AnalysisResult>> {
    let baseline = {
        let conn = conn.lock().unwrap();
        fetch_baseline(&conn, &req.start_date, &req.end_date, &req.defect_name)?
    };
    let membership = {
        let conn = conn.lock().unwrap();
        fetch_target_membership(&conn, &req.targets)?
    };
    let global_heatmap = {
        let conn = conn.lock().unwrap();
        fetch_global_heatmap(&conn, &req.start_date, &req.end_date, &req.defect_name)?
    };
    let per_target_heatmap = {
        let conn = conn.lock().unwrap();
        fetch_per_target_heatmap(&conn, &req.targets, &req.start_date, &req.end_date, &req.defect_name)?
    };

    let baseline = Arc::new(baseline);
    let global_heatmap = Arc::new(global_heatmap);
    let results = Arc::new(Mutex::new(HashMap::new()));

    let mut handles = Vec::new();
    for target in &req.targets {
        let baseline = baseline.clone();
        let global_heatmap = global_heatmap.clone();
        let target_ids = membership.get(&target.equipment_id).cloned().unwrap_or_default();
        let target_heatmap = per_target_heatmap
            .get(&target.equipment_id)
            .cloned()
            .unwrap_or_default();
        let results = results.clone();
        let equipment_id = target.equipment_id.clone();

        handles.push(tokio::spawn(async move {
            let result = project_target(&baseline, &target_ids, &global_heatmap, &target_heatmap);
            results.lock().unwrap().insert(equipment_id, result);
        }));
    }
    for handle in handles {
        handle
            .await
            .map_err(|e| AppError::Internal(format!("batch projection task panicked: {e}")))?;
    }

    let results = Arc::try_unwrap(results)
        .map_err(|_| AppError::Internal("dangling reference to batch results map".to_string()))?
        .into_inner()
        .map_err(|e| AppError::Internal(format!("poisoned batch results mutex: {e}")))?;
    Ok(results)
}

fn fetch_baseline(
    conn: &Connection,
    start_date: &str,
    end_date: &str,
    defect_name: &str,
) -> AppResult<Vec<BaselineUnit>> {
    let window = time_window_clause("work_date", start_date, end_date);
    let sql = format!(
        "SELECT product_id, lot_id, work_date, total_defects FROM glass_stats
         WHERE {window} AND defect_name = {defect}
         ORDER BY work_date, product_id",
        defect = quote(defect_name),
    );
    let conn_ref = conn;
    let mut stmt = conn_ref
        .prepare(&sql)
        .map_err(|e| AppError::Internal(format!("preparing baseline query: {e}")))?;
    let rows = stmt
        .query_map([], |row| {
            Ok(BaselineUnit {
                product_id: row.get(0)?,
                lot_id: row.get(1)?,
                work_date: row.get(2)?,
                total_defects: row.get(3)?,
            })
        })
        .map_err(|e| AppError::Internal(format!("executing baseline query: {e}")))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| AppError::Internal(e.to_string()))?;
    Ok(rows)
}

fn fetch_target_membership(
    conn: &Connection,
    targets: &[BatchTarget],
) -> AppResult<HashMap<String, HashSet<String>>> {
    let mut membership: HashMap<String, HashSet<String>> = HashMap::new();
    if targets.is_empty() {
        return Ok(membership);
    }

    let clauses: Vec<String> = targets
        .iter()
        .map(|t| match &t.process_code {
            Some(pc) => format!(
                "(equipment_line_id = {} AND process_code = {})",
                quote(&t.equipment_id),
                quote(pc)
            ),
            None => format!("(equipment_line_id = {})", quote(&t.equipment_id)),
        })
        .collect();
    let sql = format!(
        "SELECT DISTINCT product_id, equipment_line_id FROM history_raw WHERE {}",
        clauses.join(" OR ")
    );

    let mut stmt = conn
        .prepare(&sql)
        .map_err(|e| AppError::Internal(format!("preparing membership query: {e}")))?;
    let rows = stmt
        .query_map([], |row| {
            let product_id: String = row.get(0)?;
            let equipment_line_id: String = row.get(1)?;
            Ok((product_id, equipment_line_id))
        })
        .map_err(|e| AppError::Internal(format!("executing membership query: {e}")))?;
    for row in rows {
        let (product_id, equipment_line_id) = row.map_err(|e| AppError::Internal(e.to_string()))?;
        membership.entry(equipment_line_id).or_default().insert(product_id);
    }
    Ok(membership)
}

fn fetch_global_heatmap(
    conn: &Connection,
    start_date: &str,
    end_date: &str,
    defect_name: &str,
) -> AppResult<HashMap<HeatmapKey, HeatmapAgg>> {
    let window = time_window_clause("inspection_end_ts", start_date, end_date);
    let sql = format!(
        "SELECT panel_x, panel_y, sum(defect_count), count(DISTINCT product_id)
         FROM inspection_raw
         WHERE {window} AND defect_name = {defect}
         GROUP BY panel_x, panel_y",
        defect = quote(defect_name),
    );
    let mut stmt = conn
        .prepare(&sql)
        .map_err(|e| AppError::Internal(format!("preparing global heatmap query: {e}")))?;
    let mut out = HashMap::new();
    let rows = stmt
        .query_map([], |row| {
            let x: String = row.get(0)?;
            let y: String = row.get(1)?;
            let defects: i64 = row.get(2)?;
            let glasses: i64 = row.get(3)?;
            Ok((x, y, defects, glasses.max(0) as u64))
        })
        .map_err(|e| AppError::Internal(format!("executing global heatmap query: {e}")))?;
    for row in rows {
        let (x, y, defects, glasses) = row.map_err(|e| AppError::Internal(e.to_string()))?;
        out.insert((x, y), (defects, glasses));
    }
    Ok(out)
}

fn fetch_per_target_heatmap(
    conn: &Connection,
    targets: &[BatchTarget],
    start_date: &str,
    end_date: &str,
    defect_name: &str,
) -> AppResult<HashMap<String, HashMap<HeatmapKey, HeatmapAgg>>> {
    let mut out: HashMap<String, HashMap<HeatmapKey, HeatmapAgg>> = HashMap::new();
    if targets.is_empty() {
        return Ok(out);
    }

    let equipment_ids: Vec<String> = targets.iter().map(|t| quote(&t.equipment_id)).collect();
    let window = time_window_clause("i.inspection_end_ts", start_date, end_date);
    let sql = format!(
        "SELECT h.equipment_line_id, i.panel_x, i.panel_y, sum(i.defect_count), count(DISTINCT i.product_id)
         FROM history_raw h
         JOIN inspection_raw i ON i.product_id = h.product_id AND i.defect_name = {defect}
         WHERE h.equipment_line_id IN ({eq_list}) AND {window}
         GROUP BY h.equipment_line_id, i.panel_x, i.panel_y",
        defect = quote(defect_name),
        eq_list = equipment_ids.join(", "),
    );
    let mut stmt = conn
        .prepare(&sql)
        .map_err(|e| AppError::Internal(format!("preparing per-target heatmap query: {e}")))?;
    let rows = stmt
        .query_map([], |row| {
            let equipment_line_id: String = row.get(0)?;
            let x: String = row.get(1)?;
            let y: String = row.get(2)?;
            let defects: i64 = row.get(3)?;
            let glasses: i64 = row.get(4)?;
            Ok((equipment_line_id, x, y, defects, glasses.max(0) as u64))
        })
        .map_err(|e| AppError::Internal(format!("executing per-target heatmap query: {e}")))?;
    for row in rows {
        let (equipment_line_id, x, y, defects, glasses) = row.map_err(|e| AppError::Internal(e.to_string()))?;
        out.entry(equipment_line_id)
            .or_default()
            .insert((x, y), (defects, glasses));
    }
    Ok(out)
}

#[derive(Default)]
struct LotAgg {
    target_count: u64,
    target_total: i64,
    target_max: i64,
    others_count: u64,
    others_total: i64,
    others_max: i64,
}

#[derive(Default)]
struct DailyAgg {
    target_count: u64,
    target_total: i64,
    others_count: u64,
    others_total: i64,
}

/// A single in-memory pass over the baseline, classifying into Target/Others
/// and accumulating lot/daily aggregates plus sampled scatter output
/// (spec.md §4.6 step 4).
fn project_target(
    baseline: &[BaselineUnit],
    target_ids: &HashSet<String>,
    global_heatmap: &HashMap<HeatmapKey, HeatmapAgg>,
    target_heatmap: &HashMap<HeatmapKey, HeatmapAgg>,
) -> AnalysisResult {
    let t_stride = target_stride(baseline.len());
    let o_stride = others_stride(baseline.len());

    let mut glass = Vec::new();
    let mut lot_map: HashMap<String, LotAgg> = HashMap::new();
    let mut daily_map: HashMap<chrono::NaiveDate, DailyAgg> = HashMap::new();

    let mut target_counter = 0usize;
    let mut others_counter = 0usize;
    let mut target_count = 0u64;
    let mut target_defects = 0i64;
    let mut others_count = 0u64;
    let mut others_defects = 0i64;

    for unit in baseline {
        let is_target = target_ids.contains(&unit.product_id);
        if is_target {
            target_count += 1;
            target_defects += unit.total_defects;
        } else {
            others_count += 1;
            others_defects += unit.total_defects;
        }

        let lot = lot_map.entry(unit.lot_id.clone()).or_default();
        let daily = daily_map.entry(unit.work_date).or_default();
        if is_target {
            lot.target_count += 1;
            lot.target_total += unit.total_defects;
            lot.target_max = lot.target_max.max(unit.total_defects);
            daily.target_count += 1;
            daily.target_total += unit.total_defects;
        } else {
            lot.others_count += 1;
            lot.others_total += unit.total_defects;
            lot.others_max = lot.others_max.max(unit.total_defects);
            daily.others_count += 1;
            daily.others_total += unit.total_defects;
        }

        let emit = if is_target {
            let e = should_emit(target_counter, t_stride);
            target_counter += 1;
            e
        } else {
            let e = should_emit(others_counter, o_stride);
            others_counter += 1;
            e
        };
        if emit {
            glass.push(GlassResult {
                glass_id: unit.product_id.clone(),
                lot_id: unit.lot_id.clone(),
                work_date: unit.work_date,
                total_defects: unit.total_defects,
                group: if is_target { GroupType::Target } else { GroupType::Others },
            });
        }
    }

    let mut lot_ids: Vec<&String> = lot_map.keys().collect();
    lot_ids.sort();
    let mut lot = Vec::new();
    let mut others_lot_counter = 0usize;
    for lot_id in lot_ids {
        let agg = &lot_map[lot_id];
        if agg.target_count > 0 {
            lot.push(LotResult {
                lot_id: lot_id.clone(),
                group: GroupType::Target,
                glass_count: agg.target_count,
                total_defects: agg.target_total,
                avg_defects: agg.target_total as f64 / agg.target_count as f64,
                max_defects: agg.target_max,
            });
        }
        if agg.others_count > 0 {
            if should_emit(others_lot_counter, LOT_OTHERS_STRIDE) {
                lot.push(LotResult {
                    lot_id: lot_id.clone(),
                    group: GroupType::Others,
                    glass_count: agg.others_count,
                    total_defects: agg.others_total,
                    avg_defects: agg.others_total as f64 / agg.others_count as f64,
                    max_defects: agg.others_max,
                });
            }
            others_lot_counter += 1;
        }
    }

    let mut work_dates: Vec<&chrono::NaiveDate> = daily_map.keys().collect();
    work_dates.sort();
    let mut daily = Vec::new();
    for work_date in work_dates {
        let agg = &daily_map[work_date];
        if agg.target_count > 0 {
            daily.push(DailyResult {
                work_date: *work_date,
                group: GroupType::Target,
                glass_count: agg.target_count,
                total_defects: agg.target_total,
                avg_defects: agg.target_total as f64 / agg.target_count as f64,
            });
        }
        if agg.others_count > 0 {
            daily.push(DailyResult {
                work_date: *work_date,
                group: GroupType::Others,
                glass_count: agg.others_count,
                total_defects: agg.others_total,
                avg_defects: agg.others_total as f64 / agg.others_count as f64,
            });
        }
    }

    let heatmap = build_heatmap(global_heatmap, target_heatmap);
    let metrics = metrics_from_counts(target_count, target_defects, others_count, others_defects);

    AnalysisResult {
        glass,
        lot,
        daily,
        heatmap,
        metrics,
    }
}

/// Target cells come straight from the per-target query; Others cells are
/// `global − target` componentwise, floored at zero (spec.md §4.6 step 5 and
/// §9 open question — the source's stated derivation, resolved here as the
/// literal difference since the spec text names it explicitly).
fn build_heatmap(
    global_heatmap: &HashMap<HeatmapKey, HeatmapAgg>,
    target_heatmap: &HashMap<HeatmapKey, HeatmapAgg>,
) -> Vec<HeatmapCell> {
    let mut keys: Vec<&HeatmapKey> = global_heatmap.keys().chain(target_heatmap.keys()).collect();
    keys.sort();
    keys.dedup();

    let mut cells = Vec::new();
    for (x, y) in keys {
        let (global_defects, global_glasses) = global_heatmap.get(&(x.clone(), y.clone())).copied().unwrap_or((0, 0));
        let (target_defects, target_glasses) = target_heatmap.get(&(x.clone(), y.clone())).copied().unwrap_or((0, 0));

        if target_glasses > 0 || target_defects > 0 {
            cells.push(HeatmapCell {
                panel_x: x.clone(),
                panel_y: y.clone(),
                group: GroupType::Target,
                total_defects: target_defects,
                total_glasses: target_glasses,
                rate: rate(target_defects, target_glasses),
            });
        }

        let others_defects = (global_defects - target_defects).max(0);
        let others_glasses = global_glasses.saturating_sub(target_glasses);
        if others_glasses > 0 || others_defects > 0 {
            cells.push(HeatmapCell {
                panel_x: x.clone(),
                panel_y: y.clone(),
                group: GroupType::Others,
                total_defects: others_defects,
                total_glasses: others_glasses,
                rate: rate(others_defects, others_glasses),
            });
        }
    }
    cells
}

fn rate(defects: i64, glasses: u64) -> f64 {
    if glasses == 0 {
        0.0
    } else {
        defects as f64 / glasses as f64
    }
}

fn metrics_from_counts(
    target_count: u64,
    target_defects: i64,
    others_count: u64,
    others_defects: i64,
) -> AnalysisMetrics {
    let total_count = target_count + others_count;
    let overall_rate = if total_count == 0 {
        0.0
    } else {
        (target_defects + others_defects) as f64 / total_count as f64
    };
    let target_rate = if target_count == 0 {
        0.0
    } else {
        target_defects as f64 / target_count as f64
    };
    let others_rate = if others_count == 0 {
        0.0
    } else {
        others_defects as f64 / others_count as f64
    };
    AnalysisMetrics {
        target_count,
        others_count,
        target_defects,
        others_defects,
        overall_rate,
        target_rate,
        others_rate,
        delta: overall_rate - target_rate,
        superiority: others_rate - target_rate,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(product_id: &str, lot_id: &str, day: u32, defects: i64) -> BaselineUnit {
        BaselineUnit {
            product_id: product_id.to_string(),
            lot_id: lot_id.to_string(),
            work_date: chrono::NaiveDate::from_ymd_opt(2024, 1, day).unwrap(),
            total_defects: defects,
        }
    }

    /// Mirrors spec.md §8 scenario S3: counts partition the baseline disjointly.
    #[test]
    fn batch_projection_partitions_baseline_disjointly() {
        let baseline = vec![
            unit("P1", "LOT1", 1, 5),
            unit("P2", "LOT1", 1, 3),
            unit("P3", "LOT2", 2, 1),
        ];
        let mut target_ids = HashSet::new();
        target_ids.insert("P1".to_string());

        let result = project_target(&baseline, &target_ids, &HashMap::new(), &HashMap::new());
        assert_eq!(result.metrics.target_count + result.metrics.others_count, 3);
        assert_eq!(result.metrics.target_count, 1);
        assert_eq!(result.metrics.others_count, 2);

        let target_lot_sum: u64 = result.lot.iter().filter(|l| l.group == GroupType::Target).map(|l| l.glass_count).sum();
        let others_lot_sum: u64 = result.lot.iter().filter(|l| l.group == GroupType::Others).map(|l| l.glass_count).sum();
        assert_eq!(target_lot_sum, 1);
        assert_eq!(others_lot_sum, 2);
    }

    #[test]
    fn heatmap_others_is_global_minus_target() {
        let mut global = HashMap::new();
        global.insert(("A".to_string(), "1".to_string()), (10i64, 5u64));
        let mut target = HashMap::new();
        target.insert(("A".to_string(), "1".to_string()), (4i64, 2u64));

        let cells = build_heatmap(&global, &target);
        let target_cell = cells.iter().find(|c| c.group == GroupType::Target).unwrap();
        let others_cell = cells.iter().find(|c| c.group == GroupType::Others).unwrap();
        assert_eq!(target_cell.total_defects, 4);
        assert_eq!(others_cell.total_defects, 6);
        assert_eq!(others_cell.total_glasses, 3);
    }
}
