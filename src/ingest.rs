use async_trait::async_trait;
use duckdb::Connection;
use std::sync::Mutex;

use crate::error::{AppError, AppResult};
use crate::models::history::HistoryRow;
use crate::models::inspection::InspectionRow;

/// Derive `panel_addr`, `panel_x`, `panel_y` from `panel_id`/`product_id`
/// (spec.md §4.2). Pure and unit-tested directly.
pub fn derive_panel_addr(panel_id: &str, product_id: &str) -> (String, String, String) {
    let panel_addr = panel_id
        .strip_prefix(product_id)
        .map(str::to_string)
        .unwrap_or_else(|| panel_id.to_string());
    if panel_addr.is_empty() {
        return (panel_addr, String::new(), String::new());
    }
    let mut chars: Vec<char> = panel_addr.chars().collect();
    let y = chars.pop().unwrap().to_string();
    let x: String = chars.into_iter().collect();
    (panel_addr, x, y)
}

/// Derive `defect_name = B-D` from a raw four-part `A-B-C-D` term
/// (spec.md §4.2, §8 property 6). Inputs with fewer than four parts pass
/// through unchanged.
pub fn derive_defect_name(defect_term: &str) -> String {
    let parts: Vec<&str> = defect_term.split('-').collect();
    if parts.len() >= 4 {
        format!("{}-{}", parts[1], parts[3])
    } else {
        defect_term.to_string()
    }
}

/// Fill in `panel_addr`/`panel_x`/`panel_y`/`defect_name` on a raw row as
/// ingest requires (never recomputed at query time).
pub fn prepare_inspection_row(mut row: InspectionRow) -> InspectionRow {
    let (addr, x, y) = derive_panel_addr(&row.panel_id, &row.product_id);
    row.panel_addr = addr;
    row.panel_x = x;
    row.panel_y = y;
    row.defect_name = derive_defect_name(&row.defect_term);
    row
}

/// A source of raw rows for one facility — the mock generator and any real
/// upstream ETL reader both conform to this same contract (spec.md §1,
/// "mock data is one of several ingest sources feeding the same insert
/// contract").
#[async_trait]
pub trait IngestSource: Send + Sync {
    async fn fetch(
        &self,
        facility: &str,
        start: chrono::DateTime<chrono::Utc>,
        end: chrono::DateTime<chrono::Utc>,
    ) -> anyhow::Result<(Vec<InspectionRow>, Vec<HistoryRow>)>;
}

/// Resolve the effective ingest window: full range when both bounds are
/// given, else incremental from the facility's last known `move_in_ts` + 1s
/// (spec.md §4.2, "Trigger modes").
pub fn resolve_window(
    conn: &Mutex<Connection>,
    start: Option<chrono::DateTime<chrono::Utc>>,
    end: Option<chrono::DateTime<chrono::Utc>>,
) -> AppResult<(chrono::DateTime<chrono::Utc>, chrono::DateTime<chrono::Utc>)> {
    if let (Some(s), Some(e)) = (start, end) {
        return Ok((s, e));
    }
    let conn = conn.lock().unwrap();
    let last: Option<chrono::DateTime<chrono::Utc>> = conn
        .query_row("SELECT max(move_in_ts) FROM history_raw", [], |row| row.get(0))
        .unwrap_or(None);
    let resolved_start = last
        .map(|t| t + chrono::Duration::seconds(1))
        .unwrap_or_else(|| chrono::Utc::now() - chrono::Duration::days(1));
    Ok((resolved_start, chrono::Utc::now()))
}

/// Insert a batch of inspection and history rows inside a single transaction.
/// Rolled back whole on any failure (spec.md §4.2).
pub fn insert_batch(
    conn: &Mutex<Connection>,
    inspection: &[InspectionRow],
    history: &[HistoryRow],
) -> AppResult<(u64, u64)> {
    let mut conn = conn.lock().unwrap();
    let tx = conn
        .transaction()
        .map_err(|e| AppError::Internal(format!("starting ingest transaction: {e}")))?;

    {
        let mut stmt = tx
            .prepare(
                "INSERT INTO inspection_raw (product_id, panel_id, panel_addr, panel_x, panel_y, \
                 process_code, equipment_line_id, model_code, defect_term, defect_name, defect_x, \
                 defect_y, defect_count, inspection_end_ts) VALUES (?,?,?,?,?,?,?,?,?,?,?,?,?,?)",
            )
            .map_err(|e| AppError::Internal(e.to_string()))?;
        for raw in inspection {
            let row = prepare_inspection_row(raw.clone());
            stmt.execute(duckdb::params![
                row.product_id,
                row.panel_id,
                row.panel_addr,
                row.panel_x,
                row.panel_y,
                row.process_code,
                row.equipment_line_id,
                row.model_code,
                row.defect_term,
                row.defect_name,
                row.defect_x,
                row.defect_y,
                row.defect_count,
                row.inspection_end_ts,
            ])
            .map_err(|e| AppError::Internal(format!("inserting inspection row: {e}")))?;
        }
    }

    {
        let mut stmt = tx
            .prepare(
                "INSERT INTO history_raw (product_id, lot_id, process_code, equipment_line_id, \
                 equipment_machine_id, equipment_path_id, move_in_ts, equipment_hierarchy_type_code) \
                 VALUES (?,?,?,?,?,?,?,?)",
            )
            .map_err(|e| AppError::Internal(e.to_string()))?;
        for row in history {
            stmt.execute(duckdb::params![
                row.product_id,
                row.lot_id,
                row.process_code,
                row.equipment_line_id,
                row.equipment_machine_id,
                row.equipment_path_id,
                row.move_in_ts,
                row.equipment_hierarchy_type_code,
            ])
            .map_err(|e| AppError::Internal(format!("inserting history row: {e}")))?;
        }
    }

    tx.commit()
        .map_err(|e| AppError::Internal(format!("committing ingest transaction: {e}")))?;
    Ok((inspection.len() as u64, history.len() as u64))
}

/// The default `IngestSource`: a deterministic synthetic generator standing
/// in for the upstream relational source, which spec.md §1 places out of
/// scope. Index-based rather than random so repeated ingests of the same
/// window are reproducible.
pub struct MockIngestSource {
    pub units_per_day: usize,
}

impl Default for MockIngestSource {
    fn default() -> Self {
        Self { units_per_day: 50 }
    }
}

const MOCK_EQUIPMENT_LINES: [&str; 3] = ["EQ0001", "EQ0002", "EQ0003"];
const MOCK_PROCESS_CODES: [&str; 2] = ["P100", "P200"];
const MOCK_DEFECT_TERMS: [&str; 2] = ["SPOT-DARK-PHOTO-CENTER", "LINE-BRIGHT-VISUAL-EDGE"];
const MOCK_MODEL_CODES: [&str; 2] = ["M1", "M2"];

#[async_trait]
impl IngestSource for MockIngestSource {
    async fn fetch(
        &self,
        facility: &str,
        start: chrono::DateTime<chrono::Utc>,
        end: chrono::DateTime<chrono::Utc>,
    ) -> anyhow::Result<(Vec<InspectionRow>, Vec<HistoryRow>)> {
        let mut inspection = Vec::new();
        let mut history = Vec::new();

        let mut day = start.date_naive();
        let end_day = end.date_naive();
        let mut day_index = 0usize;
        while day <= end_day {
            for i in 0..self.units_per_day {
                let product_id = format!("{facility}-{}-{i:04}", day.format("%Y%m%d"));
                let lot_id = format!("LOT-{}-{}", day.format("%Y%m%d"), i / 25);
                let process_code = MOCK_PROCESS_CODES[i % MOCK_PROCESS_CODES.len()];
                let equipment_line_id = MOCK_EQUIPMENT_LINES[(i + day_index) % MOCK_EQUIPMENT_LINES.len()];
                let model_code = MOCK_MODEL_CODES[i % MOCK_MODEL_CODES.len()];
                let move_in_ts = day
                    .and_hms_opt(8, 0, 0)
                    .expect("8:00:00 is a valid time")
                    .and_utc()
                    + chrono::Duration::minutes(i as i64);

                history.push(HistoryRow {
                    facility_code: facility.to_string(),
                    product_id: product_id.clone(),
                    lot_id,
                    process_code: process_code.to_string(),
                    equipment_line_id: equipment_line_id.to_string(),
                    equipment_machine_id: format!("{equipment_line_id}-M1"),
                    equipment_path_id: format!("{equipment_line_id}-M1-P1"),
                    move_in_ts,
                    equipment_hierarchy_type_code: "LINE".to_string(),
                });

                if i % 5 == 0 {
                    let defect_term = MOCK_DEFECT_TERMS[i % MOCK_DEFECT_TERMS.len()];
                    let panel_id = format!("{product_id}A{}", 1 + (i % 9));
                    inspection.push(InspectionRow {
                        facility_code: facility.to_string(),
                        product_id: product_id.clone(),
                        panel_id,
                        panel_addr: String::new(),
                        panel_x: String::new(),
                        panel_y: String::new(),
                        process_code: process_code.to_string(),
                        equipment_line_id: equipment_line_id.to_string(),
                        model_code: model_code.to_string(),
                        defect_term: defect_term.to_string(),
                        defect_name: String::new(),
                        defect_x: 0.0,
                        defect_y: 0.0,
                        defect_count: 1 + (i % 3) as i64,
                        inspection_end_ts: move_in_ts + chrono::Duration::minutes(5),
                    });
                }
            }
            day = day.succ_opt().expect("date range stays within chrono's representable span");
            day_index += 1;
        }
        Ok((inspection, history))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panel_addr_derivation_round_trip() {
        let (addr, x, y) = derive_panel_addr("GLASS0001A3", "GLASS0001");
        assert_eq!(addr, "A3");
        assert_eq!(x, "A");
        assert_eq!(y, "3");
        assert_eq!(format!("{x}{y}"), addr);
    }

    #[test]
    fn panel_addr_falls_back_when_not_prefixed() {
        let (addr, _, _) = derive_panel_addr("OTHER123", "GLASS0001");
        assert_eq!(addr, "OTHER123");
    }

    #[test]
    fn defect_name_extraction() {
        assert_eq!(derive_defect_name("SPOT-DARK-PHOTO-CENTER"), "DARK-CENTER");
        assert_eq!(derive_defect_name("ONLYTWO-PARTS"), "ONLYTWO-PARTS");
        assert_eq!(derive_defect_name("no-dashes-at-all-here-extra"), "dashes-all");
    }

    #[tokio::test]
    async fn mock_source_generates_history_for_every_day_in_window() {
        let source = MockIngestSource { units_per_day: 5 };
        let start = chrono::Utc::now() - chrono::Duration::days(2);
        let end = chrono::Utc::now();
        let (inspection, history) = source.fetch("fab1", start, end).await.unwrap();
        assert_eq!(history.len(), 5 * 3);
        assert!(!inspection.is_empty());
        assert!(history.iter().all(|r| r.facility_code == "fab1"));
    }
}
