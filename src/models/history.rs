use serde::{Deserialize, Serialize};

/// One unit's passage through an equipment node (spec.md §3, HistoryRow).
/// Written append-only; latest-wins dedup is applied downstream, never by
/// deletion (spec invariant 7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryRow {
    pub facility_code: String,
    pub product_id: String,
    pub lot_id: String,
    pub process_code: String,
    pub equipment_line_id: String,
    pub equipment_machine_id: String,
    pub equipment_path_id: String,
    pub move_in_ts: chrono::DateTime<chrono::Utc>,
    pub equipment_hierarchy_type_code: String,
}

/// Query parameters for `GET /api/history` (spec.md §6, "unit-scoped history").
#[derive(Debug, Clone, Deserialize)]
pub struct HistoryQuery {
    #[serde(default)]
    pub facility_code: Option<String>,
    pub product_id: String,
    #[serde(default)]
    pub process_code: Option<String>,
    #[serde(default, alias = "equipment_id")]
    pub equipment_line_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HistoryListResponse {
    pub product_id: String,
    pub data: Vec<HistoryRow>,
    pub count: usize,
}
