use serde::{Deserialize, Serialize};

/// One defect observation on one panel (spec.md §3, InspectionRow). Immutable
/// once written; raw tables are append-only and tolerate duplicates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InspectionRow {
    pub facility_code: String,
    pub product_id: String,
    pub panel_id: String,
    /// Derived at ingest: `panel_id - product_id`, never recomputed at query time.
    #[serde(default)]
    pub panel_addr: String,
    #[serde(default)]
    pub panel_x: String,
    #[serde(default)]
    pub panel_y: String,
    pub process_code: String,
    pub equipment_line_id: String,
    pub model_code: String,
    /// Raw four-part `A-B-C-D` classification.
    pub defect_term: String,
    /// Derived at ingest: `B-D` extracted from `defect_term`.
    #[serde(default)]
    pub defect_name: String,
    pub defect_x: f64,
    pub defect_y: f64,
    pub defect_count: i64,
    pub inspection_end_ts: chrono::DateTime<chrono::Utc>,
}

/// Request body for `POST /api/ingest`.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct IngestRequest {
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestResponse {
    pub inspection: u64,
    pub history: u64,
}

/// Query parameters for `GET /api/inspection`.
#[derive(Debug, Clone, Deserialize)]
pub struct InspectionQuery {
    #[serde(default)]
    pub facility_code: Option<String>,
    pub start_date: String,
    pub end_date: String,
    #[serde(default)]
    pub process_code: Option<String>,
    #[serde(default)]
    pub defect_name: Option<String>,
    #[serde(default = "default_inspection_limit")]
    pub limit: u64,
    #[serde(default)]
    pub offset: u64,
}

fn default_inspection_limit() -> u64 {
    100
}

#[derive(Debug, Clone, Serialize)]
pub struct Pagination {
    pub limit: u64,
    pub offset: u64,
    pub total: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct InspectionListResponse {
    pub data: Vec<InspectionRow>,
    pub pagination: Pagination,
}
