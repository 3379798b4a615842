use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisLevel {
    Process,
    Line,
    Machine,
    Path,
}

impl AnalysisLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            AnalysisLevel::Process => "process",
            AnalysisLevel::Line => "line",
            AnalysisLevel::Machine => "machine",
            AnalysisLevel::Path => "path",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HierarchyQuery {
    #[serde(default)]
    pub facility_code: Option<String>,
    pub start_date: String,
    pub end_date: String,
    pub model_code: String,
    pub analysis_level: AnalysisLevel,
    #[serde(default)]
    pub process_code: Option<String>,
    #[serde(default)]
    pub equipment_line_id: Option<String>,
    #[serde(default)]
    pub equipment_machine_id: Option<String>,
}

/// One row of a hierarchy roll-up at the requested depth (spec.md §4.8).
#[derive(Debug, Clone, Serialize)]
pub struct HierarchyRow {
    pub process_code: String,
    pub equipment_line_id: Option<String>,
    pub equipment_machine_id: Option<String>,
    pub equipment_path_id: Option<String>,
    pub total_products: u64,
    pub total_defects: i64,
    pub dpu: f64,
    pub panel_addrs: Vec<String>,
    pub panel_map: Vec<i64>,
    pub daily_dpu: Vec<DailyDpuPoint>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DailyDpuPoint {
    pub work_date: chrono::NaiveDate,
    pub dpu: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct HierarchyResponse {
    pub rows: Vec<HierarchyRow>,
}
