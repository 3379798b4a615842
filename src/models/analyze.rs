use serde::{Deserialize, Serialize};

/// The binary partition of units by whether they passed through the
/// requested equipment set within the window (spec.md glossary).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupType {
    Target,
    Others,
}

impl GroupType {
    pub fn as_str(self) -> &'static str {
        match self {
            GroupType::Target => "target",
            GroupType::Others => "others",
        }
    }
}

/// Request body shared by `/api/analyze` (single, async) and the batch/stream
/// endpoints' per-target envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct AnalyzeRequest {
    pub defect_name: String,
    pub start_date: String,
    pub end_date: String,
    #[serde(default)]
    pub process_codes: Vec<String>,
    /// Legacy field name kept for client compatibility; internally this is
    /// the equipment line id set (spec.md §9, "Unit identifier naming").
    #[serde(default, alias = "equipment_ids")]
    pub equipment_line_ids: Vec<String>,
    #[serde(default)]
    pub model_codes: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalyzeAcceptedResponse {
    pub job_id: String,
    pub status: &'static str,
}

/// One row of the glass-level scatter result set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlassResult {
    /// Kept under the legacy name for client compatibility.
    pub glass_id: String,
    pub lot_id: String,
    pub work_date: chrono::NaiveDate,
    pub total_defects: i64,
    pub group: GroupType,
}

/// One row of the lot-aggregate result set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LotResult {
    pub lot_id: String,
    pub group: GroupType,
    pub glass_count: u64,
    pub total_defects: i64,
    pub avg_defects: f64,
    pub max_defects: i64,
}

/// One row of the daily-trend result set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyResult {
    pub work_date: chrono::NaiveDate,
    pub group: GroupType,
    pub glass_count: u64,
    pub total_defects: i64,
    pub avg_defects: f64,
}

/// One cell of the panel-position heatmap result set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeatmapCell {
    pub panel_x: String,
    pub panel_y: String,
    pub group: GroupType,
    pub total_defects: i64,
    pub total_glasses: u64,
    pub rate: f64,
}

/// Summary metric block derived from glass-level results (spec.md §4.5).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AnalysisMetrics {
    pub target_count: u64,
    pub others_count: u64,
    pub target_defects: i64,
    pub others_defects: i64,
    pub overall_rate: f64,
    pub target_rate: f64,
    pub others_rate: f64,
    /// `overall_rate - target_rate`; positive ⇒ target better than overall.
    pub delta: f64,
    /// `others_rate - target_rate`; positive ⇒ target better than others.
    pub superiority: f64,
}

/// The four result sets plus the summary metric block — the full output of
/// one analyzer invocation, single or per-target-batch.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AnalysisResult {
    pub glass: Vec<GlassResult>,
    pub lot: Vec<LotResult>,
    pub daily: Vec<DailyResult>,
    pub heatmap: Vec<HeatmapCell>,
    pub metrics: AnalysisMetrics,
}

/// Paginated glass results + the other three result sets in full, as
/// returned by `GET /api/analyze/{id}/results`.
#[derive(Debug, Clone, Serialize)]
pub struct PagedAnalysisResult {
    pub glass: Vec<GlassResult>,
    pub glass_total: usize,
    pub lot: Vec<LotResult>,
    pub daily: Vec<DailyResult>,
    pub heatmap: Vec<HeatmapCell>,
    pub metrics: AnalysisMetrics,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResultsQuery {
    #[serde(default = "default_results_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

fn default_results_limit() -> usize {
    100
}

/// One requested target in a batch/stream request.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq, Hash)]
pub struct BatchTarget {
    pub equipment_id: String,
    #[serde(default)]
    pub process_code: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BatchAnalyzeRequest {
    pub defect_name: String,
    pub start_date: String,
    pub end_date: String,
    pub targets: Vec<BatchTarget>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchAnalyzeResponse {
    pub status: &'static str,
    pub duration_ms: u64,
    pub results: std::collections::HashMap<String, AnalysisResult>,
    pub cache_key: String,
    pub cache_hit: bool,
}

/// One line of the NDJSON stream: either a completed result or an error for
/// the given target (spec.md §7, "Partial").
#[derive(Debug, Clone, Serialize)]
pub struct StreamLine {
    pub equipment_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<AnalysisResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
