use serde::Serialize;

/// One mart row per `(product_id, defect_name)` (spec.md §3, GlassStats).
/// Rebuilt wholesale by the Mart Builder; never mutated in place.
#[derive(Debug, Clone, Serialize)]
pub struct GlassStats {
    pub product_id: String,
    pub lot_id: String,
    pub model_code: String,
    pub work_date: chrono::NaiveDate,
    pub defect_name: String,
    pub total_defects: i64,
    /// Ordered, sorted list of distinct panel addresses with any defect.
    pub panel_addrs: Vec<String>,
    /// Parallel list of per-address defect totals; `len(panel_map) == len(panel_addrs)`.
    pub panel_map: Vec<i64>,
}

/// Summary returned by a Mart Builder run (`/api/mart/refresh`).
#[derive(Debug, Clone, Serialize)]
pub struct MartStats {
    pub facility: String,
    pub rows_created: u64,
    pub min_work_date: Option<chrono::NaiveDate>,
    pub max_work_date: Option<chrono::NaiveDate>,
    pub mean_total_defects: f64,
    pub sum_total_defects: i64,
    pub distinct_lots: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MartRefreshResponse {
    pub status: String,
    pub duration_ms: u64,
    pub rows_created: u64,
    pub stats: MartStats,
}
