use serde::{Deserialize, Serialize};

/// Query parameters for `GET /api/equipment/rankings`.
#[derive(Debug, Clone, Deserialize)]
pub struct RankingQuery {
    #[serde(default)]
    pub facility_code: Option<String>,
    pub start_date: String,
    pub end_date: String,
    #[serde(default)]
    pub defect_name: Option<String>,
    #[serde(default)]
    pub limit: Option<u64>,
    /// Advanced process-code filter; see `query_builder::parse_process_code_filter`.
    #[serde(default)]
    pub process_code: Option<String>,
}

/// One equipment line's leave-one-out peer-average delta (spec.md §4.4).
#[derive(Debug, Clone, Serialize)]
pub struct RankingRow {
    pub rank: u64,
    pub process_code: String,
    pub equipment_group_id: String,
    pub equipment_line_id: String,
    pub model_code: String,
    pub product_count: u64,
    pub total_defects: u64,
    pub defect_rate: f64,
    /// Positive ⇒ this equipment is better than its peers.
    pub delta: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RankingResponse {
    pub rankings: Vec<RankingRow>,
    pub count: usize,
}

/// Intermediate per-equipment aggregate before the leave-one-out pass.
#[derive(Debug, Clone)]
pub struct EquipmentAggregate {
    pub process_code: String,
    pub equipment_group_id: String,
    pub equipment_line_id: String,
    pub model_code: String,
    pub product_count: u64,
    pub total_defects: u64,
}

impl EquipmentAggregate {
    pub fn defect_rate(&self) -> f64 {
        if self.product_count == 0 {
            0.0
        } else {
            self.total_defects as f64 / self.product_count as f64
        }
    }
}
