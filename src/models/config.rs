use serde::{Deserialize, Serialize};

/// What `GET /api/config` returns and `PUT /api/config` accepts (spec.md
/// §6). Only `analysis` is mutable at runtime — `retention` and
/// `heatmap_models` are reported for visibility but frozen after startup
/// (`AppState::analysis_config` is the only `RwLock`-guarded config field).
#[derive(Debug, Clone, Serialize)]
pub struct ConfigResponse {
    pub analysis: AnalysisSettings,
    pub settings: OperationalSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisSettings {
    pub minimum_sample: u64,
    pub worker_pool_size: usize,
    pub cache_ttl_secs: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct OperationalSettings {
    pub data_days: u32,
    pub analysis_days: u32,
    pub cleanup_interval_secs: u64,
    pub heatmap_models: Vec<String>,
}

/// `PUT /api/config` body: a partial update of the mutable `analysis`
/// settings. Absent fields leave the current value untouched.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ConfigUpdateRequest {
    pub analysis: Option<AnalysisSettingsPatch>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct AnalysisSettingsPatch {
    #[serde(default)]
    pub minimum_sample: Option<u64>,
    #[serde(default)]
    pub worker_pool_size: Option<usize>,
    #[serde(default)]
    pub cache_ttl_secs: Option<u64>,
}
