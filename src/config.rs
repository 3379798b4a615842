use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Top-level config loaded from `panelstat.toml`.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub heatmap: HeatmapConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Base directory; analytical stores live under `<base>/lake/<facility>.duckdb`,
    /// the operational store at `<base>/app.db`.
    #[serde(default = "default_base_dir")]
    pub base_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            base_dir: default_base_dir(),
        }
    }
}

fn default_base_dir() -> PathBuf {
    PathBuf::from("./data")
}

impl StorageConfig {
    pub fn lake_path(&self, facility: &str) -> PathBuf {
        self.base_dir.join("lake").join(format!("{facility}.duckdb"))
    }

    pub fn operational_db_path(&self) -> PathBuf {
        self.base_dir.join("app.db")
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetentionConfig {
    #[serde(default = "default_data_days")]
    pub data_days: u32,
    #[serde(default = "default_analysis_days")]
    pub analysis_days: u32,
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            data_days: default_data_days(),
            analysis_days: default_analysis_days(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
        }
    }
}

fn default_data_days() -> u32 {
    90
}

fn default_analysis_days() -> u32 {
    14
}

fn default_cleanup_interval_secs() -> u64 {
    3600
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnalysisConfig {
    /// Minimum `product_count` for a ranking row to be emitted (spec invariant 5).
    #[serde(default = "default_minimum_sample")]
    pub minimum_sample: u64,
    /// Fixed worker pool size for the job coordinator.
    #[serde(default = "default_worker_pool_size")]
    pub worker_pool_size: usize,
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            minimum_sample: default_minimum_sample(),
            worker_pool_size: default_worker_pool_size(),
            cache_ttl_secs: default_cache_ttl_secs(),
        }
    }
}

fn default_minimum_sample() -> u64 {
    10
}

fn default_worker_pool_size() -> usize {
    4
}

fn default_cache_ttl_secs() -> u64 {
    3600
}

/// Heatmap grid configuration: `model_code -> {x_list, y_list}`, loaded from
/// `config_heatmap.json` per spec.md §6.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct HeatmapConfig {
    #[serde(default)]
    pub grids: std::collections::HashMap<String, HeatmapGrid>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HeatmapGrid {
    pub x_list: Vec<String>,
    pub y_list: Vec<String>,
}

impl AppConfig {
    /// Load config from a TOML file. Returns defaults if the file doesn't exist.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::info!("config file not found at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&contents)?;
        tracing::info!("loaded config from {}", path.display());
        Ok(config)
    }

    /// Load the heatmap grid mapping from its own JSON file, per spec.md §6.
    /// Absent file means no fixed grids are configured — the dynamic path is used for all models.
    pub fn load_heatmap_grids(path: impl AsRef<Path>) -> anyhow::Result<HeatmapConfig> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(HeatmapConfig::default());
        }
        let contents = std::fs::read_to_string(path)?;
        let grids: std::collections::HashMap<String, HeatmapGrid> = serde_json::from_str(&contents)?;
        Ok(HeatmapConfig { grids })
    }
}
