pub mod analyzer;
pub mod config;
pub mod config_db;
pub mod error;
pub mod handlers;
pub mod hierarchy;
pub mod ingest;
pub mod jobs;
pub mod mart;
pub mod models;
pub mod query_builder;
pub mod ranking;
pub mod retention;
pub mod store;

use axum::http::HeaderMap;
use std::sync::{Arc, RwLock};

use config::{AnalysisConfig, HeatmapConfig, RetentionConfig};
use config_db::ConfigDb;
use error::{AppError, AppResult};
use ingest::IngestSource;
use jobs::JobCoordinator;
use store::LakeStore;

/// Shared application state, the generalization of the teacher's
/// `{ch, config_db}` pair to this crate's store/mart/job layers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<LakeStore>,
    pub config_db: Arc<ConfigDb>,
    pub heatmap_config: Arc<HeatmapConfig>,
    pub retention_config: RetentionConfig,
    /// The only part of `AppConfig` mutable after startup (`GET/PUT
    /// /api/config`); everything else is frozen per spec.md §1.
    pub analysis_config: Arc<RwLock<AnalysisConfig>>,
    pub jobs: Arc<JobCoordinator>,
    pub ingest_source: Arc<dyn IngestSource>,
}

/// Query-string facility selector for endpoints with no other query params
/// of their own (the `POST` handlers: ingest, mart refresh, cleanup, the
/// three analyze endpoints).
#[derive(Debug, Clone, serde::Deserialize)]
pub struct FacilityQuery {
    #[serde(default)]
    pub facility_code: Option<String>,
}

/// Facility selection: `facility_code` query param, else `X-Facility-Code`
/// header, else the first known facility (spec.md §6).
pub fn resolve_facility(
    state: &AppState,
    query_facility: Option<&str>,
    headers: &HeaderMap,
) -> AppResult<String> {
    if let Some(f) = query_facility {
        if !f.is_empty() {
            return Ok(f.to_string());
        }
    }
    if let Some(header) = headers.get("X-Facility-Code") {
        if let Ok(f) = header.to_str() {
            if !f.is_empty() {
                return Ok(f.to_string());
            }
        }
    }
    let known = state
        .store
        .known_facilities()
        .map_err(|e| AppError::Internal(format!("listing known facilities: {e}")))?;
    known
        .into_iter()
        .next()
        .ok_or_else(|| AppError::validation("no facility_code given and no facility has been ingested yet"))
}
