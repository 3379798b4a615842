use sha2::{Digest, Sha256};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use uuid::Uuid;

use crate::config::HeatmapConfig;
use crate::config_db::{ConfigDb, JobRow};
use crate::error::{AppError, AppResult};
use crate::jobs::worker::{self, WorkItem};
use crate::models::analyze::{AnalyzeRequest, BatchAnalyzeRequest};
use crate::models::job::{AnalysisJob, JobStatus};
use crate::store::LakeStore;

/// Fixed worker pool plus the cache-key fingerprint/dedup logic in front of
/// it (spec.md §4.7, §6 "Cache key"). Submissions that already have a fresh
/// cache entry return a synthetically-completed job with no queueing; an
/// in-flight job with the same key is handed back instead of duplicating
/// work, the same single-writer-per-key idea `usage_tracker.rs`'s channel
/// loop relies on.
pub struct JobCoordinator {
    config_db: Arc<ConfigDb>,
    cache_ttl_secs: u64,
    tx: mpsc::Sender<WorkItem>,
}

impl JobCoordinator {
    pub fn new(
        config_db: Arc<ConfigDb>,
        store: Arc<LakeStore>,
        heatmap_config: Arc<HeatmapConfig>,
        worker_pool_size: usize,
        cache_ttl_secs: u64,
    ) -> Self {
        let queue_capacity = worker_pool_size.max(1) * 2;
        let (tx, rx) = mpsc::channel(queue_capacity);
        let rx = Arc::new(AsyncMutex::new(rx));

        for worker_id in 0..worker_pool_size.max(1) {
            worker::spawn(
                worker_id,
                rx.clone(),
                config_db.clone(),
                store.clone(),
                heatmap_config.clone(),
                cache_ttl_secs,
            );
        }

        tracing::info!(worker_pool_size, queue_capacity, "job coordinator started");

        Self {
            config_db,
            cache_ttl_secs,
            tx,
        }
    }

    /// Submit one single-target analysis, returning the job that now
    /// represents it — newly queued, already in flight, or already cached.
    pub async fn submit(&self, facility: &str, request: AnalyzeRequest) -> AppResult<AnalysisJob> {
        let cache_key = cache_key_for_analyze(facility, &request);

        if let Some(entry) = self
            .config_db
            .get_cache_entry(&cache_key)
            .map_err(|e| AppError::Internal(format!("reading cache entry: {e}")))?
        {
            let job_id = Uuid::new_v4().to_string();
            self.config_db
                .create_job(&job_id, &cache_key, facility)
                .map_err(|e| AppError::Internal(format!("creating cache-hit job: {e}")))?;
            self.config_db
                .mark_job_completed(&job_id, &entry.result_json)
                .map_err(|e| AppError::Internal(format!("completing cache-hit job: {e}")))?;
            let row = self
                .config_db
                .get_job(&job_id)
                .map_err(|e| AppError::Internal(e.to_string()))?
                .ok_or_else(|| AppError::Internal("job vanished immediately after creation".to_string()))?;
            return job_from_row(row);
        }

        if let Some(row) = self
            .config_db
            .find_active_job_by_cache_key(&cache_key)
            .map_err(|e| AppError::Internal(format!("checking in-flight job: {e}")))?
        {
            return job_from_row(row);
        }

        let job_id = Uuid::new_v4().to_string();
        self.config_db
            .create_job(&job_id, &cache_key, facility)
            .map_err(|e| AppError::Internal(format!("creating job: {e}")))?;

        self.tx
            .send(WorkItem {
                job_id: job_id.clone(),
                cache_key,
                facility: facility.to_string(),
                request,
                cache_ttl_secs: self.cache_ttl_secs,
            })
            .await
            .map_err(|_| AppError::StoreUnavailable("job worker pool is not accepting work".to_string()))?;

        let row = self
            .config_db
            .get_job(&job_id)
            .map_err(|e| AppError::Internal(e.to_string()))?
            .ok_or_else(|| AppError::Internal("job vanished immediately after creation".to_string()))?;
        job_from_row(row)
    }

    pub fn status(&self, job_id: &str) -> AppResult<AnalysisJob> {
        let row = self
            .config_db
            .get_job(job_id)
            .map_err(|e| AppError::Internal(e.to_string()))?
            .ok_or_else(|| AppError::not_found(format!("no job with id {job_id}")))?;
        job_from_row(row)
    }

    pub fn result_json(&self, job_id: &str) -> AppResult<(JobStatus, Option<String>)> {
        let row = self
            .config_db
            .get_job(job_id)
            .map_err(|e| AppError::Internal(e.to_string()))?
            .ok_or_else(|| AppError::not_found(format!("no job with id {job_id}")))?;
        let status = JobStatus::parse(&row.status)
            .ok_or_else(|| AppError::Internal(format!("unrecognized job status {}", row.status)))?;
        Ok((status, row.result_json))
    }
}

/// `sha256(canonical request JSON)`, truncated to 128 bits hex (spec.md §6,
/// "Cache key"). List fields are sorted before hashing so two requests that
/// differ only in array order still collapse to one cache entry.
pub fn cache_key_for_analyze(facility: &str, req: &AnalyzeRequest) -> String {
    let mut process_codes = req.process_codes.clone();
    let mut equipment_line_ids = req.equipment_line_ids.clone();
    let mut model_codes = req.model_codes.clone();
    process_codes.sort();
    equipment_line_ids.sort();
    model_codes.sort();

    let payload = serde_json::json!({
        "facility": facility,
        "defect_name": req.defect_name,
        "start_date": req.start_date,
        "end_date": req.end_date,
        "process_codes": process_codes,
        "equipment_line_ids": equipment_line_ids,
        "model_codes": model_codes,
    });
    fingerprint(&payload)
}

/// The same fingerprinting discipline applied to a batch request (spec.md
/// §6, used by `/api/analyze/batch` and `/api/analyze/stream` for the
/// `cache_key`/`cache_hit` fields).
pub fn cache_key_for_batch(facility: &str, req: &BatchAnalyzeRequest) -> String {
    let mut targets = req.targets.clone();
    targets.sort_by(|a, b| (&a.equipment_id, &a.process_code).cmp(&(&b.equipment_id, &b.process_code)));

    let payload = serde_json::json!({
        "facility": facility,
        "defect_name": req.defect_name,
        "start_date": req.start_date,
        "end_date": req.end_date,
        "targets": targets,
    });
    fingerprint(&payload)
}

fn fingerprint(value: &serde_json::Value) -> String {
    let bytes = serde_json::to_vec(value).expect("plain json::Value serialization cannot fail");
    let digest = Sha256::digest(&bytes);
    digest[..16].iter().map(|b| format!("{b:02x}")).collect()
}

fn job_from_row(row: JobRow) -> AppResult<AnalysisJob> {
    let status = JobStatus::parse(&row.status)
        .ok_or_else(|| AppError::Internal(format!("unrecognized job status {}", row.status)))?;
    Ok(AnalysisJob {
        job_id: row.job_id,
        status,
        cache_key: row.cache_key,
        progress: row.progress,
        error_message: row.error_message,
        created_at: parse_db_timestamp(&row.created_at)?,
        updated_at: parse_db_timestamp(&row.updated_at)?,
    })
}

fn parse_db_timestamp(s: &str) -> AppResult<chrono::DateTime<chrono::Utc>> {
    chrono::DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&chrono::Utc))
        .map_err(|e| AppError::Internal(format!("parsing stored timestamp {s}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req() -> AnalyzeRequest {
        AnalyzeRequest {
            defect_name: "bright-dot".to_string(),
            start_date: "2024-01-01".to_string(),
            end_date: "2024-01-31".to_string(),
            process_codes: vec!["P100".to_string(), "P200".to_string()],
            equipment_line_ids: vec!["L2".to_string(), "L1".to_string()],
            model_codes: vec![],
        }
    }

    /// Invariant 1: identical requests (and requests differing only in list
    /// order) fingerprint to the same cache key.
    #[test]
    fn cache_key_is_stable_and_order_independent() {
        let a = cache_key_for_analyze("fab1", &req());
        let mut reordered = req();
        reordered.equipment_line_ids.reverse();
        reordered.process_codes.reverse();
        let b = cache_key_for_analyze("fab1", &reordered);
        assert_eq!(a, b);
    }

    #[test]
    fn cache_key_differs_by_facility() {
        let a = cache_key_for_analyze("fab1", &req());
        let b = cache_key_for_analyze("fab2", &req());
        assert_ne!(a, b);
    }

    #[test]
    fn cache_key_is_32_hex_chars() {
        let key = cache_key_for_analyze("fab1", &req());
        assert_eq!(key.len(), 32);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn batch_cache_key_is_order_independent_over_targets() {
        use crate::models::analyze::BatchTarget;

        let a = BatchAnalyzeRequest {
            defect_name: "bright-dot".to_string(),
            start_date: "2024-01-01".to_string(),
            end_date: "2024-01-31".to_string(),
            targets: vec![
                BatchTarget { equipment_id: "L1".to_string(), process_code: None },
                BatchTarget { equipment_id: "L2".to_string(), process_code: Some("P100".to_string()) },
            ],
        };
        let mut b = a.clone();
        b.targets.reverse();
        assert_eq!(cache_key_for_batch("fab1", &a), cache_key_for_batch("fab1", &b));
    }
}
