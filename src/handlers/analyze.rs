use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use std::time::Instant;

use crate::analyzer::batch::analyze_batch;
use crate::error::{AppError, AppResult};
use crate::jobs::coordinator::cache_key_for_batch;
use crate::jobs::stream::stream_ndjson;
use crate::models::analyze::{
    AnalyzeAcceptedResponse, AnalyzeRequest, BatchAnalyzeRequest, BatchAnalyzeResponse, PagedAnalysisResult,
    ResultsQuery,
};
use crate::models::job::JobStatus;
use crate::{resolve_facility, AppState, FacilityQuery};

/// `POST /api/analyze` — enqueue a single-target analysis, returning
/// immediately with the job's id (spec.md §4.7, §6).
pub async fn submit(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(facility_query): Query<FacilityQuery>,
    Json(req): Json<AnalyzeRequest>,
) -> AppResult<impl IntoResponse> {
    let facility = resolve_facility(&state, facility_query.facility_code.as_deref(), &headers)?;
    let job = state.jobs.submit(&facility, req).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(AnalyzeAcceptedResponse {
            job_id: job.job_id,
            status: job.status.as_str(),
        }),
    ))
}

/// `POST /api/analyze/batch` — synchronous multi-target comparison, cached
/// under the same fingerprint discipline as the single-target path
/// (spec.md §4.6, §6).
pub async fn batch(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(facility_query): Query<FacilityQuery>,
    Json(req): Json<BatchAnalyzeRequest>,
) -> AppResult<impl IntoResponse> {
    if req.targets.is_empty() {
        return Err(AppError::validation("targets must not be empty"));
    }
    let facility = resolve_facility(&state, facility_query.facility_code.as_deref(), &headers)?;
    let cache_key = cache_key_for_batch(&facility, &req);
    let started = Instant::now();

    if let Some(entry) = state
        .config_db
        .get_cache_entry(&cache_key)
        .map_err(|e| AppError::Internal(format!("reading batch cache entry: {e}")))?
    {
        let results = serde_json::from_str(&entry.result_json)
            .map_err(|e| AppError::Internal(format!("deserializing cached batch result: {e}")))?;
        return Ok(Json(BatchAnalyzeResponse {
            status: "ok",
            duration_ms: started.elapsed().as_millis() as u64,
            results,
            cache_key,
            cache_hit: true,
        }));
    }

    let conn = state.store.get(&facility)?;
    let results = analyze_batch(conn, req).await?;

    let cache_ttl_secs = state.analysis_config.read().unwrap().cache_ttl_secs;
    if let Ok(json) = serde_json::to_string(&results) {
        if let Err(e) = state.config_db.put_cache_entry(&cache_key, &facility, &json, cache_ttl_secs) {
            tracing::warn!("caching batch analysis result: {e}");
        }
    }

    Ok(Json(BatchAnalyzeResponse {
        status: "ok",
        duration_ms: started.elapsed().as_millis() as u64,
        results,
        cache_key,
        cache_hit: false,
    }))
}

/// `POST /api/analyze/stream` — the same batch request, streamed back as
/// NDJSON, one line per target as it completes (spec.md §4.7, §5, §6).
pub async fn stream(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(facility_query): Query<FacilityQuery>,
    Json(req): Json<BatchAnalyzeRequest>,
) -> AppResult<impl IntoResponse> {
    if req.targets.is_empty() {
        return Err(AppError::validation("targets must not be empty"));
    }
    let facility = resolve_facility(&state, facility_query.facility_code.as_deref(), &headers)?;
    let conn = state.store.get(&facility)?;
    let body_stream = stream_ndjson(conn, state.heatmap_config.clone(), req);

    let body = Body::from_stream(body_stream);
    let response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/x-ndjson")
        .header(header::CACHE_CONTROL, "no-cache")
        .header(header::CONNECTION, "keep-alive")
        .body(body)
        .map_err(|e| AppError::Internal(format!("building stream response: {e}")))?;
    Ok(response)
}

/// `GET /api/analyze/{id}/status` — current job record, 404 if unknown
/// (spec.md §6).
pub async fn status(State(state): State<AppState>, Path(job_id): Path<String>) -> AppResult<impl IntoResponse> {
    let job = state.jobs.status(&job_id)?;
    Ok(Json(job))
}

/// `GET /api/analyze/{id}/results` — paginated glass results plus the
/// other three result sets in full; 409 unless the job is completed
/// (spec.md §6).
pub async fn results(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
    Query(query): Query<ResultsQuery>,
) -> AppResult<impl IntoResponse> {
    let (job_status, result_json) = state.jobs.result_json(&job_id)?;
    if job_status != JobStatus::Completed {
        return Err(AppError::conflict(format!(
            "job {job_id} is {} (not completed)",
            job_status.as_str()
        )));
    }
    let result_json =
        result_json.ok_or_else(|| AppError::Internal(format!("completed job {job_id} has no result")))?;
    let result: crate::models::analyze::AnalysisResult = serde_json::from_str(&result_json)
        .map_err(|e| AppError::Internal(format!("deserializing job result: {e}")))?;

    let glass_total = result.glass.len();
    let glass = result
        .glass
        .into_iter()
        .skip(query.offset)
        .take(query.limit)
        .collect();

    Ok(Json(PagedAnalysisResult {
        glass,
        glass_total,
        lot: result.lot,
        daily: result.daily,
        heatmap: result.heatmap,
        metrics: result.metrics,
    }))
}
