use axum::body::Bytes;
use duckdb::Connection;
use std::sync::{Arc, Mutex};
use tokio_stream::wrappers::ReceiverStream;

use crate::analyzer::single;
use crate::config::HeatmapConfig;
use crate::models::analyze::{AnalyzeRequest, BatchAnalyzeRequest, StreamLine};

/// NDJSON streaming for `POST /api/analyze/stream` (spec.md §6, §7
/// "Partial"): one task per target, each writing its line to the shared
/// channel as soon as it completes, so a caller sees results as they
/// finish rather than waiting on the slowest target. A failure on one
/// target becomes an `error` line, never aborts the others — the bounded
/// channel gives backpressure the same way `usage_tracker.rs`'s writer
/// loop does, just per-request instead of process-global.
pub fn stream_ndjson(
    conn: Arc<Mutex<Connection>>,
    heatmap_config: Arc<HeatmapConfig>,
    req: BatchAnalyzeRequest,
) -> ReceiverStream<Result<Bytes, std::io::Error>> {
    let (tx, rx) = tokio::sync::mpsc::channel(16);

    tokio::spawn(async move {
        let mut handles = Vec::new();
        for target in req.targets {
            let conn = conn.clone();
            let heatmap_config = heatmap_config.clone();
            let tx = tx.clone();
            let analyze_req = AnalyzeRequest {
                defect_name: req.defect_name.clone(),
                start_date: req.start_date.clone(),
                end_date: req.end_date.clone(),
                process_codes: target.process_code.clone().into_iter().collect(),
                equipment_line_ids: vec![target.equipment_id.clone()],
                model_codes: Vec::new(),
            };
            let equipment_id = target.equipment_id.clone();

            handles.push(tokio::spawn(async move {
                let outcome = tokio::task::spawn_blocking(move || single::analyze(&conn, &analyze_req, &heatmap_config)).await;
                let line = match outcome {
                    Ok(Ok(result)) => StreamLine {
                        equipment_id,
                        result: Some(result),
                        error: None,
                    },
                    Ok(Err(e)) => StreamLine {
                        equipment_id,
                        result: None,
                        error: Some(e.to_string()),
                    },
                    Err(e) => StreamLine {
                        equipment_id,
                        result: None,
                        error: Some(format!("analysis task panicked: {e}")),
                    },
                };
                let mut bytes = serde_json::to_vec(&line).unwrap_or_default();
                bytes.push(b'\n');
                let _ = tx.send(Ok(Bytes::from(bytes))).await;
            }));
        }
        for handle in handles {
            let _ = handle.await;
        }
    });

    ReceiverStream::new(rx)
}
