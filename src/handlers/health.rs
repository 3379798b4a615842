use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use crate::AppState;

/// `GET /health` — liveness plus a ping of both stores (spec.md §6). A
/// facility ping failure still returns 200: liveness means the process is
/// up, not that every facility's lake is currently reachable.
pub async fn healthz(State(state): State<AppState>) -> impl IntoResponse {
    let operational_ok = state.config_db.ping().is_ok();

    let lake_ok = match state.store.known_facilities() {
        Ok(facilities) => facilities
            .first()
            .map(|f| state.store.ping(f).is_ok())
            .unwrap_or(true),
        Err(_) => false,
    };

    Json(json!({
        "status": "healthy",
        "operational_store": operational_ok,
        "analytical_store": lake_ok,
    }))
}
