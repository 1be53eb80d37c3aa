//! `GET /api/health` — a trivial `SELECT 1` against the Store.

use axum::extract::Extension;
use axum::Json;
use serde::Serialize;

use crate::server::app::AppState;
use crate::time::now_rfc3339_millis;

#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
    db: &'static str,
    server_time_utc: String,
}

pub async fn health_handler(Extension(state): Extension<AppState>) -> Json<HealthResponse> {
    let db = if state.store.ping().await.is_ok() {
        "ok"
    } else {
        "fail"
    };
    let status = if db == "ok" { "ok" } else { "degraded" };

    Json(HealthResponse {
        status,
        db,
        server_time_utc: now_rfc3339_millis(),
    })
}
