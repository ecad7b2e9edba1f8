pub mod orders;
pub mod reports;
pub mod webhooks;

use axum::{routing::get, Json, Router};

use crate::db::AppState;

/// Liveness probe.
async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

pub fn health_router() -> Router<AppState> {
    Router::new().route("/health", get(health))
}
