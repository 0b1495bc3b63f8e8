use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

pub mod telegram;
pub mod vps;

pub async fn health() -> impl IntoResponse {
    Json(json!({ "ok": true, "service": "stratus-bot" }))
}
