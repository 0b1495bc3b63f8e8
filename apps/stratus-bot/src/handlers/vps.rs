use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;
use tracing::{error, warn};

use crate::AppState;

fn check_admin(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<(), (StatusCode, Json<serde_json::Value>)> {
    let Some(expected) = state.config.admin_secret.as_deref() else {
        return Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "ok": false, "error": "admin secret is not configured" })),
        ));
    };
    let provided = headers.get("x-admin-secret").and_then(|v| v.to_str().ok());
    if provided != Some(expected) {
        warn!("Admin request with missing or wrong secret");
        return Err((
            StatusCode::UNAUTHORIZED,
            Json(json!({ "ok": false, "error": "unauthorized" })),
        ));
    }
    Ok(())
}

pub async fn ssh_test(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    if let Err(resp) = check_admin(&state, &headers) {
        return resp.into_response();
    }
    match state.vps_service.test_ssh().await {
        Ok(probe) => Json(json!({
            "ok": true,
            "host": probe.host,
            "output": probe.output,
        }))
        .into_response(),
        Err(e) => {
            error!("SSH probe failed: {:#}", e);
            (
                StatusCode::BAD_GATEWAY,
                Json(json!({ "ok": false, "error": e.to_string() })),
            )
                .into_response()
        }
    }
}

pub async fn sync(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    if let Err(resp) = check_admin(&state, &headers) {
        return resp.into_response();
    }
    match state.vps_service.sync_all().await {
        Ok(report) => Json(json!({
            "ok": true,
            "synced": report.synced,
            "failed": report.failed,
        }))
        .into_response(),
        Err(e) => {
            error!("VPS sync failed: {:#}", e);
            (
                StatusCode::BAD_GATEWAY,
                Json(json!({ "ok": false, "error": e.to_string() })),
            )
                .into_response()
        }
    }
}
