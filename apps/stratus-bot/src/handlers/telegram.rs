use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use teloxide::types::Update;
use tracing::{debug, warn};

use crate::bot::{dispatch_update, keyboards};
use crate::AppState;

/// Secret check shared by both methods on `/api/telegram/menu`. Telegram
/// itself sends `x-telegram-bot-api-secret-token`; internal callers use
/// `x-telegram-secret`. A missing server-side secret is a deployment error,
/// not an auth failure.
fn check_secret(state: &AppState, headers: &HeaderMap) -> Result<(), (StatusCode, Json<serde_json::Value>)> {
    let Some(expected) = state.config.webhook_secret.as_deref() else {
        return Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "ok": false, "error": "webhook secret is not configured" })),
        ));
    };
    let provided = headers
        .get("x-telegram-secret")
        .or_else(|| headers.get("x-telegram-bot-api-secret-token"))
        .and_then(|v| v.to_str().ok());
    if provided != Some(expected) {
        warn!("Webhook request with missing or wrong secret");
        return Err((
            StatusCode::UNAUTHORIZED,
            Json(json!({ "ok": false, "error": "unauthorized" })),
        ));
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
pub struct MenuQuery {
    #[serde(default)]
    pub status: Option<String>,
}

pub async fn menu_preview(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<MenuQuery>,
) -> impl IntoResponse {
    if let Err(resp) = check_secret(&state, &headers) {
        return resp.into_response();
    }
    let status = query.status.as_deref().unwrap_or("unknown");
    Json(keyboards::menu_payload(status)).into_response()
}

/// Webhook entry point. Telegram retries deliveries on non-2xx, so once the
/// secret checks out every body is answered with 200 and a processing
/// report, even one that does not deserialize as an `Update`.
pub async fn webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> impl IntoResponse {
    if let Err(resp) = check_secret(&state, &headers) {
        return resp.into_response();
    }

    let update: Update = match serde_json::from_value(body) {
        Ok(update) => update,
        Err(e) => {
            debug!("Webhook body is not a Telegram update: {}", e);
            return Json(json!({
                "ok": true,
                "processed": false,
                "branch": "none",
                "reason": "body is not a Telegram update",
            }))
            .into_response();
        }
    };

    let outcome = dispatch_update(&state, update).await;
    let mut body = json!({
        "ok": true,
        "processed": outcome.processed,
        "branch": outcome.branch,
    });
    if let Some(reason) = outcome.reason {
        body["reason"] = json!(reason);
    }
    Json(body).into_response()
}
