use serde::Serialize;
use teloxide::types::{Update, UpdateKind};
use tracing::debug;

use crate::AppState;

pub mod callbacks;
pub mod commands;
pub mod handlers;
pub mod keyboards;
pub mod utils;

/// Per-update processing acknowledgement, serialized into the HTTP 200 body.
/// The platform retries raw webhooks on non-2xx, so business-level failures
/// are reported here rather than through the status code.
#[derive(Debug, Serialize, PartialEq)]
pub struct WebhookOutcome {
    pub processed: bool,
    pub branch: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl WebhookOutcome {
    pub fn handled(branch: &'static str) -> Self {
        Self {
            processed: true,
            branch,
            reason: None,
        }
    }

    pub fn skipped(branch: &'static str, reason: impl Into<String>) -> Self {
        Self {
            processed: false,
            branch,
            reason: Some(reason.into()),
        }
    }
}

/// Single entry point of the webhook state machine. Exactly one variant of
/// the update is populated; classification happens once, here, and the
/// branches below are mutually exclusive with first-match-wins priority.
pub async fn dispatch_update(state: &AppState, update: Update) -> WebhookOutcome {
    match update.kind {
        UpdateKind::PreCheckoutQuery(q) => handlers::payment::pre_checkout(state, q).await,
        UpdateKind::CallbackQuery(q) => handlers::callback::handle(state, q).await,
        UpdateKind::Message(msg) => {
            if msg.successful_payment().is_some() {
                handlers::payment::successful_payment(state, msg).await
            } else {
                handlers::message::handle(state, msg).await
            }
        }
        other => {
            debug!("Unsupported update kind: {:?}", other);
            WebhookOutcome::skipped("none", "unsupported update kind")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_serializes_without_empty_reason() {
        let body = serde_json::to_value(WebhookOutcome::handled("callback")).unwrap();
        assert_eq!(body["processed"], true);
        assert_eq!(body["branch"], "callback");
        assert!(body.get("reason").is_none());

        let body =
            serde_json::to_value(WebhookOutcome::skipped("message", "not a command")).unwrap();
        assert_eq!(body["processed"], false);
        assert_eq!(body["reason"], "not a command");
    }
}
