use chrono::Utc;
use teloxide::prelude::*;
use teloxide::types::{Message, MessageId, ParseMode};
use tracing::{error, info, warn};

use stratus_db::models::store::ReferredBy;

use crate::bot::commands::parse_command;
use crate::bot::handlers::GIFT_PROMPT;
use crate::bot::keyboards::{gift_plans_keyboard, main_menu, main_menu_text};
use crate::bot::utils::escape_html;
use crate::bot::WebhookOutcome;
use crate::AppState;

const BRANCH: &str = "message";

/// Ordinary-message branch: private chats only, three actionable commands.
pub async fn handle(state: &AppState, msg: Message) -> WebhookOutcome {
    if !msg.chat.is_private() {
        return WebhookOutcome::skipped(BRANCH, "non-private chat");
    }
    let Some(from) = msg.from.clone() else {
        return WebhookOutcome::skipped(BRANCH, "message without sender");
    };
    let tg_id = from.id.0 as i64;
    // A message relayed from another chat must not act on this chat's data.
    if tg_id != msg.chat.id.0 {
        return WebhookOutcome::skipped(BRANCH, "sender/chat mismatch");
    }

    if let (Some(text), Some(reply)) = (msg.text(), msg.reply_to_message()) {
        let from_us = reply.from.as_ref().map(|u| u.is_bot).unwrap_or(false);
        if from_us && reply.text() == Some(GIFT_PROMPT) {
            return gift_recipient_reply(state, &msg, tg_id, text).await;
        }
    }

    let parsed = parse_command(msg.text(), state.config.bot_username.as_deref());
    if parsed.suspicious {
        let reason = parsed.reason.unwrap_or("suspicious");
        warn!("Blocked suspicious command from {}: {}", tg_id, reason);
        return WebhookOutcome::skipped(BRANCH, format!("blocked suspicious command: {}", reason));
    }
    if parsed.addressed_to_other {
        return WebhookOutcome::skipped(BRANCH, "addressed to another bot");
    }
    let Some(command) = parsed.command.as_deref() else {
        return WebhookOutcome::skipped(BRANCH, "not a command");
    };

    match command {
        "/start" => {
            let referred_by = match parsed.argument.as_deref() {
                Some(arg) => resolve_referrer(state, arg, tg_id).await,
                None => None,
            };
            let username = from.username.as_deref();
            let (user, created) = match state.ledger.ensure(tg_id, username, referred_by).await {
                Ok(r) => r,
                Err(e) => {
                    error!("Failed to ensure user {}: {}", tg_id, e);
                    return WebhookOutcome::skipped(BRANCH, "ledger unavailable");
                }
            };

            let text = if created {
                info!("New user {} (trial until {:?})", tg_id, user.expires_at);
                format!(
                    "👋 <b>Welcome to Stratus VPN!</b>\n\n\
                     Your {}-day trial is active{}.\n\
                     Use the menu below to get started.",
                    state.config.trial_days,
                    user.expires_at
                        .map(|d| format!(" until <b>{}</b>", d.format("%Y-%m-%d")))
                        .unwrap_or_default()
                )
            } else {
                "👋 <b>Welcome back!</b>\n\nUse the menu below.".to_string()
            };
            send_menu(state, msg.chat.id, &text).await;
            WebhookOutcome::handled(BRANCH)
        }
        "/menu" => {
            send_menu(state, msg.chat.id, main_menu_text()).await;
            WebhookOutcome::handled(BRANCH)
        }
        "/clear" => {
            let ids = state.message_log.drain(msg.chat.id.0);
            let total = ids.len();
            let mut deleted = 0usize;
            for id in ids {
                // Best effort: old or already removed messages just fail.
                match state.bot.delete_message(msg.chat.id, MessageId(id)).await {
                    Ok(_) => deleted += 1,
                    Err(e) => warn!("Failed to delete message {} in {}: {}", id, msg.chat.id, e),
                }
            }
            info!("/clear swept {}/{} messages in {}", deleted, total, msg.chat.id);
            WebhookOutcome::handled(BRANCH)
        }
        other => WebhookOutcome::skipped(BRANCH, format!("unsupported command {}", other)),
    }
}

/// The referral argument is only honored when the referrer exists and is
/// not the sender.
async fn resolve_referrer(state: &AppState, arg: &str, sender_tg_id: i64) -> Option<ReferredBy> {
    let referrer_id: i64 = arg.strip_prefix("ref_")?.parse().ok()?;
    if referrer_id == sender_tg_id {
        return None;
    }
    match state.ledger.get(referrer_id).await {
        Ok(Some(referrer)) => Some(ReferredBy {
            tg_id: referrer.tg_id,
            nickname: referrer.username,
            referred_at: Utc::now().date_naive(),
        }),
        Ok(None) => None,
        Err(e) => {
            warn!("Referrer lookup failed for {}: {}", referrer_id, e);
            None
        }
    }
}

async fn gift_recipient_reply(
    state: &AppState,
    msg: &Message,
    giver_tg_id: i64,
    text: &str,
) -> WebhookOutcome {
    let name = text.trim().trim_start_matches('@');
    let valid = (5..=32).contains(&name.len())
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !valid {
        let _ = state
            .bot
            .send_message(msg.chat.id, "That doesn't look like a @username. Try again.")
            .await
            .map_err(|e| warn!("Failed to send gift-recipient retry prompt: {}", e));
        return WebhookOutcome::skipped(BRANCH, "invalid gift recipient username");
    }

    let recipient = match state.ledger.get_by_username(name).await {
        Ok(r) => r,
        Err(e) => {
            error!("Recipient lookup failed for @{}: {}", name, e);
            return WebhookOutcome::skipped(BRANCH, "ledger unavailable");
        }
    };
    let Some(recipient) = recipient else {
        let _ = state
            .bot
            .send_message(
                msg.chat.id,
                format!(
                    "❌ @{} hasn't started the bot yet, so the gift has nowhere to land.",
                    escape_html(name)
                ),
            )
            .parse_mode(ParseMode::Html)
            .await
            .map_err(|e| warn!("Failed to send recipient-not-found notice: {}", e));
        return WebhookOutcome::handled(BRANCH);
    };
    if recipient.tg_id == giver_tg_id {
        let _ = state
            .bot
            .send_message(msg.chat.id, "🙃 Gifting yourself? Just buy a subscription.")
            .await
            .map_err(|e| warn!("Failed to send self-gift notice: {}", e));
        return WebhookOutcome::handled(BRANCH);
    }

    let plans = match state.plans.all().await {
        Ok(p) => p,
        Err(e) => {
            error!("Plan catalog read failed: {}", e);
            return WebhookOutcome::skipped(BRANCH, "catalog unavailable");
        }
    };
    let sent = state
        .bot
        .send_message(
            msg.chat.id,
            format!("🎁 Choose a gift for @{}:", escape_html(name)),
        )
        .parse_mode(ParseMode::Html)
        .reply_markup(gift_plans_keyboard(&plans, recipient.tg_id))
        .await;
    match sent {
        Ok(m) => state.message_log.record(msg.chat.id.0, m.id.0),
        Err(e) => error!("Failed to send gift plan keyboard: {}", e),
    }
    WebhookOutcome::handled(BRANCH)
}

async fn send_menu(state: &AppState, chat_id: ChatId, text: &str) {
    let sent = state
        .bot
        .send_message(chat_id, text)
        .parse_mode(ParseMode::Html)
        .reply_markup(main_menu())
        .await;
    match sent {
        Ok(m) => state.message_log.record(chat_id.0, m.id.0),
        Err(e) => error!("Failed to send menu to {}: {}", chat_id, e),
    }
}
