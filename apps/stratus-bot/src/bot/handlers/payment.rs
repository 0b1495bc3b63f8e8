use chrono::Utc;
use teloxide::prelude::*;
use teloxide::types::{Message, ParseMode, PreCheckoutQuery, SuccessfulPayment};
use tracing::{error, info, warn};

use stratus_db::models::payment::{InvoicePayload, PayloadAction};
use stratus_db::models::plan::Plan;
use stratus_db::models::store::ReferredBy;

use crate::bot::keyboards::main_menu;
use crate::bot::utils::escape_html;
use crate::bot::WebhookOutcome;
use crate::AppState;

/// Pre-checkout gate. The payload is decoded and re-validated against the
/// live catalog; the amount embedded in the invoice is never trusted on its
/// own. A rejected check surfaces the reason to the payer.
pub async fn pre_checkout(state: &AppState, q: PreCheckoutQuery) -> WebhookOutcome {
    const BRANCH: &str = "pre_checkout";
    let payer_tg_id = q.from.id.0 as i64;

    if q.currency != "XTR" {
        return reject(state, q, BRANCH, "Unsupported payment currency.").await;
    }
    let Some(payload) = InvoicePayload::decode(&q.invoice_payload) else {
        warn!("Undecodable invoice payload from {}", payer_tg_id);
        return reject(state, q, BRANCH, "This invoice is malformed. Start over from the menu.")
            .await;
    };
    let plan = match state.plans.by_months(payload.months).await {
        Ok(Some(plan)) => plan,
        Ok(None) => {
            return reject(state, q, BRANCH, "This plan is no longer available.").await;
        }
        Err(e) => {
            error!("Plan catalog read failed at pre-checkout: {}", e);
            return reject(state, q, BRANCH, "Temporary failure, try again in a minute.").await;
        }
    };
    if let Some(reason) = payload_mismatch(&payload, payer_tg_id, &plan, q.total_amount as i64) {
        warn!(
            "Pre-checkout mismatch from {}: {} (payload {:?})",
            payer_tg_id, reason, payload
        );
        return reject(state, q, BRANCH, "This invoice is stale. Start over from the menu.").await;
    }

    if let Err(e) = state.bot.answer_pre_checkout_query(q.id, true).await {
        error!("Failed to confirm pre-checkout for {}: {}", payer_tg_id, e);
        return WebhookOutcome::skipped(BRANCH, "pre-checkout answer failed");
    }
    WebhookOutcome::handled(BRANCH)
}

async fn reject(
    state: &AppState,
    q: PreCheckoutQuery,
    branch: &'static str,
    message: &str,
) -> WebhookOutcome {
    let _ = state
        .bot
        .answer_pre_checkout_query(q.id, false)
        .error_message(message)
        .await
        .map_err(|e| error!("Failed to reject pre-checkout: {}", e));
    WebhookOutcome::skipped(branch, message.to_string())
}

/// Confirmed-payment branch. Validation is repeated in full because the
/// platform redelivers webhooks and the pre-checkout answer carries no
/// state; the charge id claim makes the money-moving part run once.
pub async fn successful_payment(state: &AppState, msg: Message) -> WebhookOutcome {
    const BRANCH: &str = "payment";
    let Some(payment) = msg.successful_payment() else {
        return WebhookOutcome::skipped(BRANCH, "no payment attached");
    };
    let Some(from) = msg.from.clone() else {
        return WebhookOutcome::skipped(BRANCH, "payment without sender");
    };
    let payer_tg_id = from.id.0 as i64;
    let username = from.username.as_deref();

    if payment.currency != "XTR" {
        error!(
            "Confirmed payment in unexpected currency {:?} from {}",
            payment.currency, payer_tg_id
        );
        return WebhookOutcome::skipped(BRANCH, "unsupported currency");
    }
    let Some(payload) = InvoicePayload::decode(&payment.invoice_payload) else {
        error!("Undecodable payload on confirmed payment from {}", payer_tg_id);
        return WebhookOutcome::skipped(BRANCH, "undecodable payload");
    };
    let plan = match state.plans.by_months(payload.months).await {
        Ok(Some(plan)) => plan,
        Ok(None) => {
            error!("Confirmed payment for unknown plan: {:?}", payload);
            return support_fallback(state, &msg, BRANCH, "plan not in catalog").await;
        }
        Err(e) => {
            error!("Plan catalog read failed on confirmed payment: {}", e);
            return support_fallback(state, &msg, BRANCH, "catalog unavailable").await;
        }
    };
    if let Some(reason) =
        payload_mismatch(&payload, payer_tg_id, &plan, payment.total_amount as i64)
    {
        error!(
            "Confirmed payment failed validation from {}: {} (payload {:?})",
            payer_tg_id, reason, payload
        );
        return support_fallback(state, &msg, BRANCH, reason).await;
    }

    let claimed = match state
        .payments
        .claim_charge(
            &payment.telegram_payment_charge_id.0,
            payer_tg_id,
            payment.total_amount as i64,
        )
        .await
    {
        Ok(claimed) => claimed,
        Err(e) => {
            error!("Charge claim failed for {}: {}", payer_tg_id, e);
            return support_fallback(state, &msg, BRANCH, "charge claim failed").await;
        }
    };
    if !claimed {
        info!(
            "Duplicate delivery of charge {} ignored",
            payment.telegram_payment_charge_id
        );
        return WebhookOutcome::handled(BRANCH);
    }

    info!(
        "Confirmed payment: {} XTR from {} ({:?}, {} months)",
        payment.total_amount, payer_tg_id, payload.action, payload.months
    );

    match payload.action {
        PayloadAction::Subscription => {
            match state
                .ledger
                .activate_subscription(payer_tg_id, username, payload.months)
                .await
            {
                Ok(user) => {
                    let expiry = user
                        .expires_at
                        .map(|d| d.format("%Y-%m-%d").to_string())
                        .unwrap_or_else(|| "—".to_string());
                    let _ = state
                        .bot
                        .send_message(
                            msg.chat.id,
                            format!(
                                "✅ <b>Payment received!</b>\n\nSubscription active until <b>{}</b>.",
                                expiry
                            ),
                        )
                        .parse_mode(ParseMode::Html)
                        .reply_markup(main_menu())
                        .await
                        .map_err(|e| error!("Failed to confirm subscription payment: {}", e));
                }
                Err(e) => {
                    error!("Activation failed after claimed charge {}: {}", payer_tg_id, e);
                    return support_fallback(state, &msg, BRANCH, "activation failed").await;
                }
            }
        }
        PayloadAction::Gift => {
            // Validated as Some by payload_mismatch.
            let Some(recipient_tg_id) = payload.recipient_tg_id else {
                return support_fallback(state, &msg, BRANCH, "gift without recipient").await;
            };
            let giver_name = from
                .username
                .as_deref()
                .map(|u| format!("@{}", u))
                .unwrap_or_else(|| from.first_name.clone());
            let referred_by = ReferredBy {
                tg_id: payer_tg_id,
                nickname: from.username.clone(),
                referred_at: Utc::now().date_naive(),
            };
            match state
                .ledger
                .add_gift(
                    recipient_tg_id,
                    None,
                    payer_tg_id,
                    &giver_name,
                    payload.months,
                    Some(referred_by),
                )
                .await
            {
                Ok(_) => {
                    let _ = state
                        .bot
                        .send_message(
                            msg.chat.id,
                            format!(
                                "✅ <b>Gift sent!</b>\n\n{} months are waiting in the recipient's gift list.",
                                payload.months
                            ),
                        )
                        .parse_mode(ParseMode::Html)
                        .reply_markup(main_menu())
                        .await
                        .map_err(|e| error!("Failed to confirm gift payment: {}", e));
                    let _ = state
                        .bot
                        .send_message(
                            ChatId(recipient_tg_id),
                            format!(
                                "🎁 {} sent you <b>{} months</b> of Stratus VPN! Open «Gifts» in the menu to activate.",
                                escape_html(&giver_name),
                                payload.months
                            ),
                        )
                        .parse_mode(ParseMode::Html)
                        .await
                        .map_err(|e| warn!("Failed to notify gift recipient {}: {}", recipient_tg_id, e));
                }
                Err(e) => {
                    error!("Gift grant failed after claimed charge {}: {}", payer_tg_id, e);
                    return support_fallback(state, &msg, BRANCH, "gift grant failed").await;
                }
            }
        }
    }

    reward_referrer(state, payer_tg_id, username, &plan, payment).await;
    WebhookOutcome::handled(BRANCH)
}

/// Referral credit is strictly best-effort: the paid subscription or gift is
/// already granted, so a failure here is logged and never surfaced as a
/// payment error.
async fn reward_referrer(
    state: &AppState,
    payer_tg_id: i64,
    payer_username: Option<&str>,
    plan: &Plan,
    payment: &SuccessfulPayment,
) {
    match state
        .ledger
        .apply_referral_reward(payer_tg_id, payer_username, plan.price_usd_cents)
        .await
    {
        Ok(Some(reward)) => {
            info!(
                "Referral reward: {} cents ({}%) to {} after charge {}",
                reward.reward_cents, reward.percent, reward.referrer_tg_id,
                payment.telegram_payment_charge_id
            );
            let _ = state
                .bot
                .send_message(
                    ChatId(reward.referrer_tg_id),
                    format!(
                        "💰 Your referral made a purchase — <b>${}.{:02}</b> credited to your balance.",
                        reward.reward_cents / 100,
                        reward.reward_cents.rem_euclid(100)
                    ),
                )
                .parse_mode(ParseMode::Html)
                .await
                .map_err(|e| warn!("Failed to notify referrer {}: {}", reward.referrer_tg_id, e));
        }
        Ok(None) => {}
        Err(e) => error!("Referral reward failed for payer {}: {}", payer_tg_id, e),
    }
}

async fn support_fallback(
    state: &AppState,
    msg: &Message,
    branch: &'static str,
    reason: &str,
) -> WebhookOutcome {
    let _ = state
        .bot
        .send_message(
            msg.chat.id,
            "❌ Error processing payment. Please contact support.",
        )
        .await
        .map_err(|e| error!("Failed to send payment fallback notice: {}", e));
    WebhookOutcome::skipped(branch, reason.to_string())
}

/// Shared invariant check for both payment phases. `None` means the payload
/// agrees with the live catalog and the payer's identity.
fn payload_mismatch(
    payload: &InvoicePayload,
    payer_tg_id: i64,
    plan: &Plan,
    total_amount: i64,
) -> Option<&'static str> {
    if payload.tg_id != payer_tg_id {
        return Some("payer does not match payload");
    }
    if total_amount != plan.price_stars {
        return Some("amount does not match catalog price");
    }
    match payload.action {
        PayloadAction::Subscription if payload.recipient_tg_id.is_some() => {
            Some("subscription payload carries a recipient")
        }
        PayloadAction::Gift if payload.recipient_tg_id.is_none() => {
            Some("gift payload without recipient")
        }
        PayloadAction::Gift if payload.recipient_tg_id == Some(payer_tg_id) => {
            Some("gift addressed to the payer")
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan(months: i32, stars: i64) -> Plan {
        Plan {
            id: months as i64,
            months,
            price_stars: stars,
            price_usd_cents: stars * 2,
            price_local_cents: stars * 180,
        }
    }

    #[test]
    fn valid_subscription_payload_passes() {
        let payload = InvoicePayload::subscription(42, 3);
        assert_eq!(payload_mismatch(&payload, 42, &plan(3, 650), 650), None);
    }

    #[test]
    fn valid_gift_payload_passes() {
        let payload = InvoicePayload::gift(42, 77, 6);
        assert_eq!(payload_mismatch(&payload, 42, &plan(6, 1200), 1200), None);
    }

    #[test]
    fn payer_mismatch_is_rejected() {
        let payload = InvoicePayload::subscription(42, 3);
        assert!(payload_mismatch(&payload, 43, &plan(3, 650), 650).is_some());
    }

    #[test]
    fn tampered_amount_is_rejected() {
        let payload = InvoicePayload::subscription(42, 3);
        assert!(payload_mismatch(&payload, 42, &plan(3, 650), 1).is_some());
    }

    #[test]
    fn gift_without_recipient_is_rejected() {
        let mut payload = InvoicePayload::gift(42, 77, 6);
        payload.recipient_tg_id = None;
        assert!(payload_mismatch(&payload, 42, &plan(6, 1200), 1200).is_some());
    }

    #[test]
    fn self_gift_is_rejected() {
        let payload = InvoicePayload::gift(42, 42, 6);
        assert!(payload_mismatch(&payload, 42, &plan(6, 1200), 1200).is_some());
    }
}
