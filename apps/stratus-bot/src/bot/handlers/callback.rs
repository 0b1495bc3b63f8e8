use chrono::{NaiveDate, Utc};
use teloxide::prelude::*;
use teloxide::types::{
    CallbackQuery, ChatId, ForceReply, InlineKeyboardButton, InlineKeyboardMarkup, InputFile,
    LabeledPrice, MessageId, ParseMode,
};
use tracing::{error, warn};
use url::Url;

use stratus_db::models::payment::InvoicePayload;
use stratus_db::models::plan::Plan;
use stratus_db::models::store::User;
use stratus_db::repositories::LedgerError;

use crate::bot::callbacks::{CallbackAction, HowToPlatform, MenuSection, PayMethod};
use crate::bot::handlers::GIFT_PROMPT;
use crate::bot::keyboards::{
    back_row, balance_plans_keyboard, countries_keyboard, gift_view_keyboard, gifts_keyboard,
    howto_keyboard, main_menu, main_menu_text, method_keyboard, referral_confirm_keyboard,
    referral_plans_keyboard, servers_keyboard, stars_plans_keyboard,
};
use crate::bot::utils::escape_html;
use crate::bot::WebhookOutcome;
use crate::AppState;

const BRANCH: &str = "callback";

/// Inline-button branch. A press arriving from a chat other than the
/// presser's own is acknowledged silently and dropped; everything else is
/// acknowledged exactly once, up front, before any store write. Results
/// reach the user through message edits, never through the ack.
pub async fn handle(state: &AppState, q: CallbackQuery) -> WebhookOutcome {
    let callback_id = q.id.clone();
    let tg_id = q.from.id.0 as i64;
    let username = q.from.username.clone();

    let chat_id = q
        .message
        .as_ref()
        .map(|m| m.chat().id)
        .unwrap_or(ChatId(tg_id));
    let msg_id = q.message.as_ref().map(|m| m.id());

    if chat_id.0 != tg_id {
        let _ = state.bot.answer_callback_query(callback_id).await;
        return WebhookOutcome::skipped(BRANCH, "press from a foreign chat");
    }

    let Some(data) = q.data else {
        let _ = state.bot.answer_callback_query(callback_id).await;
        return WebhookOutcome::skipped(BRANCH, "callback without data");
    };
    let Some(action) = CallbackAction::parse(&data) else {
        let _ = state.bot.answer_callback_query(callback_id).await;
        warn!("Undecodable callback {:?} from {}", data, tg_id);
        return WebhookOutcome::skipped(BRANCH, "undecodable callback data");
    };

    // Ack before any store write. A slow or failing mutation below must not
    // leave the button spinner hanging.
    let _ = state
        .bot
        .answer_callback_query(callback_id)
        .await
        .map_err(|e| warn!("Failed to answer callback from {}: {}", tg_id, e));

    let user = match state.ledger.ensure(tg_id, username.as_deref(), None).await {
        Ok((user, _)) => user,
        Err(e) => {
            error!("Failed to ensure user {}: {}", tg_id, e);
            send_plain(state, chat_id, "⚠️ Temporary failure, try again.").await;
            return WebhookOutcome::skipped(BRANCH, "ledger unavailable");
        }
    };
    let today = Utc::now().date_naive();

    match action {
        CallbackAction::Menu(MenuSection::Main) => {
            show(state, chat_id, msg_id, main_menu_text().to_string(), main_menu()).await;
        }
        CallbackAction::Menu(MenuSection::Subscription) | CallbackAction::BuyOpen => {
            let text = format!(
                "🛡 <b>Subscription</b>\n\n{}\n💰 Referral balance: {}\n\nChoose a payment method:",
                status_line(&user, today),
                usd(user.balance_cents)
            );
            show(state, chat_id, msg_id, text, method_keyboard()).await;
        }
        CallbackAction::BuyMethod(PayMethod::Stars) => {
            let plans = match state.plans.all().await {
                Ok(p) => p,
                Err(e) => return catalog_failure(state, chat_id, e).await,
            };
            let mut text = "⭐ <b>Pay with Telegram Stars</b>\n\nPick a duration:".to_string();
            if let Some(note) = promo_note(state, &user).await {
                text.push_str("\n\n");
                text.push_str(&note);
            }
            show(state, chat_id, msg_id, text, stars_plans_keyboard(&plans)).await;
        }
        CallbackAction::BuyMethod(PayMethod::Balance) => {
            let plans = match state.plans.all().await {
                Ok(p) => p,
                Err(e) => return catalog_failure(state, chat_id, e).await,
            };
            let text = format!(
                "💰 <b>Pay from referral balance</b>\n\nYou have {}. Pick a duration:",
                usd(user.balance_cents)
            );
            show(state, chat_id, msg_id, text, balance_plans_keyboard(&plans)).await;
        }
        CallbackAction::BuyPlan { months } => {
            let Some(plan) = lookup_plan(state, chat_id, months).await else {
                return WebhookOutcome::skipped(BRANCH, "plan not in catalog");
            };
            if let Some(id) = msg_id {
                let _ = state.bot.delete_message(chat_id, id).await;
            }
            let payload = InvoicePayload::subscription(tg_id, months);
            let prices = vec![LabeledPrice {
                label: format!("{} months", months),
                amount: plan.price_stars as u32,
            }];
            let _ = state
                .bot
                .send_invoice(
                    chat_id,
                    "Stratus VPN subscription",
                    format!("{} months of Stratus VPN access", months),
                    payload.encode(),
                    "XTR",
                    prices,
                )
                .await
                .map_err(|e| error!("Failed to send subscription invoice to {}: {}", tg_id, e));
        }
        CallbackAction::BuyFromBalance { months } | CallbackAction::ReferralApply { months } => {
            let Some(plan) = lookup_plan(state, chat_id, months).await else {
                return WebhookOutcome::skipped(BRANCH, "plan not in catalog");
            };
            match state
                .ledger
                .activate_from_balance(tg_id, username.as_deref(), months, plan.price_usd_cents)
                .await
            {
                Ok(updated) => {
                    let text = format!(
                        "✅ <b>Subscription prolonged</b>\n\n{}\n💰 Balance left: {}",
                        status_line(&updated, today),
                        usd(updated.balance_cents)
                    );
                    show(state, chat_id, msg_id, text, back_markup()).await;
                }
                Err(LedgerError::InsufficientBalance) => {
                    let text = insufficient_balance_text(&plan, user.balance_cents);
                    show(state, chat_id, msg_id, text, back_markup()).await;
                }
                Err(e) => {
                    error!("Balance prolongation failed for {}: {}", tg_id, e);
                    send_plain(state, chat_id, "⚠️ Temporary failure, try again.").await;
                    return WebhookOutcome::skipped(BRANCH, "ledger unavailable");
                }
            }
        }
        CallbackAction::Menu(MenuSection::Faq) | CallbackAction::FaqOpen => {
            show(state, chat_id, msg_id, faq_text().to_string(), back_markup()).await;
        }
        CallbackAction::Menu(MenuSection::Referral) | CallbackAction::ReferralOpen => {
            let plans = match state.plans.all().await {
                Ok(p) => p,
                Err(e) => return catalog_failure(state, chat_id, e).await,
            };
            let link = state
                .config
                .bot_username
                .as_deref()
                .map(|name| format!("https://t.me/{}?start=ref_{}", name, tg_id))
                .unwrap_or_else(|| format!("ref_{}", tg_id));
            let text = format!(
                "🤝 <b>Referral program</b>\n\n\
                 Share your link:\n<code>{}</code>\n\n\
                 You earn <b>20%</b> of a referral's first purchase and <b>10%</b> of every \
                 purchase after that, credited to your balance.\n\n\
                 👥 Invited: {}\n💰 Balance: {}\n\n\
                 Spend the balance on prolongation:",
                escape_html(&link),
                user.referral_count,
                usd(user.balance_cents)
            );
            show(state, chat_id, msg_id, text, referral_plans_keyboard(&plans)).await;
        }
        CallbackAction::ReferralPlan { months } => {
            let Some(plan) = lookup_plan(state, chat_id, months).await else {
                return WebhookOutcome::skipped(BRANCH, "plan not in catalog");
            };
            let text = format!(
                "💰 Prolong by <b>{} months</b> for <b>{}</b> from your balance?\n\n\
                 Balance: {}",
                months,
                plan.usd_display(),
                usd(user.balance_cents)
            );
            show(state, chat_id, msg_id, text, referral_confirm_keyboard(months)).await;
        }
        CallbackAction::Menu(MenuSection::Gifts) | CallbackAction::GiftList => {
            show_gift_list(state, chat_id, msg_id, &user, None).await;
        }
        CallbackAction::GiftView { index } => {
            match user.gifts.get(index) {
                Some(gift) => {
                    let text = format!(
                        "🎁 <b>{} months</b> from {}\nGranted on {}",
                        gift.months,
                        escape_html(&gift.giver_name),
                        gift.granted_at.format("%Y-%m-%d")
                    );
                    show(state, chat_id, msg_id, text, gift_view_keyboard(index)).await;
                }
                None => {
                    show_gift_list(state, chat_id, msg_id, &user, Some(STALE_GIFT_NOTE)).await;
                }
            }
        }
        CallbackAction::GiftActivate { index } => {
            match state
                .ledger
                .activate_gift(tg_id, username.as_deref(), index)
                .await
            {
                Ok((gift, updated)) => {
                    let text = format!(
                        "✅ Gift from {} activated: <b>+{} months</b>.\n\n{}",
                        escape_html(&gift.giver_name),
                        gift.months,
                        status_line(&updated, today)
                    );
                    show(state, chat_id, msg_id, text, back_markup()).await;
                }
                Err(LedgerError::GiftNotFound) => {
                    // The list changed under this press; re-read and redraw.
                    let fresh = match state.ledger.get(tg_id).await {
                        Ok(Some(fresh)) => fresh,
                        _ => user,
                    };
                    show_gift_list(state, chat_id, msg_id, &fresh, Some(STALE_GIFT_NOTE)).await;
                }
                Err(e) => {
                    error!("Gift activation failed for {}: {}", tg_id, e);
                    send_plain(state, chat_id, "⚠️ Temporary failure, try again.").await;
                    return WebhookOutcome::skipped(BRANCH, "ledger unavailable");
                }
            }
        }
        CallbackAction::GiftSend => {
            let _ = state
                .bot
                .send_message(chat_id, GIFT_PROMPT)
                .reply_markup(ForceReply::new().selective())
                .await
                .map_err(|e| error!("Failed to send gift prompt to {}: {}", tg_id, e));
        }
        CallbackAction::GiftBuy {
            months,
            recipient_tg_id,
        } => {
            let Some(plan) = lookup_plan(state, chat_id, months).await else {
                return WebhookOutcome::skipped(BRANCH, "plan not in catalog");
            };
            if let Some(id) = msg_id {
                let _ = state.bot.delete_message(chat_id, id).await;
            }
            let payload = InvoicePayload::gift(tg_id, recipient_tg_id, months);
            let prices = vec![LabeledPrice {
                label: format!("Gift: {} months", months),
                amount: plan.price_stars as u32,
            }];
            let _ = state
                .bot
                .send_invoice(
                    chat_id,
                    "Stratus VPN gift",
                    format!("Gift {} months of Stratus VPN access", months),
                    payload.encode(),
                    "XTR",
                    prices,
                )
                .await
                .map_err(|e| error!("Failed to send gift invoice to {}: {}", tg_id, e));
        }
        CallbackAction::Menu(MenuSection::Vps) | CallbackAction::VpsCountries => {
            if !user.has_active_access(today) {
                return require_subscription(state, chat_id).await;
            }
            let countries = match state.vps.countries().await {
                Ok(c) => c,
                Err(e) => return catalog_failure(state, chat_id, e).await,
            };
            let text = if countries.is_empty() {
                "🌍 No servers are available right now.".to_string()
            } else {
                "🌍 <b>Servers</b>\n\nChoose a country:".to_string()
            };
            show(state, chat_id, msg_id, text, countries_keyboard(&countries)).await;
        }
        CallbackAction::VpsCountry { country_key } => {
            if !user.has_active_access(today) {
                return require_subscription(state, chat_id).await;
            }
            let servers = match state.vps.by_country(&country_key).await {
                Ok(s) => s,
                Err(e) => return catalog_failure(state, chat_id, e).await,
            };
            let text = if servers.is_empty() {
                "🌍 No servers in this country right now.".to_string()
            } else {
                "🖥 Choose a server:".to_string()
            };
            show(state, chat_id, msg_id, text, servers_keyboard(&servers)).await;
        }
        CallbackAction::VpsServer { id } => {
            if !user.has_active_access(today) {
                return require_subscription(state, chat_id).await;
            }
            let server = match state.vps.by_id(id).await {
                Ok(s) => s,
                Err(e) => return catalog_failure(state, chat_id, e).await,
            };
            let Some(server) = server else {
                send_plain(state, chat_id, "❌ Server not found.").await;
                return WebhookOutcome::skipped(BRANCH, "unknown server id");
            };
            let mut text = format!(
                "{} <b>{}</b>\n\nConnection configs:\n\n",
                server.flag,
                escape_html(&server.nickname)
            );
            if server.configs.is_empty() {
                text.push_str("No configs published for this server yet.");
            }
            for config in &server.configs {
                text.push_str(&format!("<code>{}</code>\n\n", escape_html(config)));
            }
            let markup = InlineKeyboardMarkup::new(vec![vec![InlineKeyboardButton::callback(
                "« Back",
                "vps:countries",
            )]]);
            show(state, chat_id, msg_id, text, markup).await;
        }
        CallbackAction::Menu(MenuSection::HowTo) => {
            let caption = "📲 <b>How to connect</b>\n\nPick your platform:";
            let photo = state
                .config
                .howto_image_url
                .as_deref()
                .and_then(|raw| Url::parse(raw).ok());
            match photo {
                Some(url) => {
                    if let Some(id) = msg_id {
                        let _ = state.bot.delete_message(chat_id, id).await;
                    }
                    match state
                        .bot
                        .send_photo(chat_id, InputFile::url(url))
                        .caption(caption)
                        .parse_mode(ParseMode::Html)
                        .reply_markup(howto_keyboard())
                        .await
                    {
                        Ok(m) => state.message_log.record(chat_id.0, m.id.0),
                        Err(e) => error!("Failed to send howto photo to {}: {}", tg_id, e),
                    }
                }
                None => show(state, chat_id, msg_id, caption.to_string(), howto_keyboard()).await,
            }
        }
        CallbackAction::HowTo(platform) => {
            let markup = InlineKeyboardMarkup::new(vec![vec![InlineKeyboardButton::callback(
                "« Back",
                "menu:howto",
            )]]);
            show(state, chat_id, msg_id, howto_guide(platform), markup).await;
        }
    }

    WebhookOutcome::handled(BRANCH)
}

const STALE_GIFT_NOTE: &str = "That gift is no longer in your list.";

/// Redraw the pressed message in place; fall back to a fresh message when
/// the original is inaccessible.
async fn show(
    state: &AppState,
    chat_id: ChatId,
    msg_id: Option<MessageId>,
    text: String,
    markup: InlineKeyboardMarkup,
) {
    match msg_id {
        Some(id) => {
            let _ = state
                .bot
                .edit_message_text(chat_id, id, text)
                .parse_mode(ParseMode::Html)
                .reply_markup(markup)
                .await
                .map_err(|e| warn!("Failed to edit message {} in {}: {}", id, chat_id, e));
        }
        None => {
            match state
                .bot
                .send_message(chat_id, text)
                .parse_mode(ParseMode::Html)
                .reply_markup(markup)
                .await
            {
                Ok(m) => state.message_log.record(chat_id.0, m.id.0),
                Err(e) => error!("Failed to send message to {}: {}", chat_id, e),
            }
        }
    }
}

async fn send_plain(state: &AppState, chat_id: ChatId, text: &str) {
    let _ = state
        .bot
        .send_message(chat_id, text)
        .await
        .map_err(|e| error!("Failed to send message to {}: {}", chat_id, e));
}

async fn show_gift_list(
    state: &AppState,
    chat_id: ChatId,
    msg_id: Option<MessageId>,
    user: &User,
    note: Option<&str>,
) {
    let text = gift_list_text(user.gifts.len(), note);
    show(state, chat_id, msg_id, text, gifts_keyboard(&user.gifts)).await;
}

fn gift_list_text(count: usize, note: Option<&str>) -> String {
    let body = if count == 0 {
        "🎁 <b>Gifts</b>\n\nNo pending gifts. You can send one to a friend below.".to_string()
    } else {
        format!(
            "🎁 <b>Gifts</b>\n\nYou have {} pending gift(s). Tap one to view it:",
            count
        )
    };
    match note {
        Some(note) => format!("⚠️ {}\n\n{}", note, body),
        None => body,
    }
}

fn insufficient_balance_text(plan: &Plan, balance_cents: i64) -> String {
    format!(
        "❌ <b>Not enough balance</b>\n\n{} needed, {} available.",
        plan.usd_display(),
        usd(balance_cents)
    )
}

async fn lookup_plan(state: &AppState, chat_id: ChatId, months: u32) -> Option<Plan> {
    match state.plans.by_months(months).await {
        Ok(Some(plan)) => Some(plan),
        Ok(None) => {
            send_plain(state, chat_id, "❌ That plan is no longer available.").await;
            None
        }
        Err(e) => {
            error!("Plan catalog read failed: {}", e);
            send_plain(state, chat_id, "⚠️ Temporary failure, try again.").await;
            None
        }
    }
}

async fn require_subscription(state: &AppState, chat_id: ChatId) -> WebhookOutcome {
    send_plain(
        state,
        chat_id,
        "🔒 An active subscription is required to browse servers.",
    )
    .await;
    WebhookOutcome::handled(BRANCH)
}

async fn catalog_failure(
    state: &AppState,
    chat_id: ChatId,
    e: impl std::fmt::Display,
) -> WebhookOutcome {
    error!("Catalog read failed: {}", e);
    send_plain(state, chat_id, "⚠️ Temporary failure, try again.").await;
    WebhookOutcome::skipped(BRANCH, "catalog unavailable")
}

/// Blogger promo codes are keyed by the referrer's login; the note is
/// informational and never changes the invoiced price.
async fn promo_note(state: &AppState, user: &User) -> Option<String> {
    let nickname = user.referred_by.as_ref()?.nickname.as_deref()?;
    match state.promos.by_code(nickname).await {
        Ok(Some(promo)) => Some(format!(
            "🎟 You joined via <b>{}</b> — promo <code>{}</code> grants {}% off on card payments.",
            escape_html(nickname),
            escape_html(&promo.code),
            promo.discount_percent
        )),
        Ok(None) => None,
        Err(e) => {
            warn!("Promo lookup failed for {:?}: {}", nickname, e);
            None
        }
    }
}

fn back_markup() -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![back_row()])
}

fn status_line(user: &User, today: NaiveDate) -> String {
    match user.expires_at {
        Some(d) if user.has_active_access(today) => {
            format!("✅ Active until <b>{}</b>", d.format("%Y-%m-%d"))
        }
        Some(d) => format!("❌ Expired on {}", d.format("%Y-%m-%d")),
        None => "❌ No active subscription".to_string(),
    }
}

fn usd(cents: i64) -> String {
    format!("${}.{:02}", cents / 100, cents.rem_euclid(100))
}

fn faq_text() -> &'static str {
    "❓ <b>FAQ</b>\n\n\
     <b>How do I connect?</b>\nOpen «How to connect» and pick your platform.\n\n\
     <b>What happens when my subscription ends?</b>\nAccess stops on the expiry date; \
     prolonging restarts it without losing your account.\n\n\
     <b>How does the referral program work?</b>\nYou earn 20% of a referral's first \
     purchase and 10% afterwards, spendable on prolongation.\n\n\
     <b>Can I gift a subscription?</b>\nYes — open «Gifts» and tap «Send a gift»."
}

fn howto_guide(platform: HowToPlatform) -> String {
    let steps = match platform {
        HowToPlatform::Ios => {
            "1. Install <b>Streisand</b> or <b>Shadowrocket</b> from the App Store.\n\
             2. Copy a config from «Servers».\n\
             3. Paste it into the app and connect."
        }
        HowToPlatform::Android => {
            "1. Install <b>v2rayNG</b> from Google Play.\n\
             2. Copy a config from «Servers».\n\
             3. Import from clipboard and connect."
        }
        HowToPlatform::Windows => {
            "1. Download <b>Nekoray</b> or <b>Hiddify</b>.\n\
             2. Copy a config from «Servers».\n\
             3. Add profile from clipboard and connect."
        }
        HowToPlatform::Macos => {
            "1. Install <b>FoXray</b> or <b>Hiddify</b>.\n\
             2. Copy a config from «Servers».\n\
             3. Paste the config and connect."
        }
        HowToPlatform::Linux => {
            "1. Install <b>sing-box</b> or <b>Nekoray</b>.\n\
             2. Copy a config from «Servers».\n\
             3. Import it and connect."
        }
    };
    format!("📲 <b>{}</b>\n\n{}", platform.label(), steps)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use stratus_db::models::store::User;

    fn user_with_expiry(expires_at: Option<NaiveDate>, active: bool) -> User {
        User {
            tg_id: 1,
            username: None,
            active,
            phase: None,
            expires_at,
            balance_cents: 0,
            referral_count: 0,
            referrals: vec![],
            referred_by: None,
            gifts: vec![],
            traffic_used_mb: 0,
            connection_count: 0,
            created_at: Utc::now(),
        }
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn status_line_reflects_access() {
        let today = date(2026, 8, 23);
        let active = user_with_expiry(Some(date(2026, 9, 1)), true);
        assert!(status_line(&active, today).contains("Active until"));

        let expired = user_with_expiry(Some(date(2026, 8, 1)), true);
        assert!(status_line(&expired, today).contains("Expired on"));

        let fresh = user_with_expiry(None, false);
        assert!(status_line(&fresh, today).contains("No active subscription"));
    }

    #[test]
    fn usd_formats_cents() {
        assert_eq!(usd(0), "$0.00");
        assert_eq!(usd(1999), "$19.99");
        assert_eq!(usd(500), "$5.00");
        assert_eq!(usd(5), "$0.05");
    }

    #[test]
    fn insufficient_balance_message_names_both_amounts() {
        let plan = Plan {
            id: 3,
            months: 3,
            price_stars: 650,
            price_usd_cents: 1300,
            price_local_cents: 117000,
        };
        let text = insufficient_balance_text(&plan, 499);
        assert!(text.contains("$13.00"));
        assert!(text.contains("$4.99"));
    }

    #[test]
    fn stale_gift_note_is_prepended_to_the_list() {
        let text = gift_list_text(2, Some(STALE_GIFT_NOTE));
        assert!(text.starts_with("⚠️"));
        assert!(text.contains(STALE_GIFT_NOTE));
        assert!(text.contains("2 pending gift(s)"));

        let plain = gift_list_text(0, None);
        assert!(!plain.contains("⚠️"));
        assert!(plain.contains("No pending gifts"));
    }

    #[test]
    fn every_howto_platform_has_a_guide() {
        for platform in [
            HowToPlatform::Ios,
            HowToPlatform::Android,
            HowToPlatform::Windows,
            HowToPlatform::Macos,
            HowToPlatform::Linux,
        ] {
            let guide = howto_guide(platform);
            assert!(guide.contains(platform.label()));
            assert!(guide.contains("Servers"));
        }
    }
}
