use serde_json::json;
use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup};

use stratus_db::models::plan::Plan;
use stratus_db::models::store::Gift;
use stratus_db::models::vps::{VpsCountry, VpsServer};

use crate::bot::callbacks::encode_country;

pub fn main_menu() -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![
        vec![
            InlineKeyboardButton::callback("🛡 Subscription", "menu:subscription"),
            InlineKeyboardButton::callback("🤝 Referral", "menu:referral"),
        ],
        vec![
            InlineKeyboardButton::callback("🎁 Gifts", "menu:gifts"),
            InlineKeyboardButton::callback("🌍 Servers", "menu:vps"),
        ],
        vec![
            InlineKeyboardButton::callback("❓ FAQ", "menu:faq"),
            InlineKeyboardButton::callback("📲 How to connect", "menu:howto"),
        ],
    ])
}

pub fn back_row() -> Vec<InlineKeyboardButton> {
    vec![InlineKeyboardButton::callback("« Back", "menu:main")]
}

pub fn method_keyboard() -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![
        vec![InlineKeyboardButton::callback("⭐ Telegram Stars", "buy:method:stars")],
        vec![InlineKeyboardButton::callback(
            "💰 Referral balance",
            "buy:method:balance",
        )],
        back_row(),
    ])
}

pub fn stars_plans_keyboard(plans: &[Plan]) -> InlineKeyboardMarkup {
    let mut rows: Vec<Vec<InlineKeyboardButton>> = plans
        .iter()
        .map(|p| {
            vec![InlineKeyboardButton::callback(
                format!("{} mo — {} ⭐", p.months, p.price_stars),
                format!("buy:plan:{}", p.months),
            )]
        })
        .collect();
    rows.push(back_row());
    InlineKeyboardMarkup::new(rows)
}

pub fn balance_plans_keyboard(plans: &[Plan]) -> InlineKeyboardMarkup {
    let mut rows: Vec<Vec<InlineKeyboardButton>> = plans
        .iter()
        .map(|p| {
            vec![InlineKeyboardButton::callback(
                format!("{} mo — {}", p.months, p.usd_display()),
                format!("buy:frombalance:{}", p.months),
            )]
        })
        .collect();
    rows.push(back_row());
    InlineKeyboardMarkup::new(rows)
}

pub fn referral_plans_keyboard(plans: &[Plan]) -> InlineKeyboardMarkup {
    let mut rows: Vec<Vec<InlineKeyboardButton>> = plans
        .iter()
        .map(|p| {
            vec![InlineKeyboardButton::callback(
                format!("Prolong {} mo — {}", p.months, p.usd_display()),
                format!("ref:plan:{}", p.months),
            )]
        })
        .collect();
    rows.push(back_row());
    InlineKeyboardMarkup::new(rows)
}

pub fn referral_confirm_keyboard(months: u32) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![
        vec![InlineKeyboardButton::callback(
            "✅ Confirm",
            format!("ref:apply:{}", months),
        )],
        vec![InlineKeyboardButton::callback("« Back", "ref:open")],
    ])
}

pub fn gifts_keyboard(gifts: &[Gift]) -> InlineKeyboardMarkup {
    let mut rows: Vec<Vec<InlineKeyboardButton>> = gifts
        .iter()
        .enumerate()
        .map(|(i, g)| {
            vec![InlineKeyboardButton::callback(
                format!("🎁 {} mo from {}", g.months, g.giver_name),
                format!("gift:view:{}", i),
            )]
        })
        .collect();
    rows.push(vec![InlineKeyboardButton::callback(
        "💝 Send a gift",
        "gift:send",
    )]);
    rows.push(back_row());
    InlineKeyboardMarkup::new(rows)
}

pub fn gift_view_keyboard(index: usize) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![
        vec![InlineKeyboardButton::callback(
            "▶️ Activate",
            format!("gift:activate:{}", index),
        )],
        vec![InlineKeyboardButton::callback("« Back", "gift:list")],
    ])
}

pub fn gift_plans_keyboard(plans: &[Plan], recipient_tg_id: i64) -> InlineKeyboardMarkup {
    let mut rows: Vec<Vec<InlineKeyboardButton>> = plans
        .iter()
        .map(|p| {
            vec![InlineKeyboardButton::callback(
                format!("Gift {} mo — {} ⭐", p.months, p.price_stars),
                format!("gift:buy:{}:{}", p.months, recipient_tg_id),
            )]
        })
        .collect();
    rows.push(back_row());
    InlineKeyboardMarkup::new(rows)
}

pub fn countries_keyboard(countries: &[VpsCountry]) -> InlineKeyboardMarkup {
    let mut rows: Vec<Vec<InlineKeyboardButton>> = countries
        .iter()
        .map(|c| {
            vec![InlineKeyboardButton::callback(
                format!("{} {}", c.flag, c.country),
                format!("vps:country:{}", encode_country(&c.country_key)),
            )]
        })
        .collect();
    rows.push(back_row());
    InlineKeyboardMarkup::new(rows)
}

pub fn servers_keyboard(servers: &[VpsServer]) -> InlineKeyboardMarkup {
    let mut rows: Vec<Vec<InlineKeyboardButton>> = servers
        .iter()
        .map(|s| {
            vec![InlineKeyboardButton::callback(
                format!("{} {}", s.flag, s.nickname),
                format!("vps:server:{}", s.id),
            )]
        })
        .collect();
    rows.push(vec![InlineKeyboardButton::callback(
        "« Back",
        "vps:countries",
    )]);
    InlineKeyboardMarkup::new(rows)
}

pub fn howto_keyboard() -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![
        vec![
            InlineKeyboardButton::callback("iOS", "howto:ios"),
            InlineKeyboardButton::callback("Android", "howto:android"),
        ],
        vec![
            InlineKeyboardButton::callback("Windows", "howto:windows"),
            InlineKeyboardButton::callback("macOS", "howto:macos"),
            InlineKeyboardButton::callback("Linux", "howto:linux"),
        ],
        back_row(),
    ])
}

pub fn main_menu_text() -> &'static str {
    "🏠 <b>Main menu</b>\n\nManage your subscription, referrals, gifts and servers below."
}

/// Status-specific menu payload served by `GET /api/telegram/menu` for
/// external previews. Mirrors the inline main menu.
pub fn menu_payload(status: &str) -> serde_json::Value {
    let status = match status {
        "active" | "trial" | "expired" => status,
        _ => "unknown",
    };
    let text = match status {
        "active" => "✅ Your subscription is active.",
        "trial" => "⏳ Trial period — upgrade any time.",
        "expired" => "❌ Your subscription has expired. Renew to restore access.",
        _ => "👋 Welcome! Use the menu to get started.",
    };

    let buttons: Vec<Vec<serde_json::Value>> = main_menu()
        .inline_keyboard
        .iter()
        .map(|row| {
            row.iter()
                .map(|b| {
                    let data = match &b.kind {
                        teloxide::types::InlineKeyboardButtonKind::CallbackData(d) => d.clone(),
                        _ => String::new(),
                    };
                    json!({ "text": b.text, "callback_data": data })
                })
                .collect()
        })
        .collect();

    json!({ "status": status, "text": text, "buttons": buttons })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bot::callbacks::CallbackAction;

    fn plan(months: i32, stars: i64, usd: i64) -> Plan {
        Plan {
            id: months as i64,
            months,
            price_stars: stars,
            price_usd_cents: usd,
            price_local_cents: usd * 90,
        }
    }

    fn callback_data(markup: &InlineKeyboardMarkup) -> Vec<String> {
        markup
            .inline_keyboard
            .iter()
            .flatten()
            .filter_map(|b| match &b.kind {
                teloxide::types::InlineKeyboardButtonKind::CallbackData(d) => Some(d.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn every_generated_callback_decodes() {
        let plans = vec![plan(1, 250, 500), plan(3, 650, 1300)];
        let countries = vec![VpsCountry {
            country: "Netherlands".into(),
            flag: "🇳🇱".into(),
            country_key: "nl".into(),
        }];
        let markups = vec![
            main_menu(),
            method_keyboard(),
            stars_plans_keyboard(&plans),
            balance_plans_keyboard(&plans),
            referral_plans_keyboard(&plans),
            referral_confirm_keyboard(3),
            gift_plans_keyboard(&plans, 123456789),
            gift_view_keyboard(0),
            countries_keyboard(&countries),
            howto_keyboard(),
        ];
        for markup in markups {
            for data in callback_data(&markup) {
                assert!(
                    CallbackAction::parse(&data).is_some(),
                    "{:?} failed to decode",
                    data
                );
            }
        }
    }

    #[test]
    fn menu_payload_carries_status_and_buttons() {
        let payload = menu_payload("trial");
        assert_eq!(payload["status"], "trial");
        assert!(payload["text"].as_str().unwrap().contains("Trial"));
        assert!(!payload["buttons"].as_array().unwrap().is_empty());
        assert_eq!(
            payload["buttons"][0][0]["callback_data"],
            "menu:subscription"
        );
    }

    #[test]
    fn unknown_status_falls_back() {
        let payload = menu_payload("banana");
        assert_eq!(payload["status"], "unknown");
    }
}
