//! Typed decoding of inline-button callback data. Callback strings are
//! colon-delimited namespaced tokens (`<domain>:<subaction>[:<param>...]`)
//! with strict allow-lists per domain; any structural mismatch decodes to
//! `None`, which the dispatcher treats as unhandled.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;

const MAX_MONTHS: u32 = 36;
const MAX_GIFT_INDEX: usize = 99;
const MAX_COUNTRY_LEN: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuSection {
    Main,
    Subscription,
    Referral,
    Gifts,
    Vps,
    Faq,
    HowTo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayMethod {
    Stars,
    Balance,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HowToPlatform {
    Ios,
    Android,
    Windows,
    Macos,
    Linux,
}

impl HowToPlatform {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Ios => "iOS",
            Self::Android => "Android",
            Self::Windows => "Windows",
            Self::Macos => "macOS",
            Self::Linux => "Linux",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CallbackAction {
    Menu(MenuSection),
    BuyOpen,
    BuyMethod(PayMethod),
    BuyPlan { months: u32 },
    BuyFromBalance { months: u32 },
    FaqOpen,
    ReferralOpen,
    ReferralPlan { months: u32 },
    ReferralApply { months: u32 },
    GiftList,
    GiftView { index: usize },
    GiftActivate { index: usize },
    GiftSend,
    GiftBuy { months: u32, recipient_tg_id: i64 },
    VpsCountries,
    VpsCountry { country_key: String },
    VpsServer { id: i64 },
    HowTo(HowToPlatform),
}

impl CallbackAction {
    pub fn parse(data: &str) -> Option<Self> {
        let parts: Vec<&str> = data.split(':').collect();
        match parts.as_slice() {
            ["menu", section] => {
                let section = match *section {
                    "main" => MenuSection::Main,
                    "subscription" => MenuSection::Subscription,
                    "referral" => MenuSection::Referral,
                    "gifts" => MenuSection::Gifts,
                    "vps" => MenuSection::Vps,
                    "faq" => MenuSection::Faq,
                    "howto" => MenuSection::HowTo,
                    _ => return None,
                };
                Some(Self::Menu(section))
            }
            ["buy", "open"] => Some(Self::BuyOpen),
            ["buy", "method", "stars"] => Some(Self::BuyMethod(PayMethod::Stars)),
            ["buy", "method", "balance"] => Some(Self::BuyMethod(PayMethod::Balance)),
            ["buy", "plan", months] => Some(Self::BuyPlan {
                months: parse_months(months)?,
            }),
            ["buy", "frombalance", months] => Some(Self::BuyFromBalance {
                months: parse_months(months)?,
            }),
            ["faq", "open"] => Some(Self::FaqOpen),
            ["ref", "open"] => Some(Self::ReferralOpen),
            ["ref", "plan", months] => Some(Self::ReferralPlan {
                months: parse_months(months)?,
            }),
            ["ref", "apply", months] => Some(Self::ReferralApply {
                months: parse_months(months)?,
            }),
            ["gift", "list"] => Some(Self::GiftList),
            ["gift", "view", index] => Some(Self::GiftView {
                index: parse_index(index)?,
            }),
            ["gift", "activate", index] => Some(Self::GiftActivate {
                index: parse_index(index)?,
            }),
            ["gift", "send"] => Some(Self::GiftSend),
            ["gift", "buy", months, recipient] => Some(Self::GiftBuy {
                months: parse_months(months)?,
                recipient_tg_id: parse_identity(recipient)?,
            }),
            ["vps", "countries"] => Some(Self::VpsCountries),
            ["vps", "country", encoded] => Some(Self::VpsCountry {
                country_key: decode_country(encoded)?,
            }),
            ["vps", "server", id] => Some(Self::VpsServer {
                id: parse_identity(id)?,
            }),
            ["howto", platform] => {
                let platform = match *platform {
                    "ios" => HowToPlatform::Ios,
                    "android" => HowToPlatform::Android,
                    "windows" => HowToPlatform::Windows,
                    "macos" => HowToPlatform::Macos,
                    "linux" => HowToPlatform::Linux,
                    _ => return None,
                };
                Some(Self::HowTo(platform))
            }
            _ => None,
        }
    }
}

/// Free-text country keys are base64url-encoded so they cannot collide with
/// the token syntax or leak through button payload inspection.
pub fn encode_country(country_key: &str) -> String {
    URL_SAFE_NO_PAD.encode(country_key.as_bytes())
}

fn decode_country(encoded: &str) -> Option<String> {
    let bytes = URL_SAFE_NO_PAD.decode(encoded).ok()?;
    if bytes.is_empty() || bytes.len() > MAX_COUNTRY_LEN {
        return None;
    }
    String::from_utf8(bytes).ok()
}

fn parse_months(s: &str) -> Option<u32> {
    let months: u32 = parse_digits(s)?.parse().ok()?;
    (1..=MAX_MONTHS).contains(&months).then_some(months)
}

fn parse_index(s: &str) -> Option<usize> {
    if s.is_empty() || s.len() > 2 || !s.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let index: usize = s.parse().ok()?;
    (index <= MAX_GIFT_INDEX).then_some(index)
}

/// Identity and server-id parameters: digits only, no leading zero, must
/// fit the platform id range.
fn parse_identity(s: &str) -> Option<i64> {
    if s.is_empty() || s.len() > 20 || !s.starts_with(|c: char| ('1'..='9').contains(&c)) {
        return None;
    }
    if !s.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

fn parse_digits(s: &str) -> Option<&str> {
    (!s.is_empty() && s.chars().all(|c| c.is_ascii_digit())).then_some(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn menu_sections_decode() {
        assert_eq!(
            CallbackAction::parse("menu:main"),
            Some(CallbackAction::Menu(MenuSection::Main))
        );
        assert_eq!(
            CallbackAction::parse("menu:vps"),
            Some(CallbackAction::Menu(MenuSection::Vps))
        );
        assert_eq!(CallbackAction::parse("menu:admin"), None);
    }

    #[test]
    fn purchase_flow_tokens_decode() {
        assert_eq!(CallbackAction::parse("buy:open"), Some(CallbackAction::BuyOpen));
        assert_eq!(
            CallbackAction::parse("buy:method:stars"),
            Some(CallbackAction::BuyMethod(PayMethod::Stars))
        );
        assert_eq!(
            CallbackAction::parse("buy:plan:3"),
            Some(CallbackAction::BuyPlan { months: 3 })
        );
        assert_eq!(
            CallbackAction::parse("buy:frombalance:12"),
            Some(CallbackAction::BuyFromBalance { months: 12 })
        );
    }

    #[test]
    fn months_outside_the_allow_list_are_rejected() {
        assert_eq!(CallbackAction::parse("buy:plan:0"), None);
        assert_eq!(CallbackAction::parse("buy:plan:37"), None);
        assert_eq!(CallbackAction::parse("buy:plan:-1"), None);
        assert_eq!(CallbackAction::parse("buy:plan:3x"), None);
    }

    #[test]
    fn gift_tokens_decode() {
        assert_eq!(CallbackAction::parse("gift:list"), Some(CallbackAction::GiftList));
        assert_eq!(
            CallbackAction::parse("gift:activate:0"),
            Some(CallbackAction::GiftActivate { index: 0 })
        );
        assert_eq!(
            CallbackAction::parse("gift:buy:6:123456789"),
            Some(CallbackAction::GiftBuy {
                months: 6,
                recipient_tg_id: 123456789
            })
        );
    }

    #[test]
    fn gift_identity_parameter_is_strict() {
        assert_eq!(CallbackAction::parse("gift:buy:6:0123"), None);
        assert_eq!(CallbackAction::parse("gift:buy:6:12a4"), None);
        assert_eq!(CallbackAction::parse("gift:buy:6:"), None);
        // 21 digits: beyond the id shape.
        assert_eq!(
            CallbackAction::parse("gift:buy:6:123456789012345678901"),
            None
        );
    }

    #[test]
    fn gift_index_bounds() {
        assert_eq!(
            CallbackAction::parse("gift:view:99"),
            Some(CallbackAction::GiftView { index: 99 })
        );
        assert_eq!(CallbackAction::parse("gift:view:100"), None);
    }

    #[test]
    fn country_round_trips_through_base64url() {
        let encoded = encode_country("netherlands");
        let action = CallbackAction::parse(&format!("vps:country:{}", encoded));
        assert_eq!(
            action,
            Some(CallbackAction::VpsCountry {
                country_key: "netherlands".to_string()
            })
        );
    }

    #[test]
    fn malformed_country_encoding_is_rejected() {
        assert_eq!(CallbackAction::parse("vps:country:!!!"), None);
        // Over the length cap after decoding.
        let encoded = encode_country(&"x".repeat(65));
        assert_eq!(CallbackAction::parse(&format!("vps:country:{}", encoded)), None);
    }

    #[test]
    fn howto_platforms_decode() {
        assert_eq!(
            CallbackAction::parse("howto:ios"),
            Some(CallbackAction::HowTo(HowToPlatform::Ios))
        );
        assert_eq!(CallbackAction::parse("howto:beos"), None);
    }

    #[test]
    fn structural_mismatches_decode_to_none() {
        for data in [
            "",
            "menu",
            "menu:main:extra",
            "buy",
            "unknown:domain",
            "gift:buy:6",
            "vps:server:abc",
            "ref:apply",
        ] {
            assert_eq!(CallbackAction::parse(data), None, "{:?}", data);
        }
    }
}
