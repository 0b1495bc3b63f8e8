use serde::Serialize;

/// Blogger/referral promo record. Lookup-only: the dispatcher never mutates
/// these rows.
#[derive(Debug, Clone, Serialize)]
pub struct PromoCode {
    pub code: String,
    pub discount_percent: i32,
    pub state: Option<serde_json::Value>,
}
