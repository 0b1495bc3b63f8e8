use chrono::{DateTime, Months, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

pub const PHASE_LIVE: &str = "live";
pub const PHASE_ENDING: &str = "ending";

/// One entry in a referrer's referral list, keyed by the referred identity.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ReferralEntry {
    pub tg_id: i64,
    #[serde(default)]
    pub login: Option<String>,
    #[serde(default)]
    pub nickname: Option<String>,
    #[serde(default)]
    pub purchases: u32,
}

/// Immutable backlink to the identity that referred this user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReferredBy {
    pub tg_id: i64,
    #[serde(default)]
    pub nickname: Option<String>,
    pub referred_at: NaiveDate,
}

/// A pending gift. Gifts are addressed by list position, not a stable id:
/// removing an index shifts every subsequent index.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Gift {
    pub giver_tg_id: i64,
    pub giver_name: String,
    pub months: u32,
    pub granted_at: NaiveDate,
}

#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub tg_id: i64,
    pub username: Option<String>,
    pub active: bool,
    pub phase: Option<String>,
    pub expires_at: Option<NaiveDate>,
    pub balance_cents: i64,
    pub referral_count: i32,
    pub referrals: Vec<ReferralEntry>,
    pub referred_by: Option<ReferredBy>,
    pub gifts: Vec<Gift>,
    pub traffic_used_mb: i64,
    pub connection_count: i32,
    pub created_at: DateTime<Utc>,
}

impl User {
    /// Active access means the flag is set and the expiry has not passed.
    pub fn has_active_access(&self, today: NaiveDate) -> bool {
        self.active && self.expires_at.map(|d| d >= today).unwrap_or(false)
    }
}

/// Result of crediting a referrer after a validated purchase.
#[derive(Debug, Clone, Serialize)]
pub struct ReferralReward {
    pub referrer_tg_id: i64,
    pub reward_cents: i64,
    pub percent: u32,
    pub purchases: u32,
}

/// New expiry after extending by `months` calendar months. A lapsed expiry
/// restarts from `today`; a future expiry is extended in place. Month
/// arithmetic clamps at month end (Jan 31 + 1 month = Feb 28).
pub fn extended_expiry(current: Option<NaiveDate>, today: NaiveDate, months: u32) -> NaiveDate {
    let base = match current {
        Some(d) if d > today => d,
        _ => today,
    };
    base + Months::new(months)
}

/// Reward tier: 20% on the payer's first recorded purchase, 10% afterwards.
pub fn reward_percent(purchases: u32) -> u32 {
    if purchases <= 1 {
        20
    } else {
        10
    }
}

/// Percentage of an amount in cents, rounded half-up. Integer cents keep
/// repeated rewards free of accumulated drift.
pub fn reward_cents(amount_cents: i64, percent: u32) -> i64 {
    (amount_cents * percent as i64 + 50) / 100
}

/// Position of the payer's entry in a referral list, appending a fresh
/// zero-purchase entry when absent.
pub fn upsert_referral_entry(list: &mut Vec<ReferralEntry>, tg_id: i64) -> usize {
    match list.iter().position(|e| e.tg_id == tg_id) {
        Some(pos) => pos,
        None => {
            list.push(ReferralEntry {
                tg_id,
                ..Default::default()
            });
            list.len() - 1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn lapsed_expiry_restarts_from_today() {
        let today = date(2026, 8, 23);
        let new = extended_expiry(Some(date(2026, 1, 10)), today, 3);
        assert_eq!(new, date(2026, 11, 23));
    }

    #[test]
    fn missing_expiry_starts_from_today() {
        let today = date(2026, 8, 23);
        assert_eq!(extended_expiry(None, today, 1), date(2026, 9, 23));
    }

    #[test]
    fn future_expiry_extends_in_place() {
        let today = date(2026, 8, 23);
        let new = extended_expiry(Some(date(2026, 10, 5)), today, 6);
        assert_eq!(new, date(2027, 4, 5));
    }

    #[test]
    fn month_arithmetic_clamps_at_month_end() {
        let today = date(2026, 1, 31);
        assert_eq!(extended_expiry(None, today, 1), date(2026, 2, 28));
        let leap = date(2024, 1, 31);
        assert_eq!(extended_expiry(None, leap, 1), date(2024, 2, 29));
    }

    #[test]
    fn reward_tiers_pay_twenty_once_then_ten() {
        assert_eq!(reward_percent(1), 20);
        assert_eq!(reward_percent(2), 10);
        assert_eq!(reward_percent(9), 10);
    }

    #[test]
    fn reward_rounds_half_up() {
        assert_eq!(reward_cents(1000, 20), 200);
        assert_eq!(reward_cents(999, 10), 100); // 99.9 -> 100
        assert_eq!(reward_cents(333, 10), 33); // 33.3 -> 33
        assert_eq!(reward_cents(335, 10), 34); // 33.5 -> 34
    }

    #[test]
    fn referral_entry_upsert_is_keyed_by_identity() {
        let mut list = vec![ReferralEntry {
            tg_id: 7,
            purchases: 2,
            ..Default::default()
        }];
        let idx = upsert_referral_entry(&mut list, 7);
        assert_eq!(idx, 0);
        assert_eq!(list.len(), 1);

        let idx = upsert_referral_entry(&mut list, 8);
        assert_eq!(idx, 1);
        assert_eq!(list[1].purchases, 0);
    }

    #[test]
    fn gift_removal_shifts_subsequent_indices() {
        let mut gifts = vec![
            Gift {
                giver_tg_id: 1,
                giver_name: "a".into(),
                months: 1,
                granted_at: date(2026, 1, 1),
            },
            Gift {
                giver_tg_id: 2,
                giver_name: "b".into(),
                months: 3,
                granted_at: date(2026, 2, 1),
            },
        ];
        let removed = gifts.remove(0);
        assert_eq!(removed.giver_tg_id, 1);
        assert_eq!(gifts[0].giver_tg_id, 2);
        // The old index 1 is now out of bounds.
        assert!(gifts.get(1).is_none());
    }
}
