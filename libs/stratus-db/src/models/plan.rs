use serde::{Deserialize, Serialize};

/// Immutable catalog row: one per distinct subscription duration.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Plan {
    pub id: i64,
    pub months: i32,
    pub price_stars: i64,
    pub price_usd_cents: i64,
    pub price_local_cents: i64,
}

impl Plan {
    pub fn usd_display(&self) -> String {
        format!("${}.{:02}", self.price_usd_cents / 100, self.price_usd_cents % 100)
    }
}
