use sqlx::{PgPool, Row};

use crate::models::promo::PromoCode;
use crate::repositories::LedgerError;

/// Lookup-only access to blogger promo records.
#[derive(Debug, Clone)]
pub struct PromoRepository {
    pool: PgPool,
}

impl PromoRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn by_code(&self, code: &str) -> Result<Option<PromoCode>, LedgerError> {
        let code = code.trim().to_uppercase();
        let row = sqlx::query(
            "SELECT code, discount_percent, state FROM promo_codes WHERE code = $1",
        )
        .bind(&code)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| PromoCode {
            code: r.try_get::<String, _>("code").unwrap_or_default(),
            discount_percent: r.try_get::<i32, _>("discount_percent").unwrap_or_default(),
            state: r
                .try_get::<Option<serde_json::Value>, _>("state")
                .ok()
                .flatten(),
        }))
    }
}
