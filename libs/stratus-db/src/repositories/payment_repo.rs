use sqlx::PgPool;

use crate::repositories::LedgerError;

/// Journal of processed Telegram charge ids. The unique-keyed insert is the
/// store-level guard that makes successful-payment redelivery idempotent:
/// the second delivery loses the insert and is acknowledged without
/// re-applying the purchase.
#[derive(Debug, Clone)]
pub struct PaymentRepository {
    pool: PgPool,
}

impl PaymentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Returns `true` when this charge id was claimed by the current call,
    /// `false` when it was already recorded.
    pub async fn claim_charge(
        &self,
        charge_id: &str,
        tg_id: i64,
        amount_stars: i64,
    ) -> Result<bool, LedgerError> {
        let result = sqlx::query(
            "INSERT INTO processed_payments (charge_id, tg_id, amount_stars)
             VALUES ($1, $2, $3)
             ON CONFLICT (charge_id) DO NOTHING",
        )
        .bind(charge_id)
        .bind(tg_id)
        .bind(amount_stars)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }
}
