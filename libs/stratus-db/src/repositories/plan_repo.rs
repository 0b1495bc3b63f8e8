use sqlx::PgPool;

use crate::models::plan::Plan;
use crate::repositories::LedgerError;

/// Read-only pricing catalog. No caching: staleness tolerance is the next
/// webhook call.
#[derive(Debug, Clone)]
pub struct PlanRepository {
    pool: PgPool,
}

impl PlanRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn all(&self) -> Result<Vec<Plan>, LedgerError> {
        let plans = sqlx::query_as::<_, Plan>(
            "SELECT id, months, price_stars, price_usd_cents, price_local_cents
             FROM plans ORDER BY months ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(plans)
    }

    pub async fn by_months(&self, months: u32) -> Result<Option<Plan>, LedgerError> {
        let plan = sqlx::query_as::<_, Plan>(
            "SELECT id, months, price_stars, price_usd_cents, price_local_cents
             FROM plans WHERE months = $1",
        )
        .bind(months as i32)
        .fetch_optional(&self.pool)
        .await?;
        Ok(plan)
    }
}
