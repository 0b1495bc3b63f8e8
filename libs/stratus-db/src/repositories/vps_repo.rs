use sqlx::{postgres::PgRow, PgPool, Row};

use crate::models::vps::{VpsCountry, VpsServer};
use crate::repositories::LedgerError;

#[derive(Debug, Clone)]
pub struct VpsRepository {
    pool: PgPool,
}

impl VpsRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_server(row: &PgRow) -> VpsServer {
        let configs: Vec<String> = row
            .try_get::<serde_json::Value, _>("configs")
            .ok()
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default();
        VpsServer {
            id: row.try_get::<i64, _>("id").unwrap_or_default(),
            country: row.try_get::<String, _>("country").unwrap_or_default(),
            flag: row.try_get::<String, _>("flag").unwrap_or_default(),
            nickname: row.try_get::<String, _>("nickname").unwrap_or_default(),
            configs,
            country_key: row.try_get::<String, _>("country_key").unwrap_or_default(),
        }
    }

    pub async fn countries(&self) -> Result<Vec<VpsCountry>, LedgerError> {
        let countries = sqlx::query_as::<_, VpsCountry>(
            "SELECT DISTINCT country, flag, country_key FROM vps_servers ORDER BY country ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(countries)
    }

    pub async fn by_country(&self, country_key: &str) -> Result<Vec<VpsServer>, LedgerError> {
        let rows = sqlx::query(
            "SELECT * FROM vps_servers WHERE country_key = $1 ORDER BY nickname ASC",
        )
        .bind(country_key)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(Self::row_to_server).collect())
    }

    pub async fn by_id(&self, id: i64) -> Result<Option<VpsServer>, LedgerError> {
        let row = sqlx::query("SELECT * FROM vps_servers WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| Self::row_to_server(&r)))
    }

    pub async fn all(&self) -> Result<Vec<VpsServer>, LedgerError> {
        let rows = sqlx::query("SELECT * FROM vps_servers ORDER BY country_key, nickname")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(Self::row_to_server).collect())
    }

    /// Replace a server's config blob list (used by the sync passthrough).
    pub async fn set_configs(&self, id: i64, configs: &[String]) -> Result<(), LedgerError> {
        sqlx::query("UPDATE vps_servers SET configs = $1 WHERE id = $2")
            .bind(serde_json::to_value(configs)?)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
