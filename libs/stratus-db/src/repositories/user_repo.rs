use chrono::{DateTime, Days, NaiveDate, Utc};
use sqlx::{postgres::PgRow, PgPool, Row};
use tracing::warn;

use crate::models::store::{
    extended_expiry, reward_cents, reward_percent, upsert_referral_entry, Gift, ReferralEntry,
    ReferralReward, ReferredBy, User, PHASE_ENDING, PHASE_LIVE,
};
use crate::repositories::LedgerError;

type Result<T> = std::result::Result<T, LedgerError>;

/// The User Ledger: subscription lifetime, referral balance, and gift
/// inventory per Telegram identity. Every mutation that two concurrent
/// webhook deliveries could race on is a single conditional statement
/// against the row, never a separate read followed by an unconditional
/// write.
#[derive(Debug, Clone)]
pub struct UserRepository {
    pool: PgPool,
    trial_days: u64,
}

impl UserRepository {
    pub fn new(pool: PgPool, trial_days: u64) -> Self {
        Self { pool, trial_days }
    }

    fn row_to_user(row: &PgRow) -> User {
        let referrals: Vec<ReferralEntry> = row
            .try_get::<serde_json::Value, _>("referrals")
            .ok()
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default();
        let referred_by: Option<ReferredBy> = row
            .try_get::<Option<serde_json::Value>, _>("referred_by")
            .ok()
            .flatten()
            .and_then(|v| serde_json::from_value(v).ok());
        let gifts: Vec<Gift> = row
            .try_get::<serde_json::Value, _>("gifts")
            .ok()
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default();

        User {
            tg_id: row.try_get::<i64, _>("tg_id").unwrap_or_default(),
            username: row.try_get::<Option<String>, _>("username").ok().flatten(),
            active: row.try_get::<bool, _>("active").unwrap_or(false),
            phase: row.try_get::<Option<String>, _>("phase").ok().flatten(),
            expires_at: row
                .try_get::<Option<NaiveDate>, _>("expires_at")
                .ok()
                .flatten(),
            balance_cents: row.try_get::<i64, _>("balance_cents").unwrap_or_default(),
            referral_count: row
                .try_get::<i32, _>("referral_count")
                .unwrap_or_default(),
            referrals,
            referred_by,
            gifts,
            traffic_used_mb: row
                .try_get::<i64, _>("traffic_used_mb")
                .unwrap_or_default(),
            connection_count: row
                .try_get::<i32, _>("connection_count")
                .unwrap_or_default(),
            created_at: row
                .try_get::<DateTime<Utc>, _>("created_at")
                .unwrap_or_else(|_| Utc::now()),
        }
    }

    pub async fn get(&self, tg_id: i64) -> Result<Option<User>> {
        let row = sqlx::query("SELECT * FROM users WHERE tg_id = $1")
            .bind(tg_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| Self::row_to_user(&r)))
    }

    /// Case-insensitive nickname lookup; a leading `@` is stripped.
    pub async fn get_by_username(&self, username: &str) -> Result<Option<User>> {
        let name = username.trim().trim_start_matches('@');
        if name.is_empty() {
            return Ok(None);
        }
        let row = sqlx::query("SELECT * FROM users WHERE LOWER(username) = LOWER($1)")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| Self::row_to_user(&r)))
    }

    /// Idempotent get-or-create. A freshly created identity gets the trial
    /// grant and, when provided, an immutable referrer backlink; the
    /// referrer's list and counter are updated in the same transaction.
    /// A concurrent create loses the `ON CONFLICT` race benignly and falls
    /// through to the re-read path.
    pub async fn ensure(
        &self,
        tg_id: i64,
        username: Option<&str>,
        referred_by: Option<ReferredBy>,
    ) -> Result<(User, bool)> {
        // A self-referral is never stored.
        let referred_by = referred_by.filter(|r| r.tg_id != tg_id);

        let today = Utc::now().date_naive();
        let trial_expiry = today
            .checked_add_days(Days::new(self.trial_days))
            .unwrap_or(today);
        let referred_by_json = referred_by
            .as_ref()
            .map(serde_json::to_value)
            .transpose()?;

        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO users (tg_id, username, active, phase, expires_at, referred_by)
            VALUES ($1, $2, TRUE, $3, $4, $5)
            ON CONFLICT (tg_id) DO NOTHING
            RETURNING *
            "#,
        )
        .bind(tg_id)
        .bind(username)
        .bind(PHASE_ENDING)
        .bind(trial_expiry)
        .bind(referred_by_json)
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(row) = inserted {
            let user = Self::row_to_user(&row);
            if let Some(rb) = &user.referred_by {
                Self::register_referral(&mut tx, rb.tg_id, tg_id, username).await?;
            }
            tx.commit().await?;
            return Ok((user, true));
        }
        tx.commit().await?;

        let user = self.get(tg_id).await?.ok_or(LedgerError::NotFound)?;
        if username.is_some() && user.username.as_deref() != username {
            let row = sqlx::query("UPDATE users SET username = $1 WHERE tg_id = $2 RETURNING *")
                .bind(username)
                .bind(tg_id)
                .fetch_one(&self.pool)
                .await?;
            return Ok((Self::row_to_user(&row), false));
        }
        Ok((user, false))
    }

    async fn register_referral(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        referrer_tg_id: i64,
        referred_tg_id: i64,
        referred_login: Option<&str>,
    ) -> Result<()> {
        let row = sqlx::query("SELECT referrals FROM users WHERE tg_id = $1 FOR UPDATE")
            .bind(referrer_tg_id)
            .fetch_optional(&mut **tx)
            .await?;
        let Some(row) = row else {
            warn!(
                "Referrer {} vanished before registering referral of {}",
                referrer_tg_id, referred_tg_id
            );
            return Ok(());
        };

        let mut list: Vec<ReferralEntry> =
            serde_json::from_value(row.try_get::<serde_json::Value, _>("referrals")?)?;
        let idx = upsert_referral_entry(&mut list, referred_tg_id);
        list[idx].login = referred_login.map(str::to_owned);
        list[idx].nickname = referred_login.map(str::to_owned);

        sqlx::query(
            "UPDATE users SET referrals = $1, referral_count = referral_count + 1 WHERE tg_id = $2",
        )
        .bind(serde_json::to_value(&list)?)
        .bind(referrer_tg_id)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    /// Extend the subscription by whole calendar months from
    /// `max(today, current expiry)`.
    pub async fn activate_subscription(
        &self,
        tg_id: i64,
        username: Option<&str>,
        months: u32,
    ) -> Result<User> {
        let user = self.get(tg_id).await?.ok_or(LedgerError::NotFound)?;
        let today = Utc::now().date_naive();
        let new_expiry = extended_expiry(user.expires_at, today, months);

        let row = sqlx::query(
            r#"
            UPDATE users
            SET expires_at = $2, phase = $3, active = TRUE,
                username = COALESCE($4, username)
            WHERE tg_id = $1
            RETURNING *
            "#,
        )
        .bind(tg_id)
        .bind(new_expiry)
        .bind(PHASE_LIVE)
        .bind(username)
        .fetch_one(&self.pool)
        .await?;
        Ok(Self::row_to_user(&row))
    }

    /// Balance-funded prolongation. The debit and the extension are one
    /// conditional statement keyed on "balance >= amount at time of write",
    /// so two concurrent prolongations cannot both pass a stale check.
    pub async fn activate_from_balance(
        &self,
        tg_id: i64,
        username: Option<&str>,
        months: u32,
        amount_cents: i64,
    ) -> Result<User> {
        let row = sqlx::query(
            r#"
            UPDATE users
            SET balance_cents = balance_cents - $2,
                expires_at = (GREATEST(COALESCE(expires_at, CURRENT_DATE), CURRENT_DATE)
                              + make_interval(months => $3))::date,
                phase = $4, active = TRUE,
                username = COALESCE($5, username)
            WHERE tg_id = $1 AND balance_cents >= $2
            RETURNING *
            "#,
        )
        .bind(tg_id)
        .bind(amount_cents)
        .bind(months as i32)
        .bind(PHASE_LIVE)
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Self::row_to_user(&row)),
            None => {
                if self.get(tg_id).await?.is_some() {
                    Err(LedgerError::InsufficientBalance)
                } else {
                    Err(LedgerError::NotFound)
                }
            }
        }
    }

    /// Credit the payer's referrer after a validated card/stars purchase:
    /// 20% of the catalog price on the payer's first recorded purchase,
    /// 10% afterwards. No-op when the payer has no referrer.
    pub async fn apply_referral_reward(
        &self,
        payer_tg_id: i64,
        payer_username: Option<&str>,
        amount_cents: i64,
    ) -> Result<Option<ReferralReward>> {
        let Some(payer) = self.get(payer_tg_id).await? else {
            return Ok(None);
        };
        let Some(referrer_tg_id) = payer.referred_by.map(|rb| rb.tg_id) else {
            return Ok(None);
        };
        if referrer_tg_id == payer_tg_id {
            return Ok(None);
        }

        let mut tx = self.pool.begin().await?;
        let row = sqlx::query("SELECT referrals FROM users WHERE tg_id = $1 FOR UPDATE")
            .bind(referrer_tg_id)
            .fetch_optional(&mut *tx)
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };

        let mut list: Vec<ReferralEntry> =
            serde_json::from_value(row.try_get::<serde_json::Value, _>("referrals")?)?;
        let idx = upsert_referral_entry(&mut list, payer_tg_id);
        list[idx].purchases += 1;
        if payer_username.is_some() {
            list[idx].login = payer_username.map(str::to_owned);
            list[idx].nickname = payer_username.map(str::to_owned);
        }
        let purchases = list[idx].purchases;
        let percent = reward_percent(purchases);
        let reward = reward_cents(amount_cents, percent);

        sqlx::query(
            "UPDATE users SET referrals = $1, balance_cents = balance_cents + $2 WHERE tg_id = $3",
        )
        .bind(serde_json::to_value(&list)?)
        .bind(reward)
        .bind(referrer_tg_id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        Ok(Some(ReferralReward {
            referrer_tg_id,
            reward_cents: reward,
            percent,
            purchases,
        }))
    }

    /// Ensure the recipient exists (linking the giver as referrer when the
    /// row is created) and append a gift entry dated today. The append is a
    /// JSONB concatenation, atomic against concurrent gift mutations.
    pub async fn add_gift(
        &self,
        recipient_tg_id: i64,
        recipient_username: Option<&str>,
        giver_tg_id: i64,
        giver_name: &str,
        months: u32,
        referred_by_on_create: Option<ReferredBy>,
    ) -> Result<User> {
        self.ensure(recipient_tg_id, recipient_username, referred_by_on_create)
            .await?;

        let gift = Gift {
            giver_tg_id,
            giver_name: giver_name.to_owned(),
            months,
            granted_at: Utc::now().date_naive(),
        };
        let row = sqlx::query(
            "UPDATE users SET gifts = gifts || $1::jsonb WHERE tg_id = $2 RETURNING *",
        )
        .bind(serde_json::to_value(vec![&gift])?)
        .bind(recipient_tg_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(Self::row_to_user(&row))
    }

    /// Activate the gift at `index`, then drop it from the list. The write
    /// compares against the previously read list, so a stale index under a
    /// concurrent removal fails with `GiftNotFound` instead of activating
    /// the wrong gift.
    pub async fn activate_gift(
        &self,
        tg_id: i64,
        username: Option<&str>,
        index: usize,
    ) -> Result<(Gift, User)> {
        let user = self.get(tg_id).await?.ok_or(LedgerError::NotFound)?;
        let gift = user
            .gifts
            .get(index)
            .cloned()
            .ok_or(LedgerError::GiftNotFound)?;

        let today = Utc::now().date_naive();
        let new_expiry = extended_expiry(user.expires_at, today, gift.months);
        let mut remaining = user.gifts.clone();
        remaining.remove(index);

        let row = sqlx::query(
            r#"
            UPDATE users
            SET gifts = $2, expires_at = $3, phase = $4, active = TRUE,
                username = COALESCE($5, username)
            WHERE tg_id = $1 AND gifts = $6
            RETURNING *
            "#,
        )
        .bind(tg_id)
        .bind(serde_json::to_value(&remaining)?)
        .bind(new_expiry)
        .bind(PHASE_LIVE)
        .bind(username)
        .bind(serde_json::to_value(&user.gifts)?)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok((gift, Self::row_to_user(&row))),
            None => Err(LedgerError::GiftNotFound),
        }
    }

    /// Informational counters refreshed by the VPS sync passthrough.
    pub async fn update_counters(
        &self,
        tg_id: i64,
        traffic_used_mb: i64,
        connection_count: i32,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE users SET traffic_used_mb = $1, connection_count = $2 WHERE tg_id = $3",
        )
        .bind(traffic_used_mb)
        .bind(connection_count)
        .bind(tg_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
