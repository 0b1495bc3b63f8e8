pub mod payment_repo;
pub mod plan_repo;
pub mod promo_repo;
pub mod user_repo;
pub mod vps_repo;

use thiserror::Error;

/// Failures surfaced by ledger mutations. Business-rule variants are caught
/// at the dispatch branch and turned into user-facing messages; `Db` is
/// logged with context and degrades the branch.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("user not found")]
    NotFound,
    #[error("insufficient referral balance")]
    InsufficientBalance,
    #[error("gift not found at the given position")]
    GiftNotFound,
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
    #[error("stored record is malformed: {0}")]
    Corrupt(#[from] serde_json::Error),
}
