/// Refresh Token Ledger
///
/// Durable record of every issued refresh token. Rows are never deleted;
/// rotation and logout only flip `is_revoked`, which leaves an audit trail.
///
/// All access goes through a `LedgerTransaction` so the auth service can
/// revoke and reissue as one atomic unit. Dropping a transaction without
/// calling `commit` rolls it back.

mod memory;
mod postgres;

pub use memory::{InMemoryLedger, LedgerOperation};
pub use postgres::PgLedger;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::AppError;

/// A stored refresh token
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct RefreshTokenRecord {
    /// Storage key, never exposed
    pub id: i64,
    /// The token's `jti`
    pub token_id: String,
    pub user_id: i64,
    pub is_revoked: bool,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Insert payload for a new refresh token
#[derive(Debug, Clone)]
pub struct NewRefreshToken {
    pub token_id: String,
    pub user_id: i64,
    pub expires_at: DateTime<Utc>,
}

/// Opens units of work against the ledger
#[async_trait]
pub trait RefreshTokenLedger: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn LedgerTransaction>, AppError>;
}

/// One open transaction on the ledger
#[async_trait]
pub trait LedgerTransaction: Send {
    /// Hold an exclusive per-user lock until the transaction ends.
    ///
    /// Every transaction that revokes or issues tokens for a user takes this
    /// first, so login, refresh and logout of the same user never interleave.
    async fn lock_user(&mut self, user_id: i64) -> Result<(), AppError>;

    /// Insert a new row
    ///
    /// # Errors
    /// `DatabaseError::UniqueConstraintViolation` if `token_id` already exists
    async fn create(&mut self, token: NewRefreshToken) -> Result<RefreshTokenRecord, AppError>;

    /// Point lookup by `jti`. The row stays locked until the transaction ends,
    /// so concurrent rotations of the same token are serialized.
    ///
    /// # Errors
    /// `DatabaseError::NotFound` if no row has this `token_id`
    async fn get_by_token_id(&mut self, token_id: &str) -> Result<RefreshTokenRecord, AppError>;

    /// Mark a single row revoked
    async fn revoke(&mut self, record: &mut RefreshTokenRecord) -> Result<(), AppError>;

    /// Mark every row owned by `user_id` revoked. Returns the number of rows.
    async fn revoke_all_from_user(&mut self, user_id: i64) -> Result<u64, AppError>;

    async fn commit(self: Box<Self>) -> Result<(), AppError>;
}
