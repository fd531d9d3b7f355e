use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};

use super::{LedgerTransaction, NewRefreshToken, RefreshTokenLedger, RefreshTokenRecord};
use crate::error::AppError;

/// Postgres-backed ledger over the `refresh_tokens` table
#[derive(Clone)]
pub struct PgLedger {
    pool: PgPool,
}

impl PgLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RefreshTokenLedger for PgLedger {
    async fn begin(&self) -> Result<Box<dyn LedgerTransaction>, AppError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgLedgerTransaction { tx }))
    }
}

pub struct PgLedgerTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl LedgerTransaction for PgLedgerTransaction {
    async fn lock_user(&mut self, user_id: i64) -> Result<(), AppError> {
        // Released automatically on commit or rollback.
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(user_id)
            .execute(&mut *self.tx)
            .await?;

        Ok(())
    }

    async fn create(&mut self, token: NewRefreshToken) -> Result<RefreshTokenRecord, AppError> {
        let record = sqlx::query_as::<_, RefreshTokenRecord>(
            r#"
            INSERT INTO refresh_tokens (token_id, user_id, expires_at)
            VALUES ($1, $2, $3)
            RETURNING id, token_id, user_id, is_revoked, expires_at, created_at
            "#,
        )
        .bind(&token.token_id)
        .bind(token.user_id)
        .bind(token.expires_at)
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(record)
    }

    async fn get_by_token_id(&mut self, token_id: &str) -> Result<RefreshTokenRecord, AppError> {
        // FOR UPDATE: a racing rotation blocks here until we commit, then
        // observes the row as revoked.
        let record = sqlx::query_as::<_, RefreshTokenRecord>(
            r#"
            SELECT id, token_id, user_id, is_revoked, expires_at, created_at
            FROM refresh_tokens
            WHERE token_id = $1
            FOR UPDATE
            "#,
        )
        .bind(token_id)
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(record)
    }

    async fn revoke(&mut self, record: &mut RefreshTokenRecord) -> Result<(), AppError> {
        sqlx::query("UPDATE refresh_tokens SET is_revoked = true WHERE id = $1")
            .bind(record.id)
            .execute(&mut *self.tx)
            .await?;

        record.is_revoked = true;
        Ok(())
    }

    async fn revoke_all_from_user(&mut self, user_id: i64) -> Result<u64, AppError> {
        let result = sqlx::query("UPDATE refresh_tokens SET is_revoked = true WHERE user_id = $1")
            .bind(user_id)
            .execute(&mut *self.tx)
            .await?;

        Ok(result.rows_affected())
    }

    async fn commit(self: Box<Self>) -> Result<(), AppError> {
        let PgLedgerTransaction { tx } = *self;
        tx.commit().await?;
        Ok(())
    }
}
