use async_trait::async_trait;
use sqlx::PgPool;

use super::{Credential, UserDirectory};
use crate::error::AppError;

#[derive(Clone)]
pub struct PgUserDirectory {
    pool: PgPool,
}

impl PgUserDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserDirectory for PgUserDirectory {
    async fn find_by_username(&self, username: &str) -> Result<Credential, AppError> {
        let credential = sqlx::query_as::<_, Credential>(
            "SELECT id, username, password_hash, email FROM users WHERE username = $1",
        )
        .bind(username)
        .fetch_one(&self.pool)
        .await?;

        Ok(credential)
    }
}
