/// User Directory
///
/// Read-only credential lookup used by login. Accounts themselves are
/// managed elsewhere.

mod memory;
mod postgres;

pub use memory::InMemoryUserDirectory;
pub use postgres::PgUserDirectory;

use async_trait::async_trait;

use crate::error::AppError;

/// Credential record for one user
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Credential {
    pub id: i64,
    pub username: String,
    pub password_hash: String,
    pub email: String,
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// # Errors
    /// `DatabaseError::NotFound` if no user has this username
    async fn find_by_username(&self, username: &str) -> Result<Credential, AppError>;
}
