use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::{LedgerTransaction, NewRefreshToken, RefreshTokenLedger, RefreshTokenRecord};
use crate::error::{AppError, DatabaseError};

/// Ledger operations that can be made to fail in tests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerOperation {
    Begin,
    LockUser,
    Create,
    GetByTokenId,
    Revoke,
    RevokeAllFromUser,
    Commit,
}

#[derive(Debug, Clone, Default)]
struct LedgerState {
    rows: Vec<RefreshTokenRecord>,
    next_id: i64,
}

/// In-process ledger used by tests and local runs
///
/// A transaction holds the store's lock from `begin` until it is committed
/// or dropped, so transactions are fully serialized. Writes go to a staged
/// copy and only replace the store on `commit`.
#[derive(Clone, Default)]
pub struct InMemoryLedger {
    state: Arc<Mutex<LedgerState>>,
    failing: Option<LedgerOperation>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// A handle on the same store whose transactions fail at `operation`
    pub fn failing_on(&self, operation: LedgerOperation) -> Self {
        Self {
            state: self.state.clone(),
            failing: Some(operation),
        }
    }

    /// Committed rows, oldest first
    pub async fn records(&self) -> Vec<RefreshTokenRecord> {
        self.state.lock().await.rows.clone()
    }

    pub async fn records_for_user(&self, user_id: i64) -> Vec<RefreshTokenRecord> {
        self.records()
            .await
            .into_iter()
            .filter(|record| record.user_id == user_id)
            .collect()
    }
}

fn check(failing: Option<LedgerOperation>, operation: LedgerOperation) -> Result<(), AppError> {
    if failing == Some(operation) {
        return Err(AppError::Database(DatabaseError::UnexpectedError(format!(
            "injected failure on {:?}",
            operation
        ))));
    }
    Ok(())
}

#[async_trait]
impl RefreshTokenLedger for InMemoryLedger {
    async fn begin(&self) -> Result<Box<dyn LedgerTransaction>, AppError> {
        check(self.failing, LedgerOperation::Begin)?;

        let guard = self.state.clone().lock_owned().await;
        let staged = guard.clone();
        Ok(Box::new(InMemoryTransaction {
            guard,
            staged,
            failing: self.failing,
        }))
    }
}

pub struct InMemoryTransaction {
    guard: OwnedMutexGuard<LedgerState>,
    staged: LedgerState,
    failing: Option<LedgerOperation>,
}

#[async_trait]
impl LedgerTransaction for InMemoryTransaction {
    async fn lock_user(&mut self, _user_id: i64) -> Result<(), AppError> {
        // The store lock taken in `begin` already covers every user.
        check(self.failing, LedgerOperation::LockUser)
    }

    async fn create(&mut self, token: NewRefreshToken) -> Result<RefreshTokenRecord, AppError> {
        check(self.failing, LedgerOperation::Create)?;

        if self.staged.rows.iter().any(|r| r.token_id == token.token_id) {
            return Err(AppError::Database(DatabaseError::UniqueConstraintViolation(
                format!("token_id {} already exists", token.token_id),
            )));
        }

        self.staged.next_id += 1;
        let record = RefreshTokenRecord {
            id: self.staged.next_id,
            token_id: token.token_id,
            user_id: token.user_id,
            is_revoked: false,
            expires_at: token.expires_at,
            created_at: Utc::now(),
        };
        self.staged.rows.push(record.clone());
        Ok(record)
    }

    async fn get_by_token_id(&mut self, token_id: &str) -> Result<RefreshTokenRecord, AppError> {
        check(self.failing, LedgerOperation::GetByTokenId)?;

        self.staged
            .rows
            .iter()
            .find(|r| r.token_id == token_id)
            .cloned()
            .ok_or_else(|| {
                AppError::Database(DatabaseError::NotFound("Record not found".to_string()))
            })
    }

    async fn revoke(&mut self, record: &mut RefreshTokenRecord) -> Result<(), AppError> {
        check(self.failing, LedgerOperation::Revoke)?;

        let row = self
            .staged
            .rows
            .iter_mut()
            .find(|r| r.id == record.id)
            .ok_or_else(|| {
                AppError::Database(DatabaseError::NotFound("Record not found".to_string()))
            })?;
        row.is_revoked = true;
        record.is_revoked = true;
        Ok(())
    }

    async fn revoke_all_from_user(&mut self, user_id: i64) -> Result<u64, AppError> {
        check(self.failing, LedgerOperation::RevokeAllFromUser)?;

        let mut affected = 0;
        for row in self.staged.rows.iter_mut().filter(|r| r.user_id == user_id) {
            row.is_revoked = true;
            affected += 1;
        }
        Ok(affected)
    }

    async fn commit(self: Box<Self>) -> Result<(), AppError> {
        check(self.failing, LedgerOperation::Commit)?;

        let InMemoryTransaction {
            mut guard, staged, ..
        } = *self;
        *guard = staged;
        Ok(())
    }
}
