use std::collections::HashMap;

use async_trait::async_trait;

use super::{Credential, UserDirectory};
use crate::error::{AppError, DatabaseError};

/// Fixed set of users, keyed by username
#[derive(Debug, Clone, Default)]
pub struct InMemoryUserDirectory {
    users: HashMap<String, Credential>,
}

impl InMemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user(mut self, credential: Credential) -> Self {
        self.users.insert(credential.username.clone(), credential);
        self
    }
}

#[async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn find_by_username(&self, username: &str) -> Result<Credential, AppError> {
        self.users.get(username).cloned().ok_or_else(|| {
            AppError::Database(DatabaseError::NotFound(format!("user {}", username)))
        })
    }
}
