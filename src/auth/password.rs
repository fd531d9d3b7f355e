/// Password Hashing and Verification
///
/// The auth service only depends on the `PasswordHasher` trait; production
/// uses bcrypt.

use bcrypt::{hash, verify, DEFAULT_COST};

use crate::error::AppError;

/// One-way hashing of plaintext credentials
pub trait PasswordHasher: Send + Sync {
    /// Hash a plaintext password
    ///
    /// # Errors
    /// Returns error if hashing fails
    fn hash(&self, password: &str) -> Result<String, AppError>;

    /// Check a plaintext password against a stored hash
    ///
    /// # Errors
    /// Returns error if the stored hash cannot be parsed
    fn verify(&self, password: &str, password_hash: &str) -> Result<bool, AppError>;
}

/// bcrypt with a configurable work factor
#[derive(Debug, Clone)]
pub struct BcryptHasher {
    cost: u32,
}

impl BcryptHasher {
    pub fn new(cost: u32) -> Self {
        Self { cost }
    }
}

impl Default for BcryptHasher {
    fn default() -> Self {
        Self::new(DEFAULT_COST)
    }
}

impl PasswordHasher for BcryptHasher {
    fn hash(&self, password: &str) -> Result<String, AppError> {
        hash(password, self.cost)
            .map_err(|e| AppError::Internal(format!("Password hashing failed: {}", e)))
    }

    fn verify(&self, password: &str, password_hash: &str) -> Result<bool, AppError> {
        verify(password, password_hash)
            .map_err(|e| AppError::Internal(format!("Password verification failed: {}", e)))
    }
}
