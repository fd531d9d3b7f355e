/// JWT Claims structures
///
/// Access and refresh tokens carry different payloads. Both encode the
/// numeric user id as a decimal string in `sub`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AuthError};

/// Claims for access tokens
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AccessClaims {
    /// User id (same value as `sub`)
    #[serde(rename = "userId")]
    pub user_id: String,
    /// Subject (user id)
    pub sub: String,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    pub iss: String,
}

impl AccessClaims {
    pub fn new(subject: &str, expires_at: DateTime<Utc>, issuer: &str) -> Self {
        Self {
            user_id: subject.to_string(),
            sub: subject.to_string(),
            exp: expires_at.timestamp(),
            iat: Utc::now().timestamp(),
            iss: issuer.to_string(),
        }
    }

    /// Numeric user id carried by the token
    ///
    /// # Errors
    /// `AuthError::TokenInvalid` if the claim is not a number
    pub fn user_id(&self) -> Result<i64, AppError> {
        parse_subject(&self.user_id)
    }
}

/// Claims for refresh tokens. `jti` points at the ledger row.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RefreshClaims {
    pub jti: String,
    pub sub: String,
    pub exp: i64,
    pub iat: i64,
    pub iss: String,
}

impl RefreshClaims {
    pub fn new(token_id: &str, subject: &str, expires_at: DateTime<Utc>, issuer: &str) -> Self {
        Self {
            jti: token_id.to_string(),
            sub: subject.to_string(),
            exp: expires_at.timestamp(),
            iat: Utc::now().timestamp(),
            iss: issuer.to_string(),
        }
    }

    pub fn user_id(&self) -> Result<i64, AppError> {
        parse_subject(&self.sub)
    }
}

fn parse_subject(subject: &str) -> Result<i64, AppError> {
    subject.parse::<i64>().map_err(|_| {
        tracing::warn!(subject = %subject, "Token subject is not a user id");
        AppError::Auth(AuthError::TokenInvalid)
    })
}
