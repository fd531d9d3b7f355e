/// JWT Token Generation and Validation
///
/// Signs and parses the two token classes. The accepted algorithm is pinned
/// to HS256 so a token declaring any other `alg` is rejected.

use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::auth::claims::{AccessClaims, RefreshClaims};
use crate::error::{AppError, AuthError};

const ALGORITHM: Algorithm = Algorithm::HS256;

/// Issue a signed access token for `subject`
///
/// # Errors
/// Returns `AppError::Internal` if signing fails
pub fn issue_access_token(
    subject: &str,
    expires_at: DateTime<Utc>,
    secret: &str,
    issuer: &str,
) -> Result<String, AppError> {
    sign(&AccessClaims::new(subject, expires_at, issuer), secret)
}

/// Issue a signed refresh token whose `jti` is `token_id`
///
/// # Errors
/// Returns `AppError::Internal` if signing fails
pub fn issue_refresh_token(
    token_id: &str,
    subject: &str,
    expires_at: DateTime<Utc>,
    secret: &str,
    issuer: &str,
) -> Result<String, AppError> {
    sign(
        &RefreshClaims::new(token_id, subject, expires_at, issuer),
        secret,
    )
}

fn sign<C: Serialize>(claims: &C, secret: &str) -> Result<String, AppError> {
    encode(
        &Header::new(ALGORITHM),
        claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| AppError::Internal(format!("Token generation failed: {}", e)))
}

/// Verify `token` against `secret` and decode it into `C`
///
/// Expiry is enforced with no leeway.
///
/// # Errors
/// Returns `AuthError::TokenInvalid` if the token is malformed, tampered
/// with, signed with another algorithm or secret, expired, or issued by
/// someone else
pub fn parse_token<C: DeserializeOwned>(
    token: &str,
    secret: &str,
    issuer: &str,
) -> Result<C, AppError> {
    let mut validation = Validation::new(ALGORITHM);
    validation.leeway = 0;
    validation.set_issuer(&[issuer]);
    validation.set_required_spec_claims(&["exp", "sub", "iss"]);

    decode::<C>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map(|data| data.claims)
    .map_err(|e| {
        tracing::debug!(reason = ?e.kind(), "JWT validation failed");
        AppError::Auth(AuthError::TokenInvalid)
    })
}
