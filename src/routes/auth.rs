/// Authentication Routes
///
/// Login, token refresh and logout.

use actix_web::{web, HttpResponse};
use serde::{Deserialize, Serialize};

use crate::auth::{AuthService, IssuedTokens};
use crate::error::{AppError, AuthError, ErrorContext, ValidationError};
use crate::middleware::AuthenticatedUser;

/// User login request
#[derive(Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// Token refresh request
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    pub refresh_token: String,
}

/// Access and refresh token pair
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
}

impl From<IssuedTokens> for TokenResponse {
    fn from(tokens: IssuedTokens) -> Self {
        Self {
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
        }
    }
}

fn required(value: &str, field: &'static str) -> Result<(), AppError> {
    if value.is_empty() {
        return Err(ValidationError::EmptyField(field).into());
    }
    Ok(())
}

/// POST /auth/login
///
/// # Errors
/// - 400: Malformed body or empty field
/// - 401: Invalid credentials (same response for unknown user and wrong password)
/// - 500: Internal server error
pub async fn login(
    form: web::Json<LoginRequest>,
    auth: web::Data<AuthService>,
) -> Result<HttpResponse, AppError> {
    let context = ErrorContext::new("user_login");

    // Passwords are taken verbatim; only the username is trimmed for the check.
    required(form.username.trim(), "username")?;
    required(&form.password, "password")?;

    let tokens = auth
        .login(&form.username, &form.password)
        .await
        .map_err(|e| {
            context.log_error(&e);
            e
        })?;

    tracing::info!(request_id = %context.request_id, "Login succeeded");

    Ok(HttpResponse::Ok().json(TokenResponse::from(tokens)))
}

/// POST /auth/refresh
///
/// Rotates the presented refresh token. Presenting an already-rotated token
/// revokes every session of its owner.
///
/// # Errors
/// - 400: Malformed body or empty token
/// - 401: Invalid, expired, unknown or reused refresh token
/// - 500: Internal server error
pub async fn refresh(
    form: web::Json<RefreshRequest>,
    auth: web::Data<AuthService>,
) -> Result<HttpResponse, AppError> {
    let context = ErrorContext::new("token_refresh");

    required(&form.refresh_token, "refreshToken")?;

    let tokens = auth.refresh(&form.refresh_token).await.map_err(|e| {
        context.log_error(&e);
        // A signed token without a ledger row is just another invalid token.
        if e.is_not_found() {
            AppError::Auth(AuthError::TokenInvalid)
        } else {
            e
        }
    })?;

    tracing::info!(request_id = %context.request_id, "Token refreshed");

    Ok(HttpResponse::Ok().json(TokenResponse::from(tokens)))
}

/// POST /auth/logout
///
/// **Requires valid JWT access token** in Authorization header.
///
/// # Errors
/// - 401: Missing or invalid token
/// - 500: Internal server error
pub async fn logout(
    user: AuthenticatedUser,
    auth: web::Data<AuthService>,
) -> Result<HttpResponse, AppError> {
    let context = ErrorContext::new("user_logout").with_user_id(user.user_id);

    auth.logout(user.user_id).await.map_err(|e| {
        context.log_error(&e);
        e
    })?;

    Ok(HttpResponse::Ok().json(serde_json::json!({ "status": "success" })))
}
