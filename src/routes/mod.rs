mod auth;
mod health_check;

pub use auth::{login, logout, refresh, LoginRequest, RefreshRequest, TokenResponse};
pub use health_check::health_check;
