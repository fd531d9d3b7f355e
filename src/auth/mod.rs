/// Authentication module
///
/// Token codec, password hashing and the auth service that ties them to
/// the refresh-token ledger.

mod claims;
mod jwt;
mod password;
mod service;

pub use claims::{AccessClaims, RefreshClaims};
pub use jwt::{issue_access_token, issue_refresh_token, parse_token};
pub use password::{BcryptHasher, PasswordHasher};
pub use service::{AuthService, IssuedTokens};
