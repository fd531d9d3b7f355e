/// Auth Service
///
/// Login, access-token verification, refresh-token rotation and logout.
///
/// Refresh tokens are single use. Presenting one that was already revoked
/// means either a client replay bug or a stolen token; the two cannot be told
/// apart, so every session of the owner is revoked and the call fails.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::auth::claims::{AccessClaims, RefreshClaims};
use crate::auth::jwt::{issue_access_token, issue_refresh_token, parse_token};
use crate::auth::password::PasswordHasher;
use crate::configuration::JwtSettings;
use crate::error::{AppError, AuthError};
use crate::ledger::{LedgerTransaction, NewRefreshToken, RefreshTokenLedger};
use crate::users::UserDirectory;

/// An access/refresh pair handed to the client
#[derive(Debug, Clone)]
pub struct IssuedTokens {
    pub access_token: String,
    pub refresh_token: String,
    pub access_expires_at: DateTime<Utc>,
    pub refresh_expires_at: DateTime<Utc>,
}

pub struct AuthService {
    ledger: Arc<dyn RefreshTokenLedger>,
    users: Arc<dyn UserDirectory>,
    passwords: Arc<dyn PasswordHasher>,
    settings: JwtSettings,
    /// Verified against on unknown usernames so both failure paths pay for a hash
    dummy_hash: String,
}

const DUMMY_PASSWORD: &str = "expense-auth-dummy-password";

impl AuthService {
    /// # Errors
    /// Returns `AppError::Config` if the JWT settings are unusable
    pub fn new(
        ledger: Arc<dyn RefreshTokenLedger>,
        users: Arc<dyn UserDirectory>,
        passwords: Arc<dyn PasswordHasher>,
        settings: JwtSettings,
    ) -> Result<Self, AppError> {
        settings.validate()?;
        let dummy_hash = passwords.hash(DUMMY_PASSWORD)?;
        Ok(Self {
            ledger,
            users,
            passwords,
            settings,
            dummy_hash,
        })
    }

    /// Authenticate with username and password
    ///
    /// Every refresh token previously issued to the user is revoked in the
    /// same transaction that stores the new one.
    ///
    /// # Errors
    /// - `AuthError::InvalidCredentials` for an unknown user or wrong password
    /// - storage and signing errors unchanged
    pub async fn login(&self, username: &str, password: &str) -> Result<IssuedTokens, AppError> {
        let credential = match self.users.find_by_username(username).await {
            Ok(credential) => credential,
            Err(e) if e.is_not_found() => {
                self.passwords.verify(password, &self.dummy_hash)?;
                tracing::info!("Login attempt for unknown username");
                return Err(AuthError::InvalidCredentials.into());
            }
            Err(e) => return Err(e),
        };

        if !self.passwords.verify(password, &credential.password_hash)? {
            tracing::info!(user_id = credential.id, "Login attempt with wrong password");
            return Err(AuthError::InvalidCredentials.into());
        }

        let mut tx = self.ledger.begin().await?;
        tx.lock_user(credential.id).await?;
        let revoked = tx.revoke_all_from_user(credential.id).await?;
        let tokens = self.issue_tokens(tx.as_mut(), credential.id).await?;
        tx.commit().await?;

        tracing::info!(
            user_id = credential.id,
            revoked_sessions = revoked,
            "User logged in"
        );

        Ok(tokens)
    }

    /// Resolve an access token to its user id. Touches no storage.
    ///
    /// # Errors
    /// `AuthError::TokenInvalid` if the token does not verify
    pub fn verify(&self, access_token: &str) -> Result<i64, AppError> {
        let claims: AccessClaims = parse_token(
            access_token,
            &self.settings.access_secret,
            &self.settings.issuer,
        )?;
        claims.user_id()
    }

    /// Rotate a refresh token into a new pair
    ///
    /// # Errors
    /// - `AuthError::TokenInvalid` if the token does not verify or does not
    ///   match its ledger row
    /// - `DatabaseError::NotFound` if the ledger has no row for its `jti`
    /// - `AuthError::TokenReused` if the row was already revoked; all of the
    ///   owner's sessions are revoked before this is returned
    pub async fn refresh(&self, refresh_token: &str) -> Result<IssuedTokens, AppError> {
        let claims: RefreshClaims = parse_token(
            refresh_token,
            &self.settings.refresh_secret,
            &self.settings.issuer,
        )?;
        let subject = claims.user_id()?;

        let mut tx = self.ledger.begin().await?;
        tx.lock_user(subject).await?;
        let mut record = tx.get_by_token_id(&claims.jti).await?;

        if record.user_id != subject {
            tracing::warn!(
                token_owner = record.user_id,
                subject = subject,
                "Refresh token subject does not match ledger owner"
            );
            return Err(AuthError::TokenInvalid.into());
        }

        if record.is_revoked {
            let revoked = tx.revoke_all_from_user(record.user_id).await?;
            tx.commit().await?;

            tracing::warn!(
                user_id = record.user_id,
                token_id = %record.token_id,
                revoked_sessions = revoked,
                "Refresh token reuse detected, all sessions revoked"
            );
            return Err(AuthError::TokenReused.into());
        }

        tx.revoke(&mut record).await?;
        let tokens = self.issue_tokens(tx.as_mut(), record.user_id).await?;
        tx.commit().await?;

        tracing::info!(user_id = record.user_id, "Refresh token rotated");

        Ok(tokens)
    }

    /// Revoke every refresh token of `user_id`. Returns the number of rows.
    pub async fn logout(&self, user_id: i64) -> Result<u64, AppError> {
        let mut tx = self.ledger.begin().await?;
        tx.lock_user(user_id).await?;
        let revoked = tx.revoke_all_from_user(user_id).await?;
        tx.commit().await?;

        tracing::info!(user_id = user_id, revoked_sessions = revoked, "User logged out");

        Ok(revoked)
    }

    async fn issue_tokens(
        &self,
        tx: &mut dyn LedgerTransaction,
        user_id: i64,
    ) -> Result<IssuedTokens, AppError> {
        let subject = user_id.to_string();
        let now = Utc::now();

        let access_expires_at = now + Duration::seconds(self.settings.access_token_expiry);
        let access_token = issue_access_token(
            &subject,
            access_expires_at,
            &self.settings.access_secret,
            &self.settings.issuer,
        )?;

        let token_id = Uuid::new_v4().to_string();
        let refresh_expires_at = now + Duration::seconds(self.settings.refresh_token_expiry);
        let refresh_token = issue_refresh_token(
            &token_id,
            &subject,
            refresh_expires_at,
            &self.settings.refresh_secret,
            &self.settings.issuer,
        )?;

        tx.create(NewRefreshToken {
            token_id,
            user_id,
            expires_at: refresh_expires_at,
        })
        .await?;

        Ok(IssuedTokens {
            access_token,
            refresh_token,
            access_expires_at,
            refresh_expires_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::auth::password::BcryptHasher;
    use crate::configuration::{DEFAULT_ACCESS_TOKEN_EXPIRY, DEFAULT_REFRESH_TOKEN_EXPIRY};
    use crate::error::DatabaseError;
    use crate::ledger::{InMemoryLedger, LedgerOperation};
    use crate::users::{Credential, InMemoryUserDirectory};

    const ACCESS_SECRET: &str = "access-secret";
    const REFRESH_SECRET: &str = "refresh-secret";
    const ISSUER: &str = "test";
    const USER_ID: i64 = 1;

    fn settings() -> JwtSettings {
        JwtSettings {
            access_secret: ACCESS_SECRET.to_string(),
            refresh_secret: REFRESH_SECRET.to_string(),
            access_token_expiry: DEFAULT_ACCESS_TOKEN_EXPIRY,
            refresh_token_expiry: DEFAULT_REFRESH_TOKEN_EXPIRY,
            issuer: ISSUER.to_string(),
        }
    }

    fn users() -> InMemoryUserDirectory {
        let hasher = BcryptHasher::new(4);
        InMemoryUserDirectory::new().with_user(Credential {
            id: USER_ID,
            username: "test".to_string(),
            password_hash: hasher.hash("pwd123").unwrap(),
            email: "test@example.com".to_string(),
        })
    }

    fn service(ledger: &InMemoryLedger) -> AuthService {
        AuthService::new(
            Arc::new(ledger.clone()),
            Arc::new(users()),
            Arc::new(BcryptHasher::new(4)),
            settings(),
        )
        .expect("valid settings")
    }

    fn refresh_claims(token: &str) -> RefreshClaims {
        parse_token(token, REFRESH_SECRET, ISSUER).expect("refresh token should parse")
    }

    async fn seed(ledger: &InMemoryLedger, token_id: &str, user_id: i64) {
        let mut tx = ledger.begin().await.unwrap();
        tx.create(NewRefreshToken {
            token_id: token_id.to_string(),
            user_id,
            expires_at: Utc::now() + Duration::days(1),
        })
        .await
        .unwrap();
        tx.commit().await.unwrap();
    }

    fn assert_auth_error(result: Result<impl std::fmt::Debug, AppError>, expected: AuthError) {
        match result {
            Err(AppError::Auth(e)) => assert_eq!(e, expected),
            other => panic!("expected {:?}, got {:?}", expected, other),
        }
    }

    #[test]
    fn rejects_invalid_settings() {
        let mut bad = settings();
        bad.refresh_secret = bad.access_secret.clone();

        let result = AuthService::new(
            Arc::new(InMemoryLedger::new()),
            Arc::new(users()),
            Arc::new(BcryptHasher::new(4)),
            bad,
        );
        assert!(matches!(result, Err(AppError::Config(_))));
    }

    #[tokio::test]
    async fn login_issues_pair_for_user() {
        let ledger = InMemoryLedger::new();
        let tokens = service(&ledger).login("test", "pwd123").await.unwrap();

        let access: AccessClaims = parse_token(&tokens.access_token, ACCESS_SECRET, ISSUER).unwrap();
        assert_eq!(access.user_id, USER_ID.to_string());
        assert_eq!(access.sub, USER_ID.to_string());

        let refresh = refresh_claims(&tokens.refresh_token);
        assert_eq!(refresh.sub, USER_ID.to_string());
        assert!(access.exp < refresh.exp);
        assert!(tokens.access_expires_at < tokens.refresh_expires_at);

        let records = ledger.records().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].token_id, refresh.jti);
        assert_eq!(records[0].user_id, USER_ID);
        assert!(!records[0].is_revoked);
    }

    #[tokio::test]
    async fn login_lifetimes_follow_settings() {
        let ledger = InMemoryLedger::new();
        let before = Utc::now();
        let tokens = service(&ledger).login("test", "pwd123").await.unwrap();
        let after = Utc::now();

        let access_lifetime = Duration::seconds(DEFAULT_ACCESS_TOKEN_EXPIRY);
        assert!(tokens.access_expires_at >= before + access_lifetime);
        assert!(tokens.access_expires_at <= after + access_lifetime);

        let refresh_lifetime = Duration::seconds(DEFAULT_REFRESH_TOKEN_EXPIRY);
        assert!(tokens.refresh_expires_at >= before + refresh_lifetime);
        assert!(tokens.refresh_expires_at <= after + refresh_lifetime);
    }

    #[tokio::test]
    async fn login_rejects_unknown_user_and_wrong_password_alike() {
        let ledger = InMemoryLedger::new();
        let service = service(&ledger);

        assert_auth_error(
            service.login("nobody", "pwd123").await,
            AuthError::InvalidCredentials,
        );
        assert_auth_error(
            service.login("test", "wrong").await,
            AuthError::InvalidCredentials,
        );
        assert!(ledger.records().await.is_empty());
    }

    #[tokio::test]
    async fn login_revokes_previous_sessions() {
        let ledger = InMemoryLedger::new();
        let service = service(&ledger);

        let first = service.login("test", "pwd123").await.unwrap();
        let second = service.login("test", "pwd123").await.unwrap();

        let records = ledger.records_for_user(USER_ID).await;
        assert_eq!(records.len(), 2);
        assert!(records[0].is_revoked);
        assert!(!records[1].is_revoked);

        // The pre-login token now trips reuse detection and takes the new
        // session down with it.
        assert_auth_error(service.refresh(&first.refresh_token).await, AuthError::TokenReused);
        assert_auth_error(service.refresh(&second.refresh_token).await, AuthError::TokenReused);
    }

    #[tokio::test]
    async fn login_failure_keeps_previous_sessions() {
        let ledger = InMemoryLedger::new();
        service(&ledger).login("test", "pwd123").await.unwrap();

        let broken = service(&ledger.failing_on(LedgerOperation::Create));
        assert!(matches!(
            broken.login("test", "pwd123").await,
            Err(AppError::Database(_))
        ));

        let records = ledger.records().await;
        assert_eq!(records.len(), 1);
        assert!(!records[0].is_revoked);
    }

    /// Counts `verify` calls and delegates to bcrypt
    struct CountingHasher {
        inner: BcryptHasher,
        verifies: AtomicUsize,
    }

    impl PasswordHasher for CountingHasher {
        fn hash(&self, password: &str) -> Result<String, AppError> {
            self.inner.hash(password)
        }

        fn verify(&self, password: &str, password_hash: &str) -> Result<bool, AppError> {
            self.verifies.fetch_add(1, Ordering::SeqCst);
            self.inner.verify(password, password_hash)
        }
    }

    #[tokio::test]
    async fn unknown_user_costs_a_hash_verification() {
        let hasher = Arc::new(CountingHasher {
            inner: BcryptHasher::new(4),
            verifies: AtomicUsize::new(0),
        });
        let service = AuthService::new(
            Arc::new(InMemoryLedger::new()),
            Arc::new(users()),
            hasher.clone(),
            settings(),
        )
        .unwrap();

        assert_auth_error(
            service.login("nobody", "pwd123").await,
            AuthError::InvalidCredentials,
        );
        assert_eq!(hasher.verifies.load(Ordering::SeqCst), 1);

        assert_auth_error(
            service.login("test", "wrong").await,
            AuthError::InvalidCredentials,
        );
        assert_eq!(hasher.verifies.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn writes_wait_for_the_user_lock() {
        let ledger = InMemoryLedger::new();
        let login = service(&ledger).login("test", "pwd123").await.unwrap();

        let broken = service(&ledger.failing_on(LedgerOperation::LockUser));
        assert!(matches!(
            broken.login("test", "pwd123").await,
            Err(AppError::Database(_))
        ));
        assert!(matches!(
            broken.refresh(&login.refresh_token).await,
            Err(AppError::Database(_))
        ));
        assert!(matches!(broken.logout(USER_ID).await, Err(AppError::Database(_))));

        let records = ledger.records().await;
        assert_eq!(records.len(), 1);
        assert!(!records[0].is_revoked);
    }

    #[tokio::test]
    async fn verify_returns_subject() {
        let ledger = InMemoryLedger::new();
        let service = service(&ledger);

        let token = issue_access_token("42", Utc::now() + Duration::minutes(15), ACCESS_SECRET, ISSUER)
            .unwrap();
        assert_eq!(service.verify(&token).unwrap(), 42);

        let tokens = service.login("test", "pwd123").await.unwrap();
        assert_eq!(service.verify(&tokens.access_token).unwrap(), USER_ID);
    }

    #[test]
    fn verify_rejects_expired_and_foreign_tokens() {
        let ledger = InMemoryLedger::new();
        let service = service(&ledger);

        let expired =
            issue_access_token("42", Utc::now() - Duration::seconds(1), ACCESS_SECRET, ISSUER)
                .unwrap();
        assert_auth_error(service.verify(&expired), AuthError::TokenInvalid);

        let refresh = issue_refresh_token(
            "jti",
            "42",
            Utc::now() + Duration::hours(1),
            REFRESH_SECRET,
            ISSUER,
        )
        .unwrap();
        assert_auth_error(service.verify(&refresh), AuthError::TokenInvalid);

        let not_numeric =
            issue_access_token("abc", Utc::now() + Duration::hours(1), ACCESS_SECRET, ISSUER)
                .unwrap();
        assert_auth_error(service.verify(&not_numeric), AuthError::TokenInvalid);

        assert_auth_error(service.verify(""), AuthError::TokenInvalid);
    }

    #[tokio::test]
    async fn refresh_rotates_active_token() {
        let ledger = InMemoryLedger::new();
        let service = service(&ledger);
        let login = service.login("test", "pwd123").await.unwrap();

        let rotated = service.refresh(&login.refresh_token).await.unwrap();

        let old_jti = refresh_claims(&login.refresh_token).jti;
        let new_claims = refresh_claims(&rotated.refresh_token);
        assert_ne!(old_jti, new_claims.jti);
        assert_eq!(new_claims.sub, USER_ID.to_string());
        assert_eq!(service.verify(&rotated.access_token).unwrap(), USER_ID);
        assert!(rotated.access_expires_at < rotated.refresh_expires_at);

        let records = ledger.records().await;
        assert_eq!(records.len(), 2);
        assert!(records.iter().find(|r| r.token_id == old_jti).unwrap().is_revoked);
        assert!(!records.iter().find(|r| r.token_id == new_claims.jti).unwrap().is_revoked);
    }

    #[tokio::test]
    async fn refresh_twice_tears_down_every_session() {
        let ledger = InMemoryLedger::new();
        let service = service(&ledger);
        let login = service.login("test", "pwd123").await.unwrap();

        service.refresh(&login.refresh_token).await.unwrap();
        assert_auth_error(service.refresh(&login.refresh_token).await, AuthError::TokenReused);

        let records = ledger.records_for_user(USER_ID).await;
        assert_eq!(records.len(), 2, "no pair is issued on reuse");
        assert!(records.iter().all(|r| r.is_revoked));
    }

    #[tokio::test]
    async fn revoked_record_triggers_teardown_of_other_sessions() {
        let ledger = InMemoryLedger::new();
        let service = service(&ledger);

        seed(&ledger, "still-active", USER_ID).await;
        seed(&ledger, "other-user", 2).await;
        let stolen = issue_refresh_token(
            "stolen",
            &USER_ID.to_string(),
            Utc::now() + Duration::hours(1),
            REFRESH_SECRET,
            ISSUER,
        )
        .unwrap();
        seed(&ledger, "stolen", USER_ID).await;
        {
            let mut tx = ledger.begin().await.unwrap();
            let mut record = tx.get_by_token_id("stolen").await.unwrap();
            tx.revoke(&mut record).await.unwrap();
            tx.commit().await.unwrap();
        }

        assert_auth_error(service.refresh(&stolen).await, AuthError::TokenReused);

        assert!(ledger.records_for_user(USER_ID).await.iter().all(|r| r.is_revoked));
        assert!(ledger.records_for_user(2).await.iter().all(|r| !r.is_revoked));
        assert_eq!(ledger.records().await.len(), 3);
    }

    #[tokio::test]
    async fn refresh_rejects_expired_token_with_active_record() {
        let ledger = InMemoryLedger::new();
        let service = service(&ledger);

        seed(&ledger, "expired", USER_ID).await;
        let expired = issue_refresh_token(
            "expired",
            &USER_ID.to_string(),
            Utc::now() - Duration::seconds(1),
            REFRESH_SECRET,
            ISSUER,
        )
        .unwrap();

        assert_auth_error(service.refresh(&expired).await, AuthError::TokenInvalid);

        let records = ledger.records().await;
        assert_eq!(records.len(), 1);
        assert!(!records[0].is_revoked);
    }

    #[tokio::test]
    async fn refresh_rejects_garbage_without_touching_ledger() {
        let ledger = InMemoryLedger::new().failing_on(LedgerOperation::Begin);
        let service = service(&ledger);

        assert_auth_error(service.refresh("invalid").await, AuthError::TokenInvalid);
    }

    #[tokio::test]
    async fn refresh_rejects_access_token() {
        let ledger = InMemoryLedger::new();
        let service = service(&ledger);
        let login = service.login("test", "pwd123").await.unwrap();

        assert_auth_error(service.refresh(&login.access_token).await, AuthError::TokenInvalid);
    }

    #[tokio::test]
    async fn refresh_unknown_token_id_is_not_found() {
        let ledger = InMemoryLedger::new();
        let service = service(&ledger);

        let token = issue_refresh_token(
            "never-issued",
            &USER_ID.to_string(),
            Utc::now() + Duration::hours(1),
            REFRESH_SECRET,
            ISSUER,
        )
        .unwrap();

        assert!(service.refresh(&token).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn refresh_rejects_subject_mismatch() {
        let ledger = InMemoryLedger::new();
        let service = service(&ledger);

        seed(&ledger, "owned-by-two", 2).await;
        let forged = issue_refresh_token(
            "owned-by-two",
            &USER_ID.to_string(),
            Utc::now() + Duration::hours(1),
            REFRESH_SECRET,
            ISSUER,
        )
        .unwrap();

        assert_auth_error(service.refresh(&forged).await, AuthError::TokenInvalid);
        assert!(!ledger.records().await[0].is_revoked);
    }

    #[tokio::test]
    async fn refresh_failure_rolls_back_revocation() {
        let ledger = InMemoryLedger::new();
        let login = service(&ledger).login("test", "pwd123").await.unwrap();

        let broken = service(&ledger.failing_on(LedgerOperation::Create));
        let err = broken.refresh(&login.refresh_token).await.unwrap_err();
        assert!(matches!(
            err,
            AppError::Database(DatabaseError::UnexpectedError(_))
        ));

        let records = ledger.records().await;
        assert_eq!(records.len(), 1);
        assert!(!records[0].is_revoked, "revoke must not commit without reissue");

        // The untouched token still rotates normally.
        service(&ledger).refresh(&login.refresh_token).await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_refresh_has_single_winner() {
        let ledger = InMemoryLedger::new();
        let service = Arc::new(service(&ledger));
        let login = service.login("test", "pwd123").await.unwrap();

        let first = {
            let service = service.clone();
            let token = login.refresh_token.clone();
            tokio::spawn(async move { service.refresh(&token).await })
        };
        let second = {
            let service = service.clone();
            let token = login.refresh_token.clone();
            tokio::spawn(async move { service.refresh(&token).await })
        };

        let results = vec![first.await.unwrap(), second.await.unwrap()];
        let successes = results.iter().filter(|r| r.is_ok()).count();
        let reused = results
            .iter()
            .filter(|r| matches!(r, Err(AppError::Auth(AuthError::TokenReused))))
            .count();

        assert_eq!(successes, 1);
        assert_eq!(reused, 1);
        assert!(ledger.records_for_user(USER_ID).await.iter().all(|r| r.is_revoked));
    }

    #[tokio::test]
    async fn logout_revokes_all_sessions() {
        let ledger = InMemoryLedger::new();
        let service = service(&ledger);
        let login = service.login("test", "pwd123").await.unwrap();
        seed(&ledger, "second-device", USER_ID).await;

        assert_eq!(service.logout(USER_ID).await.unwrap(), 2);
        assert!(ledger.records().await.iter().all(|r| r.is_revoked));
        assert_auth_error(service.refresh(&login.refresh_token).await, AuthError::TokenReused);
    }
}
