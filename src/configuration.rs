use crate::error::ConfigError;

/// 15 minutes
pub const DEFAULT_ACCESS_TOKEN_EXPIRY: i64 = 15 * 60;
/// 7 days
pub const DEFAULT_REFRESH_TOKEN_EXPIRY: i64 = 7 * 24 * 60 * 60;

#[derive(serde::Deserialize, Clone)]
pub struct Settings {
    pub database: DatabaseSettings,
    pub application: ApplicationSettings,
    pub jwt: JwtSettings,
}

#[derive(serde::Deserialize, Clone)]
pub struct ApplicationSettings {
    pub host: String,
    pub port: u16,
}

#[derive(serde::Deserialize, Clone)]
pub struct DatabaseSettings {
    pub username: String,
    pub password: String,
    pub port: u16,
    pub host: String,
    pub database_name: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

impl DatabaseSettings {
    pub fn connection_string(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.username, self.password, self.host, self.port, self.database_name
        )
    }

    /// Server-level connection, used to create per-test databases
    pub fn connection_string_without_db(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}",
            self.username, self.password, self.host, self.port
        )
    }
}

/// JWT signing settings
///
/// Access and refresh tokens are signed with independent secrets so that
/// either class can be rotated without touching the other.
#[derive(serde::Deserialize, Clone)]
pub struct JwtSettings {
    pub access_secret: String,
    pub refresh_secret: String,
    #[serde(default = "default_access_token_expiry")]
    pub access_token_expiry: i64, // seconds
    #[serde(default = "default_refresh_token_expiry")]
    pub refresh_token_expiry: i64, // seconds
    pub issuer: String,
}

fn default_access_token_expiry() -> i64 {
    DEFAULT_ACCESS_TOKEN_EXPIRY
}

fn default_refresh_token_expiry() -> i64 {
    DEFAULT_REFRESH_TOKEN_EXPIRY
}

impl JwtSettings {
    /// Reject settings that would break token issuance.
    ///
    /// # Errors
    /// - empty or identical secrets
    /// - non-positive lifetimes
    /// - a refresh lifetime that does not outlive the access lifetime
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.access_secret.is_empty() {
            return Err(ConfigError::MissingRequired("jwt.access_secret".to_string()));
        }
        if self.refresh_secret.is_empty() {
            return Err(ConfigError::MissingRequired("jwt.refresh_secret".to_string()));
        }
        if self.access_secret == self.refresh_secret {
            return Err(ConfigError::InvalidValue(
                "jwt.access_secret and jwt.refresh_secret must differ".to_string(),
            ));
        }
        if self.access_token_expiry <= 0 {
            return Err(ConfigError::InvalidValue(
                "jwt.access_token_expiry must be positive".to_string(),
            ));
        }
        if self.refresh_token_expiry <= self.access_token_expiry {
            return Err(ConfigError::InvalidValue(
                "jwt.refresh_token_expiry must exceed jwt.access_token_expiry".to_string(),
            ));
        }
        Ok(())
    }
}

/// Load settings from `configuration.{yaml,toml,json}` (optional) and
/// `APP_`-prefixed environment variables, e.g. `APP_JWT__ACCESS_SECRET`.
pub fn get_configuration() -> Result<Settings, config::ConfigError> {
    let settings = config::Config::builder()
        .add_source(config::File::with_name("configuration").required(false))
        .add_source(
            config::Environment::with_prefix("APP")
                .prefix_separator("_")
                .separator("__"),
        )
        .build()?;
    settings.try_deserialize::<Settings>()
}
