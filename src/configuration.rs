use chrono::Duration;

use crate::error::ConfigError;
use crate::store::TokenPurpose;

const MIN_SECRET_LENGTH: usize = 32;

#[derive(serde::Deserialize, Clone)]
pub struct Settings {
    pub application: ApplicationSettings,
    pub database: DatabaseSettings,
    pub secrets: SecretSettings,
    #[serde(default)]
    pub tokens: TokenSettings,
    #[serde(default)]
    pub rate_limit: RateLimitSettings,
    pub email_client: EmailClientSettings,
}

#[derive(serde::Deserialize, Clone)]
pub struct ApplicationSettings {
    pub host: String,
    pub port: u16,
    /// Public URL used to build links in outgoing mail
    pub base_url: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(serde::Deserialize, Clone)]
pub struct DatabaseSettings {
    pub username: String,
    pub password: String,
    pub port: u16,
    pub host: String,
    pub database_name: String,
    /// Run on the in-memory store instead of PostgreSQL
    #[serde(default)]
    pub in_memory: bool,
}

impl DatabaseSettings {
    pub fn connection_string(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.username, self.password, self.host, self.port, self.database_name
        )
    }
}

/// Symmetric signing secrets, one per audience
#[derive(serde::Deserialize, Clone)]
pub struct SecretSettings {
    pub session: String,
    pub emergency: String,
}

/// Lifetimes of single-use tokens, in seconds
#[derive(serde::Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct TokenSettings {
    pub invitation_ttl_seconds: i64,
    pub password_reset_ttl_seconds: i64,
    pub email_change_ttl_seconds: i64,
}

impl Default for TokenSettings {
    fn default() -> Self {
        Self {
            invitation_ttl_seconds: 48 * 60 * 60,
            password_reset_ttl_seconds: 30 * 60,
            email_change_ttl_seconds: 30 * 60,
        }
    }
}

impl TokenSettings {
    pub fn ttl(&self, purpose: TokenPurpose) -> Duration {
        let seconds = match purpose {
            TokenPurpose::Invitation => self.invitation_ttl_seconds,
            TokenPurpose::PasswordReset => self.password_reset_ttl_seconds,
            TokenPurpose::EmailChange => self.email_change_ttl_seconds,
        };
        Duration::seconds(seconds)
    }
}

#[derive(serde::Deserialize, Clone)]
pub struct RateLimitSettings {
    pub refresh_attempts_per_minute: u32,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            refresh_attempts_per_minute: 10,
        }
    }
}

#[derive(serde::Deserialize, Clone)]
pub struct EmailClientSettings {
    pub base_url: String,
    pub sender_email: String,
    pub timeout_milliseconds: u64,
}

impl EmailClientSettings {
    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.timeout_milliseconds)
    }
}

impl Settings {
    /// Refuse to start with secrets that are missing, short or shared
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, secret) in [
            ("secrets.session", &self.secrets.session),
            ("secrets.emergency", &self.secrets.emergency),
        ] {
            if secret.is_empty() {
                return Err(ConfigError::MissingRequired(name.to_string()));
            }
            if secret.len() < MIN_SECRET_LENGTH {
                return Err(ConfigError::InvalidValue(format!(
                    "{} must be at least {} characters",
                    name, MIN_SECRET_LENGTH
                )));
            }
        }
        if self.secrets.session == self.secrets.emergency {
            return Err(ConfigError::InvalidValue(
                "secrets.session and secrets.emergency must differ".to_string(),
            ));
        }

        let ttls = [
            self.tokens.invitation_ttl_seconds,
            self.tokens.password_reset_ttl_seconds,
            self.tokens.email_change_ttl_seconds,
        ];
        if ttls.iter().any(|ttl| *ttl <= 0) {
            return Err(ConfigError::InvalidValue(
                "token lifetimes must be positive".to_string(),
            ));
        }

        Ok(())
    }
}

/// Load `configuration.yaml` (optional) overlaid with `APP_SECTION__KEY`
/// environment variables
pub fn get_configuration() -> Result<Settings, ConfigError> {
    let settings = config::Config::builder()
        .add_source(config::File::with_name("configuration").required(false))
        .add_source(
            config::Environment::with_prefix("APP")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;
    let settings = settings.try_deserialize::<Settings>()?;
    settings.validate()?;
    Ok(settings)
}
