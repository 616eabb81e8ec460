//! Server configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required
//! - `CHATOPS_DATABASE_URL` - `PostgreSQL` connection string (falls back to `DATABASE_URL`)
//! - `FEISHU_APP_ID` - Feishu app id
//! - `FEISHU_APP_SECRET` - Feishu app secret
//! - `JENKINS_URL` - Jenkins base URL
//! - `JENKINS_USER` - Jenkins user for API token auth
//! - `JENKINS_TOKEN` - Jenkins API token
//!
//! ## Optional
//! - `SERVER_HOST` - Bind address (default: 0.0.0.0)
//! - `PORT` - Listen port (default: 8080)
//! - `VERSION` - Version string reported by `/version` (default: crate version)
//! - `SENTRY_DSN` - Sentry error tracking DSN
//! - `SENTRY_ENVIRONMENT`, `SENTRY_SAMPLE_RATE`, `SENTRY_TRACES_SAMPLE_RATE`
//!
//! ## Optional (Feishu)
//! - `FEISHU_BASE_URL` - Open API base (default: <https://open.feishu.cn/open-apis>)
//! - `FEISHU_VERIFICATION_TOKEN` - Checked against the callback header token
//! - `FEISHU_ENCRYPT_KEY` - Enables `X-Lark-Signature` verification
//! - `FEISHU_SENDER` - `api` (default) or `webhook`
//! - `FEISHU_WEBHOOK_URL` - Custom bot webhook (required when `FEISHU_SENDER=webhook`)
//! - `FEISHU_WEBHOOK_SECRET` - Custom bot signing secret
//! - `FEISHU_REFRESH_TOKEN` - User refresh token, enables release group provisioning
//!
//! ## Optional (Jenkins)
//! - `JENKINS_START_TIMEOUT_SECS` - Max wait for a queued build to start (default: 180)
//! - `JENKINS_BUILD_POLL_SECS` - Build status poll interval (default: 5)
//!
//! ## Optional (OA scheduler)
//! - `OA_SCHEDULER_ENABLED` - Run the polling scheduler (default: true)
//! - `OA_POLL_INTERVAL_SECS` - OA poll interval (default: 60)
//! - `TOKEN_REFRESH_INTERVAL_SECS` - User token refresh interval (default: 3600)
//! - `OA_FALLBACK_RECEIVE_ID` / `OA_FALLBACK_RECEIVE_ID_TYPE` - Destination when
//!   the initiator cannot be resolved
//!
//! Interval and timeout settings are whole seconds between 1 and 86400.
//!
//! ## Optional (card state)
//! - `CARD_STATE_DIR` - Store card state as JSON files instead of `PostgreSQL`
//! - `CARD_CACHE_CAPACITY` - In-memory card state cache size (default: 10000)
//!
//! ## Optional (TLS)
//! - `SERVER_TLS_CERT` - PEM-encoded certificate chain
//! - `SERVER_TLS_KEY` - PEM-encoded private key

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::ops::RangeInclusive;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;
use thiserror::Error;

const MIN_ENTROPY_BITS_PER_CHAR: f64 = 3.3;
const DEFAULT_FEISHU_BASE_URL: &str = "https://open.feishu.cn/open-apis";
/// Upper bound for polling and refresh intervals (one day).
const MAX_POLL_SECS: u64 = 86_400;
/// Upper bound for waiting on a queued Jenkins build (one day).
const MAX_START_TIMEOUT_SECS: u64 = 86_400;

/// Blocklist of common placeholder patterns (case-insensitive)
const PLACEHOLDER_PATTERNS: &[&str] = &[
    "your-",
    "changeme",
    "replace",
    "placeholder",
    "example",
    "secret",
    "password",
    "xxx",
    "todo",
    "fixme",
    "insert",
    "enter-",
    "put-your",
    "add-your",
];

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
    #[error("Insecure secret in {0}: {1}")]
    InsecureSecret(String, String),
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// `PostgreSQL` database connection URL (contains password)
    pub database_url: SecretString,
    /// IP address to bind the server to
    pub host: IpAddr,
    /// Port to listen on
    pub port: u16,
    /// Version string reported by `/version`
    pub version: String,
    /// Feishu app, callback and sender configuration
    pub feishu: FeishuConfig,
    /// Jenkins configuration
    pub jenkins: JenkinsConfig,
    /// OA polling scheduler configuration
    pub scheduler: SchedulerConfig,
    /// Card state storage configuration
    pub store: StoreConfig,
    /// Sentry DSN for error tracking
    pub sentry_dsn: Option<String>,
    /// Sentry environment (e.g., "development", "staging", "production")
    pub sentry_environment: Option<String>,
    /// Sentry error sample rate (0.0 to 1.0)
    pub sentry_sample_rate: f32,
    /// Sentry traces sample rate for performance monitoring (0.0 to 1.0)
    pub sentry_traces_sample_rate: f32,
    /// TLS configuration for HTTPS (optional)
    pub tls: Option<TlsConfig>,
}

/// Which `Sender` delivers cards and notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenderKind {
    /// Bot API (`im/v1/messages`), honours the receiver.
    Api,
    /// Custom bot webhook, always posts to the webhook's group.
    Webhook,
}

/// Feishu configuration.
///
/// Implements `Debug` manually to redact credentials.
#[derive(Clone)]
pub struct FeishuConfig {
    pub app_id: String,
    pub app_secret: SecretString,
    pub base_url: String,
    pub verification_token: Option<SecretString>,
    pub encrypt_key: Option<SecretString>,
    pub sender: SenderKind,
    pub webhook: Option<WebhookConfig>,
    /// Seed refresh token for the delegated user token (group provisioning)
    pub refresh_token: Option<SecretString>,
}

impl std::fmt::Debug for FeishuConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeishuConfig")
            .field("app_id", &self.app_id)
            .field("app_secret", &"[REDACTED]")
            .field("base_url", &self.base_url)
            .field("sender", &self.sender)
            .field("webhook", &self.webhook)
            .field("group_provisioning", &self.refresh_token.is_some())
            .finish_non_exhaustive()
    }
}

/// Custom bot webhook configuration.
#[derive(Clone)]
pub struct WebhookConfig {
    pub url: SecretString,
    pub secret: Option<SecretString>,
}

impl std::fmt::Debug for WebhookConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookConfig")
            .field("url", &"[REDACTED]")
            .field("signed", &self.secret.is_some())
            .finish()
    }
}

/// Jenkins configuration.
#[derive(Clone)]
pub struct JenkinsConfig {
    pub url: String,
    pub user: String,
    pub token: SecretString,
    /// Upper bound on waiting for a queued build to get an executor
    pub start_timeout: Duration,
    /// Interval between build status polls
    pub build_poll_interval: Duration,
}

impl std::fmt::Debug for JenkinsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JenkinsConfig")
            .field("url", &self.url)
            .field("user", &self.user)
            .field("token", &"[REDACTED]")
            .field("start_timeout", &self.start_timeout)
            .field("build_poll_interval", &self.build_poll_interval)
            .finish()
    }
}

/// OA polling scheduler configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub enabled: bool,
    pub oa_poll_interval: Duration,
    pub token_refresh_interval: Duration,
    /// `(receive_id, receive_id_type)` used when no initiator destination resolves
    pub fallback_receiver: Option<(String, String)>,
}

/// Card state storage configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Directory for the JSON-file backend; `PostgreSQL` is used when unset
    pub state_dir: Option<PathBuf>,
    pub cache_capacity: u64,
}

/// TLS configuration for HTTPS.
#[derive(Clone)]
pub struct TlsConfig {
    /// PEM-encoded certificate chain
    pub cert_pem: String,
    /// PEM-encoded private key
    pub key_pem: SecretString,
}

impl std::fmt::Debug for TlsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsConfig")
            .field("cert_pem", &"[CERTIFICATE]")
            .field("key_pem", &"[REDACTED]")
            .finish()
    }
}

impl TlsConfig {
    fn from_env() -> Result<Option<Self>, ConfigError> {
        let cert_pem = get_optional_env("SERVER_TLS_CERT");
        let key_pem = get_optional_env("SERVER_TLS_KEY");

        match (cert_pem, key_pem) {
            (Some(cert), Some(key)) => Ok(Some(Self {
                cert_pem: cert,
                key_pem: SecretString::from(key),
            })),
            (None, None) => Ok(None),
            _ => Err(ConfigError::InvalidEnvVar(
                "SERVER_TLS_*".to_string(),
                "Both SERVER_TLS_CERT and SERVER_TLS_KEY must be set together".to_string(),
            )),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing or invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let database_url = get_database_url("CHATOPS_DATABASE_URL")?;
        let host = parse_env_or_default::<IpAddr>("SERVER_HOST", "0.0.0.0")?;
        let port = parse_env_or_default::<u16>("PORT", "8080")?;
        let version = get_env_or_default("VERSION", env!("CARGO_PKG_VERSION"));

        let feishu = FeishuConfig::from_env()?;
        let jenkins = JenkinsConfig::from_env()?;
        let scheduler = SchedulerConfig::from_env()?;
        let store = StoreConfig::from_env()?;

        let sentry_dsn = get_optional_env("SENTRY_DSN");
        let sentry_environment = get_optional_env("SENTRY_ENVIRONMENT");
        let sentry_sample_rate = get_optional_env("SENTRY_SAMPLE_RATE")
            .and_then(|s| s.parse().ok())
            .unwrap_or(1.0);
        let sentry_traces_sample_rate = get_optional_env("SENTRY_TRACES_SAMPLE_RATE")
            .and_then(|s| s.parse().ok())
            .unwrap_or(0.1);
        let tls = TlsConfig::from_env()?;

        Ok(Self {
            database_url,
            host,
            port,
            version,
            feishu,
            jenkins,
            scheduler,
            store,
            sentry_dsn,
            sentry_environment,
            sentry_sample_rate,
            sentry_traces_sample_rate,
            tls,
        })
    }

    /// Returns the socket address for binding the server.
    #[must_use]
    pub const fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

impl FeishuConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let app_id = get_required_env("FEISHU_APP_ID")?;
        let app_secret = get_required_env("FEISHU_APP_SECRET")?;
        warn_weak_secret(&app_secret, "FEISHU_APP_SECRET");

        let webhook = get_optional_env("FEISHU_WEBHOOK_URL").map(|url| WebhookConfig {
            url: SecretString::from(url),
            secret: get_optional_env("FEISHU_WEBHOOK_SECRET").map(SecretString::from),
        });

        let sender = match get_env_or_default("FEISHU_SENDER", "api").as_str() {
            "api" => SenderKind::Api,
            "webhook" if webhook.is_some() => SenderKind::Webhook,
            "webhook" => {
                return Err(ConfigError::MissingEnvVar("FEISHU_WEBHOOK_URL".to_string()));
            }
            other => {
                return Err(ConfigError::InvalidEnvVar(
                    "FEISHU_SENDER".to_string(),
                    format!("expected 'api' or 'webhook', got '{other}'"),
                ));
            }
        };

        Ok(Self {
            app_id,
            app_secret: SecretString::from(app_secret),
            base_url: get_env_or_default("FEISHU_BASE_URL", DEFAULT_FEISHU_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            verification_token: get_optional_env("FEISHU_VERIFICATION_TOKEN")
                .map(SecretString::from),
            encrypt_key: get_optional_env("FEISHU_ENCRYPT_KEY").map(SecretString::from),
            sender,
            webhook,
            refresh_token: get_optional_env("FEISHU_REFRESH_TOKEN").map(SecretString::from),
        })
    }
}

impl JenkinsConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let url = get_required_env("JENKINS_URL")?;
        url::Url::parse(&url)
            .map_err(|e| ConfigError::InvalidEnvVar("JENKINS_URL".to_string(), e.to_string()))?;
        let token = get_required_env("JENKINS_TOKEN")?;
        warn_weak_secret(&token, "JENKINS_TOKEN");

        Ok(Self {
            url: url.trim_end_matches('/').to_string(),
            user: get_required_env("JENKINS_USER")?,
            token: SecretString::from(token),
            start_timeout: parse_secs_env("JENKINS_START_TIMEOUT_SECS", "180", 1..=MAX_START_TIMEOUT_SECS)?,
            build_poll_interval: parse_secs_env("JENKINS_BUILD_POLL_SECS", "5", 1..=MAX_POLL_SECS)?,
        })
    }
}

impl SchedulerConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let fallback_receiver = match (
            get_optional_env("OA_FALLBACK_RECEIVE_ID"),
            get_optional_env("OA_FALLBACK_RECEIVE_ID_TYPE"),
        ) {
            (Some(id), Some(id_type)) => Some((id, id_type)),
            (None, None) => None,
            _ => {
                return Err(ConfigError::InvalidEnvVar(
                    "OA_FALLBACK_RECEIVE_ID*".to_string(),
                    "Both OA_FALLBACK_RECEIVE_ID and OA_FALLBACK_RECEIVE_ID_TYPE must be set together"
                        .to_string(),
                ));
            }
        };

        Ok(Self {
            enabled: parse_env_or_default("OA_SCHEDULER_ENABLED", "true")?,
            oa_poll_interval: parse_secs_env("OA_POLL_INTERVAL_SECS", "60", 1..=MAX_POLL_SECS)?,
            token_refresh_interval: parse_secs_env(
                "TOKEN_REFRESH_INTERVAL_SECS",
                "3600",
                1..=MAX_POLL_SECS,
            )?,
            fallback_receiver,
        })
    }
}

impl StoreConfig {
    fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            state_dir: get_optional_env("CARD_STATE_DIR").map(PathBuf::from),
            cache_capacity: parse_env_or_default("CARD_CACHE_CAPACITY", "10000")?,
        })
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Get a required environment variable.
fn get_required_env(key: &str) -> Result<String, ConfigError> {
    std::env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))
}

/// Get database URL with fallback to generic `DATABASE_URL` (used by Fly.io postgres attach).
fn get_database_url(primary_key: &str) -> Result<SecretString, ConfigError> {
    if let Ok(value) = std::env::var(primary_key) {
        return Ok(SecretString::from(value));
    }
    if let Ok(value) = std::env::var("DATABASE_URL") {
        return Ok(SecretString::from(value));
    }
    Err(ConfigError::MissingEnvVar(primary_key.to_string()))
}

/// Get an optional environment variable. Empty values count as unset.
fn get_optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

/// Get an environment variable with a default value.
fn get_env_or_default(key: &str, default: &str) -> String {
    get_optional_env(key).unwrap_or_else(|| default.to_string())
}

/// Parse an environment variable, falling back to `default` when unset.
fn parse_env_or_default<T>(key: &str, default: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    get_env_or_default(key, default)
        .parse::<T>()
        .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))
}

/// Parse a whole number of seconds, rejecting values outside `range`.
fn parse_secs_env(
    key: &str,
    default: &str,
    range: RangeInclusive<u64>,
) -> Result<Duration, ConfigError> {
    bounded_secs(key, parse_env_or_default(key, default)?, range)
}

fn bounded_secs(
    key: &str,
    secs: u64,
    range: RangeInclusive<u64>,
) -> Result<Duration, ConfigError> {
    if range.contains(&secs) {
        Ok(Duration::from_secs(secs))
    } else {
        Err(ConfigError::InvalidEnvVar(
            key.to_string(),
            format!(
                "{secs} is out of range ({}..={} seconds)",
                range.start(),
                range.end()
            ),
        ))
    }
}

/// Calculate Shannon entropy in bits per character.
fn shannon_entropy(s: &str) -> f64 {
    if s.is_empty() {
        return 0.0;
    }

    let mut freq: HashMap<char, usize> = HashMap::new();
    for c in s.chars() {
        *freq.entry(c).or_insert(0) += 1;
    }

    #[allow(clippy::cast_precision_loss)] // String length will never exceed f64 precision
    let len = s.chars().count() as f64;
    freq.values()
        .map(|&count| {
            #[allow(clippy::cast_precision_loss)] // Character count will never exceed f64 precision
            let p = count as f64 / len;
            -p * p.log2()
        })
        .sum()
}

/// Validate that a secret is not a placeholder and has sufficient entropy.
fn validate_secret_strength(secret: &str, var_name: &str) -> Result<(), ConfigError> {
    let lower = secret.to_lowercase();

    for pattern in PLACEHOLDER_PATTERNS {
        if lower.contains(pattern) {
            return Err(ConfigError::InsecureSecret(
                var_name.to_string(),
                format!("appears to be a placeholder (contains '{pattern}')"),
            ));
        }
    }

    let entropy = shannon_entropy(secret);
    if entropy < MIN_ENTROPY_BITS_PER_CHAR {
        return Err(ConfigError::InsecureSecret(
            var_name.to_string(),
            format!(
                "entropy too low ({entropy:.2} bits/char, need >= {MIN_ENTROPY_BITS_PER_CHAR:.1})"
            ),
        ));
    }

    Ok(())
}

/// Third-party credentials are issued by Feishu/Jenkins, so a weak value is
/// only worth a warning.
fn warn_weak_secret(secret: &str, var_name: &str) {
    if let Err(e) = validate_secret_strength(secret, var_name) {
        tracing::warn!("{var_name} validation warning: {e}");
    }
}

#[cfg(test)]
impl ServerConfig {
    /// Minimal configuration for handler tests.
    pub(crate) fn for_tests() -> Self {
        Self {
            database_url: SecretString::from("postgres://localhost/chatops_test"),
            host: IpAddr::from([127, 0, 0, 1]),
            port: 8080,
            version: "test".to_string(),
            feishu: FeishuConfig {
                app_id: "cli_test".to_string(),
                app_secret: SecretString::from("test-app-secret"),
                base_url: DEFAULT_FEISHU_BASE_URL.to_string(),
                verification_token: None,
                encrypt_key: None,
                sender: SenderKind::Api,
                webhook: None,
                refresh_token: None,
            },
            jenkins: JenkinsConfig {
                url: "http://jenkins.local".to_string(),
                user: "ci".to_string(),
                token: SecretString::from("jenkins-token"),
                start_timeout: Duration::from_secs(180),
                build_poll_interval: Duration::from_secs(5),
            },
            scheduler: SchedulerConfig {
                enabled: false,
                oa_poll_interval: Duration::from_secs(60),
                token_refresh_interval: Duration::from_secs(3600),
                fallback_receiver: None,
            },
            store: StoreConfig {
                state_dir: None,
                cache_capacity: 100,
            },
            sentry_dsn: None,
            sentry_environment: None,
            sentry_sample_rate: 1.0,
            sentry_traces_sample_rate: 0.0,
            tls: None,
        }
    }
}
