use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub email: EmailConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub payments: PaymentsConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub currency: CurrencyConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Frontend origin, used for CORS and for links in emails
    #[serde(default = "default_client_url")]
    pub client_url: String,
    /// Mark auth cookies `Secure` (disable only for plain-http development)
    #[serde(default = "default_true")]
    pub secure_cookies: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            data_dir: default_data_dir(),
            client_url: default_client_url(),
            secure_cookies: true,
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    5000
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_client_url() -> String {
    "http://localhost:5173".to_string()
}

fn default_true() -> bool {
    true
}

pub const DEFAULT_ACCESS_SECRET: &str = "change-me-access-secret";
pub const DEFAULT_REFRESH_SECRET: &str = "change-me-refresh-secret";

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    #[serde(default = "default_access_secret")]
    pub access_token_secret: String,
    #[serde(default = "default_refresh_secret")]
    pub refresh_token_secret: String,
    /// Access token lifetime in minutes (default: 15)
    #[serde(default = "default_access_ttl")]
    pub access_token_ttl_minutes: i64,
    /// Refresh token lifetime in days (default: 7)
    #[serde(default = "default_refresh_ttl")]
    pub refresh_token_ttl_days: i64,
    /// Email verification code lifetime in minutes (default: 15)
    #[serde(default = "default_verification_ttl")]
    pub verification_code_ttl_minutes: i64,
    /// Password reset token lifetime in minutes (default: 60)
    #[serde(default = "default_reset_ttl")]
    pub reset_token_ttl_minutes: i64,
    /// Bootstrap admin account, created at startup when both are set
    pub admin_email: Option<String>,
    pub admin_password: Option<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            access_token_secret: default_access_secret(),
            refresh_token_secret: default_refresh_secret(),
            access_token_ttl_minutes: default_access_ttl(),
            refresh_token_ttl_days: default_refresh_ttl(),
            verification_code_ttl_minutes: default_verification_ttl(),
            reset_token_ttl_minutes: default_reset_ttl(),
            admin_email: None,
            admin_password: None,
        }
    }
}

fn default_access_secret() -> String {
    DEFAULT_ACCESS_SECRET.to_string()
}

fn default_refresh_secret() -> String {
    DEFAULT_REFRESH_SECRET.to_string()
}

fn default_access_ttl() -> i64 {
    15
}

fn default_refresh_ttl() -> i64 {
    7
}

fn default_verification_ttl() -> i64 {
    15
}

fn default_reset_ttl() -> i64 {
    60
}

/// SMTP settings for transactional email
#[derive(Debug, Clone, Deserialize)]
pub struct EmailConfig {
    pub smtp_host: Option<String>,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    pub smtp_username: Option<String>,
    pub smtp_password: Option<String>,
    #[serde(default = "default_true")]
    pub smtp_tls: bool,
    pub from_address: Option<String>,
    #[serde(default = "default_from_name")]
    pub from_name: String,
    /// Recipient for order alerts and delivery reminders
    pub admin_email: Option<String>,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            smtp_host: None,
            smtp_port: default_smtp_port(),
            smtp_username: None,
            smtp_password: None,
            smtp_tls: true,
            from_address: None,
            from_name: default_from_name(),
            admin_email: None,
        }
    }
}

impl EmailConfig {
    pub fn is_configured(&self) -> bool {
        self.smtp_host.is_some() && self.from_address.is_some()
    }
}

fn default_smtp_port() -> u16 {
    587
}

fn default_from_name() -> String {
    "SyberTailor".to_string()
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Local,
    S3,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_storage_backend")]
    pub backend: StorageBackend,
    /// Directory for the local backend (default: <data_dir>/uploads)
    pub local_dir: Option<PathBuf>,
    /// Base URL that stored objects are served from
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,
    pub bucket: Option<String>,
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint for S3-compatible providers
    pub endpoint: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    /// Maximum decoded image size in bytes (default: 5 MiB)
    #[serde(default = "default_max_image_bytes")]
    pub max_image_bytes: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_storage_backend(),
            local_dir: None,
            public_base_url: default_public_base_url(),
            bucket: None,
            region: default_region(),
            endpoint: None,
            access_key_id: None,
            secret_access_key: None,
            max_image_bytes: default_max_image_bytes(),
        }
    }
}

fn default_storage_backend() -> StorageBackend {
    StorageBackend::Local
}

fn default_public_base_url() -> String {
    "http://localhost:5000/uploads".to_string()
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_max_image_bytes() -> usize {
    5 * 1024 * 1024
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentsConfig {
    #[serde(default = "default_payments_base_url")]
    pub base_url: String,
    pub secret_key: Option<String>,
    #[serde(default = "default_payment_currency")]
    pub currency: String,
    /// Timeout for gateway calls in seconds
    #[serde(default = "default_payment_timeout")]
    pub timeout_secs: u64,
}

impl Default for PaymentsConfig {
    fn default() -> Self {
        Self {
            base_url: default_payments_base_url(),
            secret_key: None,
            currency: default_payment_currency(),
            timeout_secs: default_payment_timeout(),
        }
    }
}

fn default_payments_base_url() -> String {
    "https://api.paystack.co".to_string()
}

fn default_payment_currency() -> String {
    "NGN".to_string()
}

fn default_payment_timeout() -> u64 {
    15
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    /// How often the job runner looks for due jobs (default: 30s)
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// Days between order creation and expected delivery (default: 7)
    #[serde(default = "default_delivery_days")]
    pub delivery_days: i64,
    /// Minimum distance between two appointments in minutes (default: 60)
    #[serde(default = "default_booking_gap")]
    pub booking_gap_minutes: i64,
    /// Local hour of the morning appointment reminder (default: 8)
    #[serde(default = "default_morning_hour")]
    pub reminder_morning_hour: u32,
    /// Local hour of the afternoon appointment reminder (default: 13)
    #[serde(default = "default_afternoon_hour")]
    pub reminder_afternoon_hour: u32,
    /// Attempts before a job is marked failed (default: 3)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: i64,
    /// Base delay before retrying a failed job, doubled per attempt (default: 60s)
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_secs: i64,
    /// Maximum jobs claimed per tick (default: 50)
    #[serde(default = "default_batch_size")]
    pub batch_size: i64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            delivery_days: default_delivery_days(),
            booking_gap_minutes: default_booking_gap(),
            reminder_morning_hour: default_morning_hour(),
            reminder_afternoon_hour: default_afternoon_hour(),
            max_attempts: default_max_attempts(),
            retry_backoff_secs: default_retry_backoff(),
            batch_size: default_batch_size(),
        }
    }
}

fn default_poll_interval() -> u64 {
    30
}

fn default_delivery_days() -> i64 {
    7
}

fn default_booking_gap() -> i64 {
    60
}

fn default_morning_hour() -> u32 {
    8
}

fn default_afternoon_hour() -> u32 {
    13
}

fn default_max_attempts() -> i64 {
    3
}

fn default_retry_backoff() -> i64 {
    60
}

fn default_batch_size() -> i64 {
    50
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Requests per window for general API endpoints (default: 100)
    #[serde(default = "default_api_requests")]
    pub api_requests_per_window: u32,
    /// Requests per window for login/register/reset endpoints (default: 20)
    #[serde(default = "default_auth_requests")]
    pub auth_requests_per_window: u32,
    #[serde(default = "default_window_seconds")]
    pub window_seconds: u64,
    /// Seconds between sweeps of stale entries
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_requests_per_window: default_api_requests(),
            auth_requests_per_window: default_auth_requests(),
            window_seconds: default_window_seconds(),
            cleanup_interval: default_cleanup_interval(),
        }
    }
}

fn default_api_requests() -> u32 {
    100
}

fn default_auth_requests() -> u32 {
    20
}

fn default_window_seconds() -> u64 {
    60
}

fn default_cleanup_interval() -> u64 {
    300
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct CurrencyConfig {
    #[serde(default = "default_currency_api")]
    pub api_base_url: String,
}

impl Default for CurrencyConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_currency_api(),
        }
    }
}

fn default_currency_api() -> String {
    "https://api.exchangerate-api.com/v4/latest".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            auth: AuthConfig::default(),
            email: EmailConfig::default(),
            storage: StorageConfig::default(),
            payments: PaymentsConfig::default(),
            scheduler: SchedulerConfig::default(),
            rate_limit: RateLimitConfig::default(),
            logging: LoggingConfig::default(),
            currency: CurrencyConfig::default(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            info!("Loading configuration from {}", path.display());
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            Self::from_toml(&content)?
        } else {
            info!("No config file found, using defaults");
            Config::default()
        };

        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).with_context(|| "Failed to parse configuration file")
    }

    /// Overlay secrets and deployment settings from the environment.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lookup("PORT") {
            self.server.port = port
                .parse()
                .with_context(|| format!("Invalid PORT value: {}", port))?;
        }
        if let Some(url) = lookup("CLIENT_URL") {
            self.server.client_url = url;
        }
        if let Some(secret) = lookup("ACCESS_TOKEN_SECRET") {
            self.auth.access_token_secret = secret;
        }
        if let Some(secret) = lookup("REFRESH_TOKEN_SECRET") {
            self.auth.refresh_token_secret = secret;
        }
        if let Some(email) = lookup("ADMIN_EMAIL") {
            self.email.admin_email = Some(email.clone());
            if self.auth.admin_email.is_none() {
                self.auth.admin_email = Some(email);
            }
        }
        if let Some(password) = lookup("ADMIN_PASSWORD") {
            self.auth.admin_password = Some(password);
        }
        if let Some(host) = lookup("SMTP_HOST") {
            self.email.smtp_host = Some(host);
        }
        if let Some(port) = lookup("SMTP_PORT") {
            self.email.smtp_port = port
                .parse()
                .with_context(|| format!("Invalid SMTP_PORT value: {}", port))?;
        }
        if let Some(user) = lookup("SMTP_USER") {
            self.email.smtp_username = Some(user);
        }
        if let Some(pass) = lookup("SMTP_PASS") {
            self.email.smtp_password = Some(pass);
        }
        if let Some(from) = lookup("SMTP_FROM") {
            self.email.from_address = Some(from);
        }
        if let Some(key) = lookup("PAYSTACK_SECRET_KEY") {
            self.payments.secret_key = Some(key);
        }
        if let Some(bucket) = lookup("S3_BUCKET") {
            self.storage.bucket = Some(bucket);
        }
        if let Some(region) = lookup("S3_REGION") {
            self.storage.region = region;
        }
        if let Some(endpoint) = lookup("S3_ENDPOINT") {
            self.storage.endpoint = Some(endpoint);
        }
        if let Some(key) = lookup("S3_ACCESS_KEY_ID") {
            self.storage.access_key_id = Some(key);
        }
        if let Some(secret) = lookup("S3_SECRET_ACCESS_KEY") {
            self.storage.secret_access_key = Some(secret);
        }
        Ok(())
    }

    /// Directory used by the local object store.
    pub fn uploads_dir(&self) -> PathBuf {
        self.storage
            .local_dir
            .clone()
            .unwrap_or_else(|| self.server.data_dir.join("uploads"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_without_file() {
        let config = Config::default();
        assert_eq!(config.server.port, 5000);
        assert_eq!(config.auth.access_token_ttl_minutes, 15);
        assert_eq!(config.auth.refresh_token_ttl_days, 7);
        assert_eq!(config.scheduler.booking_gap_minutes, 60);
        assert_eq!(config.scheduler.delivery_days, 7);
        assert!(!config.email.is_configured());
        assert_eq!(config.storage.backend, StorageBackend::Local);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = Config::from_toml(
            r#"
            [server]
            port = 8081

            [storage]
            backend = "s3"
            bucket = "tailor-media"
            "#,
        )
        .unwrap();

        assert_eq!(config.server.port, 8081);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.storage.backend, StorageBackend::S3);
        assert_eq!(config.storage.bucket.as_deref(), Some("tailor-media"));
        assert_eq!(config.scheduler.max_attempts, 3);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("PORT", "9000"),
            ("ACCESS_TOKEN_SECRET", "a-secret"),
            ("ADMIN_EMAIL", "boss@example.com"),
            ("SMTP_HOST", "smtp.example.com"),
            ("SMTP_FROM", "orders@example.com"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config
            .apply_env_overrides(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.server.port, 9000);
        assert_eq!(config.auth.access_token_secret, "a-secret");
        assert_eq!(config.email.admin_email.as_deref(), Some("boss@example.com"));
        assert_eq!(config.auth.admin_email.as_deref(), Some("boss@example.com"));
        assert!(config.email.is_configured());
    }

    #[test]
    fn test_invalid_port_override_is_rejected() {
        let mut config = Config::default();
        let result = config.apply_env_overrides(|key| {
            (key == "PORT").then(|| "not-a-port".to_string())
        });
        assert!(result.is_err());
    }
}
