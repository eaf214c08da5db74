use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub booking: BookingConfig,
    #[serde(default)]
    pub seed: SeedConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Origins allowed to call the API from a browser (empty = same-origin only)
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            data_dir: default_data_dir(),
            cors_origins: Vec::new(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    4000
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Email of the administrator created on first start
    #[serde(default = "default_admin_email")]
    pub admin_email: String,
    /// Password of the bootstrap administrator. Without one, no admin is created.
    pub admin_password: Option<String>,
    /// Lifetime of a bearer session in hours (default: 7 days)
    #[serde(default = "default_session_ttl_hours")]
    pub session_ttl_hours: i64,
    /// Lifetime of an anti-forgery token in seconds (default: 30 minutes)
    #[serde(default = "default_csrf_ttl_seconds")]
    pub csrf_ttl_seconds: u64,
    /// Mark the anti-forgery session cookie as Secure (HTTPS only)
    #[serde(default)]
    pub secure_cookies: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            admin_email: default_admin_email(),
            admin_password: None,
            session_ttl_hours: default_session_ttl_hours(),
            csrf_ttl_seconds: default_csrf_ttl_seconds(),
            secure_cookies: false,
        }
    }
}

fn default_admin_email() -> String {
    "admin@dealerdrive.local".to_string()
}

fn default_session_ttl_hours() -> i64 {
    24 * 7
}

fn default_csrf_ttl_seconds() -> u64 {
    30 * 60
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Requests per window for general API endpoints
    #[serde(default = "default_api_requests")]
    pub api_requests_per_window: u32,
    /// Requests per window for login/registration endpoints
    #[serde(default = "default_auth_requests")]
    pub auth_requests_per_window: u32,
    #[serde(default = "default_window_seconds")]
    pub window_seconds: u64,
    /// Seconds between sweeps of stale limiter entries
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

fn default_true() -> bool {
    true
}

fn default_api_requests() -> u32 {
    120
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
pub struct BookingConfig {
    /// Slot labels a test drive can be booked for
    #[serde(default = "default_time_slots")]
    pub time_slots: Vec<String>,
}

impl Default for BookingConfig {
    fn default() -> Self {
        Self {
            time_slots: default_time_slots(),
        }
    }
}

pub fn default_time_slots() -> Vec<String> {
    ["09:00", "10:00", "11:00", "12:00", "14:00", "15:00", "16:00", "17:00"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

#[derive(Debug, Clone, Deserialize)]
pub struct SeedConfig {
    /// Insert a handful of demo cars when the catalog is empty
    #[serde(default = "default_true")]
    pub demo_cars: bool,
}

impl Default for SeedConfig {
    fn default() -> Self {
        Self { demo_cars: true }
    }
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

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            info!("Loading configuration from {}", path.display());
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            Self::parse(&content)
        } else {
            info!("No config file found, using defaults");
            Ok(Config::default())
        }
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(content).with_context(|| "Failed to parse configuration file")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.booking.time_slots.is_empty() {
            anyhow::bail!("booking.time_slots must contain at least one slot");
        }
        for slot in &self.booking.time_slots {
            if chrono::NaiveTime::parse_from_str(slot, "%H:%M").is_err() {
                anyhow::bail!("Invalid time slot '{}', expected HH:MM", slot);
            }
        }
        if self.auth.session_ttl_hours <= 0 {
            anyhow::bail!("auth.session_ttl_hours must be positive");
        }
        Ok(())
    }
}
