//! Configuration loading.
//!
//! Three layers, lowest to highest precedence: built-in defaults, an
//! optional TOML file, and environment variable overrides. This mirrors
//! the recognized options in the external interface: dispatcher spacing,
//! cron schedules and time zone, Instagram cookie credentials, and the
//! HTTP listen port.

mod env_overrides;

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

fn default_min_time_between_jobs_ms() -> u64 {
    300_000
}

fn default_max_backoff_ms() -> u64 {
    1_800_000
}

fn default_daily_cron() -> String {
    "15 2 * * *".to_string()
}

fn default_refresh_cron() -> String {
    String::new()
}

fn default_tz() -> String {
    "Asia/Kolkata".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_db_path() -> String {
    "~/.profilewatch/profilewatch.db".to_string()
}

fn default_cookie_failure_threshold() -> u32 {
    3
}

fn default_cookie_reset_window_secs() -> u64 {
    3600
}

fn default_cookie_switch_delay_secs() -> u64 {
    5
}

fn default_reel_detail_delay_ms() -> u64 {
    2000
}

fn default_reel_window() -> usize {
    12
}

fn default_scraper_base_url() -> String {
    "http://127.0.0.1:4000".to_string()
}

/// Top-level configuration for the tracking engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub queue: QueueConfig,
    pub schedule: ScheduleConfig,
    pub cookies: CookiesConfig,
    pub pipeline: PipelineConfig,
    pub storage: StorageConfig,
    pub server: ServerConfig,
    pub scraper: ScraperConfig,
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            queue: QueueConfig::default(),
            schedule: ScheduleConfig::default(),
            cookies: CookiesConfig::default(),
            pipeline: PipelineConfig::default(),
            storage: StorageConfig::default(),
            server: ServerConfig::default(),
            scraper: ScraperConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    #[serde(rename = "MIN_TIME_BETWEEN_JOBS_MS")]
    pub min_time_between_jobs_ms: u64,
    #[serde(rename = "MAX_BACKOFF_MS")]
    pub max_backoff_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            min_time_between_jobs_ms: default_min_time_between_jobs_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

impl QueueConfig {
    pub fn base_spacing(&self) -> Duration {
        Duration::from_millis(self.min_time_between_jobs_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    #[serde(rename = "DAILY_CRON_SCHEDULE")]
    pub daily_cron: String,
    #[serde(rename = "REFRESH_CRON_SCHEDULE")]
    pub refresh_cron: String,
    #[serde(rename = "TZ")]
    pub tz: String,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            daily_cron: default_daily_cron(),
            refresh_cron: default_refresh_cron(),
            tz: default_tz(),
        }
    }
}

impl ScheduleConfig {
    pub fn refresh_enabled(&self) -> bool {
        !self.refresh_cron.trim().is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CookiesConfig {
    #[serde(rename = "INSTAGRAM_COOKIES")]
    pub instagram_cookies: Option<String>,
    #[serde(rename = "INSTAGRAM_COOKIES_JSON")]
    pub instagram_cookies_json: Option<String>,
    pub failure_threshold: u32,
    pub reset_window_secs: u64,
    pub switch_delay_secs: u64,
}

impl Default for CookiesConfig {
    fn default() -> Self {
        Self {
            instagram_cookies: None,
            instagram_cookies_json: None,
            failure_threshold: default_cookie_failure_threshold(),
            reset_window_secs: default_cookie_reset_window_secs(),
            switch_delay_secs: default_cookie_switch_delay_secs(),
        }
    }
}

impl CookiesConfig {
    pub fn reset_window(&self) -> Duration {
        Duration::from_secs(self.reset_window_secs)
    }

    pub fn switch_delay(&self) -> Duration {
        Duration::from_secs(self.switch_delay_secs)
    }

    /// Resolve the configured credential list: a JSON array takes
    /// precedence over the semicolon-separated primary plus numbered
    /// `INSTAGRAM_COOKIES_N` variables collected from the environment.
    pub fn resolve_credentials(&self) -> Result<Vec<String>, ConfigError> {
        if let Some(json) = &self.instagram_cookies_json {
            let list: Vec<String> = serde_json::from_str(json).map_err(|e| {
                ConfigError::InvalidValue {
                    field: "INSTAGRAM_COOKIES_JSON".to_string(),
                    message: e.to_string(),
                }
            })?;
            return Ok(list);
        }

        let mut creds = Vec::new();
        if let Some(primary) = &self.instagram_cookies {
            if !primary.trim().is_empty() {
                creds.push(primary.clone());
            }
        }
        let mut n = 2;
        while let Ok(val) = std::env::var(format!("INSTAGRAM_COOKIES_{n}")) {
            if val.trim().is_empty() {
                break;
            }
            creds.push(val);
            n += 1;
        }
        Ok(creds)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub reel_detail_delay_ms: u64,
    pub reel_window: usize,
    #[serde(rename = "DOWNLOAD_REELS_TO_R2")]
    pub download_reels_to_r2: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            reel_detail_delay_ms: default_reel_detail_delay_ms(),
            reel_window: default_reel_window(),
            download_reels_to_r2: false,
        }
    }
}

impl PipelineConfig {
    pub fn reel_detail_delay(&self) -> Duration {
        Duration::from_millis(self.reel_detail_delay_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub db_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    #[serde(rename = "PORT")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: default_port(),
        }
    }
}

/// Where the pluggable [`crate::scraper::HttpTransport`] sends its
/// requests. Wire formats past this base URL are not part of this
/// crate's contract (see [`crate::scraper::RawFetch`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScraperConfig {
    #[serde(rename = "SCRAPER_BASE_URL")]
    pub base_url: String,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            base_url: default_scraper_base_url(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration: defaults, then an optional TOML file at `path`
    /// (`~` expanded), then environment variable overrides.
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(path) = path {
            let expanded = expand_tilde(path);
            if Path::new(&expanded).exists() {
                let contents = std::fs::read_to_string(&expanded)
                    .map_err(|e| ConfigError::ParseError(e.to_string()))?;
                config = toml::from_str(&contents)
                    .map_err(|e| ConfigError::ParseError(e.to_string()))?;
            } else if path != "~/.profilewatch/config.toml" {
                return Err(ConfigError::FileNotFound(expanded));
            }
        }

        env_overrides::apply(&mut config);
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.queue.min_time_between_jobs_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "MIN_TIME_BETWEEN_JOBS_MS".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        if self.queue.max_backoff_ms < self.queue.min_time_between_jobs_ms {
            return Err(ConfigError::InvalidValue {
                field: "MAX_BACKOFF_MS".to_string(),
                message: "must be >= MIN_TIME_BETWEEN_JOBS_MS".to_string(),
            });
        }
        if self.schedule.tz.parse::<chrono_tz::Tz>().is_err() {
            return Err(ConfigError::InvalidValue {
                field: "TZ".to_string(),
                message: format!("unrecognized time zone: {}", self.schedule.tz),
            });
        }
        Ok(())
    }
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest).to_string_lossy().to_string();
        }
    }
    path.to_string()
}
