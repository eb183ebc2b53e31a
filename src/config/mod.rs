//! Application configuration
//!
//! Values are layered: built-in defaults, then the TOML file, then
//! `RADIO_RECORDER__SECTION__KEY` environment variables.

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::errors::{AppError, AppResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub web: WebConfig,
    pub storage: StorageConfig,
    pub recorder: RecorderConfig,
    pub scheduler: SchedulerConfig,
    pub watchdog: WatchdogConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
    #[serde(default)]
    pub notifications: NotificationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub recordings_path: PathBuf,
    pub default_extension: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecorderConfig {
    pub ffmpeg_command: String,
    pub ffprobe_command: String,
    pub max_attempts: u32,
    pub retry_backoff_seconds: u64,
    pub reconnect_delay_max_seconds: u64,
    /// Extra wall-clock time a capture process gets before it is killed
    pub timeout_grace_seconds: u64,
    pub max_error_length: usize,
    /// Longest capture a request may ask for
    pub max_duration_seconds: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub tick_interval_millis: u64,
    /// IANA zone used for recurrence rules and episode filenames
    pub timezone: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchdogConfig {
    pub interval_seconds: u64,
    pub grace_seconds: u64,
    pub completion_ratio: f64,
    pub completion_min_bytes: u64,
    pub min_remaining_seconds: i64,
    pub overdue_seconds: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeliveryConfig {
    pub copy_path: Option<PathBuf>,
    pub webdav: Option<WebDavConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebDavConfig {
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    #[serde(default)]
    pub remote_path: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotificationConfig {
    pub url: Option<String>,
    pub token: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://./radio-recorder.db".to_string(),
                max_connections: Some(10),
            },
            web: WebConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
            },
            storage: StorageConfig {
                recordings_path: PathBuf::from("./recordings"),
                default_extension: ".mp3".to_string(),
            },
            recorder: RecorderConfig::default(),
            scheduler: SchedulerConfig::default(),
            watchdog: WatchdogConfig::default(),
            delivery: DeliveryConfig::default(),
            notifications: NotificationConfig::default(),
        }
    }
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            ffmpeg_command: "ffmpeg".to_string(),
            ffprobe_command: "ffprobe".to_string(),
            max_attempts: 3,
            retry_backoff_seconds: 5,
            reconnect_delay_max_seconds: 30,
            timeout_grace_seconds: 120,
            max_error_length: 500,
            max_duration_seconds: 24 * 60 * 60,
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_millis: 1000,
            timezone: "UTC".to_string(),
        }
    }
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            interval_seconds: 300,
            grace_seconds: 120,
            completion_ratio: 0.8,
            completion_min_bytes: 10 * 1024 * 1024,
            min_remaining_seconds: 30,
            overdue_seconds: 2 * 60 * 60,
        }
    }
}

impl RecorderConfig {
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_secs(self.retry_backoff_seconds)
    }
}

impl SchedulerConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_millis.max(10))
    }

    pub fn timezone(&self) -> AppResult<Tz> {
        self.timezone.parse::<Tz>().map_err(|e| {
            AppError::configuration(format!("unknown timezone '{}': {}", self.timezone, e))
        })
    }
}

impl WatchdogConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds.max(1))
    }
}

impl Config {
    /// Load configuration from defaults, an optional TOML file and the environment
    pub fn load(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref();
        let defaults = config::Config::try_from(&Self::default())
            .map_err(|e| AppError::configuration(e.to_string()))?;

        let settings = config::Config::builder()
            .add_source(defaults)
            .add_source(config::File::new(&path.to_string_lossy(), config::FileFormat::Toml).required(false))
            .add_source(
                config::Environment::with_prefix("RADIO_RECORDER")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| AppError::configuration(e.to_string()))?;

        let config: Self = settings
            .try_deserialize()
            .map_err(|e| AppError::configuration(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the recorder cannot operate with
    pub fn validate(&self) -> AppResult<()> {
        self.scheduler.timezone()?;

        if self.recorder.max_attempts == 0 {
            return Err(AppError::configuration("recorder.max_attempts must be at least 1"));
        }
        if self.recorder.max_duration_seconds <= 0 {
            return Err(AppError::configuration(
                "recorder.max_duration_seconds must be positive",
            ));
        }
        let ratio = self.watchdog.completion_ratio;
        if !(ratio > 0.0 && ratio <= 1.0) {
            return Err(AppError::configuration(format!(
                "watchdog.completion_ratio must be in (0, 1], got {ratio}"
            )));
        }
        if !self.storage.default_extension.starts_with('.') {
            return Err(AppError::configuration(
                "storage.default_extension must start with '.'",
            ));
        }
        Ok(())
    }
}
