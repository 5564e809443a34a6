use std::env;
use std::path::PathBuf;
use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use crate::queue::{ConfigValidationError, QueueConfig};

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Public API key (company id) that owns the queue
    pub api_key: String,
    #[serde(default)]
    pub queue: QueueSettings,
    #[serde(default)]
    pub storage: StorageSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueueSettings {
    /// Capacity of the normal lane
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,
    /// Retries allowed after the first attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Idle sleep between processing cycles, in seconds
    #[serde(default = "default_flush_interval_secs")]
    pub flush_interval_secs: f64,
    #[serde(default = "default_min_backoff_secs")]
    pub min_backoff_secs: f64,
    #[serde(default = "default_max_backoff_secs")]
    pub max_backoff_secs: f64,
    #[serde(default)]
    pub jitter_min_secs: u64,
    #[serde(default = "default_jitter_max_secs")]
    pub jitter_max_secs: u64,
    /// Add random jitter on top of rate-limit backoff
    #[serde(default)]
    pub apply_jitter: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageSettings {
    /// Directory holding the persisted queue files
    #[serde(default = "default_storage_directory")]
    pub directory: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingSettings {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

fn default_max_queue_size() -> usize {
    200
}

fn default_max_retries() -> u32 {
    50
}

fn default_flush_interval_secs() -> f64 {
    10.0
}

fn default_min_backoff_secs() -> f64 {
    1.0
}

fn default_max_backoff_secs() -> f64 {
    180.0 // 3 minutes
}

fn default_jitter_max_secs() -> u64 {
    9
}

fn default_storage_directory() -> PathBuf {
    PathBuf::from(".klaviyo")
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if exists
        let _ = dotenvy::dotenv();

        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Config::builder()
            .set_default("queue.max_queue_size", 200)?
            .set_default("queue.max_retries", 50)?
            .set_default("queue.flush_interval_secs", 10.0)?
            .set_default("storage.directory", ".klaviyo")?
            .set_default("logging.level", "info")?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // KLAVIYO__API_KEY, KLAVIYO__QUEUE__MAX_RETRIES, etc.
            .add_source(
                Environment::with_prefix("KLAVIYO")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }
}

impl QueueSettings {
    /// Convert to the runtime queue configuration, rejecting inconsistent values.
    pub fn to_queue_config(&self) -> Result<QueueConfig, ConfigValidationError> {
        let config = QueueConfig {
            max_queue_size: self.max_queue_size,
            max_retries: self.max_retries,
            flush_interval: secs_to_duration("flush_interval_secs", self.flush_interval_secs)?,
            min_backoff: secs_to_duration("min_backoff_secs", self.min_backoff_secs)?,
            max_backoff: secs_to_duration("max_backoff_secs", self.max_backoff_secs)?,
            jitter_range: self.jitter_min_secs..=self.jitter_max_secs,
            apply_jitter: self.apply_jitter,
        };
        config.validate()?;
        Ok(config)
    }
}

fn secs_to_duration(field: &'static str, secs: f64) -> Result<Duration, ConfigValidationError> {
    Duration::try_from_secs_f64(secs).map_err(|_| ConfigValidationError::InvalidDuration {
        field,
        value: secs,
    })
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            max_queue_size: default_max_queue_size(),
            max_retries: default_max_retries(),
            flush_interval_secs: default_flush_interval_secs(),
            min_backoff_secs: default_min_backoff_secs(),
            max_backoff_secs: default_max_backoff_secs(),
            jitter_min_secs: 0,
            jitter_max_secs: default_jitter_max_secs(),
            apply_jitter: false,
        }
    }
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            directory: default_storage_directory(),
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}
