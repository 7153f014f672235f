//! Configuration management for the frame relay.
//!
//! Configuration is loaded from configuration files and environment variables
//! and is immutable for the lifetime of one capture session.

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration for a capture session.
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Frame capture configuration
    pub capture: CaptureConfig,

    /// Upload endpoint configuration
    pub upload: UploadConfig,

    /// Shutdown drain configuration
    #[serde(default)]
    pub drain: DrainConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Metrics exporter configuration
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Frame capture configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CaptureConfig {
    /// Live video source URL (e.g., "rtsp://camera:554/stream")
    pub source_url: String,

    /// Directory holding frames that have not been delivered yet
    pub store_path: PathBuf,

    /// Period between capture ticks in milliseconds
    #[serde(default = "default_capture_interval_ms")]
    pub interval_ms: u64,

    /// Path or name of the capture tool binary
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: String,

    /// Output frame width
    #[serde(default = "default_width")]
    pub width: u32,

    /// Output frame height
    #[serde(default = "default_height")]
    pub height: u32,

    /// JPEG quality scale passed to the tool (1 = best, 31 = worst)
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u32,

    /// RTSP transport protocol (tcp or udp)
    #[serde(default = "default_transport")]
    pub transport: String,

    /// Upper bound on a single capture invocation in milliseconds
    #[serde(default = "default_capture_timeout_ms")]
    pub timeout_ms: u64,
}

/// Remote ingestion endpoint configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct UploadConfig {
    /// Full URL of the image upload endpoint
    pub endpoint: String,

    /// API credential sent in the `X-API-KEY` header
    pub api_key: String,

    /// Store identifier attached to every frame
    #[serde(default = "default_store_id")]
    pub store_id: String,

    /// Period between upload ticks in milliseconds
    #[serde(default = "default_upload_interval_ms")]
    pub interval_ms: u64,

    /// Request timeout in milliseconds
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Connection timeout in milliseconds
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

/// Drain behaviour on shutdown.
#[derive(Debug, Clone, Deserialize)]
pub struct DrainConfig {
    /// Maximum number of upload passes before giving up
    #[serde(default = "default_max_passes")]
    pub max_passes: u32,

    /// Initial delay between failed drain passes in milliseconds
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,

    /// Maximum delay between failed drain passes in milliseconds
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,

    /// Re-enqueue frames left on disk by a previous session when starting
    #[serde(default = "default_recover_on_start")]
    pub recover_on_start: bool,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format (json, pretty)
    #[serde(default = "default_log_format")]
    pub format: String,
}

/// Prometheus exporter configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_capture_interval_ms() -> u64 {
    30_000
}
fn default_ffmpeg_path() -> String {
    "ffmpeg".to_string()
}
fn default_width() -> u32 {
    1280
}
fn default_height() -> u32 {
    720
}
fn default_jpeg_quality() -> u32 {
    1
}
fn default_transport() -> String {
    "tcp".to_string()
}
fn default_capture_timeout_ms() -> u64 {
    20_000
}
fn default_store_id() -> String {
    "111".to_string()
}
fn default_upload_interval_ms() -> u64 {
    300_000
}
fn default_request_timeout_ms() -> u64 {
    30_000
}
fn default_connect_timeout_ms() -> u64 {
    10_000
}
fn default_max_passes() -> u32 {
    5
}
fn default_retry_base_delay_ms() -> u64 {
    1000
}
fn default_retry_max_delay_ms() -> u64 {
    10_000
}
fn default_recover_on_start() -> bool {
    true
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "pretty".to_string()
}
fn default_metrics_port() -> u16 {
    9090
}

impl Default for DrainConfig {
    fn default() -> Self {
        Self {
            max_passes: default_max_passes(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
            recover_on_start: default_recover_on_start(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_metrics_port(),
        }
    }
}

impl PipelineConfig {
    /// Load configuration from file and environment variables.
    ///
    /// Configuration is loaded in the following order (later sources override earlier):
    /// 1. Default config file (config/default.toml)
    /// 2. Environment-specific config (config/{env}.toml)
    /// 3. Environment variables (prefixed with RELAY__)
    pub fn load() -> Result<Self, ConfigError> {
        let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let config = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // e.g. RELAY__UPLOAD__API_KEY
            .add_source(
                Environment::with_prefix("RELAY")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Create configuration from environment variables only.
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(
                Environment::with_prefix("RELAY")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.capture.source_url.is_empty() {
            return Err(ConfigValidationError::MissingField(
                "capture.source_url".to_string(),
            ));
        }

        if self.capture.store_path.as_os_str().is_empty() {
            return Err(ConfigValidationError::MissingField(
                "capture.store_path".to_string(),
            ));
        }

        if self.capture.interval_ms == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "capture.interval_ms".to_string(),
                message: "Interval must be greater than 0".to_string(),
            });
        }

        if self.capture.timeout_ms == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "capture.timeout_ms".to_string(),
                message: "Timeout must be greater than 0".to_string(),
            });
        }

        if self.capture.width == 0 || self.capture.height == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "capture.width/height".to_string(),
                message: "Dimensions must be greater than 0".to_string(),
            });
        }

        if !matches!(self.capture.transport.as_str(), "tcp" | "udp") {
            return Err(ConfigValidationError::InvalidValue {
                field: "capture.transport".to_string(),
                message: "Transport must be tcp or udp".to_string(),
            });
        }

        if self.upload.endpoint.is_empty() {
            return Err(ConfigValidationError::MissingField(
                "upload.endpoint".to_string(),
            ));
        }
        if !self.upload.endpoint.starts_with("http://")
            && !self.upload.endpoint.starts_with("https://")
        {
            return Err(ConfigValidationError::InvalidValue {
                field: "upload.endpoint".to_string(),
                message: "Endpoint must start with http:// or https://".to_string(),
            });
        }

        if self.upload.api_key.is_empty() {
            return Err(ConfigValidationError::MissingField(
                "upload.api_key".to_string(),
            ));
        }

        if self.upload.interval_ms == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "upload.interval_ms".to_string(),
                message: "Interval must be greater than 0".to_string(),
            });
        }

        if self.upload.request_timeout_ms == 0 || self.upload.connect_timeout_ms == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "upload.request_timeout_ms/connect_timeout_ms".to_string(),
                message: "Timeouts must be greater than 0".to_string(),
            });
        }

        if self.drain.max_passes == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "drain.max_passes".to_string(),
                message: "At least one drain pass is required".to_string(),
            });
        }

        Ok(())
    }
}

impl CaptureConfig {
    /// Get capture period as Duration.
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Get capture invocation bound as Duration.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl UploadConfig {
    /// Get upload period as Duration.
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Get request timeout as Duration.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Get connection timeout as Duration.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl DrainConfig {
    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn retry_max_delay(&self) -> Duration {
        Duration::from_millis(self.retry_max_delay_ms)
    }
}

/// Configuration validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

#[cfg(test)]
pub(crate) fn test_config(store_path: PathBuf) -> PipelineConfig {
    PipelineConfig {
        capture: CaptureConfig {
            source_url: "rtsp://camera:554/stream".to_string(),
            store_path,
            interval_ms: 30_000,
            ffmpeg_path: "ffmpeg".to_string(),
            width: 1280,
            height: 720,
            jpeg_quality: 1,
            transport: "tcp".to_string(),
            timeout_ms: 20_000,
        },
        upload: UploadConfig {
            endpoint: "http://localhost:8000/api/v1/analytics/upload-images/".to_string(),
            api_key: "test-key".to_string(),
            store_id: "111".to_string(),
            interval_ms: 300_000,
            request_timeout_ms: 30_000,
            connect_timeout_ms: 10_000,
        },
        drain: DrainConfig::default(),
        logging: LoggingConfig::default(),
        metrics: MetricsConfig::default(),
    }
}
