use anyhow::Result;
use config::{Config, File, FileFormat};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    #[serde(default)]
    pub sink: SinkConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TelemetryConfig {
    /// Inactivity window before a device buffer is flushed.
    #[serde(default = "default_debounce_secs")]
    pub debounce_secs: u64,
    /// Flusher scan interval.
    #[serde(default = "default_tick_secs")]
    pub tick_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SinkConfig {
    /// When false, flushed records stay in the in-memory logs only.
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_sink_url")]
    pub url: String,
    #[serde(default = "default_sink_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_debounce_secs() -> u64 {
    15
}

fn default_tick_secs() -> u64 {
    1
}

fn default_sink_url() -> String {
    "http://localhost:1880/api/ecowatt_push".to_string()
}

fn default_sink_timeout_secs() -> u64 {
    2
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            debounce_secs: default_debounce_secs(),
            tick_secs: default_tick_secs(),
        }
    }
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: default_sink_url(),
            timeout_secs: default_sink_timeout_secs(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            telemetry: TelemetryConfig::default(),
            sink: SinkConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load from a TOML file; a missing file yields the defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }

        let config = Config::builder()
            .add_source(File::new(
                path.to_str()
                    .ok_or_else(|| anyhow::anyhow!("Invalid config path"))?,
                FileFormat::Toml,
            ))
            .build()?;

        Ok(config.try_deserialize()?)
    }
}
