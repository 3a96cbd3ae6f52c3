//! Process configuration and logging bootstrap.
//!
//! Configuration is merged from a TOML file and `HDEC_`-prefixed environment
//! variables (nested keys separated by `__`, e.g. `HDEC_SERVER__PORT`).
//! Every field has a default, so the daemon also starts with no file at all.

use std::path::{Path, PathBuf};

use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use crate::error::{BridgeError, BridgeResult};
use crate::link::DEFAULT_RETRY_COOLDOWN;
use crate::transport::DEFAULT_BUS_TIMEOUT;
use crate::wallbox::DEFAULT_CACHE_TTL;

/// HTTP listener settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Directory with templated HTML pages served by the fallback route.
    pub assets_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8082,
            assets_dir: PathBuf::from("assets"),
        }
    }
}

/// Serial bus and adapter timing settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WallboxConfig {
    /// Serial device carrying the RS-485 bus.
    pub device: String,
    /// Number of wallboxes; client ids 1..=instances are served.
    pub instances: usize,
    /// Per-call bus timeout in milliseconds.
    pub bus_timeout_ms: u64,
    /// Register cache time-to-live in milliseconds.
    pub cache_ttl_ms: u64,
    /// Reconnect cooldown after a failed attempt, in seconds.
    pub retry_cooldown_secs: u64,
}

impl Default for WallboxConfig {
    fn default() -> Self {
        Self {
            device: "/dev/ttyUSB0".to_string(),
            instances: 5,
            bus_timeout_ms: DEFAULT_BUS_TIMEOUT.as_millis() as u64,
            cache_ttl_ms: DEFAULT_CACHE_TTL.as_millis() as u64,
            retry_cooldown_secs: DEFAULT_RETRY_COOLDOWN.as_secs(),
        }
    }
}

/// Log level and optional log file.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Level or full `tracing` filter directive.
    pub level: Option<String>,
    /// Append to this file instead of stderr.
    pub file: Option<PathBuf>,
}

/// Top-level configuration of the bridge daemon.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub server: ServerConfig,
    pub wallbox: WallboxConfig,
    pub logging: LoggingConfig,
}

/// Load the configuration, merging the TOML file (if present) with
/// environment overrides.
pub fn load(path: &Path) -> BridgeResult<BridgeConfig> {
    Figment::new()
        .merge(Toml::file(path))
        .merge(Env::prefixed("HDEC_").split("__"))
        .extract()
        .map_err(|err| BridgeError::Config(err.to_string()))
}

/// Initialise tracing from the logging configuration.
///
/// Returns the worker guard of the non-blocking file writer; it must stay
/// alive for the lifetime of the process, or buffered log lines are lost.
pub fn init_logging(config: &LoggingConfig) -> BridgeResult<Option<WorkerGuard>> {
    let level = config.level.as_deref().unwrap_or("info");
    let filter = EnvFilter::try_new(level)
        .map_err(|err| BridgeError::Config(format!("invalid log level {level:?}: {err}")))?;

    match &config.file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|err| {
                    BridgeError::Config(format!("cannot open log file {}: {err}", path.display()))
                })?;
            let (writer, guard) = tracing_appender::non_blocking(file);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .init();
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
            Ok(None)
        }
    }
}
