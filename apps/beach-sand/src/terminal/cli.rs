use clap::{Args, Parser};
use std::path::PathBuf;
use std::time::Duration;

use crate::cache::DEFAULT_TILE_CAPACITY;
use crate::config::{ClientConfig, ConfigError};
use crate::session::{DEFAULT_REQUEST_TIMEOUT, DEFAULT_SERVER};
use crate::sync::{DEFAULT_FLUSH_INTERVAL, DEFAULT_MAX_FLUSH_ATTEMPTS, DEFAULT_REFRESH_INTERVAL};
use crate::telemetry::logging::{LogConfig, LogLevel};
use crate::world::DEFAULT_CLIENT_TAG;

#[derive(Parser, Debug)]
#[command(
    name = "beach-sand",
    about = "🏖️  Wander and write on a shared infinite text canvas",
    author,
    version
)]
pub struct Cli {
    #[arg(value_name = "ROOM", help = "Sub-room path appended to the server URL")]
    pub room: Option<String>,

    #[arg(
        long,
        env = "BEACH_SAND_SERVER",
        default_value = DEFAULT_SERVER,
        help = "Base URL of the canvas service"
    )]
    pub server: String,

    #[command(flatten)]
    pub logging: LoggingArgs,

    #[command(flatten)]
    pub sync: SyncArgs,
}

#[derive(Args, Debug, Clone)]
pub struct LoggingArgs {
    #[arg(
        long = "log-level",
        value_enum,
        env = "BEACH_SAND_LOG_LEVEL",
        default_value_t = LogLevel::Warn,
        help = "Minimum log level (error, warn, info, debug, trace)"
    )]
    pub level: LogLevel,

    #[arg(
        long = "log-file",
        value_name = "PATH",
        env = "BEACH_SAND_LOG_FILE",
        help = "Write structured logs to the specified file"
    )]
    pub file: Option<PathBuf>,
}

impl LoggingArgs {
    pub fn to_config(&self) -> LogConfig {
        LogConfig {
            level: self.level,
            file: self.file.clone(),
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct SyncArgs {
    #[arg(
        long = "refresh-secs",
        env = "BEACH_SAND_REFRESH_SECS",
        value_name = "SECS",
        default_value_t = DEFAULT_REFRESH_INTERVAL.as_secs_f64(),
        help = "Seconds between tile refreshes"
    )]
    pub refresh_secs: f64,

    #[arg(
        long = "flush-secs",
        env = "BEACH_SAND_FLUSH_SECS",
        value_name = "SECS",
        default_value_t = DEFAULT_FLUSH_INTERVAL.as_secs_f64(),
        help = "Seconds between edit flushes"
    )]
    pub flush_secs: f64,

    #[arg(
        long = "request-timeout-secs",
        env = "BEACH_SAND_REQUEST_TIMEOUT_SECS",
        value_name = "SECS",
        default_value_t = DEFAULT_REQUEST_TIMEOUT.as_secs_f64(),
        help = "Per-request network timeout"
    )]
    pub request_timeout_secs: f64,

    #[arg(
        long = "max-flush-attempts",
        value_name = "N",
        default_value_t = DEFAULT_MAX_FLUSH_ATTEMPTS,
        help = "Failed sends after which a batch of edits is dropped"
    )]
    pub max_flush_attempts: u32,

    #[arg(
        long = "cache-tiles",
        value_name = "N",
        default_value_t = DEFAULT_TILE_CAPACITY,
        help = "Number of tiles kept in the local cache"
    )]
    pub cache_tiles: usize,

    #[arg(
        long = "client-tag",
        env = "BEACH_SAND_CLIENT_TAG",
        value_name = "TAG",
        default_value = DEFAULT_CLIENT_TAG,
        help = "Tag attached to every edit sent to the server"
    )]
    pub client_tag: String,
}

impl Cli {
    /// Resolve arguments into a validated [`ClientConfig`].
    pub fn client_config(&self) -> Result<ClientConfig, ConfigError> {
        let mut config = ClientConfig::new(&self.server, self.room.as_deref())?
            .with_request_timeout(secs(self.sync.request_timeout_secs, "request timeout")?);
        config.sync.refresh_interval = secs(self.sync.refresh_secs, "refresh interval")?;
        config.sync.flush_interval = secs(self.sync.flush_secs, "flush interval")?;
        config.sync.max_flush_attempts = self.sync.max_flush_attempts;
        config.cache_capacity = self.sync.cache_tiles;
        config.client_tag = self.sync.client_tag.trim().to_string();
        config.validate()?;
        Ok(config)
    }
}

fn secs(value: f64, name: &'static str) -> Result<Duration, ConfigError> {
    Duration::try_from_secs_f64(value).map_err(|_| ConfigError::ZeroDuration { name })
}
