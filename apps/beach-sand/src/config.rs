use std::time::Duration;
use thiserror::Error;

use crate::cache::DEFAULT_TILE_CAPACITY;
use crate::session::{DEFAULT_SERVER, RemoteError, SessionConfig};
use crate::sync::SyncConfig;
use crate::world::DEFAULT_CLIENT_TAG;

/// Smallest cache that still holds a full-screen prefetch on a large
/// terminal.
pub const MIN_TILE_CAPACITY: usize = 64;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0}")]
    Session(#[from] RemoteError),
    #[error("{name} must be greater than zero")]
    ZeroDuration { name: &'static str },
    #[error("max flush attempts must be at least 1")]
    ZeroAttempts,
    #[error("tile cache must hold at least {min} tiles (got {0})", min = MIN_TILE_CAPACITY)]
    CacheTooSmall(usize),
    #[error("client tag must be non-empty printable text")]
    InvalidClientTag,
}

/// Fully resolved client settings.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub session: SessionConfig,
    pub sync: SyncConfig,
    pub cache_capacity: usize,
    pub client_tag: String,
}

impl ClientConfig {
    pub fn new(server: &str, room: Option<&str>) -> Result<Self, ConfigError> {
        Ok(Self {
            session: SessionConfig::new(server, room)?,
            sync: SyncConfig::default(),
            cache_capacity: DEFAULT_TILE_CAPACITY,
            client_tag: DEFAULT_CLIENT_TAG.to_string(),
        })
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.session = self.session.with_request_timeout(timeout);
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("refresh interval", self.sync.refresh_interval),
            ("flush interval", self.sync.flush_interval),
            ("max backoff", self.sync.max_backoff),
            ("request timeout", self.session.request_timeout()),
        ] {
            if value.is_zero() {
                return Err(ConfigError::ZeroDuration { name });
            }
        }
        if self.sync.max_flush_attempts == 0 {
            return Err(ConfigError::ZeroAttempts);
        }
        if self.cache_capacity < MIN_TILE_CAPACITY {
            return Err(ConfigError::CacheTooSmall(self.cache_capacity));
        }
        let tag = self.client_tag.trim();
        if tag.is_empty() || tag.chars().any(char::is_control) {
            return Err(ConfigError::InvalidClientTag);
        }
        Ok(())
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            session: SessionConfig::new(DEFAULT_SERVER, None)
                .unwrap_or_else(|_| unreachable!("default server url is valid")),
            sync: SyncConfig::default(),
            cache_capacity: DEFAULT_TILE_CAPACITY,
            client_tag: DEFAULT_CLIENT_TAG.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = ClientConfig::default();
        config.validate().unwrap();
        assert_eq!(config.session.world_url().as_str(), DEFAULT_SERVER);
        assert_eq!(config.sync.refresh_interval, Duration::from_secs(3));
        assert_eq!(config.sync.flush_interval, Duration::from_secs(1));
        assert_eq!(config.sync.max_backoff, Duration::from_secs(30));
        assert_eq!(config.session.request_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn room_joins_world_url() {
        let config = ClientConfig::new("http://canvas.test", Some("lobby")).unwrap();
        assert_eq!(config.session.world_url().as_str(), "http://canvas.test/lobby");
    }

    #[test]
    fn zero_interval_is_rejected() {
        let mut config = ClientConfig::default();
        config.sync.flush_interval = Duration::ZERO;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ZeroDuration {
                name: "flush interval"
            })
        ));

        let config = ClientConfig::default().with_request_timeout(Duration::ZERO);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ZeroDuration {
                name: "request timeout"
            })
        ));
    }

    #[test]
    fn small_cache_and_bad_tag_are_rejected() {
        let mut config = ClientConfig::default();
        config.cache_capacity = 8;
        assert!(matches!(config.validate(), Err(ConfigError::CacheTooSmall(8))));

        let mut config = ClientConfig::default();
        config.client_tag = "  ".into();
        assert!(matches!(config.validate(), Err(ConfigError::InvalidClientTag)));
    }
}
